//! Core library for the mood based music recommender.
//!
//! A session captures a single camera frame after a short countdown, scores
//! the facial expressions in it, maps the strongest one to a music mood and
//! asks the song service for matching tracks. Each module owns one piece of
//! that pipeline; [`session`] ties them together behind an actor task.

pub mod analysis;
pub mod camera;
pub mod capture;
pub mod catalog;
pub mod config;
pub mod detector;
pub mod error;
pub mod mapping;
pub mod session;
pub mod timeline;

pub use analysis::{Classification, MoodClassifier, DEFAULT_CONFIDENCE_THRESHOLD};
pub use camera::{
    CameraBackend, CameraManager, FacingMode, SyntheticCamera, SyntheticStream, VideoConstraints,
    VideoStream,
};
pub use capture::{FrameCapturer, FrameImage};
pub use catalog::{HttpSongCatalog, InMemorySongCatalog, Playlist, Song, SongCatalog};
pub use config::{AppConfig, CatalogConfig, SessionConfig};
pub use detector::{ExpressionDetector, FaceDetection, ScriptedDetector, ScriptedOutcome};
pub use error::{CatalogError, DeviceError, InferenceError, MoodError, Result};
pub use mapping::{mood_for_label, Expression, ExpressionScores, Mood};
pub use session::{
    Collaborators, DetectionResult, ModelState, Phase, SessionController, SessionHandle,
    SessionView,
};
pub use timeline::{TimerKind, TimerSet};
