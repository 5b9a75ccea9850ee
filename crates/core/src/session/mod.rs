//! Mood detection session.
//!
//! A session is mounted once per UI instance. It runs as a single actor task
//! that owns the camera, every timer and every in-flight request; callers
//! talk to it through a [`SessionHandle`] and observe it through
//! [`SessionView`] snapshots.
//!
//! ```text
//! Idle ──trigger──▶ AcquiringCamera ──bound──▶ CameraReady ──ready──▶ Countdown
//!                                                                      │ 0
//!   ▲                                                                  ▼
//!   └──auto-shutdown── ResultClassified ◀──face── Detecting ──none──▶ ResultNoFace
//!                                                    │ error
//!                                                    ▼
//!                                               ResultError
//! ```

use std::{fmt, sync::Arc};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    camera::CameraBackend, catalog::SongCatalog, detector::ExpressionDetector, Classification,
    FrameImage, MoodError, Playlist, Result, TimerKind,
};

mod controller;

pub use controller::SessionController;

pub const CAMERA_ACCESS_FAILED: &str = "Unable to access camera";
pub const CAMERA_START_FAILED: &str = "Camera did not start";
pub const CAMERA_NOT_READY: &str = "Camera not ready. Try again.";
pub const DETECTION_FAILED: &str = "Detection failed";
pub const MODEL_LOAD_FAILED: &str = "Failed to load face detection models";
pub const NO_FACE_DETECTED: &str = "No face detected - Try again!";

/// Where a session currently is in its capture-and-classify cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    AcquiringCamera,
    /// Stream bound, waiting for its first frame.
    CameraReady,
    Countdown {
        remaining: u32,
    },
    Detecting,
    ResultNoFace,
    ResultClassified(Classification),
    ResultError {
        message: String,
    },
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::AcquiringCamera => "acquiring-camera",
            Phase::CameraReady => "camera-ready",
            Phase::Countdown { .. } => "countdown",
            Phase::Detecting => "detecting",
            Phase::ResultNoFace => "result-no-face",
            Phase::ResultClassified(_) => "result-classified",
            Phase::ResultError { .. } => "result-error",
        }
    }

    /// Phases in which a new trigger is ignored. `CameraReady` always has a
    /// readiness wait outstanding, so it counts as well.
    pub fn is_mid_flow(&self) -> bool {
        matches!(
            self,
            Phase::AcquiringCamera
                | Phase::CameraReady
                | Phase::Countdown { .. }
                | Phase::Detecting
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of the last detection attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionResult {
    NoFace,
    Classified(Classification),
}

/// Loading state of the expression models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Loading,
    Ready,
    Failed,
}

/// Snapshot of a session, published after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub phase: Phase,
    pub camera_on: bool,
    pub countdown_remaining: Option<u32>,
    /// Frame the last classification was made on, held while the result is
    /// on screen.
    pub frozen_frame: Option<Arc<FrameImage>>,
    pub detection: Option<DetectionResult>,
    pub message: Option<String>,
    pub armed_timers: Vec<TimerKind>,
    pub inference_pending: bool,
    pub models: ModelState,
}

impl SessionView {
    pub(crate) fn mounted() -> Self {
        Self {
            phase: Phase::Idle,
            camera_on: false,
            countdown_remaining: None,
            frozen_frame: None,
            detection: None,
            message: None,
            armed_timers: Vec::new(),
            inference_pending: false,
            models: ModelState::Loading,
        }
    }

    pub fn classification(&self) -> Option<Classification> {
        match self.detection {
            Some(DetectionResult::Classified(classification)) => Some(classification),
            _ => None,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self.phase {
            Phase::Countdown { .. } => "COUNTDOWN",
            Phase::Detecting => "DETECTING",
            _ => "READY",
        }
    }

    /// Caption for the primary action.
    pub fn action_label(&self) -> String {
        if self.models == ModelState::Loading {
            return "Loading Models...".to_string();
        }
        match self.phase {
            Phase::Countdown { remaining } => format!("Detecting in {remaining}..."),
            Phase::Detecting => "Analyzing Mood...".to_string(),
            _ if !self.camera_on => "Start Listening".to_string(),
            _ => "Detect Mood Now".to_string(),
        }
    }
}

/// Everything a session talks to besides its own state.
#[derive(Clone)]
pub struct Collaborators {
    pub camera: Arc<dyn CameraBackend>,
    pub detector: Arc<dyn ExpressionDetector>,
    pub catalog: Arc<dyn SongCatalog>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

pub(crate) enum Command {
    Trigger,
}

/// Handle to a mounted session.
///
/// Dropping the handle tears the session down; [`unmount`](Self::unmount)
/// does the same and waits for it to finish.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SessionView>,
    playlist: watch::Receiver<Playlist>,
    liveness: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Presses the primary action. Ignored by the session while an attempt
    /// is already under way.
    pub async fn trigger(&self) -> Result<()> {
        self.commands
            .send(Command::Trigger)
            .await
            .map_err(|_| MoodError::msg("mood session is no longer mounted"))
    }

    /// Latest snapshot.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Song list shown next to the session.
    pub fn playlist(&self) -> watch::Receiver<Playlist> {
        self.playlist.clone()
    }

    /// Waits until a snapshot satisfies `predicate`, checking the current
    /// one first.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&SessionView) -> bool,
    ) -> Result<SessionView> {
        let view = self
            .view
            .wait_for(|view| predicate(view))
            .await
            .map_err(|_| MoodError::msg("mood session ended"))?;
        Ok((*view).clone())
    }

    /// Tears the session down and returns its final snapshot.
    pub async fn unmount(mut self) -> SessionView {
        self.liveness.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "mood session task ended abnormally");
            }
        }
        self.view()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.liveness.cancel();
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("phase", &self.view.borrow().phase)
            .field("mounted", &!self.liveness.is_cancelled())
            .finish()
    }
}
