//! Facial expression inference capability.
//!
//! The inference itself lives outside this crate. [`ExpressionDetector`] is
//! the seam the session controller calls through; [`ScriptedDetector`] is an
//! in-process implementation that replays predetermined outcomes.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ExpressionScores, FrameImage, InferenceError};

/// Model bundles the detector has to load before it can run.
pub const MODEL_BUNDLES: [&str; 2] = ["tiny_face_detector", "face_expression_net"];

/// One face found in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub expressions: ExpressionScores,
}

#[async_trait]
pub trait ExpressionDetector: Send + Sync {
    /// Loads every model bundle. Called once when a session mounts.
    async fn load_models(&self) -> Result<(), InferenceError>;

    /// Finds faces in `frame` and scores their expressions. An empty result
    /// means no face was visible.
    async fn detect_expressions(
        &self,
        frame: &FrameImage,
    ) -> Result<Vec<FaceDetection>, InferenceError>;
}

/// Outcome replayed by [`ScriptedDetector`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    Faces(Vec<ExpressionScores>),
    NoFace,
    Fail(String),
}

impl ScriptedOutcome {
    pub fn face(scores: ExpressionScores) -> Self {
        Self::Faces(vec![scores])
    }
}

#[derive(Debug)]
struct Script {
    queue: VecDeque<ScriptedOutcome>,
    fallback: ScriptedOutcome,
}

#[derive(Debug)]
struct Shared {
    script: Mutex<Script>,
    latency: Duration,
    load_delay: Duration,
    load_failure: Option<String>,
    loaded: AtomicBool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Detector that answers from a queue of [`ScriptedOutcome`]s, falling back
/// to a fixed outcome once the queue is empty.
#[derive(Debug, Clone)]
pub struct ScriptedDetector {
    shared: Arc<Shared>,
}

impl ScriptedDetector {
    pub fn new(fallback: ScriptedOutcome) -> Self {
        Self::builder(fallback).build()
    }

    pub fn builder(fallback: ScriptedOutcome) -> ScriptedDetectorBuilder {
        ScriptedDetectorBuilder {
            queue: VecDeque::new(),
            fallback,
            latency: Duration::from_millis(120),
            load_delay: Duration::from_millis(100),
            load_failure: None,
        }
    }

    /// Appends an outcome for a future call.
    pub fn push(&self, outcome: ScriptedOutcome) {
        lock(&self.shared.script).queue.push_back(outcome);
    }

    /// Detection calls made so far.
    pub fn calls(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }

    /// Highest number of detection calls that were running at once.
    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.loaded.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        let mut script = lock(&self.shared.script);
        match script.queue.pop_front() {
            Some(outcome) => outcome,
            None => script.fallback.clone(),
        }
    }
}

fn lock(script: &Mutex<Script>) -> MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ExpressionDetector for ScriptedDetector {
    async fn load_models(&self) -> Result<(), InferenceError> {
        tokio::time::sleep(self.shared.load_delay).await;
        if let Some(reason) = &self.shared.load_failure {
            return Err(InferenceError::ModelLoad(reason.clone()));
        }
        self.shared.loaded.store(true, Ordering::SeqCst);
        debug!(bundles = ?MODEL_BUNDLES, "scripted detector models loaded");
        Ok(())
    }

    async fn detect_expressions(
        &self,
        frame: &FrameImage,
    ) -> Result<Vec<FaceDetection>, InferenceError> {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.shared.in_flight);

        if !self.is_loaded() {
            return Err(InferenceError::ModelsNotLoaded);
        }

        tokio::time::sleep(self.shared.latency).await;
        debug!(width = frame.width(), height = frame.height(), "scripted detection");

        match self.next_outcome() {
            ScriptedOutcome::Faces(faces) => Ok(faces
                .into_iter()
                .map(|expressions| FaceDetection { expressions })
                .collect()),
            ScriptedOutcome::NoFace => Ok(Vec::new()),
            ScriptedOutcome::Fail(reason) => Err(InferenceError::Failed(reason)),
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder for [`ScriptedDetector`].
#[derive(Debug)]
pub struct ScriptedDetectorBuilder {
    queue: VecDeque<ScriptedOutcome>,
    fallback: ScriptedOutcome,
    latency: Duration,
    load_delay: Duration,
    load_failure: Option<String>,
}

impl ScriptedDetectorBuilder {
    pub fn then(mut self, outcome: ScriptedOutcome) -> Self {
        self.queue.push_back(outcome);
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn failing_to_load(mut self, reason: impl Into<String>) -> Self {
        self.load_failure = Some(reason.into());
        self
    }

    pub fn build(self) -> ScriptedDetector {
        ScriptedDetector {
            shared: Arc::new(Shared {
                script: Mutex::new(Script {
                    queue: self.queue,
                    fallback: self.fallback,
                }),
                latency: self.latency,
                load_delay: self.load_delay,
                load_failure: self.load_failure,
                loaded: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }
}
