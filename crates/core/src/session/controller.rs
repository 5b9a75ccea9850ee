use std::sync::Arc;

use tokio::{
    sync::{
        mpsc::{self, error::SendError},
        watch,
    },
    task::AbortHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    Collaborators, Command, DetectionResult, ModelState, Phase, SessionHandle, SessionView,
    CAMERA_ACCESS_FAILED, CAMERA_NOT_READY, CAMERA_START_FAILED, DETECTION_FAILED,
    MODEL_LOAD_FAILED, NO_FACE_DETECTED,
};
use crate::{
    camera::{CameraManager, VideoConstraints, VideoStream},
    catalog::SongCatalog,
    detector::{ExpressionDetector, FaceDetection},
    DeviceError, FrameCapturer, FrameImage, InferenceError, Mood, MoodClassifier, Playlist,
    Result, SessionConfig, TimerKind, TimerSet,
};

const COMMAND_BUFFER: usize = 32;

/// Completions of the session's own suspensions. Each one carries the
/// attempt that started it so late arrivals can be recognised.
enum Event {
    ModelsLoaded(std::result::Result<(), InferenceError>),
    CameraOpened {
        attempt: u64,
        result: std::result::Result<Arc<dyn VideoStream>, DeviceError>,
    },
    ReadinessSettled {
        attempt: u64,
        result: Result<()>,
    },
    CountdownTick {
        attempt: u64,
        remaining: u32,
    },
    DetectionFinished {
        attempt: u64,
        frame: Arc<FrameImage>,
        result: std::result::Result<Vec<FaceDetection>, InferenceError>,
    },
    AutoShutdown {
        attempt: u64,
    },
}

impl Event {
    /// Stops the hardware of a stream nobody is going to bind.
    fn discard(self) {
        if let Event::CameraOpened {
            result: Ok(stream), ..
        } = self
        {
            stream.stop_all_tracks();
            debug!("released a camera stream that arrived too late");
        }
    }
}

/// Sends events back to the controller while the session is alive.
#[derive(Clone)]
struct Emitter {
    events: mpsc::UnboundedSender<Event>,
    liveness: CancellationToken,
}

impl Emitter {
    /// Hands the event back when the session has been torn down.
    fn emit(&self, event: Event) -> Option<Event> {
        if self.liveness.is_cancelled() {
            return Some(event);
        }
        self.events.send(event).err().map(|SendError(event)| event)
    }
}

enum PlaylistRequest {
    Recent,
    ForMood(Mood),
}

#[derive(Default)]
struct InFlight {
    models: Option<AbortHandle>,
    acquire: Option<AbortHandle>,
    inference: Option<AbortHandle>,
    fetch: Option<AbortHandle>,
}

impl InFlight {
    fn inference_pending(&self) -> bool {
        self.inference
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Aborts every request. Returns how many were still running.
    fn abort_all(&mut self) -> usize {
        [
            self.models.take(),
            self.acquire.take(),
            self.inference.take(),
            self.fetch.take(),
        ]
        .into_iter()
        .flatten()
        .map(|handle| {
            let running = !handle.is_finished();
            handle.abort();
            running
        })
        .filter(|running| *running)
        .count()
    }
}

/// Actor that owns one mood detection session.
pub struct SessionController {
    config: SessionConfig,
    phase: Phase,
    camera: CameraManager,
    frozen_frame: Option<Arc<FrameImage>>,
    detection: Option<DetectionResult>,
    message: Option<String>,
    models: ModelState,
    timers: TimerSet,
    tasks: InFlight,
    attempt: u64,
    classifier: MoodClassifier,
    capturer: FrameCapturer,
    detector: Arc<dyn ExpressionDetector>,
    catalog: Arc<dyn SongCatalog>,
    liveness: CancellationToken,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedReceiver<Event>,
    emitter: Emitter,
    view: watch::Sender<SessionView>,
    playlist: Arc<watch::Sender<Playlist>>,
}

impl SessionController {
    /// Mounts a new session on the current tokio runtime.
    ///
    /// Model loading and the initial "recent songs" listing start right
    /// away; triggers are ignored until the models have loaded.
    pub fn mount(config: SessionConfig, collaborators: Collaborators) -> SessionHandle {
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (view, view_rx) = watch::channel(SessionView::mounted());
        let (playlist, playlist_rx) = watch::channel(Playlist::default());
        let liveness = CancellationToken::new();

        let constraints = VideoConstraints {
            width: config.video_width,
            height: config.video_height,
            ..VideoConstraints::default()
        };

        let mut controller = Self {
            classifier: MoodClassifier::new(config.confidence_threshold),
            config,
            phase: Phase::Idle,
            camera: CameraManager::new(collaborators.camera, constraints),
            frozen_frame: None,
            detection: None,
            message: None,
            models: ModelState::Loading,
            timers: TimerSet::new(),
            tasks: InFlight::default(),
            attempt: 0,
            capturer: FrameCapturer::new(),
            detector: collaborators.detector,
            catalog: collaborators.catalog,
            liveness: liveness.clone(),
            commands,
            events,
            emitter: Emitter {
                events: events_tx,
                liveness: liveness.clone(),
            },
            view,
            playlist: Arc::new(playlist),
        };

        controller.load_models();
        controller.fetch_playlist(PlaylistRequest::Recent);
        let task = tokio::spawn(controller.run());

        SessionHandle {
            commands: command_tx,
            view: view_rx,
            playlist: playlist_rx,
            liveness,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        info!("mood session mounted");
        self.publish();

        loop {
            tokio::select! {
                _ = self.liveness.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(Command::Trigger) => self.on_trigger(),
                    None => break,
                },
                Some(event) = self.events.recv() => self.on_event(event),
            }
        }

        self.teardown();
    }

    fn on_trigger(&mut self) {
        if self.models == ModelState::Loading {
            debug!("models still loading; trigger ignored");
            return;
        }
        if self.phase.is_mid_flow() {
            debug!(phase = %self.phase, "attempt already under way; trigger ignored");
            return;
        }

        self.attempt += 1;
        self.clear_result();

        let camera_on = match self.camera.stream() {
            Some(stream) => {
                if stream.is_paused() {
                    stream.play();
                }
                true
            }
            None => false,
        };

        if camera_on {
            self.start_countdown();
        } else {
            self.start_acquisition();
        }
        self.publish();
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::ModelsLoaded(result) => self.on_models_loaded(result),
            Event::CameraOpened { attempt, result } => self.on_camera_opened(attempt, result),
            Event::ReadinessSettled { attempt, result } => {
                self.on_readiness_settled(attempt, result)
            }
            Event::CountdownTick { attempt, remaining } => {
                self.on_countdown_tick(attempt, remaining)
            }
            Event::DetectionFinished {
                attempt,
                frame,
                result,
            } => self.on_detection_finished(attempt, frame, result),
            Event::AutoShutdown { attempt } => self.on_auto_shutdown(attempt),
        }
        self.publish();
    }

    fn load_models(&mut self) {
        let detector = self.detector.clone();
        let emitter = self.emitter.clone();
        let task = tokio::spawn(async move {
            let result = detector.load_models().await;
            emitter.emit(Event::ModelsLoaded(result));
        });
        self.tasks.models = Some(task.abort_handle());
    }

    fn on_models_loaded(&mut self, result: std::result::Result<(), InferenceError>) {
        self.tasks.models = None;
        match result {
            Ok(()) => {
                self.models = ModelState::Ready;
                info!("expression models loaded");
            }
            Err(err) => {
                self.models = ModelState::Failed;
                warn!(error = %err, "expression models failed to load");
                self.fail(MODEL_LOAD_FAILED);
            }
        }
    }

    fn start_acquisition(&mut self) {
        self.phase = Phase::AcquiringCamera;
        let attempt = self.attempt;
        let opening = self.camera.acquire();
        let emitter = self.emitter.clone();
        let task = tokio::spawn(async move {
            let result = opening.await;
            if let Some(rejected) = emitter.emit(Event::CameraOpened { attempt, result }) {
                rejected.discard();
            }
        });
        self.tasks.acquire = Some(task.abort_handle());
        info!(attempt, "requesting camera");
    }

    fn on_camera_opened(
        &mut self,
        attempt: u64,
        result: std::result::Result<Arc<dyn VideoStream>, DeviceError>,
    ) {
        if attempt != self.attempt || self.phase != Phase::AcquiringCamera {
            debug!(attempt, current = self.attempt, "stale camera acquisition");
            Event::CameraOpened { attempt, result }.discard();
            return;
        }
        self.tasks.acquire = None;

        match result {
            Ok(stream) => {
                self.camera.bind(stream.clone());
                self.phase = Phase::CameraReady;
                self.await_readiness(stream);
            }
            Err(err) => {
                warn!(error = %err, "camera acquisition failed");
                self.camera.release();
                self.fail(CAMERA_ACCESS_FAILED);
            }
        }
    }

    fn await_readiness(&mut self, stream: Arc<dyn VideoStream>) {
        let attempt = self.attempt;
        let timeout = self.config.readiness_timeout();
        let emitter = self.emitter.clone();
        self.timers.arm(TimerKind::ReadinessTimeout, async move {
            let result = CameraManager::await_ready(stream.as_ref(), timeout).await;
            emitter.emit(Event::ReadinessSettled { attempt, result });
        });
    }

    fn on_readiness_settled(&mut self, attempt: u64, result: Result<()>) {
        if attempt != self.attempt || self.phase != Phase::CameraReady {
            debug!(attempt, "stale readiness signal");
            return;
        }
        self.timers.disarm(TimerKind::ReadinessTimeout);

        match result {
            Ok(()) => {
                info!("camera is producing frames");
                self.start_countdown();
            }
            Err(err) => {
                warn!(error = %err, "camera did not start");
                self.camera.release();
                self.fail(CAMERA_START_FAILED);
            }
        }
    }

    fn start_countdown(&mut self) {
        let ticks = self.config.countdown_ticks;
        let period = self.config.tick_interval();
        let attempt = self.attempt;
        let emitter = self.emitter.clone();

        self.phase = Phase::Countdown { remaining: ticks };
        self.timers.arm(TimerKind::Countdown, async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            for remaining in (0..ticks).rev() {
                interval.tick().await;
                if emitter
                    .emit(Event::CountdownTick { attempt, remaining })
                    .is_some()
                {
                    break;
                }
            }
        });
        info!(attempt, ticks, "countdown started");
    }

    fn on_countdown_tick(&mut self, attempt: u64, remaining: u32) {
        if attempt != self.attempt || !matches!(self.phase, Phase::Countdown { .. }) {
            debug!(attempt, "stale countdown tick");
            return;
        }
        if remaining > 0 {
            self.phase = Phase::Countdown { remaining };
            return;
        }
        self.timers.disarm(TimerKind::Countdown);
        self.start_detection();
    }

    fn start_detection(&mut self) {
        if self.tasks.inference_pending() {
            warn!("an inference call is already in flight");
            return;
        }

        let frame = match self.camera.stream() {
            Some(stream) => self.capturer.capture(stream.as_ref()),
            None => None,
        };
        let Some(frame) = frame else {
            warn!("no frame available for detection");
            // A stream whose tracks have ended cannot recover; the next
            // attempt acquires a fresh one.
            if self.camera.stream().is_some_and(|stream| stream.live_tracks() == 0) {
                self.camera.release();
            }
            self.fail(CAMERA_NOT_READY);
            return;
        };

        let frame = Arc::new(frame);
        let attempt = self.attempt;
        let detector = self.detector.clone();
        let emitter = self.emitter.clone();
        info!(
            attempt,
            width = frame.width(),
            height = frame.height(),
            "running expression detection"
        );

        self.phase = Phase::Detecting;
        let task = tokio::spawn(async move {
            let result = detector.detect_expressions(&frame).await;
            emitter.emit(Event::DetectionFinished {
                attempt,
                frame,
                result,
            });
        });
        self.tasks.inference = Some(task.abort_handle());
    }

    fn on_detection_finished(
        &mut self,
        attempt: u64,
        frame: Arc<FrameImage>,
        result: std::result::Result<Vec<FaceDetection>, InferenceError>,
    ) {
        if attempt != self.attempt || self.phase != Phase::Detecting {
            debug!(attempt, "stale detection result");
            return;
        }
        self.tasks.inference = None;

        let face = match result {
            Ok(faces) => faces.into_iter().next(),
            Err(err) => {
                warn!(error = %err, "expression detection failed");
                self.resume_preview();
                self.fail(DETECTION_FAILED);
                return;
            }
        };

        let Some(face) = face else {
            info!("no face detected");
            self.resume_preview();
            self.detection = Some(DetectionResult::NoFace);
            self.message = Some(NO_FACE_DETECTED.to_string());
            self.phase = Phase::ResultNoFace;
            return;
        };

        let classification = self.classifier.classify(&face.expressions);
        info!(
            expression = %classification.expression,
            confidence = classification.confidence,
            mood = %classification.mood,
            "mood classified"
        );

        self.frozen_frame = Some(frame);
        self.detection = Some(DetectionResult::Classified(classification));
        self.message = Some(classification.headline());
        self.phase = Phase::ResultClassified(classification);
        self.fetch_playlist(PlaylistRequest::ForMood(classification.mood));
        self.schedule_auto_shutdown();
    }

    fn schedule_auto_shutdown(&mut self) {
        let delay = self.config.auto_shutdown();
        let attempt = self.attempt;
        let emitter = self.emitter.clone();
        self.timers.arm(TimerKind::AutoShutdown, async move {
            tokio::time::sleep(delay).await;
            emitter.emit(Event::AutoShutdown { attempt });
        });
        debug!(?delay, "camera auto-shutdown scheduled");
    }

    fn on_auto_shutdown(&mut self, attempt: u64) {
        if attempt != self.attempt || !matches!(self.phase, Phase::ResultClassified(_)) {
            debug!(attempt, "stale auto-shutdown");
            return;
        }
        self.timers.disarm(TimerKind::AutoShutdown);
        self.camera.release();
        self.frozen_frame = None;
        self.detection = None;
        self.message = None;
        self.phase = Phase::Idle;
        info!("camera switched off after showing the result");
    }

    /// Replaces the shown playlist once the request resolves. Failures are
    /// logged and leave the current list alone.
    fn fetch_playlist(&mut self, request: PlaylistRequest) {
        if let Some(previous) = self.tasks.fetch.take() {
            previous.abort();
        }

        let catalog = self.catalog.clone();
        let playlist = self.playlist.clone();
        let liveness = self.liveness.clone();
        let task = tokio::spawn(async move {
            let fetch = async {
                match request {
                    PlaylistRequest::Recent => {
                        catalog.fetch_recent_songs().await.map(Playlist::discover)
                    }
                    PlaylistRequest::ForMood(mood) => catalog
                        .fetch_songs_by_mood(mood)
                        .await
                        .map(|songs| Playlist::for_mood(mood, songs)),
                }
            };
            let fetched = tokio::select! {
                _ = liveness.cancelled() => return,
                fetched = fetch => fetched,
            };

            match fetched {
                Ok(_) if liveness.is_cancelled() => {}
                Ok(list) => {
                    info!(title = %list.title, songs = list.songs.len(), "playlist updated");
                    playlist.send_replace(list);
                }
                Err(err) => warn!(error = %err, "failed to fetch songs; keeping current list"),
            }
        });
        self.tasks.fetch = Some(task.abort_handle());
    }

    fn resume_preview(&self) {
        if let Some(stream) = self.camera.stream() {
            stream.play();
        }
    }

    fn clear_result(&mut self) {
        self.timers.cancel(TimerKind::AutoShutdown);
        self.frozen_frame = None;
        self.detection = None;
        self.message = None;
    }

    fn fail(&mut self, message: &str) {
        self.phase = Phase::ResultError {
            message: message.to_string(),
        };
        self.message = Some(message.to_string());
    }

    fn teardown(&mut self) {
        self.liveness.cancel();
        let timers = self.timers.cancel_all();
        let requests = self.tasks.abort_all();

        self.events.close();
        while let Ok(event) = self.events.try_recv() {
            event.discard();
        }
        let released = self.camera.release();

        self.attempt += 1;
        self.frozen_frame = None;
        self.detection = None;
        self.message = None;
        self.phase = Phase::Idle;
        self.publish();
        info!(timers, requests, released, "mood session torn down");
    }

    fn publish(&self) {
        self.view.send_replace(self.snapshot());
    }

    fn snapshot(&self) -> SessionView {
        SessionView {
            phase: self.phase.clone(),
            camera_on: self.camera.is_on(),
            countdown_remaining: match self.phase {
                Phase::Countdown { remaining } => Some(remaining),
                _ => None,
            },
            frozen_frame: self.frozen_frame.clone(),
            detection: self.detection,
            message: self.message.clone(),
            armed_timers: self.timers.armed(),
            inference_pending: self.tasks.inference_pending(),
            models: self.models,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CameraBackend, SyntheticCamera, VideoConstraints};

    #[tokio::test(start_paused = true)]
    async fn emitter_hands_events_back_once_cancelled() {
        let (events, mut received) = mpsc::unbounded_channel();
        let liveness = CancellationToken::new();
        let emitter = Emitter {
            events,
            liveness: liveness.clone(),
        };

        assert!(emitter.emit(Event::AutoShutdown { attempt: 1 }).is_none());
        assert!(matches!(
            received.recv().await,
            Some(Event::AutoShutdown { attempt: 1 })
        ));

        liveness.cancel();
        let rejected = emitter.emit(Event::AutoShutdown { attempt: 2 });
        assert!(matches!(rejected, Some(Event::AutoShutdown { attempt: 2 })));
        assert!(received.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn discarding_a_rejected_stream_stops_it() {
        let camera = SyntheticCamera::new();
        let stream = camera.open(&VideoConstraints::default()).await.unwrap();
        assert_eq!(camera.live_tracks(), 1);

        Event::CameraOpened {
            attempt: 7,
            result: Ok(stream),
        }
        .discard();
        assert_eq!(camera.live_tracks(), 0);
    }

    #[test]
    fn abort_all_counts_nothing_when_idle() {
        let mut tasks = InFlight::default();
        assert!(!tasks.inference_pending());
        assert_eq!(tasks.abort_all(), 0);
    }
}
