use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use super::{CameraBackend, VideoConstraints, VideoStream};
use crate::DeviceError;

#[derive(Debug, Clone)]
struct Settings {
    open_delay: Duration,
    /// `None` means the stream never produces frame data.
    warmup: Option<Duration>,
    resolution: Option<(u32, u32)>,
    failure: Option<DeviceError>,
    fill: [u8; 3],
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            open_delay: Duration::from_millis(50),
            warmup: Some(Duration::from_millis(200)),
            resolution: None,
            failure: None,
            fill: [128, 128, 128],
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    settings: Mutex<Settings>,
    acquisitions: AtomicUsize,
    live_tracks: Arc<AtomicUsize>,
    latest: Mutex<Weak<SyntheticStream>>,
}

/// In-process camera that produces solid-colour frames.
///
/// Clones share settings and counters, so a test can keep one clone for
/// inspection while the controller owns another.
#[derive(Debug, Clone, Default)]
pub struct SyntheticCamera {
    shared: Arc<Shared>,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time the backend takes to hand out a stream.
    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.update(|settings| settings.open_delay = delay);
        self
    }

    /// Time between the stream being bound and its first frame.
    pub fn with_warmup(self, warmup: Duration) -> Self {
        self.update(|settings| settings.warmup = Some(warmup));
        self
    }

    pub fn never_ready(self) -> Self {
        self.update(|settings| settings.warmup = None);
        self
    }

    /// Overrides the resolution requested through the constraints.
    pub fn with_resolution(self, width: u32, height: u32) -> Self {
        self.update(|settings| settings.resolution = Some((width, height)));
        self
    }

    pub fn with_fill(self, rgb: [u8; 3]) -> Self {
        self.update(|settings| settings.fill = rgb);
        self
    }

    pub fn failing(self, error: DeviceError) -> Self {
        self.set_failure(Some(error));
        self
    }

    /// Makes subsequent opens fail (or succeed again with `None`).
    pub fn set_failure(&self, error: Option<DeviceError>) {
        self.update(|settings| settings.failure = error);
    }

    /// Streams handed out so far.
    pub fn acquisitions(&self) -> usize {
        self.shared.acquisitions.load(Ordering::SeqCst)
    }

    /// Hardware tracks currently running across every stream handed out.
    pub fn live_tracks(&self) -> usize {
        self.shared.live_tracks.load(Ordering::SeqCst)
    }

    /// Most recently opened stream, while something still holds it.
    pub fn latest_stream(&self) -> Option<Arc<SyntheticStream>> {
        lock(&self.shared.latest).upgrade()
    }

    fn update(&self, apply: impl FnOnce(&mut Settings)) {
        apply(&mut lock(&self.shared.settings));
    }
}

#[async_trait]
impl CameraBackend for SyntheticCamera {
    async fn open(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Arc<dyn VideoStream>, DeviceError> {
        let settings = lock(&self.shared.settings).clone();
        if !settings.open_delay.is_zero() {
            tokio::time::sleep(settings.open_delay).await;
        }
        if let Some(failure) = settings.failure {
            return Err(failure);
        }

        let (width, height) = settings
            .resolution
            .unwrap_or((constraints.width, constraints.height));
        let id = self.shared.acquisitions.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        debug!(id, width, height, facing = ?constraints.facing, "synthetic camera opened");

        let stream = SyntheticStream::start(
            id,
            (width, height),
            settings.fill,
            settings.warmup,
            self.shared.live_tracks.clone(),
        );
        *lock(&self.shared.latest) = Arc::downgrade(&stream);
        Ok(stream)
    }
}

// A poisoned lock only means a test panicked mid-update; the data itself is
// still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Stream handed out by [`SyntheticCamera`].
#[derive(Debug)]
pub struct SyntheticStream {
    id: u64,
    width: u32,
    height: u32,
    fill: [u8; 3],
    track_live: AtomicBool,
    live_tracks: Arc<AtomicUsize>,
    ready: watch::Sender<bool>,
    paused: AtomicBool,
    frames_read: AtomicU64,
}

impl SyntheticStream {
    fn start(
        id: u64,
        (width, height): (u32, u32),
        fill: [u8; 3],
        warmup: Option<Duration>,
        live_tracks: Arc<AtomicUsize>,
    ) -> Arc<Self> {
        let (ready, _) = watch::channel(warmup == Some(Duration::ZERO));
        live_tracks.fetch_add(1, Ordering::SeqCst);

        let stream = Arc::new(Self {
            id,
            width,
            height,
            fill,
            track_live: AtomicBool::new(true),
            live_tracks,
            ready,
            paused: AtomicBool::new(false),
            frames_read: AtomicU64::new(0),
        });

        if let Some(delay) = warmup.filter(|delay| !delay.is_zero()) {
            let weak = Arc::downgrade(&stream);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(stream) = weak.upgrade() {
                    if stream.live_tracks() > 0 {
                        stream.ready.send_replace(true);
                    }
                }
            });
        }

        stream
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::SeqCst)
    }

    fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }
}

impl VideoStream for SyntheticStream {
    fn live_tracks(&self) -> usize {
        usize::from(self.track_live.load(Ordering::SeqCst))
    }

    fn stop_all_tracks(&self) {
        if self.track_live.swap(false, Ordering::SeqCst) {
            self.live_tracks.fetch_sub(1, Ordering::SeqCst);
            debug!(id = self.id, "synthetic track stopped");
        }
        self.ready.send_replace(false);
    }

    fn readiness(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    fn listener_count(&self) -> usize {
        self.ready.receiver_count()
    }

    fn dimensions(&self) -> (u32, u32) {
        if self.is_ready() {
            (self.width, self.height)
        } else {
            (0, 0)
        }
    }

    fn read_pixels(&self) -> Vec<u8> {
        let (width, height) = self.dimensions();
        self.frames_read.fetch_add(1, Ordering::SeqCst);
        self.fill
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect()
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn play(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn reports_zero_dimensions_until_warm() {
        let camera = SyntheticCamera::new().with_warmup(Duration::from_millis(500));
        let stream = camera.open(&VideoConstraints::default()).await.unwrap();
        assert_eq!(stream.dimensions(), (0, 0));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(stream.dimensions(), (640, 480));
        assert_eq!(stream.read_pixels().len(), 640 * 480 * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_tracks_updates_shared_counter_once() {
        let camera = SyntheticCamera::new();
        let stream = camera.open(&VideoConstraints::default()).await.unwrap();
        assert_eq!(camera.live_tracks(), 1);

        stream.stop_all_tracks();
        stream.stop_all_tracks();
        assert_eq!(camera.live_tracks(), 0);
        assert_eq!(stream.dimensions(), (0, 0));
    }
}
