//! Camera hardware lifecycle.
//!
//! [`CameraManager`] owns at most one live [`VideoStream`] at a time. Opening
//! a stream goes through a [`CameraBackend`], which lets the controller run
//! against real devices or the in-process [`SyntheticCamera`].

use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{DeviceError, MoodError, Result};

mod synthetic;

pub use synthetic::{SyntheticCamera, SyntheticStream};

/// Which physical camera to prefer on devices that have several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// Requested stream properties. Backends treat these as ideals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub facing: FacingMode,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            facing: FacingMode::User,
        }
    }
}

/// A bound video stream with one or more hardware tracks.
pub trait VideoStream: Send + Sync + fmt::Debug {
    /// Number of tracks still holding the hardware.
    fn live_tracks(&self) -> usize;

    /// Stops every hardware track. Calling it twice is harmless.
    fn stop_all_tracks(&self);

    /// Registers a readiness listener. The value flips to `true` once the
    /// stream has frame data available. Dropping the receiver unregisters it.
    fn readiness(&self) -> watch::Receiver<bool>;

    /// Readiness listeners currently registered.
    fn listener_count(&self) -> usize;

    /// Current video dimensions. `(0, 0)` while the stream is warming up.
    fn dimensions(&self) -> (u32, u32);

    /// Packed RGB pixels of the frame currently on display.
    fn read_pixels(&self) -> Vec<u8>;

    fn pause(&self);

    fn play(&self);

    fn is_paused(&self) -> bool;
}

/// Source of video streams.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    async fn open(
        &self,
        constraints: &VideoConstraints,
    ) -> std::result::Result<Arc<dyn VideoStream>, DeviceError>;
}

/// Owns the camera stream of a single session.
pub struct CameraManager {
    backend: Arc<dyn CameraBackend>,
    constraints: VideoConstraints,
    stream: Option<Arc<dyn VideoStream>>,
}

impl CameraManager {
    pub fn new(backend: Arc<dyn CameraBackend>, constraints: VideoConstraints) -> Self {
        Self {
            backend,
            constraints,
            stream: None,
        }
    }

    pub fn constraints(&self) -> &VideoConstraints {
        &self.constraints
    }

    /// Returns a detached future that opens a new stream. The caller decides
    /// whether to [`bind`](Self::bind) the result, so the request can run on
    /// its own task while the manager stays with its owner.
    pub fn acquire(
        &self,
    ) -> impl Future<Output = std::result::Result<Arc<dyn VideoStream>, DeviceError>> + Send + 'static
    {
        let backend = self.backend.clone();
        let constraints = self.constraints.clone();
        async move { backend.open(&constraints).await }
    }

    /// Takes ownership of an opened stream. Any stream held before is
    /// released first so only one acquisition is ever live.
    pub fn bind(&mut self, stream: Arc<dyn VideoStream>) {
        if self.release() {
            warn!("replaced a camera stream that was still live");
        }
        info!(tracks = stream.live_tracks(), "camera stream bound");
        self.stream = Some(stream);
    }

    pub fn stream(&self) -> Option<&Arc<dyn VideoStream>> {
        self.stream.as_ref()
    }

    pub fn is_on(&self) -> bool {
        self.stream.is_some()
    }

    /// Stops every track of the held stream and forgets it. Returns whether a
    /// stream was held.
    pub fn release(&mut self) -> bool {
        match self.stream.take() {
            Some(stream) => {
                stream.stop_all_tracks();
                info!("camera stream released");
                true
            }
            None => false,
        }
    }

    /// Waits until `stream` reports frame data, giving up after `timeout`.
    ///
    /// The readiness listener registered here lives only for the duration of
    /// the call, whichever way it ends.
    pub async fn await_ready(stream: &dyn VideoStream, timeout: Duration) -> Result<()> {
        let mut ready = stream.readiness();
        if *ready.borrow_and_update() {
            return Ok(());
        }

        let outcome = tokio::time::timeout(timeout, ready.wait_for(|is_ready| *is_ready))
            .await
            .map(|signal| signal.is_ok());

        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(MoodError::Device(DeviceError::Other(
                "video stream ended before it produced a frame".to_string(),
            ))),
            Err(_) if *ready.borrow() => Ok(()),
            Err(_) => {
                debug!(?timeout, "camera readiness deadline elapsed");
                Err(MoodError::Timeout(timeout))
            }
        }
    }
}

impl fmt::Debug for CameraManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraManager")
            .field("constraints", &self.constraints)
            .field("stream", &self.stream)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(camera: &SyntheticCamera) -> CameraManager {
        CameraManager::new(Arc::new(camera.clone()), VideoConstraints::default())
    }

    #[tokio::test(start_paused = true)]
    async fn release_stops_every_track_and_is_idempotent() {
        let camera = SyntheticCamera::new();
        let mut manager = manager(&camera);

        let stream = manager.acquire().await.unwrap();
        manager.bind(stream);
        assert!(manager.is_on());
        assert_eq!(camera.live_tracks(), 1);

        assert!(manager.release());
        assert!(!manager.release());
        assert!(!manager.is_on());
        assert_eq!(camera.live_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn binding_twice_keeps_a_single_live_stream() {
        let camera = SyntheticCamera::new();
        let mut manager = manager(&camera);

        let first = manager.acquire().await.unwrap();
        manager.bind(first.clone());
        let second = manager.acquire().await.unwrap();
        manager.bind(second);

        assert_eq!(first.live_tracks(), 0);
        assert_eq!(camera.live_tracks(), 1);
        assert_eq!(camera.acquisitions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_surfaces_device_errors() {
        let camera = SyntheticCamera::new().failing(DeviceError::PermissionDenied);
        let manager = manager(&camera);

        let err = manager.acquire().await.unwrap_err();
        assert_eq!(err, DeviceError::PermissionDenied);
        assert_eq!(camera.live_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn await_ready_removes_listener_on_success() {
        let camera = SyntheticCamera::new().with_warmup(Duration::from_millis(300));
        let stream = manager(&camera).acquire().await.unwrap();

        CameraManager::await_ready(stream.as_ref(), Duration::from_secs(4))
            .await
            .unwrap();
        assert_eq!(stream.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn await_ready_times_out_and_removes_listener() {
        let camera = SyntheticCamera::new().never_ready();
        let stream = manager(&camera).acquire().await.unwrap();

        let started = tokio::time::Instant::now();
        let err = CameraManager::await_ready(stream.as_ref(), Duration::from_secs(4))
            .await
            .unwrap_err();

        assert!(matches!(err, MoodError::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert_eq!(stream.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn await_ready_returns_at_once_for_warm_streams() {
        let camera = SyntheticCamera::new().with_warmup(Duration::ZERO);
        let stream = manager(&camera).acquire().await.unwrap();

        let started = tokio::time::Instant::now();
        CameraManager::await_ready(stream.as_ref(), Duration::from_secs(4))
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
