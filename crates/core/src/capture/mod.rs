use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::camera::VideoStream;

/// A still RGB image taken from the video stream.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    captured_at: DateTime<Utc>,
}

impl FrameImage {
    /// Wraps packed RGB pixels. Returns `None` when the buffer size does not
    /// match the dimensions.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || pixels.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
            captured_at: Utc::now(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Binary PPM encoding of the frame.
    pub fn to_ppm(&self) -> Vec<u8> {
        let header = format!("P6\n{} {}\n255\n", self.width, self.height);
        let mut encoded = Vec::with_capacity(header.len() + self.pixels.len());
        encoded.extend_from_slice(header.as_bytes());
        encoded.extend_from_slice(&self.pixels);
        encoded
    }

    /// `data:` URL suitable for an image element.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:image/x-portable-pixmap;base64,{}",
            STANDARD.encode(self.to_ppm())
        )
    }
}

impl fmt::Debug for FrameImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Snapshots the live stream and freezes its on-screen playback.
#[derive(Debug, Default)]
pub struct FrameCapturer {
    captured: u64,
}

impl FrameCapturer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the current frame out of `stream` and pauses its playback so
    /// the display holds on that exact frame. The hardware keeps running.
    ///
    /// Returns `None` while the stream has no picture yet.
    pub fn capture(&mut self, stream: &dyn VideoStream) -> Option<FrameImage> {
        let (width, height) = stream.dimensions();
        if width == 0 || height == 0 {
            debug!("stream has no picture yet; nothing to capture");
            return None;
        }

        let Some(frame) = FrameImage::from_rgb(width, height, stream.read_pixels()) else {
            warn!(width, height, "stream returned a pixel buffer of the wrong size");
            return None;
        };

        stream.pause();
        self.captured += 1;
        Some(frame)
    }

    /// Number of frames captured so far.
    pub fn captured(&self) -> u64 {
        self.captured
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::camera::{CameraBackend, SyntheticCamera, VideoConstraints};

    #[tokio::test(start_paused = true)]
    async fn capture_freezes_playback_but_keeps_hardware() {
        let camera = SyntheticCamera::new()
            .with_warmup(Duration::ZERO)
            .with_resolution(4, 2)
            .with_fill([10, 20, 30]);
        let stream = camera.open(&VideoConstraints::default()).await.unwrap();
        let mut capturer = FrameCapturer::new();

        let frame = capturer.capture(stream.as_ref()).expect("frame");
        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert_eq!(&frame.pixels()[..6], &[10, 20, 30, 10, 20, 30]);
        assert!(stream.is_paused());
        assert_eq!(camera.live_tracks(), 1);
        assert_eq!(capturer.captured(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_returns_none_while_warming_up() {
        let camera = SyntheticCamera::new().never_ready();
        let stream = camera.open(&VideoConstraints::default()).await.unwrap();

        assert!(FrameCapturer::new().capture(stream.as_ref()).is_none());
        assert!(!stream.is_paused());
    }

    #[test]
    fn rejects_mismatched_buffers() {
        assert!(FrameImage::from_rgb(2, 2, vec![0; 11]).is_none());
        assert!(FrameImage::from_rgb(0, 2, Vec::new()).is_none());
    }

    #[test]
    fn data_url_carries_a_ppm_payload() {
        let frame = FrameImage::from_rgb(1, 1, vec![255, 0, 0]).unwrap();
        let url = frame.to_data_url();
        let payload = url
            .strip_prefix("data:image/x-portable-pixmap;base64,")
            .unwrap();
        let decoded = STANDARD.decode(payload).unwrap();
        assert_eq!(decoded, b"P6\n1 1\n255\n\xff\x00\x00".to_vec());
    }
}
