use std::time::Duration;

/// Result alias that carries the custom [`MoodError`] type.
pub type Result<T> = std::result::Result<T, MoodError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum MoodError {
    /// Free-form message, mostly used by the application crate to surface
    /// readable failures without a dedicated variant.
    #[error("{0}")]
    Message(String),
    #[error("camera error: {0}")]
    Device(#[from] DeviceError),
    /// The video stream produced no frame data before the deadline.
    #[error("timed out after {}ms waiting for the camera to start", .0.as_millis())]
    Timeout(Duration),
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("song catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl MoodError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for MoodError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MoodError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Failures raised while acquiring the video hardware.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("permission to use the camera was denied")]
    PermissionDenied,
    #[error("no camera device was found")]
    NotFound,
    #[error("the camera is in use by another application")]
    Busy,
    #[error("{0}")]
    Other(String),
}

/// Failures raised by the expression detection capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    #[error("detection models are not loaded")]
    ModelsNotLoaded,
    #[error("failed to load detection models: {0}")]
    ModelLoad(String),
    #[error("detection failed: {0}")]
    Failed(String),
}

/// Failures raised while talking to the song recommendation service.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("service responded with status {status}: {message}")]
    Status { status: u16, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_reports_milliseconds() {
        let err = MoodError::Timeout(Duration::from_millis(4000));
        assert_eq!(
            err.to_string(),
            "timed out after 4000ms waiting for the camera to start"
        );
    }

    #[test]
    fn device_errors_convert_into_mood_error() {
        let err: MoodError = DeviceError::Busy.into();
        assert!(matches!(err, MoodError::Device(DeviceError::Busy)));
        assert!(err.to_string().contains("in use"));
    }
}
