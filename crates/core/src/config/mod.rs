use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{MoodError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub catalog: CatalogConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections fall back to their
    /// defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.catalog.validate()
    }
}

/// Timing and thresholds that drive a mood detection session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of countdown ticks shown before detection runs.
    pub countdown_ticks: u32,
    pub tick_interval_ms: u64,
    /// How long to wait for the first frame after the stream is bound.
    pub readiness_timeout_ms: u64,
    /// Delay between a classified result and the camera being switched off.
    pub auto_shutdown_ms: u64,
    /// Below this score the strongest expression is treated as `neutral`.
    pub confidence_threshold: f32,
    pub video_width: u32,
    pub video_height: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: 3,
            tick_interval_ms: 1000,
            readiness_timeout_ms: 4000,
            auto_shutdown_ms: 3000,
            confidence_threshold: 0.55,
            video_width: 640,
            video_height: 480,
        }
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn auto_shutdown(&self) -> Duration {
        Duration::from_millis(self.auto_shutdown_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.countdown_ticks == 0 {
            return Err(MoodError::InvalidConfig(
                "countdown_ticks must be at least 1".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(MoodError::InvalidConfig(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(MoodError::InvalidConfig(format!(
                "confidence_threshold must lie in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        Ok(())
    }
}

/// Location of the song recommendation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl CatalogConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(MoodError::InvalidConfig(
                "catalog base_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
