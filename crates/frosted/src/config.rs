//! Configuration for the blur pipeline.

use std::time::Duration;

use frosted_kernel::BlurConfig;
use serde::{Deserialize, Serialize};

use crate::error::BlurError;

/// What the dispatcher does with queued work when it is stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Exit after the item in hand; anything still queued is left
    /// unprocessed.
    #[default]
    Abandon,
    /// Process everything already queued, then exit.
    Drain,
}

/// Configuration for [`ImageBlurrer`](crate::ImageBlurrer) and the
/// queue it drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurrerConfig {
    /// Milliseconds to wait after the first completion before delivering
    /// every completion gathered so far in one tick. Zero delivers on the
    /// next home-loop turn.
    pub batch_delay_ms: u64,

    /// Dispatcher behaviour on stop.
    pub shutdown: ShutdownPolicy,

    /// Blur algorithm tunables.
    pub blur: BlurConfig,
}

impl BlurrerConfig {
    /// Default batching window.
    pub const DEFAULT_BATCH_DELAY_MS: u64 = 100;

    /// The batching window as a [`Duration`].
    #[must_use]
    pub const fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Parse a configuration from JSON. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::InvalidConfig`] if the JSON is malformed or
    /// the blur settings fail validation.
    pub fn from_json(json: &str) -> Result<Self, BlurError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BlurError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::InvalidConfig`] if the blur settings are invalid.
    pub fn validate(&self) -> Result<(), BlurError> {
        self.blur
            .validate()
            .map_err(|e| BlurError::InvalidConfig(e.to_string()))
    }
}

impl Default for BlurrerConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: Self::DEFAULT_BATCH_DELAY_MS,
            shutdown: ShutdownPolicy::default(),
            blur: BlurConfig::default(),
        }
    }
}
