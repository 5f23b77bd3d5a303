//! Controller configuration.

use crate::capability::CaptureOptions;
use crate::error::{VoiceError, VoiceResult};
use std::time::Duration;

/// Configuration for the voice turn controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Locale passed to both speech engines (default: "en-US").
    pub locale: String,

    /// Ask the recognizer for interim transcripts (default: true).
    pub interim_results: bool,

    /// Ask the recognizer to keep capturing across pauses (default: false).
    pub continuous: bool,

    /// Stop relistening once the same capture error recurs this many times
    /// in a row (default: 2).
    pub max_consecutive_errors: u32,

    /// Pause before rearming the mic on a conversation restart (default: 300ms).
    pub restart_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            interim_results: true,
            continuous: false,
            max_consecutive_errors: 2,
            restart_delay: Duration::from_millis(300),
        }
    }
}

impl ControllerConfig {
    /// Validate the configuration before spawning a controller.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.locale.trim().is_empty() {
            return Err(VoiceError::Config("locale must not be empty".to_string()));
        }
        if self.max_consecutive_errors == 0 {
            return Err(VoiceError::Config(
                "max_consecutive_errors must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Options handed to the recognizer for every capture session.
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            locale: self.locale.clone(),
            interim_results: self.interim_results,
            continuous: self.continuous,
        }
    }
}
