//! Error types for the voice turn system

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Engine-level capture failure codes, mirroring what continuous
/// speech-to-text engines report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureErrorCode {
    /// The engine heard nothing before its internal timeout.
    NoSpeech,
    /// Microphone permission was denied.
    PermissionDenied,
    /// The audio device failed or disappeared mid-capture.
    AudioCapture,
    /// The engine's network transport failed.
    Network,
    /// Any other engine-reported condition.
    Unknown,
}

impl std::fmt::Display for CaptureErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            CaptureErrorCode::NoSpeech => "no-speech",
            CaptureErrorCode::PermissionDenied => "not-allowed",
            CaptureErrorCode::AudioCapture => "audio-capture",
            CaptureErrorCode::Network => "network",
            CaptureErrorCode::Unknown => "unknown",
        };
        f.write_str(code)
    }
}

/// Errors that can occur in the voice turn system
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    /// The platform has no engine for the named capability. Fatal for the
    /// feature session; surfaced once and never retried.
    #[error("{0} is not available on this platform")]
    CapabilityUnavailable(String),

    #[error("capture error: {0}")]
    Capture(CaptureErrorCode),

    #[error("reply gateway failure: {0}")]
    Gateway(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("configuration error: {0}")]
    Config(String),
}
