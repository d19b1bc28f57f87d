//! Error types for mediarec

use crate::track::TrackRole;
use std::time::Duration;
use thiserror::Error;

/// Main error type for recording operations
#[derive(Error, Debug)]
pub enum RecorderError {
    /// The requested configuration cannot produce a recording
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Reason the configuration was rejected
        reason: String,
    },

    /// An encoder could not be created or configured
    #[error("Encoder initialization failed for {role} track: {reason}")]
    EncoderInit {
        /// Track whose encoder failed
        role: TrackRole,
        /// Reason for the failure
        reason: String,
    },

    /// An encoder failed while streaming
    #[error("Encoding failed for {role} track: {reason}")]
    Encoding {
        /// Track whose encoder failed
        role: TrackRole,
        /// Reason for the failure
        reason: String,
    },

    /// Container writer used out of order
    #[error("Muxer state error: expected {expected}, got {actual}")]
    MuxerState {
        /// Expected writer state
        expected: String,
        /// Actual writer state
        actual: String,
    },

    /// Releasing a resource failed during stop
    #[error("Failed to release {resource}: {reason}")]
    ResourceRelease {
        /// Resource being released
        resource: String,
        /// Reason for the failure
        reason: String,
    },

    /// I/O error from the container sink
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Malformed input or container data
    #[error("Invalid data: {reason}")]
    InvalidData {
        /// Reason for invalid data
        reason: String,
    },

    /// Codec not supported by the container
    #[error("Unsupported codec: {codec}")]
    UnsupportedCodec {
        /// Codec name
        codec: String,
    },

    /// Operation timed out
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// A recording is already running
    #[error("Recording already active: {path}")]
    SessionAlreadyActive {
        /// Output path of the active recording
        path: String,
    },

    /// No recording is running
    #[error("No active recording session")]
    NoActiveSession,
}

/// Result type alias for recording operations
pub type RecorderResult<T> = Result<T, RecorderError>;

impl RecorderError {
    /// Shorthand for a muxer state violation
    pub fn muxer_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        RecorderError::MuxerState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            RecorderError::Configuration { .. } => "CONFIGURATION_ERROR".to_string(),
            RecorderError::EncoderInit { .. } => "ENCODER_INIT_FAILED".to_string(),
            RecorderError::Encoding { .. } => "ENCODING_FAILED".to_string(),
            RecorderError::MuxerState { .. } => "MUXER_STATE_ERROR".to_string(),
            RecorderError::ResourceRelease { .. } => "RESOURCE_RELEASE_FAILED".to_string(),
            RecorderError::Io { .. } => "IO_ERROR".to_string(),
            RecorderError::InvalidData { .. } => "INVALID_DATA".to_string(),
            RecorderError::UnsupportedCodec { .. } => "UNSUPPORTED_CODEC".to_string(),
            RecorderError::Timeout { .. } => "TIMEOUT".to_string(),
            RecorderError::SessionAlreadyActive { .. } => "SESSION_ALREADY_ACTIVE".to_string(),
            RecorderError::NoActiveSession => "NO_ACTIVE_SESSION".to_string(),
        }
    }

    /// Whether the error must end the whole recording session.
    ///
    /// Encoder failures are fatal only for the video track; an audio track
    /// failure leaves a video-only recording. Release errors are logged and
    /// shutdown continues.
    pub fn is_fatal(&self) -> bool {
        match self {
            RecorderError::EncoderInit { role, .. } | RecorderError::Encoding { role, .. } => {
                role.is_video()
            }
            RecorderError::ResourceRelease { .. } | RecorderError::Timeout { .. } => false,
            _ => true,
        }
    }
}
