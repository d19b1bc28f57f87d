//! Media error types
//!
//! Codec, mixing and frame validation failures. These convert into
//! [`RecorderError`] at the track boundary, where the track role is known.

use mediarec_core::{RecorderError, TrackRole};
use thiserror::Error;

/// Main error type for media processing operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// Encoding operation failed
    #[error("Encoding failed: {codec} - {reason}")]
    EncodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Codec initialization failed
    #[error("Codec initialization failed: {codec} - {reason}")]
    CodecInitializationFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Sample rate mismatch
    #[error("Sample rate mismatch: expected {expected}, got {actual}")]
    SampleRateMismatch {
        /// Expected sample rate
        expected: u32,
        /// Actual sample rate
        actual: u32,
    },

    /// Channel count mismatch
    #[error("Channel count mismatch: expected {expected}, got {actual}")]
    ChannelCountMismatch {
        /// Expected channel count
        expected: u16,
        /// Actual channel count
        actual: u16,
    },

    /// Invalid frame data error
    #[error("Invalid frame data: expected {expected} bytes, got {actual}")]
    InvalidFrameData {
        /// Expected data size
        expected: usize,
        /// Actual data size
        actual: usize,
    },

    /// Invalid state for operation
    #[error("Invalid state: {message}")]
    InvalidState {
        /// State error message
        message: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    ///
    /// A bad frame can be skipped; codec and state failures end the track.
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::InvalidFrameData { .. } => true,
            MediaError::SampleRateMismatch { .. } => true,
            MediaError::ChannelCountMismatch { .. } => true,
            MediaError::EncodingFailed { .. } => false,
            MediaError::CodecInitializationFailed { .. } => false,
            MediaError::InvalidState { .. } => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::EncodingFailed { .. } => ErrorCategory::Codec,
            MediaError::CodecInitializationFailed { .. } => ErrorCategory::Codec,
            MediaError::SampleRateMismatch { .. } => ErrorCategory::Audio,
            MediaError::ChannelCountMismatch { .. } => ErrorCategory::Audio,
            MediaError::InvalidFrameData { .. } => ErrorCategory::Data,
            MediaError::InvalidState { .. } => ErrorCategory::State,
        }
    }

    /// Convert into a recorder error for the given track
    pub fn into_recorder_error(self, role: TrackRole) -> RecorderError {
        match self {
            MediaError::CodecInitializationFailed { codec, reason } => RecorderError::EncoderInit {
                role,
                reason: format!("{}: {}", codec, reason),
            },
            MediaError::EncodingFailed { codec, reason } => RecorderError::Encoding {
                role,
                reason: format!("{}: {}", codec, reason),
            },
            MediaError::InvalidState { message } => RecorderError::Encoding {
                role,
                reason: message,
            },
            other => RecorderError::InvalidData {
                reason: format!("{} track: {}", role, other),
            },
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Codec-related errors
    Codec,
    /// Data validation errors
    Data,
    /// State management errors
    State,
    /// Audio-specific errors
    Audio,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let codec_error = MediaError::CodecInitializationFailed {
            codec: "H.264".to_string(),
            reason: "Hardware not available".to_string(),
        };
        assert_eq!(codec_error.category(), ErrorCategory::Codec);
        assert!(!codec_error.is_recoverable());

        let mismatch = MediaError::SampleRateMismatch {
            expected: 48000,
            actual: 44100,
        };
        assert_eq!(mismatch.category(), ErrorCategory::Audio);
        assert!(mismatch.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = MediaError::InvalidFrameData {
            expected: 1024,
            actual: 512,
        };
        assert_eq!(
            error.to_string(),
            "Invalid frame data: expected 1024 bytes, got 512"
        );
    }

    #[test]
    fn test_init_failure_maps_to_encoder_init() {
        let error = MediaError::CodecInitializationFailed {
            codec: "Opus".to_string(),
            reason: "bad rate".to_string(),
        }
        .into_recorder_error(TrackRole::MicAudio);
        assert!(matches!(
            error,
            RecorderError::EncoderInit {
                role: TrackRole::MicAudio,
                ..
            }
        ));
        assert!(!error.is_fatal());
    }
}
