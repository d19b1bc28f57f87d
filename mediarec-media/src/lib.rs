//! # mediarec media
//!
//! Encoding side of the recorder: raw frame and PCM types, encoder backends
//! behind a buffer-protocol trait, the per-track encoder state machine, the
//! two-source PCM mixer and the track that routes encoder output into the
//! shared muxer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codecs;
pub mod encoder;
pub mod error;
pub mod frames;
pub mod h264;
pub mod mixer;
pub mod track;

// Re-export main types
pub use codecs::{
    AudioEncoderConfig, DefaultEncoderFactory, EncoderBackend, EncoderFactory, EncoderOutput,
    EncoderTargets, H264Encoder, InputFormat, OpusEncoder, VideoEncoderConfig,
};
pub use encoder::{DrainEvent, EncoderInput, EncoderState, TrackEncoder, DEFAULT_DRAIN_TIMEOUT};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use frames::{AudioSource, FrameBuffer, MixedAudioChunk, RawAudioChunk, RawFrame};
pub use mixer::{MixPolicy, MixerStats, SampleMixer};
pub use track::{Track, TrackStats};
