//! # mediarec core
//!
//! Container and timeline primitives for the mediarec recorder: the error
//! taxonomy, track identity and encoded samples, the fragmented MP4 writer,
//! the mux start barrier shared by track workers, and timestamp
//! normalization.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod container;
pub mod error;
pub mod timestamp;
pub mod track;

// Re-export main types
pub use barrier::{MuxStartBarrier, PreStartPolicy, Registration, SharedMuxer, WriteOutcome};
pub use container::fmp4::DEFAULT_FRAGMENT_DURATION;
pub use container::{
    probe, probe_bytes, probe_file, ContainerSummary, ContainerWriter, Fmp4Writer, ProbedTrack,
    WriterState,
};
pub use error::{RecorderError, RecorderResult};
pub use timestamp::{frames_to_micros, SampleClock, VideoEpoch};
pub use track::{
    CodecKind, EncodedSample, SampleFlags, TrackFormat, TrackIndex, TrackKind, TrackRole,
    VIDEO_TIMESCALE,
};
