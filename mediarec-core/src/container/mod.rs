//! Container writing
//!
//! The recorder talks to the output file only through [`ContainerWriter`].
//! [`Fmp4Writer`] is the implementation used for real recordings.

pub mod boxes;
pub mod fmp4;
pub mod probe;

pub use fmp4::Fmp4Writer;
pub use probe::{probe, probe_bytes, probe_file, ContainerSummary, ProbedTrack};

use crate::error::RecorderResult;
use crate::track::{EncodedSample, TrackFormat, TrackIndex};
use std::fmt;

/// Lifecycle of a container writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Tracks may be added
    Configuring,
    /// Header written, samples accepted
    Started,
    /// Finalized; no further samples
    Stopped,
    /// Sink closed
    Released,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriterState::Configuring => "configuring",
            WriterState::Started => "started",
            WriterState::Stopped => "stopped",
            WriterState::Released => "released",
        };
        f.write_str(name)
    }
}

/// Track-indexed container sink.
///
/// Calls must follow `add_track* → start → write_sample* → stop → release`.
/// Out-of-order calls fail with `RecorderError::MuxerState`.
pub trait ContainerWriter: Send {
    /// Add a track; only valid before `start`
    fn add_track(&mut self, format: &TrackFormat) -> RecorderResult<TrackIndex>;

    /// Write the container header; valid once
    fn start(&mut self) -> RecorderResult<()>;

    /// Write one sample; only valid after `start`
    fn write_sample(&mut self, track: TrackIndex, sample: EncodedSample) -> RecorderResult<()>;

    /// Flush pending samples and finalize metadata
    fn stop(&mut self) -> RecorderResult<()>;

    /// Close the sink. Idempotent.
    fn release(&mut self) -> RecorderResult<()>;

    /// Number of registered tracks
    fn track_count(&self) -> usize;

    /// Current lifecycle state
    fn state(&self) -> WriterState;
}
