//! # mediarec - Multi-track screen, camera and audio recording
//!
//! mediarec encodes live video frames and microphone/speaker PCM on one
//! worker per track and muxes the result into a single fragmented MP4.
//!
//! ## Key Features
//!
//! - **One file, every track**: video plus separate or mixed audio tracks
//! - **Non-blocking capture**: pushing a frame never waits on an encoder
//! - **Crash-tolerant output**: fragments are written as the recording runs
//! - **Graceful degradation**: a failed audio encoder leaves a video-only file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mediarec::{MediaRecorder, RawAudioChunk, RawFrame, RecorderConfig, AudioSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     mediarec::init_tracing();
//!
//!     let recorder = MediaRecorder::new();
//!     let config = RecorderConfig::default().with_mic_audio(true);
//!     recorder.start("recordings/session.mp4", config).await?;
//!
//!     // From capture callbacks
//!     recorder.push_video_frame(RawFrame::new(640, 480, 0, vec![0u8; 640 * 480 * 3 / 2]));
//!     recorder.push_audio(RawAudioChunk::new(AudioSource::Mic, vec![0; 960], 48_000, 1));
//!
//!     let output = recorder.stop().await?;
//!     println!("{} tracks written to {}", output.track_count, output.path.display());
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use mediarec_core::{
    probe_file, ContainerSummary, PreStartPolicy, ProbedTrack, RecorderError, RecorderResult,
    TrackIndex, TrackRole,
};
pub use mediarec_media::{
    AudioEncoderConfig, AudioSource, EncoderBackend, EncoderFactory, EncoderTargets, FrameBuffer,
    MixPolicy, RawAudioChunk, RawFrame, TrackStats, VideoEncoderConfig,
};

// Public API modules
pub mod config;
pub mod event;
pub mod recorder;
mod worker;

// Re-export main API types
pub use config::RecorderConfig;
pub use event::RecorderEvent;
pub use recorder::{MediaRecorder, RecordingOutput, TrackSummary};

/// Install a `tracing` fmt subscriber.
///
/// Honors `RUST_LOG`; defaults to `mediarec=info`. Does nothing if a global
/// subscriber is already set.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mediarec=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
