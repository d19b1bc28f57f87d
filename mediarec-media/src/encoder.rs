//! Track encoder state machine
//!
//! ```text
//! Idle ──first unit──▶ Configuring ──ok──▶ Streaming ──finish──▶ Draining ──EOS──▶ Finished
//!                           │                  │
//!                           └──── error ───────┴──▶ Failed
//! ```
//!
//! `finish` from `Idle` goes straight to `Finished`.

use crate::codecs::{EncoderBackend, EncoderOutput, InputFormat};
use crate::error::{MediaError, MediaResult};
use crate::frames::RawFrame;
use mediarec_core::{EncodedSample, TrackFormat, TrackRole};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// How long `finish` waits for the end-of-stream sample by default
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between empty dequeues while draining
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One unit of encoder input
#[derive(Debug, Clone, Copy)]
pub enum EncoderInput<'a> {
    /// A video frame; its capture timestamp is the pts
    Video(&'a RawFrame),
    /// Interleaved PCM with its pts
    Audio {
        /// Interleaved samples
        samples: &'a [i16],
        /// Sample rate in Hz
        sample_rate: u32,
        /// Channel count
        channels: u16,
        /// Presentation timestamp in microseconds
        pts_us: u64,
    },
}

impl EncoderInput<'_> {
    fn format(&self) -> InputFormat {
        match self {
            EncoderInput::Video(frame) => InputFormat::Video {
                width: frame.width,
                height: frame.height,
            },
            EncoderInput::Audio {
                sample_rate,
                channels,
                ..
            } => InputFormat::Audio {
                sample_rate: *sample_rate,
                channels: *channels,
            },
        }
    }
}

/// Encoder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// No input yet
    Idle,
    /// First unit received, backend being configured
    Configuring,
    /// Accepting input and producing output
    Streaming,
    /// End-of-stream signalled, collecting remaining output
    Draining,
    /// Backend released after end-of-stream
    Finished,
    /// Configuration or encoding failed
    Failed,
}

impl fmt::Display for EncoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Event produced while draining
#[derive(Debug, Clone, PartialEq)]
pub enum DrainEvent {
    /// Output format is known; surfaced once per stream
    FormatReady(TrackFormat),
    /// Encoded sample
    Sample(EncodedSample),
}

/// Wraps one backend and owns its buffer protocol
#[derive(Debug)]
pub struct TrackEncoder {
    role: TrackRole,
    backend: Option<Box<dyn EncoderBackend>>,
    state: EncoderState,
    format_reported: bool,
    end_of_stream: bool,
    drain_timeout: Duration,
}

impl TrackEncoder {
    /// Create an idle encoder around a backend
    pub fn new(role: TrackRole, backend: Box<dyn EncoderBackend>) -> Self {
        Self {
            role,
            backend: Some(backend),
            state: EncoderState::Idle,
            format_reported: false,
            end_of_stream: false,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Bound the wait for end-of-stream in [`finish`](Self::finish)
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Current state
    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Track role
    pub fn role(&self) -> TrackRole {
        self.role
    }

    fn backend(&mut self) -> MediaResult<&mut Box<dyn EncoderBackend>> {
        self.backend.as_mut().ok_or_else(|| MediaError::InvalidState {
            message: "encoder released".to_string(),
        })
    }

    fn transition(&mut self, next: EncoderState) {
        debug!("{} encoder: {} -> {}", self.role, self.state, next);
        self.state = next;
    }

    fn fail(&mut self) {
        self.transition(EncoderState::Failed);
        self.release();
    }

    /// Submit one unit. The first unit fixes the input format.
    pub fn submit(&mut self, input: EncoderInput<'_>) -> MediaResult<()> {
        match self.state {
            EncoderState::Idle => {
                self.transition(EncoderState::Configuring);
                let configured = self.backend().and_then(|b| b.configure(input.format()));
                if let Err(e) = configured {
                    error!("❌ {} encoder configuration failed: {}", self.role, e);
                    self.fail();
                    return Err(match e {
                        MediaError::CodecInitializationFailed { .. } => e,
                        other => MediaError::CodecInitializationFailed {
                            codec: self.role.to_string(),
                            reason: other.to_string(),
                        },
                    });
                }
                self.transition(EncoderState::Streaming);
            }
            EncoderState::Streaming => {}
            other => {
                return Err(MediaError::InvalidState {
                    message: format!("{} encoder cannot accept input while {}", self.role, other),
                });
            }
        }

        match self.backend()?.queue_input(&input) {
            Ok(()) => Ok(()),
            Err(e) if e.is_recoverable() => Err(e),
            Err(e) => {
                error!("❌ {} encoder failed: {}", self.role, e);
                self.fail();
                Err(e)
            }
        }
    }

    /// Pull available output. Stops at "try again later"; call again later.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { encoder: self }
    }

    /// Signal end-of-stream, drain until the EOS sample, then release.
    ///
    /// Output may arrive after a delay, so empty dequeues are retried with a
    /// short sleep until the drain timeout. Blocks the calling thread.
    pub fn finish(&mut self) -> MediaResult<Vec<DrainEvent>> {
        match self.state {
            EncoderState::Idle => {
                self.transition(EncoderState::Finished);
                self.release();
                return Ok(Vec::new());
            }
            EncoderState::Finished => return Ok(Vec::new()),
            EncoderState::Streaming => {
                if let Err(e) = self.backend().and_then(|b| b.signal_end_of_stream()) {
                    self.fail();
                    return Err(e);
                }
                self.transition(EncoderState::Draining);
            }
            other => {
                return Err(MediaError::InvalidState {
                    message: format!("{} encoder cannot finish while {}", self.role, other),
                });
            }
        }

        let mut events = Vec::new();
        let deadline = Instant::now() + self.drain_timeout;
        loop {
            let before = events.len();
            for event in self.drain() {
                events.push(event?);
            }
            if self.end_of_stream {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "{} encoder never produced end-of-stream within {:?}",
                    self.role, self.drain_timeout
                );
                break;
            }
            if events.len() == before {
                std::thread::sleep(DRAIN_POLL_INTERVAL);
            }
        }

        self.transition(EncoderState::Finished);
        self.release();
        Ok(events)
    }

    /// Release the backend. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.release();
            debug!("{} encoder released ({})", self.role, backend.codec_name());
        }
    }
}

impl Drop for TrackEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Lazy iterator over available encoder output
pub struct Drain<'a> {
    encoder: &'a mut TrackEncoder,
}

impl Iterator for Drain<'_> {
    type Item = MediaResult<DrainEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        let encoder = &mut *self.encoder;
        if !matches!(
            encoder.state,
            EncoderState::Streaming | EncoderState::Draining
        ) {
            return None;
        }

        loop {
            let output = match encoder.backend.as_mut()?.dequeue_output() {
                Ok(output) => output,
                Err(e) => {
                    error!("❌ {} encoder output failed: {}", encoder.role, e);
                    encoder.fail();
                    return Some(Err(e));
                }
            };

            match output {
                EncoderOutput::TryAgainLater => return None,
                EncoderOutput::FormatChanged(format) => {
                    if encoder.format_reported {
                        warn!("{} encoder changed format mid-stream; ignored", encoder.role);
                        continue;
                    }
                    encoder.format_reported = true;
                    return Some(Ok(DrainEvent::FormatReady(format)));
                }
                EncoderOutput::Sample(sample) => {
                    if sample.is_end_of_stream() {
                        encoder.end_of_stream = true;
                    }
                    return Some(Ok(DrainEvent::Sample(sample)));
                }
            }
        }
    }
}
