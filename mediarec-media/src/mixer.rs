//! Two-source PCM mixer
//!
//! Holds at most one chunk per source. When both sources have a chunk
//! pending they are mixed into one chunk whose pts comes from a sample
//! clock, so mixed audio is timed by sample count rather than arrival time.

use crate::error::{MediaError, MediaResult};
use crate::frames::{AudioSource, MixedAudioChunk, RawAudioChunk};
use mediarec_core::SampleClock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How two samples are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MixPolicy {
    /// `(a + b) / 2`, never clips
    #[default]
    Average,
    /// `a + b` clamped to the i16 range
    SumClamp,
}

impl MixPolicy {
    /// Mix one pair of samples
    pub fn mix(&self, a: i16, b: i16) -> i16 {
        let sum = a as i32 + b as i32;
        let mixed = match self {
            MixPolicy::Average => sum / 2,
            MixPolicy::SumClamp => sum,
        };
        mixed.clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}

/// Mixer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MixerStats {
    /// Chunks produced
    pub mixed_chunks: u64,
    /// Chunks replaced before their partner arrived
    pub overruns: u64,
}

/// Mixes microphone and speaker PCM
#[derive(Debug)]
pub struct SampleMixer {
    policy: MixPolicy,
    mic: Option<RawAudioChunk>,
    speaker: Option<RawAudioChunk>,
    format: Option<(u32, u16)>,
    clock: Option<SampleClock>,
    stats: MixerStats,
}

impl SampleMixer {
    /// Create a mixer
    pub fn new(policy: MixPolicy) -> Self {
        Self {
            policy,
            mic: None,
            speaker: None,
            format: None,
            clock: None,
            stats: MixerStats::default(),
        }
    }

    /// Mixing policy
    pub fn policy(&self) -> MixPolicy {
        self.policy
    }

    /// Counters
    pub fn stats(&self) -> MixerStats {
        self.stats
    }

    /// Accept a chunk; returns a mixed chunk once both sources are pending.
    ///
    /// The first chunk fixes the sample rate and channel count; chunks that
    /// differ are rejected.
    pub fn feed(&mut self, chunk: RawAudioChunk) -> MediaResult<Option<MixedAudioChunk>> {
        let (rate, channels) = *self
            .format
            .get_or_insert((chunk.sample_rate, chunk.channels));
        if chunk.sample_rate != rate {
            return Err(MediaError::SampleRateMismatch {
                expected: rate,
                actual: chunk.sample_rate,
            });
        }
        if chunk.channels != channels {
            return Err(MediaError::ChannelCountMismatch {
                expected: channels,
                actual: chunk.channels,
            });
        }

        let source = chunk.source;
        let slot = match source {
            AudioSource::Mic => &mut self.mic,
            AudioSource::Speaker => &mut self.speaker,
        };
        if slot.replace(chunk).is_some() {
            self.stats.overruns += 1;
            warn!("Mixer overrun: replaced pending {} chunk", source);
        }

        if self.mic.is_none() || self.speaker.is_none() {
            return Ok(None);
        }
        let mic = self.mic.take().map(|c| c.samples).unwrap_or_default();
        let speaker = self.speaker.take().map(|c| c.samples).unwrap_or_default();
        Ok(Some(self.mix(&mic, &speaker)))
    }

    /// Emit whatever is still pending, mixed against silence
    pub fn flush(&mut self) -> Option<MixedAudioChunk> {
        let mic = self.mic.take().map(|c| c.samples);
        let speaker = self.speaker.take().map(|c| c.samples);
        if mic.is_none() && speaker.is_none() {
            return None;
        }
        debug!("Flushing pending mixer input");
        Some(self.mix(
            mic.as_deref().unwrap_or(&[]),
            speaker.as_deref().unwrap_or(&[]),
        ))
    }

    fn mix(&mut self, a: &[i16], b: &[i16]) -> MixedAudioChunk {
        let (sample_rate, channels) = self.format.unwrap_or((48_000, 1));
        let len = a.len().max(b.len());
        let samples: Vec<i16> = (0..len)
            .map(|i| {
                let x = a.get(i).copied().unwrap_or(0);
                let y = b.get(i).copied().unwrap_or(0);
                self.policy.mix(x, y)
            })
            .collect();

        let frames = (samples.len() / channels.max(1) as usize) as u64;
        let clock = self.clock.get_or_insert_with(|| SampleClock::new(sample_rate));
        let pts_us = clock.advance(frames);
        self.stats.mixed_chunks += 1;

        MixedAudioChunk {
            samples,
            channels,
            sample_rate,
            pts_us,
        }
    }
}
