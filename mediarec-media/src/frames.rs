//! Raw media units pushed by capture

use crate::codecs::i420_size;
use crate::error::{MediaError, MediaResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Origin of an audio chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioSource {
    /// Microphone capture
    Mic,
    /// Speaker loopback capture
    Speaker,
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioSource::Mic => f.write_str("mic"),
            AudioSource::Speaker => f.write_str("speaker"),
        }
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Pixel storage of a frame, with an optional hook run when it is dropped.
///
/// Capture sources that lend out pooled buffers attach a hook to get them
/// back. The hook runs exactly once.
pub struct FrameBuffer {
    data: Bytes,
    release: Option<ReleaseHook>,
}

impl FrameBuffer {
    /// Wrap owned pixel data
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            release: None,
        }
    }

    /// Wrap pixel data that must be handed back through `release`
    pub fn with_release(data: impl Into<Bytes>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            data: data.into(),
            release: Some(Box::new(release)),
        }
    }

    /// Pixel bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.data.len())
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

/// Planar I420 video frame
#[derive(Debug)]
pub struct RawFrame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Capture timestamp in microseconds (source clock)
    pub timestamp_us: u64,
    buffer: FrameBuffer,
}

impl RawFrame {
    /// Create a frame that owns its pixels
    pub fn new(width: u32, height: u32, timestamp_us: u64, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            timestamp_us,
            buffer: FrameBuffer::new(data),
        }
    }

    /// Create a frame around a buffer, e.g. one with a release hook
    pub fn from_buffer(width: u32, height: u32, timestamp_us: u64, buffer: FrameBuffer) -> Self {
        Self {
            width,
            height,
            timestamp_us,
            buffer,
        }
    }

    /// Pixel bytes
    pub fn data(&self) -> &[u8] {
        self.buffer.data()
    }

    /// Shared handle to the pixel bytes
    pub fn bytes(&self) -> Bytes {
        self.buffer.data.clone()
    }

    /// Check the buffer holds a full I420 image
    pub fn validate(&self) -> MediaResult<()> {
        let expected = i420_size(self.width, self.height);
        if self.data().len() < expected {
            return Err(MediaError::InvalidFrameData {
                expected,
                actual: self.data().len(),
            });
        }
        Ok(())
    }
}

/// Interleaved 16-bit PCM from one capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAudioChunk {
    /// Interleaved samples
    pub samples: Vec<i16>,
    /// Channel count
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Capture source
    pub source: AudioSource,
}

impl RawAudioChunk {
    /// Create a chunk
    pub fn new(source: AudioSource, samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            source,
        }
    }

    /// Frames (samples per channel)
    pub fn frames(&self) -> u64 {
        (self.samples.len() / self.channels.max(1) as usize) as u64
    }
}

/// Mixed PCM with a pts from the mixer's sample clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedAudioChunk {
    /// Interleaved samples
    pub samples: Vec<i16>,
    /// Channel count
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Presentation timestamp in microseconds
    pub pts_us: u64,
}

impl MixedAudioChunk {
    /// Frames (samples per channel)
    pub fn frames(&self) -> u64 {
        (self.samples.len() / self.channels.max(1) as usize) as u64
    }
}
