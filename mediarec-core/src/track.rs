//! Track identity, negotiated formats and encoded samples

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    /// Video track
    Video,
    /// Audio track
    Audio,
}

/// Role of an expected track within a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrackRole {
    /// The single video track
    Video,
    /// Microphone audio, recorded on its own
    MicAudio,
    /// Speaker loopback audio, recorded on its own
    SpeakerAudio,
    /// Microphone and speaker mixed into one track
    MixedAudio,
}

impl TrackRole {
    /// All roles in container order
    pub const ALL: [TrackRole; 4] = [
        TrackRole::Video,
        TrackRole::MicAudio,
        TrackRole::SpeakerAudio,
        TrackRole::MixedAudio,
    ];

    /// Media kind carried by this role
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackRole::Video => TrackKind::Video,
            _ => TrackKind::Audio,
        }
    }

    /// Whether this is the video role
    pub fn is_video(&self) -> bool {
        matches!(self, TrackRole::Video)
    }

    /// Short name used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackRole::Video => "video",
            TrackRole::MicAudio => "mic",
            TrackRole::SpeakerAudio => "speaker",
            TrackRole::MixedAudio => "mixed",
        }
    }
}

impl fmt::Display for TrackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of a track inside the container, assigned by the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackIndex(pub usize);

impl TrackIndex {
    /// ISO-BMFF track id (1-based)
    pub fn track_id(&self) -> u32 {
        self.0 as u32 + 1
    }
}

impl fmt::Display for TrackIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Codec carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecKind {
    /// H.264/AVC, length-prefixed NAL units
    H264,
    /// Opus packets
    Opus,
    /// Uncompressed planar I420
    RawI420,
    /// Uncompressed 16-bit little-endian PCM
    Pcm16,
}

impl CodecKind {
    /// Media kind of the codec
    pub fn kind(&self) -> TrackKind {
        match self {
            CodecKind::H264 | CodecKind::RawI420 => TrackKind::Video,
            CodecKind::Opus | CodecKind::Pcm16 => TrackKind::Audio,
        }
    }

    /// Codec name for display
    pub fn name(&self) -> &'static str {
        match self {
            CodecKind::H264 => "H264",
            CodecKind::Opus => "Opus",
            CodecKind::RawI420 => "I420",
            CodecKind::Pcm16 => "PCM16",
        }
    }
}

/// Negotiated output format of a track, fixed once the encoder reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackFormat {
    /// Video output format
    Video {
        /// Codec
        codec: CodecKind,
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
        /// Media timescale (ticks per second)
        timescale: u32,
        /// Codec private data (avcC record for H.264)
        codec_private: Bytes,
    },
    /// Audio output format
    Audio {
        /// Codec
        codec: CodecKind,
        /// Sample rate in Hz
        sample_rate: u32,
        /// Channel count
        channels: u16,
        /// Codec private data (Opus identification fields)
        codec_private: Bytes,
    },
}

/// Timescale used for video tracks
pub const VIDEO_TIMESCALE: u32 = 90_000;

impl TrackFormat {
    /// Video format with the default 90 kHz timescale
    pub fn video(codec: CodecKind, width: u32, height: u32, codec_private: Bytes) -> Self {
        TrackFormat::Video {
            codec,
            width,
            height,
            timescale: VIDEO_TIMESCALE,
            codec_private,
        }
    }

    /// Audio format whose timescale is the sample rate
    pub fn audio(codec: CodecKind, sample_rate: u32, channels: u16, codec_private: Bytes) -> Self {
        TrackFormat::Audio {
            codec,
            sample_rate,
            channels,
            codec_private,
        }
    }

    /// Codec of the track
    pub fn codec(&self) -> CodecKind {
        match self {
            TrackFormat::Video { codec, .. } | TrackFormat::Audio { codec, .. } => *codec,
        }
    }

    /// Media kind of the track
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackFormat::Video { .. } => TrackKind::Video,
            TrackFormat::Audio { .. } => TrackKind::Audio,
        }
    }

    /// Media timescale in ticks per second
    pub fn timescale(&self) -> u32 {
        match self {
            TrackFormat::Video { timescale, .. } => *timescale,
            TrackFormat::Audio { sample_rate, .. } => *sample_rate,
        }
    }

    /// Codec private bytes
    pub fn codec_private(&self) -> &Bytes {
        match self {
            TrackFormat::Video { codec_private, .. } | TrackFormat::Audio { codec_private, .. } => {
                codec_private
            }
        }
    }

    /// Convert microseconds to this track's timescale
    pub fn micros_to_ticks(&self, micros: u64) -> u64 {
        (micros as u128 * self.timescale() as u128 / 1_000_000) as u64
    }
}

/// Per-sample flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    /// Sync sample (IDR for video, every audio packet)
    pub key_frame: bool,
    /// Last sample the encoder will produce
    pub end_of_stream: bool,
}

/// One encoded access unit ready for the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    /// Encoded payload
    pub data: Bytes,
    /// Presentation timestamp in microseconds
    pub pts_us: u64,
    /// Sample flags
    pub flags: SampleFlags,
}

impl EncodedSample {
    /// Create a sample
    pub fn new(data: impl Into<Bytes>, pts_us: u64, key_frame: bool) -> Self {
        Self {
            data: data.into(),
            pts_us,
            flags: SampleFlags {
                key_frame,
                end_of_stream: false,
            },
        }
    }

    /// Create the end-of-stream marker, optionally carrying trailing data
    pub fn end_of_stream(data: impl Into<Bytes>, pts_us: u64) -> Self {
        Self {
            data: data.into(),
            pts_us,
            flags: SampleFlags {
                key_frame: false,
                end_of_stream: true,
            },
        }
    }

    /// Whether this sample is the end-of-stream marker
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.end_of_stream
    }

    /// Payload length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
