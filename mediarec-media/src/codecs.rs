//! Encoder backends
//!
//! A backend follows the buffer protocol of hardware codecs: input is queued,
//! output is dequeued until the backend reports "try again later", and the
//! first output of a stream announces its format. Real codecs are
//! feature-gated; without them the backends pass raw I420 and 16-bit PCM
//! through, which the container stores uncompressed.

use crate::encoder::EncoderInput;
use crate::error::{MediaError, MediaResult};
use bytes::{BufMut, Bytes, BytesMut};
use mediarec_core::{CodecKind, EncodedSample, TrackFormat, TrackRole};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

#[cfg(feature = "opus")]
use audiopus::{coder::Encoder as AudiopusEncoder, Application, Bitrate, Channels, SampleRate};

#[cfg(feature = "h264")]
use openh264::{
    encoder::{BitRate, Encoder as OpenH264Encoder, EncoderConfig, FrameRate, IntraFramePeriod},
    formats::YUVBuffer,
    OpenH264API,
};

/// Video encoder target parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoEncoderConfig {
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Frame rate in frames per second
    pub framerate: u32,
    /// Seconds between I-frames
    pub iframe_interval_secs: u32,
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            bitrate: 6_000_000,
            framerate: 30,
            iframe_interval_secs: 5,
        }
    }
}

/// Audio encoder target parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioEncoderConfig {
    /// Target bitrate in bits per second
    pub bitrate: u32,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self { bitrate: 64_000 }
    }
}

/// Targets a session hands to its encoders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderTargets {
    /// Video targets
    pub video: VideoEncoderConfig,
    /// Audio targets, shared by every audio track
    pub audio: AudioEncoderConfig,
}

/// Input format fixed by the first unit of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Planar I420 frames
    Video {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
    /// Interleaved 16-bit PCM
    Audio {
        /// Sample rate in Hz
        sample_rate: u32,
        /// Channel count
        channels: u16,
    },
}

/// One dequeued encoder output
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderOutput {
    /// Nothing available right now
    TryAgainLater,
    /// Output format is known
    FormatChanged(TrackFormat),
    /// Encoded sample; the end-of-stream marker carries the EOS flag
    Sample(EncodedSample),
}

/// Encoder backend driven by a [`TrackEncoder`](crate::encoder::TrackEncoder)
pub trait EncoderBackend: Send + std::fmt::Debug {
    /// Configure for the given input; called once before any input
    fn configure(&mut self, format: InputFormat) -> MediaResult<()>;

    /// Queue one input unit
    fn queue_input(&mut self, input: &EncoderInput<'_>) -> MediaResult<()>;

    /// Flush buffered input and queue the end-of-stream marker
    fn signal_end_of_stream(&mut self) -> MediaResult<()>;

    /// Take the next output
    fn dequeue_output(&mut self) -> MediaResult<EncoderOutput>;

    /// Free codec resources
    fn release(&mut self);

    /// Codec name for logs and errors
    fn codec_name(&self) -> &'static str;
}

/// Creates the backend for a track
pub trait EncoderFactory: Send + Sync + std::fmt::Debug {
    /// Create a backend for `role` aimed at the session's `targets`
    fn create(
        &self,
        role: TrackRole,
        targets: &EncoderTargets,
    ) -> MediaResult<Box<dyn EncoderBackend>>;
}

/// Factory for the built-in H.264 and Opus backends
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEncoderFactory;

impl EncoderFactory for DefaultEncoderFactory {
    fn create(
        &self,
        role: TrackRole,
        targets: &EncoderTargets,
    ) -> MediaResult<Box<dyn EncoderBackend>> {
        if role.is_video() {
            Ok(Box::new(H264Encoder::new(targets.video.clone())))
        } else {
            Ok(Box::new(OpusEncoder::new(targets.audio.clone())))
        }
    }
}

/// Convert interleaved samples to little-endian bytes
pub fn pcm_to_le_bytes(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for sample in samples {
        buf.put_i16_le(*sample);
    }
    buf.freeze()
}

/// Size in bytes of a planar I420 image
pub fn i420_size(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * (w.div_ceil(2) * h.div_ceil(2))
}

/// H.264 video encoder
///
/// With the `h264` feature this drives openh264; otherwise frames pass
/// through as raw I420.
#[derive(Debug)]
pub struct H264Encoder {
    config: VideoEncoderConfig,
    input: Option<(u32, u32)>,
    output: VecDeque<EncoderOutput>,
    last_pts: u64,
    #[cfg(feature = "h264")]
    encoder: Option<OpenH264Encoder>,
    #[cfg(feature = "h264")]
    format_sent: bool,
}

impl H264Encoder {
    /// Create an unconfigured encoder
    pub fn new(config: VideoEncoderConfig) -> Self {
        Self {
            config,
            input: None,
            output: VecDeque::new(),
            last_pts: 0,
            #[cfg(feature = "h264")]
            encoder: None,
            #[cfg(feature = "h264")]
            format_sent: false,
        }
    }

    /// Target parameters
    pub fn config(&self) -> &VideoEncoderConfig {
        &self.config
    }
}

impl EncoderBackend for H264Encoder {
    fn configure(&mut self, format: InputFormat) -> MediaResult<()> {
        let InputFormat::Video { width, height } = format else {
            return Err(MediaError::CodecInitializationFailed {
                codec: self.codec_name().to_string(),
                reason: "audio input for a video encoder".to_string(),
            });
        };
        // Sample entries store dimensions as 16-bit fields
        let too_large = width > u32::from(u16::MAX) || height > u32::from(u16::MAX);
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 || too_large {
            return Err(MediaError::CodecInitializationFailed {
                codec: self.codec_name().to_string(),
                reason: format!("unsupported resolution {}x{}", width, height),
            });
        }

        #[cfg(feature = "h264")]
        {
            let framerate = self.config.framerate.max(1);
            let config = EncoderConfig::new()
                .bitrate(BitRate::from_bps(self.config.bitrate))
                .max_frame_rate(FrameRate::from_hz(framerate as f32))
                .intra_frame_period(IntraFramePeriod::from_num_frames(
                    framerate.saturating_mul(self.config.iframe_interval_secs.max(1)),
                ));
            let encoder = OpenH264Encoder::with_api_config(OpenH264API::from_source(), config)
                .map_err(|e| MediaError::CodecInitializationFailed {
                    codec: "H264".to_string(),
                    reason: format!("Failed to create H.264 encoder: {}", e),
                })?;
            self.encoder = Some(encoder);
        }
        #[cfg(not(feature = "h264"))]
        {
            self.output
                .push_back(EncoderOutput::FormatChanged(TrackFormat::video(
                    CodecKind::RawI420,
                    width,
                    height,
                    Bytes::new(),
                )));
        }

        self.input = Some((width, height));
        debug!(
            "Configured {} encoder {}x{} @ {} fps, {} bps",
            self.codec_name(),
            width,
            height,
            self.config.framerate,
            self.config.bitrate
        );
        Ok(())
    }

    fn queue_input(&mut self, input: &EncoderInput<'_>) -> MediaResult<()> {
        let EncoderInput::Video(frame) = input else {
            return Err(MediaError::InvalidState {
                message: "audio input for a video encoder".to_string(),
            });
        };
        let Some((width, height)) = self.input else {
            return Err(MediaError::InvalidState {
                message: "encoder not configured".to_string(),
            });
        };
        if frame.width != width || frame.height != height {
            return Err(MediaError::InvalidFrameData {
                expected: i420_size(width, height),
                actual: frame.data().len(),
            });
        }
        frame.validate()?;
        self.last_pts = frame.timestamp_us;

        #[cfg(feature = "h264")]
        {
            self.encode_with_openh264(frame, width, height)
        }
        #[cfg(not(feature = "h264"))]
        {
            let size = i420_size(width, height);
            self.output.push_back(EncoderOutput::Sample(EncodedSample::new(
                frame.bytes().slice(..size),
                frame.timestamp_us,
                true,
            )));
            Ok(())
        }
    }

    fn signal_end_of_stream(&mut self) -> MediaResult<()> {
        self.output
            .push_back(EncoderOutput::Sample(EncodedSample::end_of_stream(
                Bytes::new(),
                self.last_pts,
            )));
        Ok(())
    }

    fn dequeue_output(&mut self) -> MediaResult<EncoderOutput> {
        Ok(self
            .output
            .pop_front()
            .unwrap_or(EncoderOutput::TryAgainLater))
    }

    fn release(&mut self) {
        #[cfg(feature = "h264")]
        {
            self.encoder = None;
        }
        self.output.clear();
        self.input = None;
    }

    fn codec_name(&self) -> &'static str {
        #[cfg(feature = "h264")]
        {
            "H264"
        }
        #[cfg(not(feature = "h264"))]
        {
            "I420"
        }
    }
}

#[cfg(feature = "h264")]
impl H264Encoder {
    fn encode_with_openh264(
        &mut self,
        frame: &crate::frames::RawFrame,
        width: u32,
        height: u32,
    ) -> MediaResult<()> {
        let encoder = self.encoder.as_mut().ok_or_else(|| MediaError::InvalidState {
            message: "openh264 encoder released".to_string(),
        })?;

        let size = i420_size(width, height);
        let yuv = YUVBuffer::from_vec(frame.data()[..size].to_vec(), width as usize, height as usize);
        let bitstream = encoder
            .encode(&yuv)
            .map_err(|e| MediaError::EncodingFailed {
                codec: "H264".to_string(),
                reason: format!("H.264 encoding failed: {}", e),
            })?;
        let unit = crate::h264::AccessUnit::parse(&bitstream.to_vec());

        if !self.format_sent {
            let (Some(sps), Some(pps)) = (&unit.sps, &unit.pps) else {
                // Nothing usable until the first IDR carries parameter sets
                return Ok(());
            };
            let avcc = crate::h264::avc_decoder_config(sps, pps);
            self.output
                .push_back(EncoderOutput::FormatChanged(TrackFormat::video(
                    CodecKind::H264,
                    width,
                    height,
                    avcc,
                )));
            self.format_sent = true;
        }

        if !unit.sample.is_empty() {
            self.output.push_back(EncoderOutput::Sample(EncodedSample::new(
                unit.sample,
                frame.timestamp_us,
                unit.key_frame,
            )));
        }
        Ok(())
    }
}

/// Opus audio encoder
///
/// With the `opus` feature PCM is accumulated into 20 ms frames and encoded
/// by audiopus; otherwise chunks pass through as 16-bit PCM.
#[derive(Debug)]
pub struct OpusEncoder {
    config: AudioEncoderConfig,
    input: Option<(u32, u16)>,
    output: VecDeque<EncoderOutput>,
    base_pts: Option<u64>,
    frames_emitted: u64,
    #[cfg(feature = "opus")]
    encoder: Option<AudiopusEncoder>,
    #[cfg(feature = "opus")]
    pending: Vec<i16>,
}

impl OpusEncoder {
    /// Create an unconfigured encoder
    pub fn new(config: AudioEncoderConfig) -> Self {
        Self {
            config,
            input: None,
            output: VecDeque::new(),
            base_pts: None,
            frames_emitted: 0,
            #[cfg(feature = "opus")]
            encoder: None,
            #[cfg(feature = "opus")]
            pending: Vec::new(),
        }
    }

    /// Target parameters
    pub fn config(&self) -> &AudioEncoderConfig {
        &self.config
    }

    fn next_pts(&self, sample_rate: u32) -> u64 {
        self.base_pts.unwrap_or(0) + mediarec_core::frames_to_micros(self.frames_emitted, sample_rate)
    }
}

impl EncoderBackend for OpusEncoder {
    fn configure(&mut self, format: InputFormat) -> MediaResult<()> {
        let InputFormat::Audio {
            sample_rate,
            channels,
        } = format
        else {
            return Err(MediaError::CodecInitializationFailed {
                codec: self.codec_name().to_string(),
                reason: "video input for an audio encoder".to_string(),
            });
        };
        if channels == 0 || channels > 2 {
            return Err(MediaError::CodecInitializationFailed {
                codec: self.codec_name().to_string(),
                reason: format!("unsupported channel count {}", channels),
            });
        }

        #[cfg(feature = "opus")]
        {
            let rate = match sample_rate {
                8000 => SampleRate::Hz8000,
                12000 => SampleRate::Hz12000,
                16000 => SampleRate::Hz16000,
                24000 => SampleRate::Hz24000,
                48000 => SampleRate::Hz48000,
                other => {
                    return Err(MediaError::CodecInitializationFailed {
                        codec: "Opus".to_string(),
                        reason: format!("Unsupported Opus sample rate: {}", other),
                    })
                }
            };
            let layout = if channels == 1 {
                Channels::Mono
            } else {
                Channels::Stereo
            };
            let mut encoder = AudiopusEncoder::new(rate, layout, Application::Voip).map_err(|e| {
                MediaError::CodecInitializationFailed {
                    codec: "Opus".to_string(),
                    reason: format!("Failed to create Opus encoder: {:?}", e),
                }
            })?;
            encoder
                .set_bitrate(Bitrate::BitsPerSecond(self.config.bitrate as i32))
                .map_err(|e| MediaError::CodecInitializationFailed {
                    codec: "Opus".to_string(),
                    reason: format!("Failed to set bitrate: {:?}", e),
                })?;
            self.encoder = Some(encoder);
            self.output
                .push_back(EncoderOutput::FormatChanged(TrackFormat::audio(
                    CodecKind::Opus,
                    sample_rate,
                    channels,
                    mediarec_core::container::boxes::opus_specific_box(
                        channels,
                        sample_rate,
                        mediarec_core::container::boxes::OPUS_PRE_SKIP,
                    ),
                )));
        }
        #[cfg(not(feature = "opus"))]
        {
            self.output
                .push_back(EncoderOutput::FormatChanged(TrackFormat::audio(
                    CodecKind::Pcm16,
                    sample_rate,
                    channels,
                    Bytes::new(),
                )));
        }

        self.input = Some((sample_rate, channels));
        debug!(
            "Configured {} encoder {} Hz x{} @ {} bps",
            self.codec_name(),
            sample_rate,
            channels,
            self.config.bitrate
        );
        Ok(())
    }

    fn queue_input(&mut self, input: &EncoderInput<'_>) -> MediaResult<()> {
        let EncoderInput::Audio {
            samples,
            sample_rate,
            channels,
            pts_us,
        } = input
        else {
            return Err(MediaError::InvalidState {
                message: "video input for an audio encoder".to_string(),
            });
        };
        let Some((rate, layout)) = self.input else {
            return Err(MediaError::InvalidState {
                message: "encoder not configured".to_string(),
            });
        };
        if *sample_rate != rate {
            return Err(MediaError::SampleRateMismatch {
                expected: rate,
                actual: *sample_rate,
            });
        }
        if *channels != layout {
            return Err(MediaError::ChannelCountMismatch {
                expected: layout,
                actual: *channels,
            });
        }
        self.base_pts.get_or_insert(*pts_us);

        #[cfg(feature = "opus")]
        {
            self.pending.extend_from_slice(samples);
            self.encode_pending(rate, layout, false)
        }
        #[cfg(not(feature = "opus"))]
        {
            self.output.push_back(EncoderOutput::Sample(EncodedSample::new(
                pcm_to_le_bytes(samples),
                *pts_us,
                true,
            )));
            self.frames_emitted += (samples.len() / layout as usize) as u64;
            Ok(())
        }
    }

    fn signal_end_of_stream(&mut self) -> MediaResult<()> {
        let pts = match self.input {
            Some((rate, _layout)) => {
                #[cfg(feature = "opus")]
                self.encode_pending(rate, _layout, true)?;
                self.next_pts(rate)
            }
            None => 0,
        };
        self.output
            .push_back(EncoderOutput::Sample(EncodedSample::end_of_stream(
                Bytes::new(),
                pts,
            )));
        Ok(())
    }

    fn dequeue_output(&mut self) -> MediaResult<EncoderOutput> {
        Ok(self
            .output
            .pop_front()
            .unwrap_or(EncoderOutput::TryAgainLater))
    }

    fn release(&mut self) {
        #[cfg(feature = "opus")]
        {
            self.encoder = None;
            self.pending.clear();
        }
        self.output.clear();
        self.input = None;
    }

    fn codec_name(&self) -> &'static str {
        #[cfg(feature = "opus")]
        {
            "Opus"
        }
        #[cfg(not(feature = "opus"))]
        {
            "PCM16"
        }
    }
}

#[cfg(feature = "opus")]
impl OpusEncoder {
    /// Encode every complete 20 ms frame; with `pad` the remainder is
    /// zero-filled and encoded too.
    fn encode_pending(&mut self, sample_rate: u32, channels: u16, pad: bool) -> MediaResult<()> {
        let frame_len = (sample_rate / 50) as usize * channels as usize;
        if pad && !self.pending.is_empty() && self.pending.len() < frame_len {
            self.pending.resize(frame_len, 0);
        }

        let mut packet = vec![0u8; 4000];
        while self.pending.len() >= frame_len {
            let encoder = self.encoder.as_mut().ok_or_else(|| MediaError::InvalidState {
                message: "opus encoder released".to_string(),
            })?;
            let size = encoder
                .encode(&self.pending[..frame_len], &mut packet)
                .map_err(|e| MediaError::EncodingFailed {
                    codec: "Opus".to_string(),
                    reason: format!("Opus encoding failed: {:?}", e),
                })?;
            let pts = self.next_pts(sample_rate);
            self.pending.drain(..frame_len);
            self.frames_emitted += (frame_len / channels as usize) as u64;
            self.output.push_back(EncoderOutput::Sample(EncodedSample::new(
                Bytes::copy_from_slice(&packet[..size]),
                pts,
                true,
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::RawFrame;

    #[test]
    fn test_default_targets() {
        let video = VideoEncoderConfig::default();
        assert_eq!(video.bitrate, 6_000_000);
        assert_eq!(video.framerate, 30);
        assert_eq!(video.iframe_interval_secs, 5);
        assert_eq!(AudioEncoderConfig::default().bitrate, 64_000);
    }

    #[test]
    fn test_i420_size_rounds_chroma_up() {
        assert_eq!(i420_size(4, 4), 24);
        assert_eq!(i420_size(3, 3), 9 + 2 * 4);
    }

    #[test]
    fn test_video_encoder_rejects_odd_resolution() {
        let mut encoder = H264Encoder::new(VideoEncoderConfig::default());
        let result = encoder.configure(InputFormat::Video {
            width: 641,
            height: 480,
        });
        assert!(matches!(
            result,
            Err(MediaError::CodecInitializationFailed { .. })
        ));
    }

    #[test]
    fn test_video_encoder_rejects_resolution_beyond_16_bits() {
        let mut encoder = H264Encoder::new(VideoEncoderConfig::default());
        for (width, height) in [(65_538, 480), (640, 70_000)] {
            let result = encoder.configure(InputFormat::Video { width, height });
            assert!(matches!(
                result,
                Err(MediaError::CodecInitializationFailed { .. })
            ));
        }
        #[cfg(not(feature = "h264"))]
        assert!(encoder
            .configure(InputFormat::Video {
                width: 65_534,
                height: 2,
            })
            .is_ok());
    }

    #[test]
    fn test_factory_hands_session_targets_to_backends() {
        let targets = EncoderTargets {
            video: VideoEncoderConfig {
                bitrate: 1_500_000,
                framerate: 24,
                iframe_interval_secs: 2,
            },
            audio: AudioEncoderConfig { bitrate: 96_000 },
        };
        let video = DefaultEncoderFactory
            .create(TrackRole::Video, &targets)
            .unwrap();
        let audio = DefaultEncoderFactory
            .create(TrackRole::MicAudio, &targets)
            .unwrap();
        assert!(format!("{:?}", video).contains("bitrate: 1500000"));
        assert!(format!("{:?}", video).contains("framerate: 24"));
        assert!(format!("{:?}", audio).contains("bitrate: 96000"));
    }

    #[test]
    fn test_audio_encoder_rejects_channel_mismatch() {
        let mut encoder = OpusEncoder::new(AudioEncoderConfig::default());
        encoder
            .configure(InputFormat::Audio {
                sample_rate: 48_000,
                channels: 1,
            })
            .unwrap();
        let samples = vec![0i16; 1920];
        let result = encoder.queue_input(&EncoderInput::Audio {
            samples: &samples,
            sample_rate: 48_000,
            channels: 2,
            pts_us: 0,
        });
        assert!(matches!(result, Err(MediaError::ChannelCountMismatch { .. })));
    }

    #[cfg(not(feature = "h264"))]
    #[test]
    fn test_raw_video_passthrough() {
        let mut encoder = H264Encoder::new(VideoEncoderConfig::default());
        encoder
            .configure(InputFormat::Video {
                width: 4,
                height: 4,
            })
            .unwrap();
        let frame = RawFrame::new(4, 4, 1_000, vec![7u8; 24]);
        encoder.queue_input(&EncoderInput::Video(&frame)).unwrap();

        assert!(matches!(
            encoder.dequeue_output().unwrap(),
            EncoderOutput::FormatChanged(TrackFormat::Video {
                codec: CodecKind::RawI420,
                ..
            })
        ));
        match encoder.dequeue_output().unwrap() {
            EncoderOutput::Sample(sample) => {
                assert_eq!(sample.len(), 24);
                assert_eq!(sample.pts_us, 1_000);
                assert!(sample.flags.key_frame);
            }
            other => panic!("expected sample, got {:?}", other),
        }
        assert_eq!(encoder.dequeue_output().unwrap(), EncoderOutput::TryAgainLater);
    }

    #[cfg(not(feature = "opus"))]
    #[test]
    fn test_pcm_passthrough_end_of_stream_pts() {
        let mut encoder = OpusEncoder::new(AudioEncoderConfig::default());
        encoder
            .configure(InputFormat::Audio {
                sample_rate: 48_000,
                channels: 1,
            })
            .unwrap();
        let samples = vec![1i16; 480];
        encoder
            .queue_input(&EncoderInput::Audio {
                samples: &samples,
                sample_rate: 48_000,
                channels: 1,
                pts_us: 0,
            })
            .unwrap();
        encoder.signal_end_of_stream().unwrap();

        let mut outputs = Vec::new();
        loop {
            match encoder.dequeue_output().unwrap() {
                EncoderOutput::TryAgainLater => break,
                output => outputs.push(output),
            }
        }
        assert_eq!(outputs.len(), 3);
        match &outputs[2] {
            EncoderOutput::Sample(eos) => {
                assert!(eos.is_end_of_stream());
                assert_eq!(eos.pts_us, 10_000);
            }
            other => panic!("expected end of stream, got {:?}", other),
        }
    }
}
