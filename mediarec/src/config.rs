//! Recorder configuration and defaults

use mediarec_core::{PreStartPolicy, RecorderError, RecorderResult, TrackRole};
use mediarec_media::{AudioEncoderConfig, EncoderTargets, MixPolicy, VideoEncoderConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to record and how.
///
/// Field names are camelCase in JSON so plugin layers can pass their
/// options straight through:
///
/// ```rust
/// use mediarec::RecorderConfig;
///
/// let config = RecorderConfig::from_json(
///     r#"{ "includeVideo": true, "includeMicAudio": true, "fragmentDurationMs": 500 }"#,
/// )?;
/// assert!(config.include_mic_audio);
/// # Ok::<(), mediarec::RecorderError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecorderConfig {
    /// Record screen/camera frames
    pub include_video: bool,
    /// Record microphone audio
    pub include_mic_audio: bool,
    /// Record speaker loopback audio
    pub include_speaker_audio: bool,
    /// Mix mic and speaker into one track instead of two
    pub mix_audio: bool,
    /// Video encoder targets
    pub video: VideoEncoderConfig,
    /// Audio encoder targets
    pub audio: AudioEncoderConfig,
    /// How mic and speaker samples are combined
    pub mix_policy: MixPolicy,
    /// What happens to samples encoded before the container starts
    pub pre_start: PreStartPolicy,
    /// Target fragment length in milliseconds
    pub fragment_duration_ms: u64,
    /// Per-worker shutdown bound in milliseconds
    pub shutdown_timeout_ms: u64,
    /// How long an encoder may take to flush on stop, in milliseconds
    pub drain_timeout_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            include_video: true,
            include_mic_audio: false,
            include_speaker_audio: false,
            mix_audio: false,
            video: VideoEncoderConfig::default(),
            audio: AudioEncoderConfig::default(),
            mix_policy: MixPolicy::default(),
            pre_start: PreStartPolicy::default(),
            fragment_duration_ms: 1000,
            shutdown_timeout_ms: 10_000,
            drain_timeout_ms: 2_000,
        }
    }
}

impl RecorderConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> RecorderResult<Self> {
        serde_json::from_str(json).map_err(|e| RecorderError::Configuration {
            reason: format!("Invalid recorder configuration: {}", e),
        })
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> RecorderResult<String> {
        serde_json::to_string(self).map_err(|e| RecorderError::Configuration {
            reason: format!("Failed to serialize configuration: {}", e),
        })
    }

    /// Enable or disable video
    pub fn with_video(mut self, enabled: bool) -> Self {
        self.include_video = enabled;
        self
    }

    /// Enable or disable microphone audio
    pub fn with_mic_audio(mut self, enabled: bool) -> Self {
        self.include_mic_audio = enabled;
        self
    }

    /// Enable or disable speaker audio
    pub fn with_speaker_audio(mut self, enabled: bool) -> Self {
        self.include_speaker_audio = enabled;
        self
    }

    /// Mix mic and speaker into one track
    pub fn with_mixing(mut self, enabled: bool) -> Self {
        self.mix_audio = enabled;
        self
    }

    /// Set the mixing policy
    pub fn with_mix_policy(mut self, policy: MixPolicy) -> Self {
        self.mix_policy = policy;
        self
    }

    /// Set the pre-start policy
    pub fn with_pre_start(mut self, policy: PreStartPolicy) -> Self {
        self.pre_start = policy;
        self
    }

    /// Set the video encoder targets
    pub fn with_video_encoder(mut self, video: VideoEncoderConfig) -> Self {
        self.video = video;
        self
    }

    /// Set the audio encoder targets
    pub fn with_audio_encoder(mut self, audio: AudioEncoderConfig) -> Self {
        self.audio = audio;
        self
    }

    /// Set the fragment length
    pub fn with_fragment_duration(mut self, duration: Duration) -> Self {
        self.fragment_duration_ms = duration.as_millis() as u64;
        self
    }

    /// Set the per-worker shutdown bound
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the encoder flush bound
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Fragment length
    pub fn fragment_duration(&self) -> Duration {
        Duration::from_millis(self.fragment_duration_ms)
    }

    /// Per-worker shutdown bound
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Encoder flush bound
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Encoder targets for this session
    pub fn encoder_targets(&self) -> EncoderTargets {
        EncoderTargets {
            video: self.video.clone(),
            audio: self.audio.clone(),
        }
    }

    /// Reject configurations that cannot produce a recording
    pub fn validate(&self) -> RecorderResult<()> {
        let reject = |reason: &str| {
            Err(RecorderError::Configuration {
                reason: reason.to_string(),
            })
        };

        if !self.include_video && !self.include_mic_audio && !self.include_speaker_audio {
            return reject("nothing to record: video, mic and speaker are all disabled");
        }
        if self.mix_audio && !(self.include_mic_audio && self.include_speaker_audio) {
            return reject("mixing requires both mic and speaker audio");
        }
        if self.fragment_duration_ms == 0 {
            return reject("fragment duration must be positive");
        }
        if self.shutdown_timeout_ms == 0 {
            return reject("shutdown timeout must be positive");
        }
        if self.drain_timeout_ms == 0 || self.drain_timeout_ms >= self.shutdown_timeout_ms {
            return reject("drain timeout must be positive and shorter than the shutdown timeout");
        }
        if self.include_video && (self.video.framerate == 0 || self.video.bitrate == 0) {
            return reject("video framerate and bitrate must be positive");
        }
        if (self.include_mic_audio || self.include_speaker_audio) && self.audio.bitrate == 0 {
            return reject("audio bitrate must be positive");
        }
        if let PreStartPolicy::Buffer { max_samples: 0 } = self.pre_start {
            return reject("pre-start buffer must hold at least one sample");
        }
        Ok(())
    }

    /// Tracks this configuration produces, in container order preference
    pub fn roles(&self) -> Vec<TrackRole> {
        let mut roles = Vec::new();
        if self.include_video {
            roles.push(TrackRole::Video);
        }
        if self.mix_audio {
            roles.push(TrackRole::MixedAudio);
        } else {
            if self.include_mic_audio {
                roles.push(TrackRole::MicAudio);
            }
            if self.include_speaker_audio {
                roles.push(TrackRole::SpeakerAudio);
            }
        }
        roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecorderConfig::default();
        assert!(config.include_video);
        assert!(!config.include_mic_audio);
        assert_eq!(config.fragment_duration(), Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(config.drain_timeout(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
        assert_eq!(config.roles(), vec![TrackRole::Video]);
    }

    #[test]
    fn test_from_json_camel_case() {
        let config = RecorderConfig::from_json(
            r#"{
                "includeVideo": false,
                "includeMicAudio": true,
                "includeSpeakerAudio": true,
                "mixAudio": true,
                "mixPolicy": "sumClamp",
                "preStart": { "buffer": { "maxSamples": 16 } },
                "video": { "framerate": 60 }
            }"#,
        )
        .unwrap();
        assert!(config.mix_audio);
        assert_eq!(config.mix_policy, MixPolicy::SumClamp);
        assert_eq!(config.pre_start, PreStartPolicy::Buffer { max_samples: 16 });
        assert_eq!(config.video.framerate, 60);
        assert_eq!(config.video.bitrate, 6_000_000);
        assert_eq!(config.roles(), vec![TrackRole::MixedAudio]);
    }

    #[test]
    fn test_rejects_nothing_to_record() {
        let config = RecorderConfig::default().with_video(false);
        assert!(matches!(
            config.validate(),
            Err(RecorderError::Configuration { .. })
        ));
    }

    #[test]
    fn test_rejects_mixing_single_source() {
        let config = RecorderConfig::default()
            .with_mic_audio(true)
            .with_mixing(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_fragment_duration() {
        let config = RecorderConfig::default().with_fragment_duration(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_drain_timeout_must_fit_inside_shutdown_timeout() {
        let config = RecorderConfig::default().with_drain_timeout(Duration::from_secs(10));
        assert!(config.validate().is_err());
        let config = RecorderConfig::default().with_drain_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
        let config = RecorderConfig::from_json(r#"{ "drainTimeoutMs": 250 }"#).unwrap();
        assert_eq!(config.drain_timeout(), Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_encoder_targets_carry_configured_values() {
        let video = VideoEncoderConfig {
            bitrate: 2_000_000,
            framerate: 60,
            iframe_interval_secs: 1,
        };
        let config = RecorderConfig::default()
            .with_video_encoder(video.clone())
            .with_audio_encoder(AudioEncoderConfig { bitrate: 128_000 });
        let targets = config.encoder_targets();
        assert_eq!(targets.video, video);
        assert_eq!(targets.audio.bitrate, 128_000);
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = RecorderConfig::default()
            .with_mic_audio(true)
            .with_pre_start(PreStartPolicy::Buffer { max_samples: 4 });
        let json = config.to_json().unwrap();
        assert!(json.contains("\"includeMicAudio\":true"));
        assert_eq!(RecorderConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_malformed_json_is_configuration_error() {
        assert!(matches!(
            RecorderConfig::from_json("{ not json"),
            Err(RecorderError::Configuration { .. })
        ));
    }
}
