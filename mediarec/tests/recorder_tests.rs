//! End-to-end recorder tests
//!
//! These drive full sessions: workers, shared muxer and the file on disk.

use mediarec::*;
use mediarec_media::{
    AudioEncoderConfig, DefaultEncoderFactory, EncoderInput, EncoderOutput, EncoderTargets,
    InputFormat, MediaError, MediaResult, VideoEncoderConfig,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const FRAME_BYTES: usize = (WIDTH * HEIGHT * 3 / 2) as usize;

/// Backend that refuses every configuration
#[derive(Debug)]
struct BrokenBackend;

impl EncoderBackend for BrokenBackend {
    fn configure(&mut self, _format: InputFormat) -> MediaResult<()> {
        Err(MediaError::CodecInitializationFailed {
            codec: "broken".to_string(),
            reason: "codec unavailable".to_string(),
        })
    }

    fn queue_input(&mut self, _input: &EncoderInput<'_>) -> MediaResult<()> {
        Ok(())
    }

    fn signal_end_of_stream(&mut self) -> MediaResult<()> {
        Ok(())
    }

    fn dequeue_output(&mut self) -> MediaResult<EncoderOutput> {
        Ok(EncoderOutput::TryAgainLater)
    }

    fn release(&mut self) {}

    fn codec_name(&self) -> &'static str {
        "broken"
    }
}

/// Built-in encoders, except for one role whose codec is broken
#[derive(Debug)]
struct BrokenRoleFactory {
    broken: TrackRole,
}

impl EncoderFactory for BrokenRoleFactory {
    fn create(
        &self,
        role: TrackRole,
        targets: &EncoderTargets,
    ) -> MediaResult<Box<dyn EncoderBackend>> {
        if role == self.broken {
            Ok(Box::new(BrokenBackend))
        } else {
            DefaultEncoderFactory.create(role, targets)
        }
    }
}

/// Built-in encoders, remembering what each backend was built with
#[derive(Debug, Default)]
struct CapturingFactory {
    created: parking_lot::Mutex<Vec<(TrackRole, EncoderTargets, String)>>,
}

impl EncoderFactory for CapturingFactory {
    fn create(
        &self,
        role: TrackRole,
        targets: &EncoderTargets,
    ) -> MediaResult<Box<dyn EncoderBackend>> {
        let backend = DefaultEncoderFactory.create(role, targets)?;
        self.created
            .lock()
            .push((role, targets.clone(), format!("{:?}", backend)));
        Ok(backend)
    }
}

fn frame(index: u64) -> RawFrame {
    // 30 fps capture clock starting at an arbitrary offset
    RawFrame::new(WIDTH, HEIGHT, 7_000_000 + index * 33_333, vec![64u8; FRAME_BYTES])
}

fn chunk(source: AudioSource) -> RawAudioChunk {
    // 1600 frames = one 30 fps frame of 48 kHz audio
    RawAudioChunk::new(source, vec![1000; 1600], 48_000, 1)
}

fn output_in(dir: &Path) -> std::path::PathBuf {
    dir.join("nested").join("recording.mp4")
}

#[tokio::test]
async fn test_video_and_mic_produce_two_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_in(dir.path());
    let recorder = MediaRecorder::new();

    let config = RecorderConfig::default().with_mic_audio(true);
    assert_ok!(recorder.start(&path, config).await);
    assert!(recorder.is_recording());
    assert_eq!(recorder.output_path().as_deref(), Some(path.as_path()));

    for i in 0..30 {
        recorder.push_video_frame(frame(i));
        recorder.push_audio(chunk(AudioSource::Mic));
    }

    let output = assert_ok!(recorder.stop().await);
    assert!(!recorder.is_recording());
    assert_eq!(output.track_count, 2);
    assert!(output.exists());
    assert!(output.track(TrackRole::Video).unwrap().registered);
    assert!(output.track(TrackRole::MicAudio).unwrap().registered);

    let summary = assert_ok!(probe_file(&path));
    assert_eq!(summary.track_count(), 2);
    assert_eq!(summary.tracks_with_handler("vide").count(), 1);
    assert_eq!(summary.tracks_with_handler("soun").count(), 1);
    assert!(summary.total_samples() > 0);
}

#[tokio::test]
async fn test_mixing_produces_one_audio_track() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_in(dir.path());
    let recorder = MediaRecorder::new();

    let config = RecorderConfig::default()
        .with_mic_audio(true)
        .with_speaker_audio(true)
        .with_mixing(true);
    assert_ok!(recorder.start(&path, config).await);

    for i in 0..30 {
        recorder.push_video_frame(frame(i));
        recorder.push_audio(chunk(AudioSource::Mic));
        recorder.push_audio(chunk(AudioSource::Speaker));
    }

    let output = assert_ok!(recorder.stop().await);
    assert_eq!(output.track_count, 2);
    assert!(output.track(TrackRole::MixedAudio).is_some());
    assert!(output.track(TrackRole::MicAudio).is_none());

    let summary = assert_ok!(probe_file(&path));
    assert_eq!(summary.track_count(), 2);
    assert_eq!(summary.tracks_with_handler("soun").count(), 1);
}

#[tokio::test]
async fn test_stop_before_any_frame_yields_empty_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_in(dir.path());
    let recorder = MediaRecorder::new();

    let config = RecorderConfig::default().with_mic_audio(true);
    assert_ok!(recorder.start(&path, config).await);
    let output = assert_ok!(recorder.stop().await);

    assert_eq!(output.track_count, 0);
    let summary = assert_ok!(probe_file(&path));
    assert_eq!(summary.track_count(), 0);
    assert_eq!(summary.fragment_count, 0);
    assert_eq!(recorder.last_output().unwrap().path, path);
}

#[tokio::test]
async fn test_video_encoder_failure_aborts_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_in(dir.path());
    let recorder = MediaRecorder::with_factory(Arc::new(BrokenRoleFactory {
        broken: TrackRole::Video,
    }));
    let mut events = recorder.subscribe();

    let config = RecorderConfig::default().with_mic_audio(true);
    assert_ok!(recorder.start(&path, config).await);
    for i in 0..5 {
        recorder.push_video_frame(frame(i));
        recorder.push_audio(chunk(AudioSource::Mic));
    }

    let err = assert_err!(recorder.stop().await);
    assert!(matches!(
        err,
        RecorderError::EncoderInit {
            role: TrackRole::Video,
            ..
        }
    ));
    assert!(!recorder.is_recording());
    assert!(recorder.last_output().is_none());
    assert!(!path.exists());

    let mut saw_fatal = false;
    while let Ok(event) = events.try_recv() {
        if let RecorderEvent::TrackFailed {
            role: TrackRole::Video,
            recoverable,
            ..
        } = event
        {
            assert!(!recoverable);
            saw_fatal = true;
        }
    }
    assert!(saw_fatal);
}

#[tokio::test]
async fn test_audio_encoder_failure_degrades_to_video_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_in(dir.path());
    let recorder = MediaRecorder::with_factory(Arc::new(BrokenRoleFactory {
        broken: TrackRole::MicAudio,
    }));

    let config = RecorderConfig::default().with_mic_audio(true);
    assert_ok!(recorder.start(&path, config).await);
    for i in 0..10 {
        recorder.push_audio(chunk(AudioSource::Mic));
        recorder.push_video_frame(frame(i));
    }

    let output = assert_ok!(recorder.stop().await);
    assert_eq!(output.track_count, 1);
    assert!(!output.track(TrackRole::MicAudio).unwrap().registered);

    let summary = assert_ok!(probe_file(&path));
    assert_eq!(summary.track_count(), 1);
    assert_eq!(summary.tracks[0].handler, "vide");
}

#[tokio::test]
async fn test_frames_are_released_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_in(dir.path());
    let recorder = MediaRecorder::new();
    let released = Arc::new(AtomicUsize::new(0));

    let pooled = |index: u64| {
        let counter = released.clone();
        let buffer = FrameBuffer::with_release(vec![0u8; FRAME_BYTES], move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        RawFrame::from_buffer(WIDTH, HEIGHT, index * 33_333, buffer)
    };

    // Idle: dropped and released right away
    recorder.push_video_frame(pooled(0));
    assert_eq!(released.load(Ordering::SeqCst), 1);

    assert_ok!(recorder.start(&path, RecorderConfig::default()).await);
    for i in 0..8 {
        recorder.push_video_frame(pooled(i));
    }
    assert_ok!(recorder.stop().await);

    assert_eq!(released.load(Ordering::SeqCst), 9);
}

#[tokio::test]
async fn test_configured_targets_reach_the_encoders() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_in(dir.path());
    let factory = Arc::new(CapturingFactory::default());
    let recorder = MediaRecorder::with_factory(factory.clone());

    let video = VideoEncoderConfig {
        bitrate: 2_500_000,
        framerate: 24,
        iframe_interval_secs: 2,
    };
    let config = RecorderConfig::default()
        .with_mic_audio(true)
        .with_video_encoder(video.clone())
        .with_audio_encoder(AudioEncoderConfig { bitrate: 96_000 });
    assert_ok!(recorder.start(&path, config).await);
    for i in 0..3 {
        recorder.push_video_frame(frame(i));
        recorder.push_audio(chunk(AudioSource::Mic));
    }
    assert_ok!(recorder.stop().await);

    let created = factory.created.lock();
    assert_eq!(created.len(), 2);
    for (role, targets, backend) in created.iter() {
        assert_eq!(targets.video, video);
        assert_eq!(targets.audio.bitrate, 96_000);
        if role.is_video() {
            assert!(backend.contains("bitrate: 2500000"), "{}", backend);
        } else {
            assert!(backend.contains("bitrate: 96000"), "{}", backend);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_runs_from_a_spawned_task() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_in(dir.path());
    let recorder = Arc::new(MediaRecorder::new());

    // File setup and teardown run off the async workers, so the whole
    // session can be driven from a spawned task while a ticker keeps running
    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                ticks.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
    };

    let session = {
        let recorder = recorder.clone();
        let path = path.clone();
        tokio::spawn(async move {
            let config = RecorderConfig::default().with_mic_audio(true);
            recorder.start(&path, config).await?;
            for i in 0..10 {
                recorder.push_video_frame(frame(i));
                recorder.push_audio(chunk(AudioSource::Mic));
            }
            recorder.stop().await
        })
    };
    let output = assert_ok!(session.await.unwrap());
    ticker.abort();

    assert_eq!(output.track_count, 2);
    assert!(ticks.load(Ordering::SeqCst) > 0);
    assert_eq!(assert_ok!(probe_file(&path)).track_count(), 2);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = MediaRecorder::new();

    assert_ok!(
        recorder
            .start(dir.path().join("a.mp4"), RecorderConfig::default())
            .await
    );
    let err = assert_err!(
        recorder
            .start(dir.path().join("b.mp4"), RecorderConfig::default())
            .await
    );
    assert!(matches!(err, RecorderError::SessionAlreadyActive { .. }));
    assert!(!dir.path().join("b.mp4").exists());

    assert_ok!(recorder.stop().await);
    assert!(matches!(
        recorder.stop().await,
        Err(RecorderError::NoActiveSession)
    ));
}

#[tokio::test]
async fn test_invalid_configuration_never_starts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.mp4");
    let recorder = MediaRecorder::new();

    let config = RecorderConfig::default().with_video(false);
    let err = assert_err!(recorder.start(&path, config).await);
    assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    assert!(!recorder.is_recording());
    assert!(!path.exists());
}

#[cfg(not(any(feature = "h264", feature = "opus")))]
#[tokio::test]
async fn test_pre_start_buffer_keeps_early_samples() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_in(dir.path());
    let recorder = MediaRecorder::new();

    let config = RecorderConfig::default()
        .with_mic_audio(true)
        .with_pre_start(PreStartPolicy::Buffer { max_samples: 64 });
    assert_ok!(recorder.start(&path, config).await);

    for _ in 0..10 {
        recorder.push_audio(chunk(AudioSource::Mic));
    }
    for i in 0..10 {
        recorder.push_video_frame(frame(i));
    }
    let output = assert_ok!(recorder.stop().await);
    assert_eq!(output.track_count, 2);

    let summary = assert_ok!(probe_file(&path));
    let audio = summary.tracks_with_handler("soun").next().unwrap();
    let video = summary.tracks_with_handler("vide").next().unwrap();
    assert_eq!(audio.sample_count, 10);
    assert_eq!(video.sample_count, 10);
}

#[tokio::test]
async fn test_lifecycle_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = output_in(dir.path());
    let recorder = MediaRecorder::new();
    let mut events = recorder.subscribe();

    let config = RecorderConfig::default().with_mic_audio(true);
    assert_ok!(recorder.start(&path, config).await);
    for i in 0..3 {
        recorder.push_video_frame(frame(i));
        recorder.push_audio(chunk(AudioSource::Mic));
    }
    assert_ok!(recorder.stop().await);

    let mut registered = 0;
    let mut started = 0;
    let mut finished = 0;
    let mut stopped = false;
    while let Ok(event) = events.try_recv() {
        match event {
            RecorderEvent::TrackRegistered { .. } => registered += 1,
            RecorderEvent::MuxerStarted { track_count } => {
                assert_eq!(track_count, 2);
                started += 1;
            }
            RecorderEvent::TrackFinished { .. } => finished += 1,
            RecorderEvent::Stopped { success, .. } => stopped = success,
            RecorderEvent::TrackFailed { error, .. } => panic!("unexpected failure: {}", error),
        }
    }
    assert_eq!(registered, 2);
    assert_eq!(started, 1);
    assert_eq!(finished, 2);
    assert!(stopped);
}
