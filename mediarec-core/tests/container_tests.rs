//! Integration tests for the fragmented MP4 writer and probe

use bytes::Bytes;
use mediarec_core::*;
use std::io::Cursor;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn video_format() -> TrackFormat {
    // avcC for a baseline 320x240 stream: version, profile, compat, level, lengthSize
    let avcc = Bytes::from_static(&[
        0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1E, 0x01, 0x00, 0x02,
        0x68, 0xCE,
    ]);
    TrackFormat::video(CodecKind::H264, 320, 240, avcc)
}

fn opus_format() -> TrackFormat {
    TrackFormat::audio(CodecKind::Opus, 48_000, 2, Bytes::new())
}

#[tokio::test]
async fn test_two_track_file_round_trips_through_probe() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("av.mp4");

    let mut writer = assert_ok!(Fmp4Writer::create(&path, DEFAULT_FRAGMENT_DURATION));
    let video = assert_ok!(writer.add_track(&video_format()));
    let audio = assert_ok!(writer.add_track(&opus_format()));
    assert_ok!(writer.start());

    // 3 seconds: 25 fps video, 20 ms audio packets
    for frame in 0..75u64 {
        let pts = frame * 40_000;
        let sample = EncodedSample::new(vec![0u8; 100], pts, frame % 25 == 0);
        assert_ok!(writer.write_sample(video, sample));
    }
    for packet in 0..150u64 {
        let sample = EncodedSample::new(vec![0u8; 40], packet * 20_000, true);
        assert_ok!(writer.write_sample(audio, sample));
    }
    assert_ok!(writer.stop());
    assert_ok!(writer.release());

    let summary = assert_ok!(probe_file(&path));
    assert_eq!(summary.major_brand, "isom");
    assert_eq!(summary.track_count(), 2);

    let video_track = &summary.tracks[0];
    assert_eq!(video_track.handler, "vide");
    assert_eq!(video_track.sample_entry, "avc1");
    assert_eq!(video_track.timescale, 90_000);
    assert_eq!(video_track.sample_count, 75);
    assert_eq!(video_track.duration_ticks, 75 * 3600);

    let audio_track = &summary.tracks[1];
    assert_eq!(audio_track.handler, "soun");
    assert_eq!(audio_track.sample_entry, "Opus");
    assert_eq!(audio_track.timescale, 48_000);
    assert_eq!(audio_track.sample_count, 150);
    assert_eq!(audio_track.duration_ticks, 150 * 960);

    assert!(summary.fragment_count >= 3);
    assert_eq!(summary.duration_ms, 3000);
}

#[tokio::test]
async fn test_empty_container_is_well_formed() {
    let mut writer = Fmp4Writer::new(Cursor::new(Vec::new()), DEFAULT_FRAGMENT_DURATION);
    assert_ok!(writer.add_track(&video_format()));
    assert_ok!(writer.start());
    assert_ok!(writer.stop());

    let bytes = writer.into_inner().unwrap().into_inner();
    let summary = assert_ok!(probe_bytes(&bytes));
    assert_eq!(summary.track_count(), 1);
    assert_eq!(summary.fragment_count, 0);
    assert_eq!(summary.total_samples(), 0);
    assert_eq!(summary.duration_ms, 0);
}

#[tokio::test]
async fn test_zero_track_container_is_well_formed() {
    let mut writer = Fmp4Writer::new(Cursor::new(Vec::new()), DEFAULT_FRAGMENT_DURATION);
    assert_ok!(writer.start());
    assert_ok!(writer.stop());

    let bytes = writer.into_inner().unwrap().into_inner();
    let summary = assert_ok!(probe(Cursor::new(bytes)));
    assert_eq!(summary.track_count(), 0);
}

#[tokio::test]
async fn test_raw_fallback_sample_entries() {
    let mut writer = Fmp4Writer::new(Cursor::new(Vec::new()), Duration::from_millis(500));
    let video = assert_ok!(writer.add_track(&TrackFormat::video(
        CodecKind::RawI420,
        4,
        4,
        Bytes::new()
    )));
    let audio = assert_ok!(writer.add_track(&TrackFormat::audio(
        CodecKind::Pcm16,
        48_000,
        1,
        Bytes::new()
    )));
    assert_ok!(writer.start());
    assert_ok!(writer.write_sample(video, EncodedSample::new(vec![0u8; 24], 0, true)));
    // 480 mono frames = 10 ms
    assert_ok!(writer.write_sample(audio, EncodedSample::new(vec![0u8; 960], 0, true)));
    assert_ok!(writer.stop());

    let bytes = writer.into_inner().unwrap().into_inner();
    let summary = assert_ok!(probe_bytes(&bytes));
    assert_eq!(summary.tracks[0].sample_entry, "uncv");
    assert_eq!(summary.tracks[1].sample_entry, "ipcm");
    // Last PCM sample duration comes from its payload length
    assert_eq!(summary.tracks[1].duration_ticks, 480);
    // Lone video sample gets a 1/30 s duration
    assert_eq!(summary.tracks[0].duration_ticks, 3000);
}

#[tokio::test]
async fn test_late_track_keeps_its_offset() {
    let mut writer = Fmp4Writer::new(Cursor::new(Vec::new()), DEFAULT_FRAGMENT_DURATION);
    let audio = assert_ok!(writer.add_track(&opus_format()));
    assert_ok!(writer.start());
    for packet in 0..10u64 {
        let pts = 500_000 + packet * 20_000;
        assert_ok!(writer.write_sample(audio, EncodedSample::new(vec![1u8; 10], pts, true)));
    }
    assert_ok!(writer.stop());

    let bytes = writer.into_inner().unwrap().into_inner();
    let summary = assert_ok!(probe_bytes(&bytes));
    // 500 ms lead-in plus 10 packets of 20 ms
    assert_eq!(summary.duration_ms, 700);
}

#[tokio::test]
async fn test_write_to_unknown_track_fails() {
    let mut writer = Fmp4Writer::new(Cursor::new(Vec::new()), DEFAULT_FRAGMENT_DURATION);
    assert_ok!(writer.start());
    let err = assert_err!(writer.write_sample(TrackIndex(3), EncodedSample::new(vec![0u8], 0, true)));
    assert_eq!(err.error_code(), "INVALID_DATA");
}
