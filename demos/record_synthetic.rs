//! Synthetic Recording Demo
//!
//! Records three seconds of a moving test pattern together with two sine
//! tones standing in for microphone and speaker capture, then inspects the
//! resulting file.
//!
//! Usage: `cargo run --example record_synthetic -- [output.mp4] [--mix]`

use anyhow::Context;
use mediarec::{
    probe_file, AudioSource, MediaRecorder, RawAudioChunk, RawFrame, RecorderConfig,
    RecorderEvent,
};
use std::f32::consts::TAU;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const FPS: u64 = 30;
const SECONDS: u64 = 3;
const SAMPLE_RATE: u32 = 48_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mediarec::init_tracing();

    let mut args = std::env::args().skip(1);
    let output = args
        .next()
        .unwrap_or_else(|| "recordings/synthetic.mp4".to_string());
    let mix = args.any(|arg| arg == "--mix");

    println!("🎬 mediarec Synthetic Recording Demo");
    println!("====================================");

    let recorder = MediaRecorder::new();
    let mut events = recorder.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RecorderEvent::TrackRegistered { role, index } => {
                    println!("  📼 {} registered as {}", role, index)
                }
                RecorderEvent::MuxerStarted { track_count } => {
                    println!("  🚀 muxer started with {} tracks", track_count)
                }
                other => println!("  📡 {}", other.event_type()),
            }
        }
    });

    let config = RecorderConfig::default()
        .with_mic_audio(true)
        .with_speaker_audio(true)
        .with_mixing(mix);
    recorder
        .start(&output, config)
        .await
        .with_context(|| format!("starting recording into {}", output))?;

    let samples_per_frame = (SAMPLE_RATE as u64 / FPS) as usize;
    let mut mic = Tone::new(440.0);
    let mut speaker = Tone::new(660.0);

    for index in 0..FPS * SECONDS {
        recorder.push_video_frame(test_pattern(index));
        recorder.push_audio(RawAudioChunk::new(
            AudioSource::Mic,
            mic.next_chunk(samples_per_frame),
            SAMPLE_RATE,
            1,
        ));
        recorder.push_audio(RawAudioChunk::new(
            AudioSource::Speaker,
            speaker.next_chunk(samples_per_frame),
            SAMPLE_RATE,
            1,
        ));
    }

    let result = recorder.stop().await.context("stopping recording")?;
    println!("\n✅ Wrote {} tracks to {}", result.track_count, result.path.display());
    for track in &result.tracks {
        println!(
            "  {}: {} submitted, {} written, {} dropped",
            track.role, track.stats.submitted, track.stats.written, track.stats.dropped
        );
    }

    let summary = probe_file(&result.path).context("probing output")?;
    println!("\n🔍 {} fragments, {} ms", summary.fragment_count, summary.duration_ms);
    for track in &summary.tracks {
        println!(
            "  track {} [{}] {}: {} samples",
            track.track_id, track.handler, track.sample_entry, track.sample_count
        );
    }
    Ok(())
}

/// I420 frame with a luma gradient that scrolls one pixel per frame
fn test_pattern(index: u64) -> RawFrame {
    let (w, h) = (WIDTH as usize, HEIGHT as usize);
    let mut data = vec![128u8; w * h * 3 / 2];
    for y in 0..h {
        for x in 0..w {
            data[y * w + x] = ((x + y + index as usize) % 256) as u8;
        }
    }
    RawFrame::new(WIDTH, HEIGHT, index * 1_000_000 / FPS, data)
}

struct Tone {
    frequency: f32,
    phase: f32,
}

impl Tone {
    fn new(frequency: f32) -> Self {
        Self {
            frequency,
            phase: 0.0,
        }
    }

    fn next_chunk(&mut self, frames: usize) -> Vec<i16> {
        let step = TAU * self.frequency / SAMPLE_RATE as f32;
        (0..frames)
            .map(|_| {
                let sample = (self.phase.sin() * 8_000.0) as i16;
                self.phase = (self.phase + step) % TAU;
                sample
            })
            .collect()
    }
}
