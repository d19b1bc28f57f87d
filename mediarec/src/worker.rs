//! Per-track workers
//!
//! Each track runs on its own blocking task and owns its encoder. Capture
//! threads hand units over an unbounded channel and never wait on encoding.

use crate::event::{EventSender, RecorderEvent};
use mediarec_core::{RecorderError, RecorderResult, Registration, SharedMuxer, TrackRole};
use mediarec_media::{RawAudioChunk, RawFrame, SampleMixer, Track, TrackStats};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Unit of work for a track worker; owns its payload
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    /// Video frame
    Frame(RawFrame),
    /// PCM chunk (tagged with its source for the mixing worker)
    Audio(RawAudioChunk),
    /// Drain, finish and exit
    Finish,
}

/// What a worker hands back when it exits
#[derive(Debug)]
pub(crate) struct WorkerReport {
    pub role: TrackRole,
    pub stats: TrackStats,
    pub registered: bool,
    pub error: Option<RecorderError>,
}

pub(crate) struct Worker {
    track: Track,
    mixer: Option<SampleMixer>,
    muxer: SharedMuxer,
    events: EventSender,
    aborted: Arc<AtomicBool>,
    error: Option<RecorderError>,
}

impl Worker {
    pub(crate) fn new(
        track: Track,
        mixer: Option<SampleMixer>,
        muxer: SharedMuxer,
        events: EventSender,
        aborted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            track,
            mixer,
            muxer,
            events,
            aborted,
            error: None,
        }
    }

    /// Blocking receive loop; returns once `Finish` arrives or every sender
    /// is gone.
    pub(crate) fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkerMessage>) -> WorkerReport {
        let role = self.track.role();
        debug!("{} worker started", role);

        while let Some(message) = rx.blocking_recv() {
            match message {
                WorkerMessage::Finish => break,
                // A failed track discards its input; dropping frames releases them
                message if self.error.is_some() => drop(message),
                WorkerMessage::Frame(frame) => {
                    let result = self.track.submit_frame(frame);
                    self.handle(result);
                }
                WorkerMessage::Audio(chunk) => self.on_audio(chunk),
            }
        }

        self.finish()
    }

    fn on_audio(&mut self, chunk: RawAudioChunk) {
        let Some(mixer) = self.mixer.as_mut() else {
            let result =
                self.track
                    .submit_audio(&chunk.samples, chunk.sample_rate, chunk.channels, None);
            self.handle(result);
            return;
        };

        match mixer.feed(chunk) {
            Ok(Some(mixed)) => {
                let result = self.track.submit_audio(
                    &mixed.samples,
                    mixed.sample_rate,
                    mixed.channels,
                    Some(mixed.pts_us),
                );
                self.handle(result);
            }
            Ok(None) => {}
            Err(e) => warn!("Dropping audio chunk before mixing: {}", e),
        }
    }

    fn finish(mut self) -> WorkerReport {
        let role = self.track.role();
        if self.error.is_none() {
            if let Some(mixed) = self.mixer.as_mut().and_then(|m| m.flush()) {
                let result = self.track.submit_audio(
                    &mixed.samples,
                    mixed.sample_rate,
                    mixed.channels,
                    Some(mixed.pts_us),
                );
                self.handle(result);
            }
        }
        if self.error.is_none() {
            let result = self.track.finish();
            self.handle(result);
        }
        if let Some(mixer) = &self.mixer {
            let stats = mixer.stats();
            debug!(
                "Mixer produced {} chunks, {} overruns",
                stats.mixed_chunks, stats.overruns
            );
        }

        let stats = self.track.stats();
        self.events
            .emit(RecorderEvent::TrackFinished { role, stats });
        debug!("{} worker exiting", role);

        WorkerReport {
            role,
            stats,
            registered: self.track.index().is_some(),
            error: self.error,
        }
    }

    fn handle(&mut self, result: RecorderResult<Option<Registration>>) {
        match result {
            Ok(Some(registration)) => {
                self.events.emit(RecorderEvent::TrackRegistered {
                    role: self.track.role(),
                    index: registration.index,
                });
                if registration.started {
                    self.emit_started();
                }
            }
            Ok(None) => {}
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, e: RecorderError) {
        let role = self.track.role();
        let recoverable = !e.is_fatal();
        if recoverable {
            warn!("⚠️ {} track failed, continuing without it: {}", role, e);
        } else {
            error!("❌ {} track failed, aborting recording: {}", role, e);
            self.aborted.store(true, Ordering::SeqCst);
        }
        self.events.emit(RecorderEvent::TrackFailed {
            role,
            error: e.to_string(),
            recoverable,
        });

        match self.track.withdraw() {
            Ok(true) => self.emit_started(),
            Ok(false) => {}
            Err(withdraw_error) => warn!("Failed to withdraw {} track: {}", role, withdraw_error),
        }
        self.error = Some(e);
    }

    fn emit_started(&self) {
        self.events.emit(RecorderEvent::MuxerStarted {
            track_count: self.muxer.track_count(),
        });
    }
}
