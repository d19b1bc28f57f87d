//! One recorded track: encoder output routed into the shared muxer
//!
//! A [`Track`] owns its [`TrackEncoder`] and is driven by a single worker.
//! It registers with the muxer when the encoder first reports its format,
//! rebases video timestamps on the first encoded frame, keeps written pts
//! non-decreasing and counts what happened to every sample.

use crate::encoder::{DrainEvent, EncoderInput, EncoderState, TrackEncoder};
use crate::error::MediaError;
use crate::frames::RawFrame;
use mediarec_core::{
    EncodedSample, RecorderResult, Registration, SampleClock, SharedMuxer, TrackIndex, TrackRole,
    VideoEpoch, WriteOutcome,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Per-track counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackStats {
    /// Units accepted by the encoder
    pub submitted: u64,
    /// Samples written to the container
    pub written: u64,
    /// Units or samples discarded
    pub dropped: u64,
    /// Samples held until the container started
    pub buffered: u64,
    /// Samples whose pts was raised to keep the track monotonic
    pub clamped: u64,
}

/// Encoder plus container bookkeeping for one role
#[derive(Debug)]
pub struct Track {
    role: TrackRole,
    encoder: TrackEncoder,
    muxer: SharedMuxer,
    index: Option<TrackIndex>,
    epoch: VideoEpoch,
    clock: Option<SampleClock>,
    last_pts: Option<u64>,
    withdrawn: bool,
    stats: TrackStats,
}

impl Track {
    /// Create a track for `role` writing through `muxer`
    pub fn new(role: TrackRole, encoder: TrackEncoder, muxer: SharedMuxer) -> Self {
        Self {
            role,
            encoder,
            muxer,
            index: None,
            epoch: VideoEpoch::new(),
            clock: None,
            last_pts: None,
            withdrawn: false,
            stats: TrackStats::default(),
        }
    }

    /// Track role
    pub fn role(&self) -> TrackRole {
        self.role
    }

    /// Container index, once registered
    pub fn index(&self) -> Option<TrackIndex> {
        self.index
    }

    /// Counters so far
    pub fn stats(&self) -> TrackStats {
        self.stats
    }

    /// Encoder state
    pub fn encoder_state(&self) -> EncoderState {
        self.encoder.state()
    }

    /// Encode a frame and write whatever the encoder produced.
    ///
    /// The frame is dropped, and its buffer released, before returning.
    pub fn submit_frame(&mut self, frame: RawFrame) -> RecorderResult<Option<Registration>> {
        let submitted = self.encoder.submit(EncoderInput::Video(&frame));
        drop(frame);
        self.after_submit(submitted)
    }

    /// Encode interleaved PCM.
    ///
    /// Without a pts the chunk is timed by the track's own sample clock.
    pub fn submit_audio(
        &mut self,
        samples: &[i16],
        sample_rate: u32,
        channels: u16,
        pts_us: Option<u64>,
    ) -> RecorderResult<Option<Registration>> {
        let clocked = pts_us.is_none();
        let pts_us = match pts_us {
            Some(pts) => pts,
            None => self
                .clock
                .get_or_insert_with(|| SampleClock::new(sample_rate))
                .now_us(),
        };
        let submitted = self.encoder.submit(EncoderInput::Audio {
            samples,
            sample_rate,
            channels,
            pts_us,
        });
        // Rejected chunks leave no gap in the timeline
        if clocked && submitted.is_ok() {
            if let Some(clock) = self.clock.as_mut() {
                clock.advance((samples.len() / channels.max(1) as usize) as u64);
            }
        }
        self.after_submit(submitted)
    }

    fn after_submit(
        &mut self,
        submitted: Result<(), MediaError>,
    ) -> RecorderResult<Option<Registration>> {
        match submitted {
            Ok(()) => self.stats.submitted += 1,
            Err(e) if e.is_recoverable() => {
                warn!("Dropping {} input: {}", self.role, e);
                self.stats.dropped += 1;
                return Ok(None);
            }
            Err(e) => return Err(e.into_recorder_error(self.role)),
        }
        self.pump()
    }

    /// Drain the encoder into the muxer.
    ///
    /// Returns the registration if this call registered the track.
    pub fn pump(&mut self) -> RecorderResult<Option<Registration>> {
        let mut registered = None;
        let mut events = Vec::new();
        for event in self.encoder.drain() {
            events.push(event.map_err(|e| e.into_recorder_error(self.role))?);
        }
        for event in events {
            if let Some(registration) = self.handle(event)? {
                registered = Some(registration);
            }
        }
        Ok(registered)
    }

    /// Flush the encoder, write its remaining output and release it.
    ///
    /// Returns the registration if the final drain registered the track.
    pub fn finish(&mut self) -> RecorderResult<Option<Registration>> {
        let mut registered = self.pump()?;
        let events = self
            .encoder
            .finish()
            .map_err(|e| e.into_recorder_error(self.role))?;
        for event in events {
            if let Some(registration) = self.handle(event)? {
                registered = Some(registration);
            }
        }
        debug!("{} track finished: {:?}", self.role, self.stats);
        Ok(registered)
    }

    /// Give up on this track: release the encoder and, if the track never
    /// registered, withdraw its role so the container can start without it.
    ///
    /// Returns true if the withdrawal started the container.
    pub fn withdraw(&mut self) -> RecorderResult<bool> {
        self.encoder.release();
        if self.index.is_some() || self.withdrawn {
            return Ok(false);
        }
        self.withdrawn = true;
        warn!("Withdrawing {} track from the recording", self.role);
        self.muxer.withdraw(self.role)
    }

    fn handle(&mut self, event: DrainEvent) -> RecorderResult<Option<Registration>> {
        match event {
            DrainEvent::FormatReady(format) => {
                if self.index.is_some() || self.withdrawn {
                    return Ok(None);
                }
                let registration = self.muxer.register(self.role, &format)?;
                self.index = Some(registration.index);
                info!(
                    "📼 {} track registered as {} ({})",
                    self.role,
                    registration.index,
                    format.codec().name()
                );
                Ok(Some(registration))
            }
            DrainEvent::Sample(sample) => {
                self.write(sample)?;
                Ok(None)
            }
        }
    }

    fn write(&mut self, sample: EncodedSample) -> RecorderResult<()> {
        if sample.is_end_of_stream() && sample.is_empty() {
            return Ok(());
        }
        let Some(index) = self.index else {
            warn!("{} sample before format; dropped", self.role);
            self.stats.dropped += 1;
            return Ok(());
        };

        let mut sample = sample;
        if self.role.is_video() {
            sample.pts_us = self.epoch.normalize(sample.pts_us);
        }
        if let Some(last) = self.last_pts {
            if sample.pts_us < last {
                warn!(
                    "{} pts regressed {} -> {}; clamped",
                    self.role, last, sample.pts_us
                );
                sample.pts_us = last;
                self.stats.clamped += 1;
            }
        }
        let pts = sample.pts_us;

        match self.muxer.write(index, sample)? {
            WriteOutcome::Written => {
                self.stats.written += 1;
                self.last_pts = Some(pts);
            }
            WriteOutcome::Buffered => {
                self.stats.buffered += 1;
                self.last_pts = Some(pts);
            }
            WriteOutcome::Dropped => self.stats.dropped += 1,
        }
        Ok(())
    }
}
