//! Fragmented MP4 writer

use super::boxes::{self, FragmentSample, TrackRun, MOVIE_TIMESCALE};
use super::{ContainerWriter, WriterState};
use crate::error::{RecorderError, RecorderResult};
use crate::track::{CodecKind, EncodedSample, TrackFormat, TrackIndex};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default fragment length
pub const DEFAULT_FRAGMENT_DURATION: Duration = Duration::from_secs(1);

/// Sample waiting for its successor so its duration is known
#[derive(Debug)]
struct HeldSample {
    data: Bytes,
    ticks: u64,
    key_frame: bool,
}

#[derive(Debug)]
struct TrackState {
    format: TrackFormat,
    fragment_ticks: u64,
    pending: Vec<FragmentSample>,
    pending_ticks: u64,
    held: Option<HeldSample>,
    /// Decode time of the first pending sample
    base_decode_time: Option<u64>,
    last_duration: u32,
    samples_written: u64,
}

impl TrackState {
    fn push(&mut self, sample: HeldSample, duration: u32) {
        self.pending.push(FragmentSample {
            data: sample.data,
            duration,
            key_frame: sample.key_frame,
        });
        self.pending_ticks += duration as u64;
        if duration > 0 {
            self.last_duration = duration;
        }
    }

    /// Duration for the final sample, which has no successor
    fn closing_duration(&self, sample: &HeldSample) -> u32 {
        match &self.format {
            TrackFormat::Audio {
                codec: CodecKind::Pcm16,
                channels,
                ..
            } => (sample.data.len() / (2 * (*channels).max(1) as usize)) as u32,
            _ if self.last_duration > 0 => self.last_duration,
            TrackFormat::Video { timescale, .. } => timescale / 30,
            TrackFormat::Audio { sample_rate, .. } => sample_rate / 50,
        }
    }

    fn end_time_ms(&self) -> u64 {
        let end = self.base_decode_time.unwrap_or(0) + self.pending_ticks;
        end * MOVIE_TIMESCALE as u64 / self.format.timescale().max(1) as u64
    }
}

/// Fragmented ISO-BMFF writer.
///
/// `start` writes `ftyp` and the initialization `moov`; samples are grouped
/// into `moof`/`mdat` fragments of roughly `fragment_duration`; `stop` flushes
/// the tail and patches the overall duration into `mehd`.
pub struct Fmp4Writer<W: Write + Seek> {
    sink: Option<W>,
    state: WriterState,
    tracks: Vec<TrackState>,
    fragment_duration: Duration,
    sequence: u32,
    mehd_position: Option<u64>,
    bytes_written: u64,
}

impl Fmp4Writer<BufWriter<File>> {
    /// Create the output file and a writer on it
    pub fn create(path: impl AsRef<Path>, fragment_duration: Duration) -> RecorderResult<Self> {
        let file = File::create(path.as_ref())?;
        debug!("Created container file {}", path.as_ref().display());
        Ok(Self::new(BufWriter::new(file), fragment_duration))
    }
}

impl<W: Write + Seek> Fmp4Writer<W> {
    /// Create a writer on an open sink
    pub fn new(sink: W, fragment_duration: Duration) -> Self {
        Self {
            sink: Some(sink),
            state: WriterState::Configuring,
            tracks: Vec::new(),
            fragment_duration,
            sequence: 0,
            mehd_position: None,
            bytes_written: 0,
        }
    }

    /// Number of fragments written so far
    pub fn fragment_count(&self) -> u32 {
        self.sequence
    }

    /// Samples flushed to the sink for a track
    pub fn samples_written(&self, track: TrackIndex) -> u64 {
        self.tracks
            .get(track.0)
            .map(|t| t.samples_written)
            .unwrap_or(0)
    }

    /// Bytes written to the sink
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Take the sink back, e.g. an in-memory cursor after `stop`
    pub fn into_inner(mut self) -> Option<W> {
        self.sink.take()
    }

    fn sink_mut(&mut self) -> RecorderResult<&mut W> {
        self.sink
            .as_mut()
            .ok_or_else(|| RecorderError::muxer_state("open sink", WriterState::Released.to_string()))
    }

    fn write_all(&mut self, data: &[u8]) -> RecorderResult<()> {
        self.sink_mut()?.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn flush_fragment(&mut self) -> RecorderResult<()> {
        let runs: Vec<TrackRun<'_>> = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, track)| !track.pending.is_empty())
            .map(|(index, track)| TrackRun {
                track_id: TrackIndex(index).track_id(),
                base_decode_time: track.base_decode_time.unwrap_or(0),
                samples: &track.pending,
            })
            .collect();
        if runs.is_empty() {
            return Ok(());
        }

        let sequence = self.sequence + 1;
        let fragment = boxes::fragment(sequence, &runs);
        let sample_count: usize = runs.iter().map(|run| run.samples.len()).sum();
        self.write_all(&fragment)?;
        self.sequence = sequence;

        for track in &mut self.tracks {
            if track.pending.is_empty() {
                continue;
            }
            track.base_decode_time = Some(track.base_decode_time.unwrap_or(0) + track.pending_ticks);
            track.samples_written += track.pending.len() as u64;
            track.pending.clear();
            track.pending_ticks = 0;
        }

        debug!(
            "Flushed fragment {} ({} samples, {} bytes)",
            sequence,
            sample_count,
            fragment.len()
        );
        Ok(())
    }
}

impl<W: Write + Seek + Send> ContainerWriter for Fmp4Writer<W> {
    fn add_track(&mut self, format: &TrackFormat) -> RecorderResult<TrackIndex> {
        if self.state != WriterState::Configuring {
            return Err(RecorderError::muxer_state(
                WriterState::Configuring.to_string(),
                self.state.to_string(),
            ));
        }

        let index = TrackIndex(self.tracks.len());
        let fragment_us = self.fragment_duration.as_micros().min(u64::MAX as u128) as u64;
        self.tracks.push(TrackState {
            format: format.clone(),
            fragment_ticks: format.micros_to_ticks(fragment_us),
            pending: Vec::new(),
            pending_ticks: 0,
            held: None,
            base_decode_time: None,
            last_duration: 0,
            samples_written: 0,
        });
        debug!("Added {} track {}", format.codec().name(), index);
        Ok(index)
    }

    fn start(&mut self) -> RecorderResult<()> {
        if self.state != WriterState::Configuring {
            return Err(RecorderError::muxer_state(
                WriterState::Configuring.to_string(),
                self.state.to_string(),
            ));
        }

        let formats: Vec<TrackFormat> = self.tracks.iter().map(|t| t.format.clone()).collect();
        let ftyp = boxes::ftyp();
        let (moov, mehd_field) = boxes::moov(&formats);

        let base = self.sink_mut()?.stream_position()?;
        self.write_all(&ftyp)?;
        self.write_all(&moov)?;
        self.mehd_position = Some(base + ftyp.len() as u64 + mehd_field as u64);
        self.state = WriterState::Started;

        info!("📼 fMP4 container started with {} tracks", formats.len());
        Ok(())
    }

    fn write_sample(&mut self, track: TrackIndex, sample: EncodedSample) -> RecorderResult<()> {
        if self.state != WriterState::Started {
            return Err(RecorderError::muxer_state(
                WriterState::Started.to_string(),
                self.state.to_string(),
            ));
        }

        let state = self
            .tracks
            .get_mut(track.0)
            .ok_or_else(|| RecorderError::InvalidData {
                reason: format!("unknown track {}", track),
            })?;

        // End-of-stream markers usually carry no payload
        if sample.is_empty() {
            return Ok(());
        }

        let ticks = state.format.micros_to_ticks(sample.pts_us);
        if let Some(held) = state.held.take() {
            if ticks < held.ticks {
                warn!("Track {} pts went backwards; using zero duration", track);
            }
            let duration = ticks.saturating_sub(held.ticks).min(u32::MAX as u64) as u32;
            state.push(held, duration);
        }
        state.base_decode_time.get_or_insert(ticks);
        state.held = Some(HeldSample {
            data: sample.data,
            ticks,
            key_frame: sample.flags.key_frame,
        });

        if state.pending_ticks >= state.fragment_ticks.max(1) {
            self.flush_fragment()?;
        }
        Ok(())
    }

    fn stop(&mut self) -> RecorderResult<()> {
        if self.state != WriterState::Started {
            return Err(RecorderError::muxer_state(
                WriterState::Started.to_string(),
                self.state.to_string(),
            ));
        }

        for track in &mut self.tracks {
            if let Some(held) = track.held.take() {
                let duration = track.closing_duration(&held);
                track.push(held, duration);
            }
        }
        self.flush_fragment()?;

        let duration_ms = self
            .tracks
            .iter()
            .map(TrackState::end_time_ms)
            .max()
            .unwrap_or(0);
        let mehd_position = self.mehd_position;
        let sink = self.sink_mut()?;
        if let Some(position) = mehd_position {
            sink.seek(SeekFrom::Start(position))?;
            sink.write_all(&duration_ms.to_be_bytes())?;
            sink.seek(SeekFrom::End(0))?;
        }
        sink.flush()?;
        self.state = WriterState::Stopped;

        info!(
            "📼 fMP4 container finalized: {} tracks, {} fragments, {} ms",
            self.tracks.len(),
            self.sequence,
            duration_ms
        );
        Ok(())
    }

    fn release(&mut self) -> RecorderResult<()> {
        if self.state == WriterState::Released {
            return Ok(());
        }
        if self.state == WriterState::Started {
            warn!("Container released before stop; buffered samples are discarded");
        }
        self.state = WriterState::Released;

        if let Some(mut sink) = self.sink.take() {
            sink.flush().map_err(|e| RecorderError::ResourceRelease {
                resource: "container sink".to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn state(&self) -> WriterState {
        self.state
    }
}
