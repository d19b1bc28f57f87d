//! Inspect a written fragmented MP4

use crate::error::{RecorderError, RecorderResult};
use serde::Serialize;
use std::io::Read;
use std::path::Path;

/// One track found in the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbedTrack {
    /// ISO-BMFF track id
    pub track_id: u32,
    /// Handler type (`vide` or `soun`)
    pub handler: String,
    /// Sample entry type (`avc1`, `uncv`, `Opus`, `ipcm`)
    pub sample_entry: String,
    /// Media timescale
    pub timescale: u32,
    /// Samples across all fragments
    pub sample_count: u64,
    /// Sum of sample durations in track timescale
    pub duration_ticks: u64,
}

/// Summary of a fragmented MP4 file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    /// Major brand from `ftyp`
    pub major_brand: String,
    /// Tracks declared in `moov`
    pub tracks: Vec<ProbedTrack>,
    /// Number of `moof` boxes
    pub fragment_count: usize,
    /// Duration from `mehd`, milliseconds
    pub duration_ms: u64,
}

impl ContainerSummary {
    /// Number of tracks
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Tracks with the given handler type
    pub fn tracks_with_handler<'a>(&'a self, handler: &'a str) -> impl Iterator<Item = &'a ProbedTrack> {
        self.tracks.iter().filter(move |t| t.handler == handler)
    }

    /// Samples across all tracks
    pub fn total_samples(&self) -> u64 {
        self.tracks.iter().map(|t| t.sample_count).sum()
    }
}

/// Probe a file on disk
pub fn probe_file(path: impl AsRef<Path>) -> RecorderResult<ContainerSummary> {
    let data = std::fs::read(path)?;
    probe_bytes(&data)
}

/// Probe any reader
pub fn probe<R: Read>(mut reader: R) -> RecorderResult<ContainerSummary> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    probe_bytes(&data)
}

/// Probe an in-memory container
pub fn probe_bytes(data: &[u8]) -> RecorderResult<ContainerSummary> {
    let mut summary = ContainerSummary::default();
    let mut saw_moov = false;

    for (kind, body) in split_boxes(data)? {
        match &kind {
            b"ftyp" => summary.major_brand = fourcc(body, 0)?,
            b"moov" => {
                saw_moov = true;
                parse_moov(body, &mut summary)?;
            }
            b"moof" => {
                summary.fragment_count += 1;
                parse_moof(body, &mut summary)?;
            }
            _ => {}
        }
    }

    if !saw_moov {
        return Err(invalid("no moov box"));
    }
    Ok(summary)
}

fn invalid(reason: impl Into<String>) -> RecorderError {
    RecorderError::InvalidData {
        reason: reason.into(),
    }
}

fn split_boxes(mut data: &[u8]) -> RecorderResult<Vec<([u8; 4], &[u8])>> {
    let mut boxes = Vec::new();
    while !data.is_empty() {
        if data.len() < 8 {
            return Err(invalid("truncated box header"));
        }
        let declared = be_u32(data, 0)? as u64;
        let kind = [data[4], data[5], data[6], data[7]];
        let (header, size) = match declared {
            0 => (8, data.len() as u64),
            1 => (16, be_u64(data, 8)?),
            n => (8, n),
        };
        if size < header || size > data.len() as u64 {
            return Err(invalid(format!(
                "box {} has bad size {}",
                String::from_utf8_lossy(&kind),
                size
            )));
        }
        boxes.push((kind, &data[header as usize..size as usize]));
        data = &data[size as usize..];
    }
    Ok(boxes)
}

fn child<'a>(data: &'a [u8], kind: &[u8; 4]) -> RecorderResult<Option<&'a [u8]>> {
    Ok(split_boxes(data)?
        .into_iter()
        .find(|(k, _)| k == kind)
        .map(|(_, body)| body))
}

fn required<'a>(data: &'a [u8], kind: &[u8; 4]) -> RecorderResult<&'a [u8]> {
    child(data, kind)?.ok_or_else(|| invalid(format!("missing {}", String::from_utf8_lossy(kind))))
}

fn parse_moov(body: &[u8], summary: &mut ContainerSummary) -> RecorderResult<()> {
    for (kind, trak) in split_boxes(body)? {
        match &kind {
            b"trak" => {
                let tkhd = required(trak, b"tkhd")?;
                let track_id = if tkhd.first() == Some(&1) {
                    be_u32(tkhd, 20)?
                } else {
                    be_u32(tkhd, 12)?
                };
                let mdia = required(trak, b"mdia")?;
                let mdhd = required(mdia, b"mdhd")?;
                let timescale = if mdhd.first() == Some(&1) {
                    be_u32(mdhd, 20)?
                } else {
                    be_u32(mdhd, 12)?
                };
                let handler = fourcc(required(mdia, b"hdlr")?, 8)?;
                let stbl = required(required(mdia, b"minf")?, b"stbl")?;
                let sample_entry = fourcc(required(stbl, b"stsd")?, 12)?;
                summary.tracks.push(ProbedTrack {
                    track_id,
                    handler,
                    sample_entry,
                    timescale,
                    sample_count: 0,
                    duration_ticks: 0,
                });
            }
            b"mvex" => {
                if let Some(mehd) = child(trak, b"mehd")? {
                    summary.duration_ms = if mehd.first() == Some(&1) {
                        be_u64(mehd, 4)?
                    } else {
                        be_u32(mehd, 4)? as u64
                    };
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_moof(body: &[u8], summary: &mut ContainerSummary) -> RecorderResult<()> {
    for (kind, traf) in split_boxes(body)? {
        if &kind != b"traf" {
            continue;
        }
        let track_id = be_u32(required(traf, b"tfhd")?, 4)?;
        let trun = required(traf, b"trun")?;
        let flags = be_u32(trun, 0)? & 0x00FF_FFFF;
        let count = be_u32(trun, 4)? as usize;

        let mut cursor = 8;
        if flags & 0x01 != 0 {
            cursor += 4;
        }
        if flags & 0x04 != 0 {
            cursor += 4;
        }
        let entry_size = [0x100, 0x200, 0x400, 0x800]
            .iter()
            .filter(|bit| flags & **bit != 0)
            .count()
            * 4;

        let mut duration = 0u64;
        if flags & 0x100 != 0 {
            for i in 0..count {
                duration += be_u32(trun, cursor + i * entry_size)? as u64;
            }
        }

        let track = summary
            .tracks
            .iter_mut()
            .find(|t| t.track_id == track_id)
            .ok_or_else(|| invalid(format!("fragment for unknown track {}", track_id)))?;
        track.sample_count += count as u64;
        track.duration_ticks += duration;
    }
    Ok(())
}

fn be_u32(data: &[u8], at: usize) -> RecorderResult<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| invalid("truncated field"))
}

fn be_u64(data: &[u8], at: usize) -> RecorderResult<u64> {
    data.get(at..at + 8)
        .map(|b| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(b);
            u64::from_be_bytes(bytes)
        })
        .ok_or_else(|| invalid("truncated field"))
}

fn fourcc(data: &[u8], at: usize) -> RecorderResult<String> {
    data.get(at..at + 4)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or_else(|| invalid("truncated fourcc"))
}
