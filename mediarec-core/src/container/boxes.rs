//! ISO-BMFF box building
//!
//! Boxes are assembled in memory with a size placeholder that is patched once
//! the body is written, then handed to the sink in one write.

use crate::track::{CodecKind, TrackFormat};
use bytes::{BufMut, Bytes, BytesMut};

/// Movie header timescale (milliseconds)
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Opus pre-skip in 48 kHz samples
pub const OPUS_PRE_SKIP: u16 = 312;

const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;
// data-offset | sample-duration | sample-size | sample-flags
const TRUN_FLAGS: u32 = 0x00_0701;
const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;
const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Write a box: size placeholder, type, body, then patch the size
pub fn write_box(buf: &mut BytesMut, kind: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(kind);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Write a full box (version + 24-bit flags after the header)
pub fn write_full_box(
    buf: &mut BytesMut,
    kind: &[u8; 4],
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut BytesMut),
) {
    write_box(buf, kind, |buf| {
        buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
        body(buf);
    });
}

/// Build the OpusSpecificBox body (`dOps`), big-endian fields
pub fn opus_specific_box(channels: u16, input_sample_rate: u32, pre_skip: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(11);
    buf.put_u8(0); // version
    buf.put_u8(channels as u8);
    buf.put_u16(pre_skip);
    buf.put_u32(input_sample_rate);
    buf.put_i16(0); // output gain
    buf.put_u8(0); // channel mapping family
    buf.freeze()
}

/// File type box
pub fn ftyp() -> BytesMut {
    let mut buf = BytesMut::with_capacity(32);
    write_box(&mut buf, b"ftyp", |buf| {
        buf.put_slice(b"isom");
        buf.put_u32(0x200);
        for brand in [b"isom", b"iso5", b"iso6", b"mp41"] {
            buf.put_slice(brand);
        }
    });
    buf
}

/// Initialization `moov` box.
///
/// Returns the box and the offset of the 64-bit `mehd` duration field within
/// it, so the writer can patch the final duration on stop.
pub fn moov(tracks: &[TrackFormat]) -> (BytesMut, usize) {
    let mut buf = BytesMut::with_capacity(1024);
    let mut mehd_field = 0;
    write_box(&mut buf, b"moov", |buf| {
        mvhd(buf, tracks.len() as u32 + 1);
        for (index, format) in tracks.iter().enumerate() {
            trak(buf, index as u32 + 1, format);
        }
        write_box(buf, b"mvex", |buf| {
            write_full_box(buf, b"mehd", 1, 0, |buf| {
                mehd_field = buf.len();
                buf.put_u64(0);
            });
            for index in 0..tracks.len() {
                write_full_box(buf, b"trex", 0, 0, |buf| {
                    buf.put_u32(index as u32 + 1);
                    buf.put_u32(1); // sample description index
                    buf.put_u32(0);
                    buf.put_u32(0);
                    buf.put_u32(0);
                });
            }
        });
    });
    (buf, mehd_field)
}

fn mvhd(buf: &mut BytesMut, next_track_id: u32) {
    write_full_box(buf, b"mvhd", 0, 0, |buf| {
        buf.put_u32(0); // creation_time
        buf.put_u32(0); // modification_time
        buf.put_u32(MOVIE_TIMESCALE);
        buf.put_u32(0); // duration lives in mehd
        buf.put_u32(0x0001_0000); // rate 1.0
        buf.put_u16(0x0100); // volume 1.0
        buf.put_bytes(0, 10);
        for value in UNITY_MATRIX {
            buf.put_u32(value);
        }
        buf.put_bytes(0, 24);
        buf.put_u32(next_track_id);
    });
}

fn trak(buf: &mut BytesMut, track_id: u32, format: &TrackFormat) {
    write_box(buf, b"trak", |buf| {
        write_full_box(buf, b"tkhd", 0, 0x03, |buf| {
            buf.put_u32(0);
            buf.put_u32(0);
            buf.put_u32(track_id);
            buf.put_u32(0);
            buf.put_u32(0); // duration
            buf.put_bytes(0, 8);
            buf.put_u16(0); // layer
            buf.put_u16(0); // alternate group
            match format {
                TrackFormat::Audio { .. } => buf.put_u16(0x0100),
                TrackFormat::Video { .. } => buf.put_u16(0),
            }
            buf.put_u16(0);
            for value in UNITY_MATRIX {
                buf.put_u32(value);
            }
            match format {
                TrackFormat::Video { width, height, .. } => {
                    buf.put_u32(width << 16);
                    buf.put_u32(height << 16);
                }
                TrackFormat::Audio { .. } => {
                    buf.put_u32(0);
                    buf.put_u32(0);
                }
            }
        });
        write_box(buf, b"mdia", |buf| {
            write_full_box(buf, b"mdhd", 0, 0, |buf| {
                buf.put_u32(0);
                buf.put_u32(0);
                buf.put_u32(format.timescale());
                buf.put_u32(0);
                buf.put_u16(0x55C4); // und
                buf.put_u16(0);
            });
            let (handler, name): (&[u8; 4], &[u8]) = match format {
                TrackFormat::Video { .. } => (b"vide", &b"VideoHandler\0"[..]),
                TrackFormat::Audio { .. } => (b"soun", &b"SoundHandler\0"[..]),
            };
            write_full_box(buf, b"hdlr", 0, 0, |buf| {
                buf.put_u32(0);
                buf.put_slice(handler);
                buf.put_bytes(0, 12);
                buf.put_slice(name);
            });
            write_box(buf, b"minf", |buf| {
                match format {
                    TrackFormat::Video { .. } => write_full_box(buf, b"vmhd", 0, 1, |buf| {
                        buf.put_bytes(0, 8);
                    }),
                    TrackFormat::Audio { .. } => write_full_box(buf, b"smhd", 0, 0, |buf| {
                        buf.put_u32(0);
                    }),
                }
                write_box(buf, b"dinf", |buf| {
                    write_full_box(buf, b"dref", 0, 0, |buf| {
                        buf.put_u32(1);
                        write_full_box(buf, b"url ", 0, 0x01, |_| {});
                    });
                });
                stbl(buf, format);
            });
        });
    });
}

fn stbl(buf: &mut BytesMut, format: &TrackFormat) {
    write_box(buf, b"stbl", |buf| {
        write_full_box(buf, b"stsd", 0, 0, |buf| {
            buf.put_u32(1);
            sample_entry(buf, format);
        });
        // Samples live in fragments; the init tables stay empty
        write_full_box(buf, b"stts", 0, 0, |buf| buf.put_u32(0));
        write_full_box(buf, b"stsc", 0, 0, |buf| buf.put_u32(0));
        write_full_box(buf, b"stsz", 0, 0, |buf| {
            buf.put_u32(0);
            buf.put_u32(0);
        });
        write_full_box(buf, b"stco", 0, 0, |buf| buf.put_u32(0));
    });
}

fn sample_entry(buf: &mut BytesMut, format: &TrackFormat) {
    match format {
        TrackFormat::Video {
            codec,
            width,
            height,
            codec_private,
            ..
        } => {
            let entry: &[u8; 4] = match codec {
                CodecKind::H264 => b"avc1",
                _ => b"uncv",
            };
            write_box(buf, entry, |buf| {
                buf.put_bytes(0, 6);
                buf.put_u16(1); // data reference index
                buf.put_u16(0);
                buf.put_u16(0);
                buf.put_bytes(0, 12);
                buf.put_u16(*width as u16);
                buf.put_u16(*height as u16);
                buf.put_u32(0x0048_0000); // 72 dpi
                buf.put_u32(0x0048_0000);
                buf.put_u32(0);
                buf.put_u16(1); // frame count
                buf.put_bytes(0, 32); // compressor name
                buf.put_u16(0x0018);
                buf.put_i16(-1);
                match codec {
                    CodecKind::H264 => {
                        write_box(buf, b"avcC", |buf| buf.put_slice(codec_private));
                    }
                    _ => {
                        write_full_box(buf, b"uncC", 1, 0, |buf| buf.put_slice(b"i420"));
                    }
                }
            });
        }
        TrackFormat::Audio {
            codec,
            sample_rate,
            channels,
            codec_private,
        } => {
            let entry: &[u8; 4] = match codec {
                CodecKind::Opus => b"Opus",
                _ => b"ipcm",
            };
            write_box(buf, entry, |buf| {
                buf.put_bytes(0, 6);
                buf.put_u16(1);
                buf.put_bytes(0, 8);
                buf.put_u16(*channels);
                buf.put_u16(16);
                buf.put_u16(0);
                buf.put_u16(0);
                buf.put_u32((*sample_rate).min(0xFFFF) << 16);
                match codec {
                    CodecKind::Opus => {
                        write_box(buf, b"dOps", |buf| {
                            if codec_private.is_empty() {
                                buf.put_slice(&opus_specific_box(
                                    *channels,
                                    *sample_rate,
                                    OPUS_PRE_SKIP,
                                ));
                            } else {
                                buf.put_slice(codec_private);
                            }
                        });
                    }
                    _ => {
                        write_full_box(buf, b"pcmC", 0, 0, |buf| {
                            buf.put_u8(1); // little endian
                            buf.put_u8(16);
                        });
                    }
                }
            });
        }
    }
}

/// One sample queued for a fragment
#[derive(Debug, Clone)]
pub struct FragmentSample {
    /// Payload
    pub data: Bytes,
    /// Duration in track timescale
    pub duration: u32,
    /// Sync sample
    pub key_frame: bool,
}

/// Samples of one track within a fragment
#[derive(Debug)]
pub struct TrackRun<'a> {
    /// ISO-BMFF track id
    pub track_id: u32,
    /// Decode time of the first sample, in track timescale
    pub base_decode_time: u64,
    /// Samples in decode order
    pub samples: &'a [FragmentSample],
}

/// Build one `moof` + `mdat` pair.
///
/// Data offsets are relative to the start of the `moof`
/// (default-base-is-moof), and each run's data follows the previous one in
/// the `mdat`.
pub fn fragment(sequence: u32, runs: &[TrackRun<'_>]) -> BytesMut {
    let payload: usize = runs
        .iter()
        .flat_map(|run| run.samples.iter())
        .map(|sample| sample.data.len())
        .sum();
    let mut buf = BytesMut::with_capacity(payload + 256);
    let mut offset_fields = Vec::with_capacity(runs.len());

    write_box(&mut buf, b"moof", |buf| {
        write_full_box(buf, b"mfhd", 0, 0, |buf| buf.put_u32(sequence));
        for run in runs {
            write_box(buf, b"traf", |buf| {
                write_full_box(buf, b"tfhd", 0, TFHD_DEFAULT_BASE_IS_MOOF, |buf| {
                    buf.put_u32(run.track_id);
                });
                write_full_box(buf, b"tfdt", 1, 0, |buf| buf.put_u64(run.base_decode_time));
                write_full_box(buf, b"trun", 0, TRUN_FLAGS, |buf| {
                    buf.put_u32(run.samples.len() as u32);
                    offset_fields.push(buf.len());
                    buf.put_i32(0);
                    for sample in run.samples {
                        buf.put_u32(sample.duration);
                        buf.put_u32(sample.data.len() as u32);
                        buf.put_u32(if sample.key_frame {
                            SYNC_SAMPLE_FLAGS
                        } else {
                            NON_SYNC_SAMPLE_FLAGS
                        });
                    }
                });
            });
        }
    });

    // moof length plus the mdat header
    let mut data_offset = buf.len() + 8;
    for (run, field) in runs.iter().zip(&offset_fields) {
        buf[*field..*field + 4].copy_from_slice(&(data_offset as i32).to_be_bytes());
        data_offset += run.samples.iter().map(|s| s.data.len()).sum::<usize>();
    }

    write_box(&mut buf, b"mdat", |buf| {
        for run in runs {
            for sample in run.samples {
                buf.put_slice(&sample.data);
            }
        }
    });
    buf
}
