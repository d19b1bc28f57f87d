//! H.264 bitstream helpers
//!
//! Encoders emit Annex-B access units (start-code delimited). The container
//! wants length-prefixed NAL units plus an `avcC` decoder configuration
//! record built from the stream's SPS and PPS.

use bytes::{BufMut, Bytes, BytesMut};

/// NAL unit type constants
pub mod nal_type {
    /// Non-IDR slice
    pub const NON_IDR_SLICE: u8 = 1;
    /// IDR slice
    pub const IDR_SLICE: u8 = 5;
    /// Sequence parameter set
    pub const SPS: u8 = 7;
    /// Picture parameter set
    pub const PPS: u8 = 8;
    /// Access unit delimiter
    pub const AUD: u8 = 9;
}

/// Iterator over the NAL units of an Annex-B buffer, without start codes
pub struct NalUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Split an Annex-B buffer on 3- and 4-byte start codes
pub fn nal_units(data: &[u8]) -> NalUnits<'_> {
    let pos = find_start_code(data, 0).map(|(_, end)| end).unwrap_or(data.len());
    NalUnits { data, pos }
}

/// Returns (start code offset, payload offset)
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, i + 3));
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                return Some((i, i + 4));
            }
        }
        i += 1;
    }
    None
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.data.len() {
            let start = self.pos;
            let (end, next) = match find_start_code(self.data, start) {
                Some((code, payload)) => (code, payload),
                None => (self.data.len(), self.data.len()),
            };
            self.pos = next;
            if end > start {
                return Some(&self.data[start..end]);
            }
        }
        None
    }
}

/// NAL unit type of a unit (header byte & 0x1F)
pub fn unit_type(nal: &[u8]) -> u8 {
    nal.first().map(|b| b & 0x1F).unwrap_or(0)
}

/// Parameter sets and slices of one access unit
#[derive(Debug, Clone, Default)]
pub struct AccessUnit {
    /// Sequence parameter set, if present
    pub sps: Option<Bytes>,
    /// Picture parameter set, if present
    pub pps: Option<Bytes>,
    /// Length-prefixed NAL units excluding parameter sets and delimiters
    pub sample: Bytes,
    /// Contains an IDR slice
    pub key_frame: bool,
}

impl AccessUnit {
    /// Parse an Annex-B access unit
    pub fn parse(annex_b: &[u8]) -> Self {
        let mut unit = AccessUnit::default();
        let mut sample = BytesMut::with_capacity(annex_b.len());

        for nal in nal_units(annex_b) {
            match unit_type(nal) {
                nal_type::SPS => unit.sps = Some(Bytes::copy_from_slice(nal)),
                nal_type::PPS => unit.pps = Some(Bytes::copy_from_slice(nal)),
                nal_type::AUD => {}
                kind => {
                    if kind == nal_type::IDR_SLICE {
                        unit.key_frame = true;
                    }
                    sample.put_u32(nal.len() as u32);
                    sample.put_slice(nal);
                }
            }
        }

        unit.sample = sample.freeze();
        unit
    }
}

/// Build an `avcC` decoder configuration record (4-byte NAL lengths)
pub fn avc_decoder_config(sps: &[u8], pps: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
    buf.put_u8(1); // configuration version
    if sps.len() >= 4 {
        buf.put_slice(&sps[1..4]); // profile, compatibility, level
    } else {
        buf.put_slice(&[0x42, 0xC0, 0x1F]);
    }
    buf.put_u8(0xFF); // 4-byte lengths
    buf.put_u8(0xE1); // one SPS
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);
    buf.put_u8(1); // one PPS
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);
    buf.freeze()
}
