//! Buffers that rebuild larger units from RF-sized pieces: six stream
//! frames into a superframe, 25-byte chunks into a packet payload, and
//! six LICH fragments into a link setup frame.

use crate::crc::Crc16;
use crate::frame_type::PayloadType;
use crate::lsf::{Lsf, LSF_SIZE};
use crate::packet::ChunkControl;

/// One frame of Codec2 3200 silence, repeated for both payload halves.
pub const SILENT_C2_3200: [u8; 8] = [0x01, 0x00, 0x09, 0x43, 0x9c, 0xe4, 0x21, 0x08];
/// Codec2 1600 half-frame silence.
pub const SILENT_C2_1600: [u8; 8] = [0x01, 0x00, 0x04, 0x00, 0x25, 0x75, 0xdd, 0xf2];

/// 16-byte silent stream payload for the given voice mode.
#[must_use]
pub fn silent_payload(payload_type: PayloadType) -> [u8; 16] {
    let half = match payload_type {
        PayloadType::Voice1600 => SILENT_C2_1600,
        _ => SILENT_C2_3200,
    };
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&half);
    out[8..].copy_from_slice(&half);
    out
}

/// Six consecutive stream payloads sharing one LICH rotation of the LSF.
/// Slots are indexed by frame number modulo six; lost frames are filled
/// with silence before the group is keyed to the radio.
#[derive(Debug, Clone)]
pub struct SuperFrame {
    pub lsf: Lsf,
    pub super_fn: u16,
    payload: [[u8; 16]; 6],
    set: u8,
    is_last: bool,
}

impl SuperFrame {
    #[must_use]
    pub fn new(lsf: Lsf, super_fn: u16) -> Self {
        Self {
            lsf,
            super_fn,
            payload: [[0; 16]; 6],
            set: 0,
            is_last: false,
        }
    }

    pub fn add(&mut self, index: usize, payload: &[u8; 16], last: bool) {
        debug_assert!(index < 6);
        self.payload[index].copy_from_slice(payload);
        self.set |= 1 << index;
        if last {
            self.is_last = true;
        }
    }

    #[must_use]
    pub fn frame(&self, index: usize) -> &[u8; 16] {
        &self.payload[index]
    }

    #[must_use]
    pub fn has(&self, index: usize) -> bool {
        self.set & (1 << index) != 0
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.set == 0x3f
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.is_last
    }

    /// Fill unset slots with silence appropriate to the voice mode.
    pub fn quiet_fill(&mut self, payload_type: PayloadType) {
        let quiet = silent_payload(payload_type);
        for index in 0..6 {
            if self.set & (1 << index) == 0 {
                self.payload[index].copy_from_slice(&quiet);
                self.set |= 1 << index;
            }
        }
    }
}

/// Packet payload reassembled from 25-byte RF chunks. The true size is
/// only known when the chunk flagged last arrives, carrying the count of
/// meaningful bytes in itself.
#[derive(Debug, Clone, Default)]
pub struct PacketFrame {
    chunks: Vec<[u8; 25]>,
    size: Option<usize>,
}

impl PacketFrame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the final chunk has been absorbed.
    pub fn add_chunk(&mut self, chunk: &[u8; 25], control: ChunkControl) -> bool {
        if self.size.is_some() {
            return true;
        }
        self.chunks.push(*chunk);
        if control.last {
            let full = 25 * (self.chunks.len() - 1);
            self.size = Some(full + usize::from(control.value).min(25));
        }
        self.size.is_some()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.size.is_some()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size.unwrap_or(25 * self.chunks.len())
    }

    /// The reassembled payload, truncated to the real size.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out.truncate(self.size());
        out
    }
}

/// Collects the six 5-byte LICH fragments into an LSF candidate. The
/// candidate is only offered once all six have arrived and the CRC holds.
#[derive(Debug, Clone, Default)]
pub struct LichCollector {
    data: [u8; LSF_SIZE],
    mask: u8,
}

impl LichCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, fragment: &[u8; 5], index: u8) {
        if index >= 6 {
            return;
        }
        let at = usize::from(index) * 5;
        self.data[at..at + 5].copy_from_slice(fragment);
        self.mask |= 1 << index;
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.mask == 0x3f
    }

    #[must_use]
    pub fn try_lsf(&self, crc: &Crc16) -> Option<Lsf> {
        if self.is_complete() && crc.check(&self.data) {
            Some(Lsf::from_bytes(self.data))
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.mask = 0;
    }
}
