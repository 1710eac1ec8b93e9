//! M17 channel coding behind the baseband [`FrameCodec`] contract: the
//! rate 1/2 convolutional code with per-frame puncturing, Golay(24,12)
//! for the link information channel, the quadratic interleaver and the
//! bit randomizer, and the 4-FSK dibit mapping.

use m17spot_core::LSF_SIZE;

use m17spot_baseband::sync::{EOT_SYNC, LSF_SYNC_EXT, PACKET_SYNC, STREAM_SYNC};
use m17spot_baseband::{FrameCodec, PacketDecode, StreamDecode, SYMBOLS_PER_FRAME, SYMBOLS_PER_PAYLOAD};

pub mod conv;
pub mod golay;

use golay::Golay;

const PAYLOAD_BITS: usize = 2 * SYMBOLS_PER_PAYLOAD;

/// Puncture patterns: link setup, stream data, packet data.
const P1: [u8; 61] = [
    1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1,
    0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1,
];
const P2: [u8; 12] = [1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0];
const P3: [u8; 8] = [1, 1, 1, 1, 1, 1, 1, 0];

/// Bit randomizer sequence, one byte per eight payload bits.
const RAND_SEQ: [u8; 46] = [
    0xd6, 0xb5, 0xe2, 0x30, 0x82, 0xff, 0x84, 0x62, 0xba, 0x4e, 0x96, 0x90, 0xd8, 0x98, 0xdd,
    0x5d, 0x0c, 0xc8, 0x52, 0x43, 0x91, 0x1d, 0xf8, 0x6e, 0x68, 0x2f, 0x35, 0xda, 0x14, 0xea,
    0xcd, 0x76, 0x19, 0x8d, 0xd5, 0x80, 0xd1, 0x33, 0x87, 0x13, 0x57, 0x18, 0x2d, 0x29, 0x78,
    0xc3,
];

/// Quadratic permutation spreading burst errors across the frame.
fn interleave_index(i: usize) -> usize {
    (45 * i + 92 * i * i) % PAYLOAD_BITS
}

fn rand_bit(i: usize) -> u8 {
    (RAND_SEQ[i / 8] >> (7 - i % 8)) & 1
}

fn unpack_bits(bytes: &[u8], out: &mut Vec<u8>) {
    for &byte in bytes {
        for shift in (0..8).rev() {
            out.push((byte >> shift) & 1);
        }
    }
}

fn pack_bits(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | b))
        .collect()
}

fn dibit_symbol(msb: u8, lsb: u8) -> i8 {
    match (msb, lsb) {
        (0, 0) => 1,
        (0, 1) => 3,
        (1, 0) => -1,
        _ => -3,
    }
}

/// One 4-FSK symbol into two soft bits: the first bit is carried by the
/// sign, the second by the magnitude.
fn symbol_soft(s: f32) -> (u16, u16) {
    let msb = ((3.0 - s) / 6.0).clamp(0.0, 1.0);
    let lsb = ((s.abs() - 1.0) / 2.0).clamp(0.0, 1.0);
    ((msb * 65535.0) as u16, (lsb * 65535.0) as u16)
}

pub struct M17Codec {
    golay: Golay,
}

impl M17Codec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            golay: Golay::new(),
        }
    }

    /// Interleave and randomize 368 payload bits, then map them onto
    /// the frame behind the sync symbols.
    fn fill_frame(out: &mut [i8; SYMBOLS_PER_FRAME], sync: &[i8; 8], bits: &[u8]) {
        let mut spread = [0u8; PAYLOAD_BITS];
        for (i, &b) in bits.iter().enumerate() {
            spread[interleave_index(i)] = b;
        }
        for (i, b) in spread.iter_mut().enumerate() {
            *b ^= rand_bit(i);
        }
        out[..8].copy_from_slice(sync);
        for i in 0..SYMBOLS_PER_PAYLOAD {
            out[8 + i] = dibit_symbol(spread[2 * i], spread[2 * i + 1]);
        }
    }

    /// Soft payload symbols back to 368 soft bits in encoder order.
    fn soft_bits(soft: &[f32; SYMBOLS_PER_PAYLOAD]) -> [u16; PAYLOAD_BITS] {
        let mut raw = [0u16; PAYLOAD_BITS];
        for (i, &s) in soft.iter().enumerate() {
            let (msb, lsb) = symbol_soft(s);
            raw[2 * i] = msb;
            raw[2 * i + 1] = lsb;
        }
        for (i, b) in raw.iter_mut().enumerate() {
            if rand_bit(i) == 1 {
                *b = 0xffff - *b;
            }
        }
        let mut out = [0u16; PAYLOAD_BITS];
        for (i, o) in out.iter_mut().enumerate() {
            *o = raw[interleave_index(i)];
        }
        out
    }

    /// 48 bits of link information channel into four Golay words.
    fn encode_lich(&self, fragment: &[u8], lich_count: u8) -> Vec<u8> {
        let mut content = [0u8; 6];
        content[..5].copy_from_slice(fragment);
        content[5] = lich_count << 5;
        let mut raw = Vec::with_capacity(48);
        unpack_bits(&content, &mut raw);
        let mut out = Vec::with_capacity(96);
        for block in raw.chunks(12) {
            let data = block.iter().fold(0u16, |acc, &b| (acc << 1) | u16::from(b));
            let cw = self.golay.encode(data);
            for shift in (0..24).rev() {
                out.push(((cw >> shift) & 1) as u8);
            }
        }
        out
    }

    fn decode_lich(&self, soft: &[u16]) -> ([u8; 5], u8, u32) {
        let mut bits = [0u8; 48];
        let mut errors = 0u32;
        for (block, chunk) in soft.chunks(24).enumerate() {
            let word = chunk
                .iter()
                .fold(0u32, |acc, &s| (acc << 1) | u32::from(s > 0x7fff));
            let (data, errs) = self.golay.decode(word);
            errors += errs;
            for bit in 0..12 {
                bits[block * 12 + bit] = ((data >> (11 - bit)) & 1) as u8;
            }
        }
        let bytes = pack_bits(&bits);
        let mut fragment = [0u8; 5];
        fragment.copy_from_slice(&bytes[..5]);
        (fragment, bytes[5] >> 5, errors)
    }
}

impl Default for M17Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec for M17Codec {
    fn decode_lsf(&mut self, soft: &[f32; SYMBOLS_PER_PAYLOAD]) -> ([u8; LSF_SIZE], u32) {
        let soft = Self::soft_bits(soft);
        let restored = conv::depuncture(&soft, &P1, 2 * (8 * LSF_SIZE + 4));
        let (bits, metric) = conv::viterbi(&restored);
        let bytes = pack_bits(&bits[..8 * LSF_SIZE]);
        let mut lsf = [0u8; LSF_SIZE];
        lsf.copy_from_slice(&bytes);
        (lsf, metric)
    }

    fn decode_stream(&mut self, soft: &[f32; SYMBOLS_PER_PAYLOAD]) -> StreamDecode {
        let soft = Self::soft_bits(soft);
        let (lich, lich_count, golay_errors) = self.decode_lich(&soft[..96]);
        let restored = conv::depuncture(&soft[96..], &P2, 2 * (144 + 4));
        let (bits, metric) = conv::viterbi(&restored);
        let bytes = pack_bits(&bits[..144]);
        let frame_number = u16::from_be_bytes([bytes[0], bytes[1]]);
        let mut payload = [0u8; 16];
        payload.copy_from_slice(&bytes[2..18]);
        StreamDecode {
            payload,
            lich,
            lich_count,
            frame_number,
            errors: metric.saturating_add(golay_errors << 12),
        }
    }

    fn decode_packet(&mut self, soft: &[f32; SYMBOLS_PER_PAYLOAD]) -> PacketDecode {
        let soft = Self::soft_bits(soft);
        let restored = conv::depuncture(&soft, &P3, 2 * (206 + 4));
        let (bits, metric) = conv::viterbi(&restored);
        let bytes = pack_bits(&bits[..200]);
        let mut chunk = [0u8; 25];
        chunk.copy_from_slice(&bytes);
        let last = bits[200] == 1;
        let count = bits[201..206]
            .iter()
            .fold(0u8, |acc, &b| (acc << 1) | b);
        PacketDecode {
            chunk,
            last,
            count,
            errors: metric,
        }
    }

    fn gen_preamble(&mut self, out: &mut [i8; SYMBOLS_PER_FRAME]) {
        for (i, s) in out.iter_mut().enumerate() {
            *s = if i % 2 == 0 { 3 } else { -3 };
        }
    }

    fn gen_lsf_frame(&mut self, out: &mut [i8; SYMBOLS_PER_FRAME], lsf: &[u8; LSF_SIZE]) {
        let mut bits = Vec::with_capacity(8 * LSF_SIZE);
        unpack_bits(lsf, &mut bits);
        let punctured = conv::puncture(&conv::encode(&bits), &P1);
        let mut sync = [0i8; 8];
        sync.copy_from_slice(&LSF_SYNC_EXT[8..]);
        Self::fill_frame(out, &sync, &punctured);
    }

    fn gen_stream_frame(
        &mut self,
        out: &mut [i8; SYMBOLS_PER_FRAME],
        lsf: &[u8; LSF_SIZE],
        lich_count: u8,
        frame_number: u16,
        payload: &[u8; 16],
    ) {
        let at = usize::from(lich_count) * 5;
        let mut bits = self.encode_lich(&lsf[at..at + 5], lich_count);

        let mut data = Vec::with_capacity(144);
        unpack_bits(&frame_number.to_be_bytes(), &mut data);
        unpack_bits(payload, &mut data);
        bits.extend(conv::puncture(&conv::encode(&data), &P2));
        Self::fill_frame(out, &STREAM_SYNC, &bits);
    }

    fn gen_packet_frame(&mut self, out: &mut [i8; SYMBOLS_PER_FRAME], chunk: &[u8; 26]) {
        let mut bits = Vec::with_capacity(206);
        unpack_bits(&chunk[..25], &mut bits);
        for shift in (2..8).rev() {
            bits.push((chunk[25] >> shift) & 1);
        }
        let punctured = conv::puncture(&conv::encode(&bits), &P3);
        Self::fill_frame(out, &PACKET_SYNC, &punctured);
    }

    fn gen_eot(&mut self, out: &mut [i8; SYMBOLS_PER_FRAME]) {
        for (i, s) in out.iter_mut().enumerate() {
            *s = EOT_SYNC[i % 8];
        }
    }
}
