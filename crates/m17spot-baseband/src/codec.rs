//! Contract with the forward-error-correction layer. The engines hand
//! soft symbols to a decoder and take raw symbols back from a generator;
//! the convolutional/Golay arithmetic itself lives behind this trait.

use m17spot_core::LSF_SIZE;

use crate::{SYMBOLS_PER_FRAME, SYMBOLS_PER_PAYLOAD};

/// One decoded stream frame: payload, its LICH fragment and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDecode {
    pub payload: [u8; 16],
    pub lich: [u8; 5],
    pub lich_count: u8,
    pub frame_number: u16,
    pub errors: u32,
}

/// One decoded packet-mode frame: a 25-byte chunk plus its control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDecode {
    pub chunk: [u8; 25],
    pub last: bool,
    pub count: u8,
    pub errors: u32,
}

pub trait FrameCodec {
    /// Decode a link setup frame from its soft payload symbols. Returns
    /// the 30 LSF bytes and the accumulated error metric.
    fn decode_lsf(&mut self, soft: &[f32; SYMBOLS_PER_PAYLOAD]) -> ([u8; LSF_SIZE], u32);

    fn decode_stream(&mut self, soft: &[f32; SYMBOLS_PER_PAYLOAD]) -> StreamDecode;

    fn decode_packet(&mut self, soft: &[f32; SYMBOLS_PER_PAYLOAD]) -> PacketDecode;

    /// A full frame of preamble symbols ahead of an LSF.
    fn gen_preamble(&mut self, out: &mut [i8; SYMBOLS_PER_FRAME]);

    fn gen_lsf_frame(&mut self, out: &mut [i8; SYMBOLS_PER_FRAME], lsf: &[u8; LSF_SIZE]);

    fn gen_stream_frame(
        &mut self,
        out: &mut [i8; SYMBOLS_PER_FRAME],
        lsf: &[u8; LSF_SIZE],
        lich_count: u8,
        frame_number: u16,
        payload: &[u8; 16],
    );

    /// Chunk is 25 payload bytes plus the trailing control byte.
    fn gen_packet_frame(&mut self, out: &mut [i8; SYMBOLS_PER_FRAME], chunk: &[u8; 26]);

    fn gen_eot(&mut self, out: &mut [i8; SYMBOLS_PER_FRAME]);
}
