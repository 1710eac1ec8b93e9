//! RF transmit engines. Both produce ready-to-key baseband frames; the
//! modem task owns the pacing, the keying sequence and the UART writes.

use log::debug;

use m17spot_core::{ChunkControl, Crc16, FrameType, Lsf, TypeVersion, EOT_BIT, LSF_SIZE};

use crate::codec::FrameCodec;
use crate::filter::{rrc_taps, PolyphaseFilter};
use crate::{SAMPLES_PER_FRAME, SYMBOLS_PER_FRAME};

/// Stream transmitter. Frames are renumbered from zero so the over on
/// the air is self-consistent no matter where the internet stream was
/// joined; the link setup data is refreshed from the incoming frames
/// once per LICH rotation and converted to the radio's TYPE version.
pub struct StreamTx<C: FrameCodec> {
    codec: C,
    filter: PolyphaseFilter,
    crc: Crc16,
    version: TypeVersion,
    lsf: Lsf,
    frame_count: u16,
    active: bool,
}

impl<C: FrameCodec> StreamTx<C> {
    #[must_use]
    pub fn new(codec: C, version: TypeVersion) -> Self {
        Self {
            codec,
            filter: PolyphaseFilter::new(&rrc_taps()),
            crc: Crc16::new(),
            version,
            lsf: Lsf::new(),
            frame_count: 0,
            active: false,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Open the over: preamble, the given link setup frame and the
    /// first stream frame, renumbered to zero.
    pub fn start(&mut self, lsf: Lsf, payload: &[u8; 16]) -> Vec<[i8; SAMPLES_PER_FRAME]> {
        debug!("stream TX start");
        self.active = true;
        self.frame_count = 0;
        self.lsf = lsf;
        self.filter.flush();

        let mut symbols = [0i8; SYMBOLS_PER_FRAME];
        let mut out = Vec::with_capacity(3);

        self.codec.gen_preamble(&mut symbols);
        out.push(self.shape(&symbols));
        self.codec.gen_lsf_frame(&mut symbols, self.lsf.as_bytes());
        out.push(self.shape(&symbols));
        self.codec
            .gen_stream_frame(&mut symbols, self.lsf.as_bytes(), 0, 0, payload);
        out.push(self.shape(&symbols));
        out
    }

    /// Shape one follow-up frame. Returns two baseband frames when the
    /// stream ends, the second being the end-of-transmission marker.
    pub fn push(
        &mut self,
        lsd: &[u8; 28],
        payload: &[u8; 16],
        last: bool,
    ) -> Vec<[i8; SAMPLES_PER_FRAME]> {
        self.frame_count += 1;
        if self.frame_count % 6 == 0 {
            // refresh the LSD from the stream, at the radio's TYPE version
            let mut bytes = [0u8; LSF_SIZE];
            bytes[..28].copy_from_slice(lsd);
            let mut lsf = Lsf::from_bytes(bytes);
            lsf.set_frame_type(FrameType::from_wire(lsf.frame_type()).wire(self.version));
            lsf.seal_crc(&self.crc);
            self.lsf = lsf;
        }
        let lich_count = self.frame_count % 6;
        let mut frame_number = self.frame_count;
        if last {
            frame_number |= EOT_BIT;
        }

        let mut symbols = [0i8; SYMBOLS_PER_FRAME];
        let mut out = Vec::with_capacity(2);
        self.codec.gen_stream_frame(
            &mut symbols,
            self.lsf.as_bytes(),
            lich_count as u8,
            frame_number,
            payload,
        );
        out.push(self.shape(&symbols));

        if last {
            self.codec.gen_eot(&mut symbols);
            out.push(self.shape(&symbols));
            self.active = false;
            debug!("stream TX end, {} frames", self.frame_count + 1);
        }
        out
    }

    /// Drop an over that went stale without its last frame.
    pub fn abort(&mut self) {
        self.active = false;
    }

    fn shape(&mut self, symbols: &[i8; SYMBOLS_PER_FRAME]) -> [i8; SAMPLES_PER_FRAME] {
        let mut samples = [0i8; SAMPLES_PER_FRAME];
        self.filter.process(symbols, &mut samples);
        samples
    }
}

/// Packet transmitter: one call shapes the whole transmission.
pub struct PacketTx<C: FrameCodec> {
    codec: C,
    filter: PolyphaseFilter,
}

impl<C: FrameCodec> PacketTx<C> {
    #[must_use]
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            filter: PolyphaseFilter::new(&rrc_taps()),
        }
    }

    /// Preamble, link setup frame, the payload in 25-byte chunks and
    /// the end-of-transmission marker. The payload carries its own
    /// trailing CRC and the caller has already versioned the LSF.
    pub fn transmit(&mut self, lsf: &Lsf, payload: &[u8]) -> Vec<[i8; SAMPLES_PER_FRAME]> {
        debug!("packet TX start, {} bytes", payload.len());
        self.filter.flush();

        let mut symbols = [0i8; SYMBOLS_PER_FRAME];
        let mut out = Vec::with_capacity(3 + payload.len() / 25);

        self.codec.gen_preamble(&mut symbols);
        out.push(self.shape(&symbols));
        self.codec.gen_lsf_frame(&mut symbols, lsf.as_bytes());
        out.push(self.shape(&symbols));

        let mut chunk = [0u8; 26];
        let mut frame = 0u8;
        let mut remaining = payload.len();
        while remaining > 25 {
            let at = usize::from(frame) * 25;
            chunk[..25].copy_from_slice(&payload[at..at + 25]);
            chunk[25] = ChunkControl {
                last: false,
                value: frame,
            }
            .encode();
            self.codec.gen_packet_frame(&mut symbols, &chunk);
            out.push(self.shape(&symbols));
            remaining -= 25;
            frame += 1;
        }
        chunk = [0; 26];
        let at = usize::from(frame) * 25;
        chunk[..remaining].copy_from_slice(&payload[at..at + remaining]);
        chunk[25] = ChunkControl {
            last: true,
            value: remaining as u8,
        }
        .encode();
        self.codec.gen_packet_frame(&mut symbols, &chunk);
        out.push(self.shape(&symbols));

        self.codec.gen_eot(&mut symbols);
        out.push(self.shape(&symbols));
        out
    }

    fn shape(&mut self, symbols: &[i8; SYMBOLS_PER_FRAME]) -> [i8; SAMPLES_PER_FRAME] {
        let mut samples = [0i8; SAMPLES_PER_FRAME];
        self.filter.process(symbols, &mut samples);
        samples
    }
}
