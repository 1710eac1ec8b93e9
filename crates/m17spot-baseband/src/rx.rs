//! RF receive state machine. Raw samples from the board pass through the
//! matched filter into a sliding window large enough to hold one whole
//! frame plus the next frame's sync word; every new sample the window is
//! correlated against the sync patterns and a hit hands the payload
//! symbols to the frame codec.

use log::{debug, warn};

use m17spot_core::{
    Callsign, ChunkControl, Crc16, FrameType, LichCollector, Lsf, PacketFrame, PayloadType,
    EOT_BIT,
};

use crate::codec::FrameCodec;
use crate::filter::{rrc_taps, MatchedFilter, FILTER_TAPS};
use crate::sync::{
    below, distance_sq, EOT_SYNC, FRAME_SYNC_THRESHOLD, LSF_SYNC_EXT, LSF_SYNC_THRESHOLD,
    PACKET_SYNC, STREAM_SYNC,
};
use crate::{
    ERROR_SCALE, RX_SYMBOL_SCALING_COEFF, RX_SYNC_TIMEOUT_SAMPLES, SAMPLES_PER_FRAME,
    SAMPLES_PER_SYMBOL, SYMBOLS_PER_PAYLOAD,
};

/// 16 extended-sync symbols, one full frame and the next frame's sync,
/// plus floor(sps/2) samples of slack for symbol timing correction.
const RING_LEN: usize =
    8 * SAMPLES_PER_SYMBOL + 2 * (8 * SAMPLES_PER_SYMBOL + SAMPLES_PER_FRAME) + SAMPLES_PER_SYMBOL / 2;

/// Sample index of the first payload symbol, per frame kind.
const LSF_PAYLOAD_AT: usize = 16 * SAMPLES_PER_SYMBOL;
const FRAME_PAYLOAD_AT: usize = 8 * SAMPLES_PER_SYMBOL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    Stream,
    Packet,
}

/// What the receiver extracted from the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxEvent {
    /// A link setup frame opened a new over, from its own frame or
    /// rebuilt out of LICH fragments.
    LsfStart { lsf: Lsf },
    /// One stream frame, with the link setup data it travels under.
    StreamFrame {
        lsd: [u8; 28],
        frame_number: u16,
        payload: [u8; 16],
    },
    /// A complete packet payload whose CRC checked out.
    PacketReady { lsf: Lsf, payload: Vec<u8> },
    /// Sync was lost mid-over.
    Timeout,
}

/// Oldest-first view over the last `RING_LEN` filtered samples.
#[derive(Debug, Clone)]
struct SampleRing {
    buf: [f32; RING_LEN],
    head: usize,
}

impl SampleRing {
    fn new() -> Self {
        Self {
            buf: [0.0; RING_LEN],
            head: 0,
        }
    }

    fn push(&mut self, v: f32) {
        self.buf[self.head] = v;
        self.head = (self.head + 1) % RING_LEN;
    }

    /// Index 0 is the oldest sample in the window.
    fn get(&self, i: usize) -> f32 {
        self.buf[(self.head + i) % RING_LEN]
    }
}

pub struct RxEngine<C: FrameCodec> {
    codec: C,
    crc: Crc16,
    filter: MatchedFilter,
    scale: f32,
    ring: SampleRing,
    state: RxState,
    sample_cnt: usize,
    // stream mode
    lsf: Lsf,
    got_lsf: bool,
    first_frame: bool,
    last_fn: u16,
    lich: LichCollector,
    // packet mode
    packet: PacketFrame,
}

impl<C: FrameCodec> RxEngine<C> {
    #[must_use]
    pub fn new(codec: C) -> Self {
        Self::with_taps(codec, rrc_taps(), RX_SYMBOL_SCALING_COEFF)
    }

    /// Build with explicit filter taps and sample scaling.
    #[must_use]
    pub fn with_taps(codec: C, taps: [f32; FILTER_TAPS], scale: f32) -> Self {
        Self {
            codec,
            crc: Crc16::new(),
            filter: MatchedFilter::new(taps),
            scale,
            ring: SampleRing::new(),
            state: RxState::Idle,
            sample_cnt: 0,
            lsf: Lsf::new(),
            got_lsf: false,
            first_frame: true,
            last_fn: 0xffff,
            lich: LichCollector::new(),
            packet: PacketFrame::new(),
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == RxState::Idle
    }

    /// Feed raw baseband samples, collect whatever frames fall out.
    pub fn push_samples(&mut self, samples: &[i8]) -> Vec<RxEvent> {
        let mut events = Vec::new();
        for &raw in samples {
            self.step(raw, &mut events);
        }
        events
    }

    fn step(&mut self, raw: i8, events: &mut Vec<RxEvent>) {
        let filtered = self.filter.push(raw) * self.scale;
        self.ring.push(filtered);

        let mut head = [0.0f32; 16];
        for (j, s) in head.iter_mut().enumerate() {
            *s = self.ring.get(j * SAMPLES_PER_SYMBOL);
        }
        let mut next = [0.0f32; 8];
        for (j, s) in next.iter_mut().enumerate() {
            *s = self.ring.get(SAMPLES_PER_FRAME + j * SAMPLES_PER_SYMBOL);
        }

        let sed_lsf = distance_sq(&head, &LSF_SYNC_EXT);
        let sed_eot = distance_sq(&next, &EOT_SYNC);
        let sed_str =
            distance_sq(&head[..8], &STREAM_SYNC) + distance_sq(&next, &STREAM_SYNC).min(sed_eot);
        let sed_pkt =
            distance_sq(&head[..8], &PACKET_SYNC) + distance_sq(&next, &PACKET_SYNC).min(sed_eot);

        if below(LSF_SYNC_THRESHOLD, sed_lsf) && self.state == RxState::Idle {
            self.on_lsf_sync(sed_lsf, events);
        } else if below(FRAME_SYNC_THRESHOLD, sed_str) {
            self.on_stream_sync(sed_str, events);
        } else if below(FRAME_SYNC_THRESHOLD, sed_pkt) && self.state == RxState::Packet {
            self.on_packet_sync(sed_pkt, events);
        }

        if self.state != RxState::Idle {
            self.sample_cnt += 1;
            if self.sample_cnt >= RX_SYNC_TIMEOUT_SAMPLES {
                warn!("RF sync timeout");
                self.reset();
                events.push(RxEvent::Timeout);
            }
        }
    }

    fn on_lsf_sync(&mut self, sed: f32, events: &mut Vec<RxEvent>) {
        let offset = self.refine_lsf(sed);
        let pld = self.payload_at(LSF_PAYLOAD_AT + offset);
        let (bytes, e) = self.codec.decode_lsf(&pld);
        if !self.crc.check(&bytes) {
            warn!("RF LSF with bad CRC");
            return;
        }
        self.open_over(Lsf::from_bytes(bytes), events);
        debug!("RF LSF MER {:.1}%", e as f32 * ERROR_SCALE);
    }

    fn on_stream_sync(&mut self, sed: f32, events: &mut Vec<RxEvent>) {
        self.sample_cnt = 0;
        let offset = self.refine_frame(&STREAM_SYNC, sed);
        let pld = self.payload_at(FRAME_PAYLOAD_AT + offset);
        let dec = self.codec.decode_stream(&pld);

        if dec.lich_count == 0 {
            self.lich.reset();
        }
        let frame_count = dec.frame_number & 0x7fff;
        if self.first_frame {
            self.last_fn = frame_count.wrapping_sub(1) & 0x7fff;
            self.first_frame = false;
        }

        if (self.last_fn.wrapping_add(1) & 0x7fff) == frame_count {
            if self.got_lsf {
                let mut lsd = [0u8; 28];
                lsd.copy_from_slice(&self.lsf.as_bytes()[..28]);
                events.push(RxEvent::StreamFrame {
                    lsd,
                    frame_number: dec.frame_number,
                    payload: dec.payload,
                });
                debug!(
                    "RF stream frame FN {:04x} LICH {} MER {:.1}%",
                    dec.frame_number,
                    dec.lich_count,
                    dec.errors as f32 * ERROR_SCALE
                );
            }

            self.lich.add(&dec.lich, dec.lich_count);
            if self.lich.is_complete() {
                match self.lich.try_lsf(&self.crc) {
                    Some(lsf) if !self.got_lsf => {
                        self.open_over(lsf, events);
                        debug!("LSF rebuilt from LICH fragments");
                    }
                    Some(lsf) => self.lsf = lsf,
                    None => debug!("LICH LSF CRC error"),
                }
                self.lich.reset();
            }
            self.last_fn = frame_count;
        }

        if dec.frame_number & EOT_BIT != 0 {
            self.end_over();
        }
    }

    fn on_packet_sync(&mut self, sed: f32, events: &mut Vec<RxEvent>) {
        self.sample_cnt = 0;
        let offset = self.refine_frame(&PACKET_SYNC, sed);
        let pld = self.payload_at(FRAME_PAYLOAD_AT + offset);
        let dec = self.codec.decode_packet(&pld);

        let control = ChunkControl {
            last: dec.last,
            value: dec.count,
        };
        if self.packet.add_chunk(&dec.chunk, control) {
            let payload = self.packet.payload();
            if !self.crc.check(&payload) {
                warn!("RF packet payload CRC failed, {} bytes", payload.len());
            } else if self.got_lsf {
                events.push(RxEvent::PacketReady {
                    lsf: self.lsf,
                    payload,
                });
            } else {
                warn!("got a packet payload without its LSF");
            }
            self.packet = PacketFrame::new();
            self.end_over();
        }
    }

    /// A valid LSF arrived; pick the mode from its type field.
    fn open_over(&mut self, lsf: Lsf, events: &mut Vec<RxEvent>) {
        let frame_type = FrameType::from_wire(lsf.frame_type());
        self.state = if frame_type.payload() == PayloadType::Packet {
            RxState::Packet
        } else {
            RxState::Stream
        };
        self.got_lsf = true;
        self.sample_cnt = 0;
        self.lsf = lsf;

        let mut code = [0u8; 6];
        code.copy_from_slice(lsf.dst());
        let dst = Callsign::from_bytes(&code);
        code.copy_from_slice(lsf.src());
        let src = Callsign::from_bytes(&code);
        debug!(
            "RF LSF DST {} SRC {} TYPE {:04x} CAN {}",
            dst,
            src,
            lsf.frame_type(),
            frame_type.can()
        );

        events.push(RxEvent::LsfStart { lsf });
    }

    fn end_over(&mut self) {
        self.state = RxState::Idle;
        self.got_lsf = false;
        self.first_frame = true;
        self.last_fn = 0xffff;
        self.lich.reset();
    }

    fn reset(&mut self) {
        self.end_over();
        self.sample_cnt = 0;
        self.packet = PacketFrame::new();
    }

    /// Symbol-timing search around the nominal sample point.
    fn refine_lsf(&self, mut best: f32) -> usize {
        let mut offset = 0;
        for i in 1..=SAMPLES_PER_SYMBOL / 2 {
            let mut s = [0.0f32; 16];
            for (j, v) in s.iter_mut().enumerate() {
                *v = self.ring.get(j * SAMPLES_PER_SYMBOL + i);
            }
            let d = distance_sq(&s, &LSF_SYNC_EXT);
            if d < best {
                best = d;
                offset = i;
            }
        }
        offset
    }

    fn refine_frame(&self, pattern: &[i8; 8], mut best: f32) -> usize {
        let mut offset = 0;
        for i in 1..=SAMPLES_PER_SYMBOL / 2 {
            let mut a = [0.0f32; 8];
            for (j, v) in a.iter_mut().enumerate() {
                *v = self.ring.get(j * SAMPLES_PER_SYMBOL + i);
            }
            let mut b = [0.0f32; 8];
            for (j, v) in b.iter_mut().enumerate() {
                *v = self.ring.get(SAMPLES_PER_FRAME + j * SAMPLES_PER_SYMBOL + i);
            }
            let d = distance_sq(&a, pattern)
                + distance_sq(&b, pattern).min(distance_sq(&b, &EOT_SYNC));
            if d < best {
                best = d;
                offset = i;
            }
        }
        offset
    }

    /// Payload symbols at the given sample position, including timing
    /// correction folded into `base`.
    fn payload_at(&self, base: usize) -> [f32; SYMBOLS_PER_PAYLOAD] {
        let mut pld = [0.0f32; SYMBOLS_PER_PAYLOAD];
        for (i, p) in pld.iter_mut().enumerate() {
            *p = self.ring.get(base + i * SAMPLES_PER_SYMBOL);
        }
        pld
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PacketDecode, StreamDecode};
    use crate::SYMBOLS_PER_FRAME;
    use m17spot_core::{Callsign, TypeVersion, LSF_SIZE};
    use std::collections::VecDeque;

    struct MockCodec {
        lsf: VecDeque<[u8; LSF_SIZE]>,
        stream: VecDeque<StreamDecode>,
        packet: VecDeque<PacketDecode>,
    }

    impl MockCodec {
        fn new() -> Self {
            Self {
                lsf: VecDeque::new(),
                stream: VecDeque::new(),
                packet: VecDeque::new(),
            }
        }
    }

    impl FrameCodec for MockCodec {
        fn decode_lsf(&mut self, _soft: &[f32; SYMBOLS_PER_PAYLOAD]) -> ([u8; LSF_SIZE], u32) {
            (self.lsf.pop_front().expect("unscripted LSF decode"), 0)
        }

        fn decode_stream(&mut self, _soft: &[f32; SYMBOLS_PER_PAYLOAD]) -> StreamDecode {
            self.stream.pop_front().expect("unscripted stream decode")
        }

        fn decode_packet(&mut self, _soft: &[f32; SYMBOLS_PER_PAYLOAD]) -> PacketDecode {
            self.packet.pop_front().expect("unscripted packet decode")
        }

        fn gen_preamble(&mut self, _out: &mut [i8; SYMBOLS_PER_FRAME]) {
            unimplemented!()
        }

        fn gen_lsf_frame(&mut self, _out: &mut [i8; SYMBOLS_PER_FRAME], _lsf: &[u8; LSF_SIZE]) {
            unimplemented!()
        }

        fn gen_stream_frame(
            &mut self,
            _out: &mut [i8; SYMBOLS_PER_FRAME],
            _lsf: &[u8; LSF_SIZE],
            _lich_count: u8,
            _frame_number: u16,
            _payload: &[u8; 16],
        ) {
            unimplemented!()
        }

        fn gen_packet_frame(&mut self, _out: &mut [i8; SYMBOLS_PER_FRAME], _chunk: &[u8; 26]) {
            unimplemented!()
        }

        fn gen_eot(&mut self, _out: &mut [i8; SYMBOLS_PER_FRAME]) {
            unimplemented!()
        }
    }

    fn engine(codec: MockCodec) -> RxEngine<MockCodec> {
        // identity filter, unity scale: samples pass straight through
        let mut taps = [0.0f32; FILTER_TAPS];
        taps[0] = 1.0;
        RxEngine::with_taps(codec, taps, 1.0)
    }

    /// One symbol as its nominal sample followed by four zero fillers,
    /// so the sync correlator fires at exactly one alignment.
    fn push_symbols(samples: &mut Vec<i8>, symbols: &[i8]) {
        for &s in symbols {
            samples.push(s);
            samples.extend_from_slice(&[0; 4]);
        }
    }

    fn push_frame(samples: &mut Vec<i8>, sync: &[i8]) {
        push_symbols(samples, sync);
        let payload_symbols = SYMBOLS_PER_FRAME - sync.len();
        push_symbols(samples, &vec![0i8; payload_symbols]);
    }

    fn sealed_lsf(dst: &str, src: &str, payload_type: PayloadType) -> Lsf {
        let crc = Crc16::new();
        let mut lsf = Lsf::new();
        let mut code = [0u8; 6];
        Callsign::new(dst).code_out(&mut code);
        lsf.set_dst(&code);
        Callsign::new(src).code_out(&mut code);
        lsf.set_src(&code);
        let mut ft = FrameType::new();
        ft.set_payload(payload_type);
        lsf.set_frame_type(ft.wire(TypeVersion::V3));
        lsf.seal_crc(&crc);
        lsf
    }

    fn stream_decode(frame_number: u16, lich_count: u8, lich: [u8; 5]) -> StreamDecode {
        StreamDecode {
            payload: [0xaa; 16],
            lich,
            lich_count,
            frame_number,
            errors: 0,
        }
    }

    #[test]
    fn lsf_then_stream_frames_with_a_gap() {
        let lsf = sealed_lsf("M17-USA C", "W1AW", PayloadType::Voice3200);
        let mut codec = MockCodec::new();
        codec.lsf.push_back(*lsf.as_bytes());
        // fn 0, then an out-of-order 5 that must be dropped, then 1,
        // then 2 with the end-of-transmission bit
        codec.stream.push_back(stream_decode(0, 0, [0; 5]));
        codec.stream.push_back(stream_decode(5, 1, [0; 5]));
        codec.stream.push_back(stream_decode(1, 1, [0; 5]));
        codec.stream.push_back(stream_decode(2 | EOT_BIT, 2, [0; 5]));

        let mut samples = Vec::new();
        push_symbols(&mut samples, &LSF_SYNC_EXT);
        push_symbols(&mut samples, &[0i8; SYMBOLS_PER_PAYLOAD]);
        for _ in 0..4 {
            push_frame(&mut samples, &STREAM_SYNC);
        }
        push_frame(&mut samples, &EOT_SYNC);
        samples.extend_from_slice(&vec![0i8; RING_LEN + 100]);

        let mut rx = engine(codec);
        let events = rx.push_samples(&samples);

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], RxEvent::LsfStart { lsf });
        let mut lsd = [0u8; 28];
        lsd.copy_from_slice(&lsf.as_bytes()[..28]);
        assert_eq!(
            events[1],
            RxEvent::StreamFrame {
                lsd,
                frame_number: 0,
                payload: [0xaa; 16]
            }
        );
        assert_eq!(
            events[2],
            RxEvent::StreamFrame {
                lsd,
                frame_number: 1,
                payload: [0xaa; 16]
            }
        );
        assert_eq!(
            events[3],
            RxEvent::StreamFrame {
                lsd,
                frame_number: 2 | EOT_BIT,
                payload: [0xaa; 16]
            }
        );
        assert!(rx.is_idle());
    }

    #[test]
    fn lich_fragments_rebuild_a_missed_lsf() {
        let lsf = sealed_lsf("M17-USA C", "W1AW", PayloadType::Voice3200);
        let bytes = *lsf.as_bytes();

        let mut codec = MockCodec::new();
        // six frames carry the full LICH rotation, the seventh is the
        // first one forwarded, already under the rebuilt LSF
        for i in 0..6u16 {
            let mut frag = [0u8; 5];
            frag.copy_from_slice(&bytes[usize::from(i) * 5..usize::from(i) * 5 + 5]);
            codec.stream.push_back(stream_decode(10 + i, i as u8, frag));
        }
        codec
            .stream
            .push_back(stream_decode(16 | EOT_BIT, 0, [0; 5]));

        let mut samples = Vec::new();
        for _ in 0..7 {
            push_frame(&mut samples, &STREAM_SYNC);
        }
        push_frame(&mut samples, &EOT_SYNC);
        samples.extend_from_slice(&vec![0i8; RING_LEN + 100]);

        let mut rx = engine(codec);
        let events = rx.push_samples(&samples);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RxEvent::LsfStart { lsf });
        let mut lsd = [0u8; 28];
        lsd.copy_from_slice(&bytes[..28]);
        assert_eq!(
            events[1],
            RxEvent::StreamFrame {
                lsd,
                frame_number: 16 | EOT_BIT,
                payload: [0xaa; 16]
            }
        );
        assert!(rx.is_idle());
    }

    #[test]
    fn packet_chunks_reassemble_and_check_crc() {
        let crc = Crc16::new();
        let lsf = sealed_lsf("M17-USA C", "W1AW", PayloadType::Packet);

        // 28 bytes of content plus the trailing CRC
        let mut payload = vec![0u8; 30];
        payload[0] = 0x05;
        payload[1..13].copy_from_slice(b"hello there\0");
        crc.seal(&mut payload);

        let mut codec = MockCodec::new();
        codec.lsf.push_back(*lsf.as_bytes());
        let mut chunk = [0u8; 25];
        chunk.copy_from_slice(&payload[..25]);
        codec.packet.push_back(PacketDecode {
            chunk,
            last: false,
            count: 0,
            errors: 0,
        });
        let mut chunk = [0u8; 25];
        chunk[..5].copy_from_slice(&payload[25..]);
        codec.packet.push_back(PacketDecode {
            chunk,
            last: true,
            count: 5,
            errors: 0,
        });

        let mut samples = Vec::new();
        push_symbols(&mut samples, &LSF_SYNC_EXT);
        push_symbols(&mut samples, &[0i8; SYMBOLS_PER_PAYLOAD]);
        for _ in 0..2 {
            push_frame(&mut samples, &PACKET_SYNC);
        }
        push_frame(&mut samples, &EOT_SYNC);
        samples.extend_from_slice(&vec![0i8; RING_LEN + 100]);

        let mut rx = engine(codec);
        let events = rx.push_samples(&samples);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RxEvent::LsfStart { lsf });
        assert_eq!(events[1], RxEvent::PacketReady { lsf, payload });
        assert!(rx.is_idle());
    }

    #[test]
    fn silence_after_lsf_times_out() {
        let lsf = sealed_lsf("M17-USA C", "W1AW", PayloadType::Voice3200);
        let mut codec = MockCodec::new();
        codec.lsf.push_back(*lsf.as_bytes());

        let mut samples = Vec::new();
        push_symbols(&mut samples, &LSF_SYNC_EXT);
        push_symbols(&mut samples, &[0i8; SYMBOLS_PER_PAYLOAD]);
        samples.extend_from_slice(&vec![0i8; RING_LEN + RX_SYNC_TIMEOUT_SAMPLES + 100]);

        let mut rx = engine(codec);
        let events = rx.push_samples(&samples);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RxEvent::LsfStart { lsf });
        assert_eq!(events[1], RxEvent::Timeout);
        assert!(rx.is_idle());
    }
}
