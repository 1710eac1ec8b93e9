//! RF-side bridge. `ModemBridge` turns baseband samples into internet
//! frames and internet frames into keyed transmissions; `run_modem`
//! owns the serial port, the keying sequence and the pacing around it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use m17spot_baseband::{
    FrameCodec, PacketTx, RxEngine, RxEvent, StreamTx, PACKET_TX_TAIL, SAMPLES_PER_FRAME,
    STREAM_TX_TAIL, TX_SETTLE_AFTER_KEY, TX_SETTLE_AFTER_RX_STOP, TX_WATCHDOG,
};
use m17spot_core::{
    silent_payload, Callsign, Crc16, FrameType, Lsf, Packet, PacketKind, TypeVersion, LSF_SIZE,
};
use m17spot_fec::M17Codec;
use m17spot_radio_io::{rx_data_header, Cc1200Control, RadioIoError, TtyPort, BASEBAND_SAMPLES};

use crate::config::Modem;
use crate::gate_state::{GateState, State};

const REOPEN_FIRST: Duration = Duration::from_secs(2);
const REOPEN_RETRY: Duration = Duration::from_secs(5);
const RX_POLL_MS: i32 = 10;

/// Baseband to key up now, plus the unkey schedule once the over ends.
pub struct TxPlan {
    pub frames: Vec<[i8; SAMPLES_PER_FRAME]>,
    pub done: bool,
    pub tail: Duration,
}

impl TxPlan {
    fn empty() -> Self {
        Self {
            frames: Vec::new(),
            done: false,
            tail: Duration::ZERO,
        }
    }
}

pub struct ModemBridge<C: FrameCodec> {
    rx: RxEngine<C>,
    stream_tx: StreamTx<C>,
    packet_tx: PacketTx<C>,
    crc: Crc16,
    state: GateState,
    version: TypeVersion,
    sid: u16,
    last_lsd: [u8; 28],
    rng: StdRng,
}

impl ModemBridge<M17Codec> {
    #[must_use]
    pub fn new(state: GateState, version: TypeVersion) -> Self {
        Self::with_parts(
            RxEngine::new(M17Codec::new()),
            StreamTx::new(M17Codec::new(), version),
            PacketTx::new(M17Codec::new()),
            state,
            version,
        )
    }
}

impl<C: FrameCodec> ModemBridge<C> {
    #[must_use]
    pub fn with_parts(
        rx: RxEngine<C>,
        stream_tx: StreamTx<C>,
        packet_tx: PacketTx<C>,
        state: GateState,
        version: TypeVersion,
    ) -> Self {
        Self {
            rx,
            stream_tx,
            packet_tx,
            crc: Crc16::new(),
            state,
            version,
            sid: 0,
            last_lsd: [0; 28],
            rng: StdRng::from_entropy(),
        }
    }

    #[must_use]
    pub fn tx_active(&self) -> bool {
        self.stream_tx.is_active()
    }

    /// One baseband chunk off the air, demodulated into internet frames.
    /// Frames are dropped when another source holds the channel.
    pub fn on_samples(&mut self, samples: &[i8]) -> Vec<Packet> {
        let mut out = Vec::new();
        for event in self.rx.push_samples(samples) {
            match event {
                RxEvent::LsfStart { lsf } => {
                    if self.state.try_state(State::ModemIn) {
                        self.sid = self.rng.gen_range(1..=u16::MAX);
                        let mut code = [0u8; 6];
                        code.copy_from_slice(&lsf.src()[..6]);
                        debug!(
                            "RF over opened by {}, stream 0x{:04x}",
                            Callsign::from_bytes(&code).text(),
                            self.sid
                        );
                    } else {
                        warn!("RF reception while the channel is busy");
                    }
                }
                RxEvent::StreamFrame {
                    lsd,
                    frame_number,
                    payload,
                } => {
                    if self.state.get() != State::ModemIn {
                        continue;
                    }
                    let mut p = Packet::stream();
                    p.set_stream_id(self.sid);
                    p.set_lsd(&lsd);
                    p.set_frame_number(frame_number);
                    p.payload_mut().copy_from_slice(&payload);
                    p.seal_crc(&self.crc);
                    out.push(p);
                }
                RxEvent::PacketReady { lsf, payload } => {
                    if self.state.get() != State::ModemIn {
                        continue;
                    }
                    match Packet::packet(34 + payload.len()) {
                        Ok(mut p) => {
                            let mut code = [0u8; 6];
                            code.copy_from_slice(lsf.dst());
                            p.set_dst(&code);
                            code.copy_from_slice(lsf.src());
                            p.set_src(&code);
                            p.set_frame_type(lsf.frame_type());
                            let mut meta = [0u8; 14];
                            meta.copy_from_slice(lsf.meta());
                            p.set_meta(&meta);
                            p.payload_mut().copy_from_slice(&payload);
                            p.seal_crc(&self.crc);
                            out.push(p);
                        }
                        Err(e) => warn!("RF packet does not fit a datagram: {e}"),
                    }
                }
                RxEvent::Timeout => {
                    self.state.set_if_from(State::RfTimeout, State::ModemIn);
                }
            }
        }
        out
    }

    /// One internet frame shaped for the air.
    pub fn on_gate_frame(&mut self, pkt: &Packet) -> TxPlan {
        if pkt.kind() == PacketKind::Packet {
            let mut lsf = Lsf::new();
            let mut code = [0u8; 6];
            code.copy_from_slice(pkt.dst());
            lsf.set_dst(&code);
            code.copy_from_slice(pkt.src());
            lsf.set_src(&code);
            lsf.set_frame_type(FrameType::from_wire(pkt.frame_type()).wire(self.version));
            let mut meta = [0u8; 14];
            meta.copy_from_slice(pkt.meta());
            lsf.set_meta(&meta);
            lsf.seal_crc(&self.crc);
            return TxPlan {
                frames: self.packet_tx.transmit(&lsf, pkt.payload()),
                done: true,
                tail: PACKET_TX_TAIL,
            };
        }

        let mut lsd = [0u8; 28];
        lsd.copy_from_slice(pkt.lsd());
        let mut payload = [0u8; 16];
        payload.copy_from_slice(pkt.payload());

        if self.stream_tx.is_active() {
            self.last_lsd = lsd;
            let last = pkt.is_last();
            return TxPlan {
                frames: self.stream_tx.push(&lsd, &payload, last),
                done: last,
                tail: STREAM_TX_TAIL,
            };
        }
        // a lone closing frame is not worth keying up for
        if pkt.is_last() {
            return TxPlan::empty();
        }
        let mut bytes = [0u8; LSF_SIZE];
        bytes[..28].copy_from_slice(&lsd);
        let mut lsf = Lsf::from_bytes(bytes);
        lsf.set_frame_type(FrameType::from_wire(lsf.frame_type()).wire(self.version));
        lsf.seal_crc(&self.crc);
        self.last_lsd = lsd;
        TxPlan {
            frames: self.stream_tx.start(lsf, &payload),
            done: false,
            tail: STREAM_TX_TAIL,
        }
    }

    /// Close a starved stream TX with one silent end-of-transmission.
    pub fn force_eot(&mut self) -> TxPlan {
        if !self.stream_tx.is_active() {
            return TxPlan::empty();
        }
        warn!("stream TX starved, closing the over");
        let ft = FrameType::from_wire(u16::from_be_bytes([self.last_lsd[12], self.last_lsd[13]]));
        let quiet = silent_payload(ft.payload());
        let lsd = self.last_lsd;
        TxPlan {
            frames: self.stream_tx.push(&lsd, &quiet, true),
            done: true,
            tail: STREAM_TX_TAIL,
        }
    }
}

/// Byte-wise scanner for the RX_DATA header in the serial stream.
struct HeaderScan {
    header: [u8; 3],
    matched: usize,
}

impl HeaderScan {
    fn new() -> Self {
        Self {
            header: rx_data_header(),
            matched: 0,
        }
    }

    /// True when `b` completes the header.
    fn feed(&mut self, b: u8) -> bool {
        if b == self.header[self.matched] {
            self.matched += 1;
        } else {
            self.matched = usize::from(b == self.header[0]);
        }
        if self.matched == self.header.len() {
            self.matched = 0;
            return true;
        }
        false
    }
}

/// Modem thread entry point. Reopens the serial link on failure and
/// runs until the gateway side hangs up.
pub fn run_modem(
    cfg: &Modem,
    version: TypeVersion,
    state: GateState,
    to_gate: &Sender<Packet>,
    from_gate: &Receiver<Packet>,
    keep_running: &AtomicBool,
) {
    let mut backoff = REOPEN_FIRST;
    while keep_running.load(Ordering::SeqCst) {
        match serve(cfg, version, &state, to_gate, from_gate, keep_running) {
            Ok(()) => break,
            Err(e) => {
                error!("modem link failed: {e}");
                thread::sleep(backoff);
                backoff = REOPEN_RETRY;
            }
        }
    }
    info!("modem task shutting down");
}

fn serve(
    cfg: &Modem,
    version: TypeVersion,
    state: &GateState,
    to_gate: &Sender<Packet>,
    from_gate: &Receiver<Packet>,
    keep_running: &AtomicBool,
) -> Result<(), RadioIoError> {
    let port = TtyPort::open(&cfg.uart_device, cfg.uart_baud_rate)?;
    let mut radio = Cc1200Control::new(port);
    radio.ping()?;
    radio.set_rx_freq(cfg.rx_frequency)?;
    radio.set_tx_freq(cfg.tx_frequency)?;
    radio.set_freq_corr(cfg.freq_correction)?;
    radio.set_tx_power(cfg.tx_power)?;
    radio.set_afc(cfg.afc)?;
    radio.start_rx()?;
    info!(
        "radio up on {}, RX {} Hz TX {} Hz at {} dBm",
        cfg.uart_device, cfg.rx_frequency, cfg.tx_frequency, cfg.tx_power
    );

    let mut bridge = ModemBridge::new(state.clone(), version);
    let mut scan = HeaderScan::new();
    let mut samples = [0i8; BASEBAND_SAMPLES];
    let mut keyed = false;
    let mut unkey_at: Option<Instant> = None;
    let mut last_tx_frame = Instant::now();

    while keep_running.load(Ordering::SeqCst) {
        // drain frames queued by the gateway
        loop {
            match from_gate.try_recv() {
                Ok(pkt) => {
                    let plan = bridge.on_gate_frame(&pkt);
                    if !plan.frames.is_empty() {
                        if !keyed {
                            radio.stop_rx()?;
                            thread::sleep(TX_SETTLE_AFTER_RX_STOP);
                            radio.start_tx()?;
                            thread::sleep(TX_SETTLE_AFTER_KEY);
                            keyed = true;
                        }
                        for frame in &plan.frames {
                            radio.send_baseband(frame)?;
                        }
                        last_tx_frame = Instant::now();
                    }
                    if plan.done {
                        unkey_at = Some(Instant::now() + plan.tail);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if keyed {
                        radio.stop_tx()?;
                    }
                    return Ok(());
                }
            }
        }

        if bridge.tx_active() && last_tx_frame.elapsed() >= TX_WATCHDOG {
            let plan = bridge.force_eot();
            for frame in &plan.frames {
                radio.send_baseband(frame)?;
            }
            unkey_at = Some(Instant::now() + plan.tail);
        }

        if keyed {
            if let Some(t) = unkey_at {
                if Instant::now() >= t {
                    radio.stop_tx()?;
                    radio.start_rx()?;
                    keyed = false;
                    unkey_at = None;
                    state.set_idle_if_gate_in();
                }
            }
            thread::sleep(Duration::from_millis(1));
            continue;
        }

        if radio.port_mut().poll_readable(RX_POLL_MS)? {
            let b = radio.read_byte()?;
            if scan.feed(b) {
                radio.read_baseband(&mut samples)?;
                for pkt in bridge.on_samples(&samples) {
                    if to_gate.send(pkt).is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    // shutdown requested; never leave the PA keyed
    if keyed {
        radio.stop_tx()?;
    }
    Ok(())
}
