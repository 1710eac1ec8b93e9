//! Internet-side routing brain. All decisions are pure: datagrams,
//! modem frames and timer ticks come in with an explicit `Instant`,
//! and the effects to perform come out as [`GateOut`] values. The
//! socket loop in `main` owns the I/O.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use m17spot_core::control::{self, ControlKind};
use m17spot_core::{
    silent_payload, Callsign, Crc16, FrameType, Packet, PacketKind, TypeVersion, EOT_BIT,
};
use m17spot_link::{LinkAction, LinkMachine, LinkState};

use crate::gate_state::{GateState, State};
use crate::hostmap::HostMap;
use crate::stream::{StreamTracker, GATE_STREAM_TIMEOUT, MODEM_STREAM_TIMEOUT};
use crate::voice::{Command, Recorder};

/// A command response waits this long for a stalled stream to end.
const WAIT_FOR_END_TIMEOUT: Duration = Duration::from_millis(500);

/// Word-file stems for recordings, indexed by base-40 alphabet position.
/// The echo recording (module ' ') lands on the first entry.
const RECORD_STEMS: [&str; 40] = [
    "ECHO", "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india",
    "juliette", "kilo", "lima", "mike", "november", "oscar", "papa", "quebec", "romeo", "sierra",
    "tango", "uniform", "victor", "whiskey", "x-ray", "yankee", "zulu", "zero", "one", "two",
    "three", "four", "five", "six", "seven", "eight", "nine", "dash", "slash", "dot",
];

fn record_stem(module: char) -> &'static str {
    let pos = m17spot_core::M17_ALPHABET
        .iter()
        .position(|&c| c == module as u8)
        .unwrap_or(0);
    RECORD_STEMS[pos]
}

/// One effect for the socket loop to carry out.
#[derive(Debug)]
pub enum GateOut {
    Udp { data: Vec<u8>, to: SocketAddr },
    ToModem(Packet),
    /// Queue a voice message of word-file stems.
    Speak(String),
    /// Render a callsign into a word file under the given stem.
    BuildCsFile { cs: Callsign, stem: String },
}

/// What to do once the current RF stream has drained.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AfterWait {
    Nothing,
    Status,
    Unlink,
    Play(char),
    LinkTo(Callsign),
}

enum Mode {
    Normal,
    /// Draining an RF stream before acting on a command.
    WaitForEnd {
        sid: u16,
        since: Instant,
        then: AfterWait,
    },
    /// Capturing an RF stream into a word file.
    Recording(Recorder),
}

pub struct Gateway {
    crc: Crc16,
    my_cs: Callsign,
    version: TypeVersion,
    link: LinkMachine,
    hosts: std::sync::Arc<HostMap>,
    state: GateState,
    audio_folder: PathBuf,
    gate_stream: StreamTracker,
    modem_stream: StreamTracker,
    /// Last frame forwarded toward the modem, kept to synthesize an
    /// EOT when the internet stream dies mid-over.
    gate_last: Option<Packet>,
    mode: Mode,
}

impl Gateway {
    #[must_use]
    pub fn new(
        my_cs: Callsign,
        version: TypeVersion,
        maintain_link: bool,
        hosts: std::sync::Arc<HostMap>,
        state: GateState,
        audio_folder: PathBuf,
        now: Instant,
    ) -> Self {
        Self {
            crc: Crc16::new(),
            my_cs,
            version,
            link: LinkMachine::new(my_cs, maintain_link, now),
            hosts,
            state,
            audio_folder,
            gate_stream: StreamTracker::new("gate", GATE_STREAM_TIMEOUT, now),
            modem_stream: StreamTracker::new("modem", MODEM_STREAM_TIMEOUT, now),
            gate_last: None,
            mode: Mode::Normal,
        }
    }

    #[must_use]
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Boot-time effects: announce ourselves and dial the startup link.
    #[must_use]
    pub fn startup(&mut self, startup_link: &str, now: Instant) -> Vec<GateOut> {
        let mut out = vec![
            GateOut::BuildCsFile {
                cs: self.my_cs,
                stem: "repeater".into(),
            },
            GateOut::Speak("welcome repeater".into()),
        ];
        if !startup_link.is_empty() {
            let dst = Callsign::new(startup_link);
            match self.resolve(&dst) {
                Some(addr) => {
                    out.extend(Self::link_actions(self.link.connect(dst, addr, now)));
                }
                None => warn!("startup link {startup_link:?} did not resolve"),
            }
        }
        out
    }

    /// One datagram off either UDP socket.
    #[must_use]
    pub fn on_datagram(&mut self, buf: &[u8], from: SocketAddr, now: Instant) -> Vec<GateOut> {
        match buf.len() {
            // ACKN, NACK or short DISC
            4 => self.on_control(buf, from, now),
            // PING or DISC with the peer callsign
            10 => {
                if control::classify(buf) == Some(ControlKind::Disc) {
                    // reflectors identify without the module character
                    let ours = self.link.peer().base();
                    if control::peer(buf).map(|p| p.base()) != Some(ours) {
                        warn!("bogus disconnect from {from}");
                        return Vec::new();
                    }
                }
                self.on_control(buf, from, now)
            }
            _ => match Packet::parse(buf, &self.crc) {
                Ok(pkt) => self.send_to_modem(pkt, now),
                Err(e) => {
                    warn!("dropped {}-byte datagram from {from}: {e}", buf.len());
                    debug!("{:02x?}", buf);
                    Vec::new()
                }
            },
        }
    }

    fn on_control(&mut self, buf: &[u8], from: SocketAddr, now: Instant) -> Vec<GateOut> {
        let Some(kind) = control::classify(buf) else {
            warn!("unknown control packet from {from}");
            return Vec::new();
        };
        let before = self.link.state();
        let peer = *self.link.peer();
        let mut out = Self::link_actions(self.link.on_control(kind, from, now));
        match (before, self.link.state(), kind) {
            (LinkState::Linking, LinkState::Linked, ControlKind::Ackn) => {
                out.push(GateOut::BuildCsFile {
                    cs: peer,
                    stem: "destination".into(),
                });
                out.push(GateOut::Speak("repeater is_linked_to destination".into()));
            }
            (LinkState::Linking, LinkState::Unlinked, ControlKind::Nack) => {
                out.push(GateOut::Speak("link_refused".into()));
            }
            (_, LinkState::Unlinked, ControlKind::Disc) if before != LinkState::Unlinked => {
                out.push(GateOut::Speak("repeater is_unlinked".into()));
            }
            _ => {}
        }
        out
    }

    /// A validated internet frame heading for RF. Opens and closes the
    /// gate-side stream tracker.
    fn send_to_modem(&mut self, pkt: Packet, now: Instant) -> Vec<GateOut> {
        if self.state.get() == State::Bootup {
            return Vec::new();
        }
        if pkt.kind() == PacketKind::Packet {
            if self.state.try_state(State::GatePacketIn) {
                return vec![GateOut::ToModem(pkt)];
            }
            warn!(
                "packet data from the gateway dropped, channel busy ({} -> {})",
                pkt.src_callsign().text(),
                pkt.dst_callsign().text()
            );
            return Vec::new();
        }

        let sid = pkt.stream_id();
        if self.gate_stream.is_open() {
            if !self.gate_stream.accepts(sid) {
                return Vec::new();
            }
            self.gate_stream.count_and_touch(now);
            let last = pkt.is_last();
            self.gate_last = Some(pkt.clone());
            if last {
                self.gate_stream.close(now);
                self.gate_last = None;
            }
            return vec![GateOut::ToModem(pkt)];
        }
        // never open on a last frame, and never on the SID of a
        // stream that just closed
        if pkt.is_last() {
            self.state.set_idle_if_gate_in();
            return Vec::new();
        }
        if self.gate_stream.recently_closed(sid, now) {
            return Vec::new();
        }
        if self.state.try_state(State::GateStreamIn) {
            self.gate_stream
                .open(sid, &pkt.dst_callsign(), &pkt.src_callsign(), now);
            self.gate_last = Some(pkt.clone());
            return vec![GateOut::ToModem(pkt)];
        }
        Vec::new()
    }

    /// One decoded frame up from the modem.
    #[must_use]
    pub fn on_modem_packet(&mut self, pkt: Packet, now: Instant) -> Vec<GateOut> {
        match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::Normal => self.route_modem_packet(pkt, now),
            Mode::WaitForEnd { sid, since, then } => {
                if pkt.kind() == PacketKind::Stream && pkt.stream_id() == sid {
                    if pkt.is_last() {
                        return self.finish_wait(then, now);
                    }
                    self.mode = Mode::WaitForEnd {
                        sid,
                        since: now,
                        then,
                    };
                } else {
                    self.mode = Mode::WaitForEnd { sid, since, then };
                }
                Vec::new()
            }
            Mode::Recording(mut rec) => {
                if pkt.kind() == PacketKind::Stream && pkt.stream_id() == rec.sid() {
                    rec.add(pkt.payload(), now);
                    if pkt.is_last() {
                        return self.finish_recording(rec);
                    }
                }
                self.mode = Mode::Recording(rec);
                Vec::new()
            }
        }
    }

    fn route_modem_packet(&mut self, pkt: Packet, now: Instant) -> Vec<GateOut> {
        let dst = pkt.dst_callsign();
        if pkt.kind() == PacketKind::Packet {
            return self.route_by_link(pkt, &dst, now, false);
        }
        match Command::parse(&dst) {
            Some(Command::Echo) => {
                if !pkt.is_last() {
                    let mut rec = Recorder::new(pkt.stream_id(), record_stem(' '), now);
                    rec.add(pkt.payload(), now);
                    self.mode = Mode::Recording(rec);
                } else {
                    self.state.idle();
                }
                Vec::new()
            }
            Some(Command::Record(m)) => {
                if !pkt.is_last() {
                    let mut rec = Recorder::new(pkt.stream_id(), record_stem(m), now);
                    rec.add(pkt.payload(), now);
                    self.mode = Mode::Recording(rec);
                } else {
                    self.state.idle();
                }
                Vec::new()
            }
            Some(Command::Status) => self.wait_then(pkt, AfterWait::Status, now),
            Some(Command::Unlink) => self.wait_then(pkt, AfterWait::Unlink, now),
            Some(Command::Play(m)) => self.wait_then(pkt, AfterWait::Play(m), now),
            None => self.route_by_link(pkt, &dst, now, true),
        }
    }

    /// The C++ routing table: forward when the destination matches the
    /// link (or is no reflector), start linking when unlinked, complain
    /// when busy with somebody else.
    fn route_by_link(
        &mut self,
        pkt: Packet,
        dst: &Callsign,
        now: Instant,
        is_stream: bool,
    ) -> Vec<GateOut> {
        match self.link.state() {
            LinkState::Linked => {
                if self.link.peer() == dst || !dst.is_reflector() {
                    self.forward_to_dest(pkt, now)
                } else {
                    warn!(
                        "destination is {} but already linked to {}",
                        dst.text(),
                        self.link.peer().text()
                    );
                    if is_stream {
                        let mut out = self.wait_then(pkt, AfterWait::Nothing, now);
                        out.push(GateOut::Speak("repeater is_already_linked".into()));
                        out
                    } else {
                        Vec::new()
                    }
                }
            }
            LinkState::Linking => {
                if self.link.peer() == dst {
                    info!("{} is not yet linked", dst.text());
                    self.drain(pkt, now, is_stream)
                } else {
                    warn!(
                        "destination is {} but linking to {}",
                        dst.text(),
                        self.link.peer().text()
                    );
                    let mut out = self.drain(pkt, now, is_stream);
                    if is_stream {
                        out.push(GateOut::Speak("repeater is_already_linking".into()));
                    }
                    out
                }
            }
            LinkState::Unlinked => {
                if dst.is_reflector() {
                    match self.resolve(dst) {
                        Some(addr) => {
                            if is_stream {
                                // key-up ends first, then the link request goes out
                                self.wait_then(pkt, AfterWait::LinkTo(*dst), now)
                            } else {
                                self.state.handle_rf_command(State::Idle);
                                Self::link_actions(self.link.connect(*dst, addr, now))
                            }
                        }
                        None => {
                            warn!("host {} not found", dst.text());
                            self.drain(pkt, now, is_stream)
                        }
                    }
                } else {
                    warn!("not linked, no route for {}", dst.text());
                    self.drain(pkt, now, is_stream)
                }
            }
        }
    }

    /// Forward an RF frame to the linked peer, converting a V3 TYPE to
    /// the legacy wire form the reflector fleet expects. Opens and
    /// closes the modem-side stream tracker.
    fn forward_to_dest(&mut self, mut pkt: Packet, now: Instant) -> Vec<GateOut> {
        let Some(addr) = self.link.peer_addr() else {
            return Vec::new();
        };
        let mut ft = FrameType::from_wire(pkt.frame_type());
        if ft.version() == TypeVersion::V3 {
            pkt.set_frame_type(ft.wire(TypeVersion::Legacy));
        }
        pkt.seal_crc(&self.crc);

        if pkt.kind() == PacketKind::Packet {
            self.state.handle_rf_command(State::Idle);
            return vec![GateOut::Udp {
                data: pkt.as_bytes().to_vec(),
                to: addr,
            }];
        }

        let sid = pkt.stream_id();
        if self.modem_stream.is_open() {
            if !self.modem_stream.accepts(sid) {
                return Vec::new();
            }
            self.modem_stream.count_and_touch(now);
            if pkt.is_last() {
                self.modem_stream.close(now);
                self.state.idle();
            }
            return vec![GateOut::Udp {
                data: pkt.as_bytes().to_vec(),
                to: addr,
            }];
        }
        if pkt.is_last() {
            self.state.idle();
            return Vec::new();
        }
        if self.modem_stream.recently_closed(sid, now) {
            self.state.idle();
            return Vec::new();
        }
        self.modem_stream
            .open(sid, &pkt.dst_callsign(), &pkt.src_callsign(), now);
        vec![GateOut::Udp {
            data: pkt.as_bytes().to_vec(),
            to: addr,
        }]
    }

    fn wait_then(&mut self, pkt: Packet, then: AfterWait, now: Instant) -> Vec<GateOut> {
        if pkt.is_last() {
            return self.finish_wait(then, now);
        }
        self.mode = Mode::WaitForEnd {
            sid: pkt.stream_id(),
            since: now,
            then,
        };
        Vec::new()
    }

    fn drain(&mut self, pkt: Packet, now: Instant, is_stream: bool) -> Vec<GateOut> {
        if is_stream {
            self.wait_then(pkt, AfterWait::Nothing, now)
        } else {
            self.state.handle_rf_command(State::Idle);
            Vec::new()
        }
    }

    fn finish_wait(&mut self, then: AfterWait, now: Instant) -> Vec<GateOut> {
        self.state.handle_rf_command(State::Idle);
        match then {
            AfterWait::Nothing => Vec::new(),
            AfterWait::Status => {
                let msg = match self.link.state() {
                    LinkState::Linked => "repeater is_linked_to destination",
                    LinkState::Linking => "repeater is_linking",
                    LinkState::Unlinked => "repeater is_unlinked",
                };
                vec![GateOut::Speak(msg.into())]
            }
            AfterWait::Unlink => {
                if self.link.state() == LinkState::Unlinked {
                    info!("{} is already unlinked", self.my_cs.text());
                    vec![GateOut::Speak("repeater is_already_unlinked".into())]
                } else {
                    // the link clears when the confirming DISC arrives
                    let addr = self.link.peer_addr();
                    match addr {
                        Some(to) => vec![GateOut::Udp {
                            data: control::disc(&self.my_cs).to_vec(),
                            to,
                        }],
                        None => Vec::new(),
                    }
                }
            }
            AfterWait::Play(m) => vec![GateOut::Speak(record_stem(m).into())],
            AfterWait::LinkTo(dst) => {
                match self.resolve(&dst) {
                    Some(addr) => Self::link_actions(self.link.connect(dst, addr, now)),
                    None => Vec::new(),
                }
            }
        }
    }

    fn finish_recording(&mut self, rec: Recorder) -> Vec<GateOut> {
        self.state.handle_rf_command(State::Idle);
        match rec.finish(&self.audio_folder) {
            Ok(Some(stem)) => vec![GateOut::Speak(stem)],
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("could not save recording: {e}");
                Vec::new()
            }
        }
    }

    /// Timers: link maintenance, stream timeouts and modal timeouts.
    #[must_use]
    pub fn tick(&mut self, now: Instant) -> Vec<GateOut> {
        let before = self.link.state();
        let mut out = Self::link_actions(self.link.tick(now));
        if before == LinkState::Linked && self.link.state() != LinkState::Linked {
            out.push(GateOut::Speak(
                "repeater was_disconnected_from destination".into(),
            ));
        }

        match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::WaitForEnd { sid, since, then } => {
                if now.duration_since(since) > WAIT_FOR_END_TIMEOUT {
                    out.extend(self.finish_wait(then, now));
                } else {
                    self.mode = Mode::WaitForEnd { sid, since, then };
                }
            }
            Mode::Recording(rec) => {
                if rec.timed_out(now) {
                    warn!("voice recorder timeout");
                    out.extend(self.finish_recording(rec));
                } else {
                    self.mode = Mode::Recording(rec);
                }
            }
            Mode::Normal => {}
        }

        if self.gate_stream.timed_out(now) {
            warn!("gate stream timed out");
            if let Some(eot) = self.synthesize_eot() {
                out.push(GateOut::ToModem(eot));
            }
            self.gate_stream.close(now);
            self.gate_last = None;
            self.state.idle();
        }
        if self.modem_stream.timed_out(now) {
            warn!("modem stream timed out");
            self.modem_stream.close(now);
            self.state.idle();
        }
        // an RF over that died with nothing pending releases the channel
        if self.state.get() == State::RfTimeout && matches!(self.mode, Mode::Normal) {
            self.state.handle_rf_command(State::Idle);
        }
        out
    }

    /// A dead internet stream still needs its over closed on RF: repeat
    /// the last frame with a silent payload and the EOT bit.
    fn synthesize_eot(&self) -> Option<Packet> {
        let mut pkt = self.gate_last.clone()?;
        let ft = FrameType::from_wire(pkt.frame_type());
        let quiet = silent_payload(ft.payload());
        pkt.payload_mut().copy_from_slice(&quiet);
        pkt.set_frame_number(pkt.frame_number() | EOT_BIT);
        pkt.seal_crc(&self.crc);
        Some(pkt)
    }

    fn resolve(&self, dst: &Callsign) -> Option<SocketAddr> {
        self.hosts.resolve(dst)
    }

    fn link_actions(actions: impl IntoIterator<Item = LinkAction>) -> Vec<GateOut> {
        actions
            .into_iter()
            .map(|a| match a {
                LinkAction::SendConn { data, to } => GateOut::Udp {
                    data: data.to_vec(),
                    to,
                },
                LinkAction::SendPong { data, to } => GateOut::Udp {
                    data: data.to_vec(),
                    to,
                },
            })
            .collect()
    }
}

/// Voice-message scheduling shared by the socket loop: one playback
/// task at a time, queued messages wait their turn.
#[derive(Debug, Default)]
pub struct VoiceQueue {
    queue: VecDeque<String>,
}

impl VoiceQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: String) {
        self.queue.push_back(message);
    }

    /// The next message, once the channel can be claimed. During bootup
    /// the queue drains without claiming.
    pub fn next(&mut self, state: &GateState) -> Option<String> {
        if self.queue.is_empty() {
            return None;
        }
        if state.get() == State::Bootup || state.try_state(State::MessageIn) {
            return self.queue.pop_front();
        }
        None
    }

    /// Playback finished: release the channel. Bootup holds until the
    /// whole queue has played.
    pub fn done(&mut self, state: &GateState) {
        if state.get() != State::Bootup || self.queue.is_empty() {
            state.idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use m17spot_core::PayloadType;
    use std::io::Write;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    fn reflector_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(44, 0, 0, 1)), 17000)
    }

    fn hosts() -> Arc<HostMap> {
        let path = std::env::temp_dir().join(format!(
            "m17spot-test-gw-hosts-{}",
            std::process::id()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "M17-ABC 44.0.0.1 null ABC null 17000").unwrap();
        let map = HostMap::new(&path, None, true, false);
        map.read_all().unwrap();
        std::fs::remove_file(path).unwrap();
        Arc::new(map)
    }

    fn gateway(now: Instant) -> (Gateway, GateState) {
        let state = GateState::new();
        state.idle();
        let mut cs = Callsign::new("W1AW");
        cs.set_module('B');
        let gw = Gateway::new(
            cs,
            TypeVersion::V3,
            false,
            hosts(),
            state.clone(),
            std::env::temp_dir(),
            now,
        );
        (gw, state)
    }

    fn stream_pkt(dst: &Callsign, sid: u16, fn_: u16) -> Packet {
        let crc = Crc16::new();
        let mut ft = FrameType::new();
        ft.set_payload(PayloadType::Voice3200);
        let mut p = Packet::stream();
        p.set_stream_id(sid);
        let mut code = [0u8; 6];
        dst.code_out(&mut code);
        p.set_dst(&code);
        let mut src = [0u8; 6];
        Callsign::new("N0CALL").code_out(&mut src);
        p.set_src(&src);
        p.set_frame_type(ft.wire(TypeVersion::V3));
        p.set_frame_number(fn_);
        p.seal_crc(&crc);
        p
    }

    fn udp_outs(outs: &[GateOut]) -> Vec<(&Vec<u8>, SocketAddr)> {
        outs.iter()
            .filter_map(|o| match o {
                GateOut::Udp { data, to } => Some((data, *to)),
                _ => None,
            })
            .collect()
    }

    fn link_up(gw: &mut Gateway, state: &GateState, now: Instant) {
        let mut dst = Callsign::new("M17-ABC");
        dst.set_module('C');
        let pkt = stream_pkt(&dst, 0x100, 0);
        assert!(state.try_state(State::ModemIn));
        let outs = gw.on_modem_packet(pkt, now);
        assert!(!udp_outs(&outs).is_empty() || matches!(gw.mode, Mode::WaitForEnd { .. }));
        // drain the wait with the closing frame
        let _ = gw.on_modem_packet(stream_pkt(&dst, 0x100, 1 | EOT_BIT), now);
        let _ = gw.on_datagram(b"ACKN", reflector_addr(), now);
        assert_eq!(gw.link_state(), LinkState::Linked);
    }

    #[test]
    fn rf_stream_to_reflector_links_after_the_over() {
        let t0 = Instant::now();
        let (mut gw, state) = gateway(t0);
        let mut dst = Callsign::new("M17-ABC");
        dst.set_module('C');
        assert!(state.try_state(State::ModemIn));
        let outs = gw.on_modem_packet(stream_pkt(&dst, 0x42, 0), t0);
        // the CONN goes out after the keyed stream ends
        assert!(udp_outs(&outs).is_empty());
        let outs = gw.on_modem_packet(stream_pkt(&dst, 0x42, 1 | EOT_BIT), t0);
        let udp = udp_outs(&outs);
        assert_eq!(udp.len(), 1);
        assert_eq!(&udp[0].0[..4], b"CONN");
        assert_eq!(udp[0].0[10], b'C');
        assert_eq!(udp[0].1, reflector_addr());
        assert_eq!(gw.link_state(), LinkState::Linking);
        assert_eq!(state.get(), State::Idle);
    }

    #[test]
    fn linked_stream_forwards_with_legacy_type() {
        let t0 = Instant::now();
        let (mut gw, state) = gateway(t0);
        link_up(&mut gw, &state, t0);

        let mut dst = Callsign::new("M17-ABC");
        dst.set_module('C');
        assert!(state.try_state(State::ModemIn));
        let outs = gw.on_modem_packet(stream_pkt(&dst, 0x77, 0), t0);
        let udp = udp_outs(&outs);
        assert_eq!(udp.len(), 1);
        // V3 TYPE converted to legacy on the wire
        let ft = u16::from_be_bytes([udp[0].0[18], udp[0].0[19]]);
        assert_eq!(ft & 0xf000, 0);
        let crc = Crc16::new();
        assert!(crc.check(udp[0].0));

        let outs = gw.on_modem_packet(stream_pkt(&dst, 0x77, 1 | EOT_BIT), t0);
        assert_eq!(udp_outs(&outs).len(), 1);
        assert_eq!(state.get(), State::Idle);
    }

    #[test]
    fn busy_link_refuses_other_reflectors() {
        let t0 = Instant::now();
        let (mut gw, state) = gateway(t0);
        link_up(&mut gw, &state, t0);

        let other = Callsign::new("M17-ZZZ");
        assert!(state.try_state(State::ModemIn));
        let outs = gw.on_modem_packet(stream_pkt(&other, 0x9, 0), t0);
        assert!(udp_outs(&outs).is_empty());
        assert!(outs
            .iter()
            .any(|o| matches!(o, GateOut::Speak(m) if m == "repeater is_already_linked")));
    }

    #[test]
    fn ping_earns_one_pong() {
        let t0 = Instant::now();
        let (mut gw, state) = gateway(t0);
        link_up(&mut gw, &state, t0);

        let ping = control::ping(&Callsign::new("M17-ABC"));
        let outs = gw.on_datagram(&ping, reflector_addr(), t0 + Duration::from_secs(3));
        let udp = udp_outs(&outs);
        assert_eq!(udp.len(), 1);
        assert_eq!(&udp[0].0[..4], b"PONG");
    }

    #[test]
    fn gate_stream_opens_forwards_and_debounces() {
        let t0 = Instant::now();
        let (mut gw, state) = gateway(t0);
        let dst = Callsign::new("W1AW  B");
        let p0 = stream_pkt(&dst, 0xaa, 0);

        let outs = gw.on_datagram(p0.as_bytes(), reflector_addr(), t0);
        assert!(matches!(outs[..], [GateOut::ToModem(_)]));
        assert_eq!(state.get(), State::GateStreamIn);

        // a frame with a different SID is not forwarded
        let other = stream_pkt(&dst, 0xbb, 1);
        assert!(gw.on_datagram(other.as_bytes(), reflector_addr(), t0).is_empty());

        let last = stream_pkt(&dst, 0xaa, 5 | EOT_BIT);
        let outs = gw.on_datagram(last.as_bytes(), reflector_addr(), t0);
        assert_eq!(outs.len(), 1);

        // same SID cannot reopen inside the debounce window
        let again = stream_pkt(&dst, 0xaa, 0);
        assert!(gw.on_datagram(again.as_bytes(), reflector_addr(), t0).is_empty());
    }

    #[test]
    fn dead_gate_stream_synthesizes_a_quiet_eot() {
        let t0 = Instant::now();
        let (mut gw, state) = gateway(t0);
        let dst = Callsign::new("W1AW  B");
        let p0 = stream_pkt(&dst, 0xcc, 0);
        let _ = gw.on_datagram(p0.as_bytes(), reflector_addr(), t0);

        let outs = gw.tick(t0 + Duration::from_millis(1700));
        let eot = outs
            .iter()
            .find_map(|o| match o {
                GateOut::ToModem(p) => Some(p),
                _ => None,
            })
            .expect("synthesized EOT");
        assert!(eot.is_last());
        assert_eq!(eot.stream_id(), 0xcc);
        assert_eq!(&eot.payload()[..8], &m17spot_core::SILENT_C2_3200);
        assert!(eot.check_crc(&Crc16::new()));
        assert_eq!(state.get(), State::Idle);
    }

    #[test]
    fn echo_records_then_queues_playback() {
        let t0 = Instant::now();
        let (mut gw, state) = gateway(t0);
        let dst = Callsign::new("ECHO");
        assert!(state.try_state(State::ModemIn));

        let _ = gw.on_modem_packet(stream_pkt(&dst, 0x31, 0), t0);
        for i in 1..30u16 {
            let _ = gw.on_modem_packet(stream_pkt(&dst, 0x31, i), t0);
        }
        let outs = gw.on_modem_packet(stream_pkt(&dst, 0x31, 30 | EOT_BIT), t0);
        assert!(outs
            .iter()
            .any(|o| matches!(o, GateOut::Speak(m) if m == "ECHO")));
        assert_eq!(state.get(), State::Idle);
        let _ = std::fs::remove_file(std::env::temp_dir().join("ECHO.dat"));
    }

    #[test]
    fn status_waits_for_the_stream_end() {
        let t0 = Instant::now();
        let (mut gw, state) = gateway(t0);
        let dst = Callsign::new("STATUS");
        assert!(state.try_state(State::ModemIn));

        assert!(gw.on_modem_packet(stream_pkt(&dst, 0x5, 0), t0).is_empty());
        // a stalled stream resolves on the wait timeout
        let outs = gw.tick(t0 + Duration::from_millis(600));
        assert!(outs
            .iter()
            .any(|o| matches!(o, GateOut::Speak(m) if m == "repeater is_unlinked")));
    }

    #[test]
    fn voice_queue_claims_the_channel() {
        let state = GateState::new();
        let mut q = VoiceQueue::new();
        q.push("welcome repeater".into());
        // bootup plays without claiming
        assert_eq!(q.next(&state).as_deref(), Some("welcome repeater"));
        q.done(&state);
        assert_eq!(state.get(), State::Idle);

        q.push("one".into());
        assert!(state.try_state(State::ModemIn));
        assert!(q.next(&state).is_none());
        state.idle();
        assert_eq!(q.next(&state).as_deref(), Some("one"));
        assert_eq!(state.get(), State::MessageIn);
        q.done(&state);
        assert_eq!(state.get(), State::Idle);
    }
}
