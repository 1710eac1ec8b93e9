//! Reflector link state machine. All transitions take an explicit
//! `Instant` and return the datagrams to send as values; the daemon owns
//! the socket and the clock.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use heapless::Vec;
use log::{info, warn};
use m17spot_core::control::{self, ControlKind};
use m17spot_core::Callsign;

/// CONN is repeated at this interval while a link is pending.
pub const CONN_RETRY: Duration = Duration::from_secs(4);
/// A pending link is abandoned after this long without an ACKN.
pub const LINKING_TIMEOUT: Duration = Duration::from_secs(30);
/// A linked reflector must PING within this window.
pub const PING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unlinked,
    Linking,
    Linked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    SendConn { data: [u8; 11], to: SocketAddr },
    SendPong { data: [u8; 10], to: SocketAddr },
}

#[derive(Debug, Clone)]
pub struct LinkMachine {
    state: LinkState,
    my_cs: Callsign,
    maintain: bool,
    peer_cs: Callsign,
    peer_addr: Option<SocketAddr>,
    linking_started: Instant,
    conn_sent: Instant,
    last_heard: Instant,
}

impl LinkMachine {
    #[must_use]
    pub fn new(my_cs: Callsign, maintain: bool, now: Instant) -> Self {
        Self {
            state: LinkState::Unlinked,
            my_cs,
            maintain,
            peer_cs: Callsign::default(),
            peer_addr: None,
            linking_started: now,
            conn_sent: now,
            last_heard: now,
        }
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub fn peer(&self) -> &Callsign {
        &self.peer_cs
    }

    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// True when linked to exactly this destination (module included).
    #[must_use]
    pub fn is_linked_to(&self, dst: &Callsign) -> bool {
        self.state == LinkState::Linked && self.peer_cs == *dst
    }

    /// Begin linking to a reflector module. The callsign's ninth
    /// character selects the module joined.
    #[must_use]
    pub fn connect(
        &mut self,
        peer: Callsign,
        addr: SocketAddr,
        now: Instant,
    ) -> Vec<LinkAction, 2> {
        let mut out = Vec::new();
        info!("linking to {} at {addr}", peer.text());
        self.peer_cs = peer;
        self.peer_addr = Some(addr);
        self.state = LinkState::Linking;
        self.linking_started = now;
        self.conn_sent = now;
        let _ = out.push(LinkAction::SendConn {
            data: control::conn(&self.my_cs, self.peer_cs.module()),
            to: addr,
        });
        out
    }

    /// Feed a classified control packet received from `from`.
    #[must_use]
    pub fn on_control(
        &mut self,
        kind: ControlKind,
        from: SocketAddr,
        now: Instant,
    ) -> Vec<LinkAction, 2> {
        let mut out = Vec::new();
        if self.peer_addr != Some(from) {
            warn!("control packet from unexpected address {from}");
            return out;
        }
        match (self.state, kind) {
            (LinkState::Linking, ControlKind::Ackn) => {
                info!("linked to {}", self.peer_cs.text());
                self.state = LinkState::Linked;
                self.last_heard = now;
            }
            (LinkState::Linking, ControlKind::Nack) => {
                warn!("{} refused the link", self.peer_cs.text());
                self.clear();
            }
            (LinkState::Linking | LinkState::Linked, ControlKind::Disc) => {
                info!("unlinked from {}", self.peer_cs.text());
                self.clear();
            }
            (LinkState::Linked, ControlKind::Ping) => {
                self.last_heard = now;
                let _ = out.push(LinkAction::SendPong {
                    data: control::pong(&self.my_cs),
                    to: from,
                });
            }
            _ => {}
        }
        out
    }

    /// Drive the timers. Call regularly from the socket loop.
    #[must_use]
    pub fn tick(&mut self, now: Instant) -> Vec<LinkAction, 2> {
        let mut out = Vec::new();
        match self.state {
            LinkState::Unlinked => {}
            LinkState::Linking => {
                if now.duration_since(self.linking_started) >= LINKING_TIMEOUT {
                    warn!("no response from {}, giving up", self.peer_cs.text());
                    self.clear();
                } else if now.duration_since(self.conn_sent) >= CONN_RETRY {
                    if let Some(addr) = self.peer_addr {
                        self.conn_sent = now;
                        let _ = out.push(LinkAction::SendConn {
                            data: control::conn(&self.my_cs, self.peer_cs.module()),
                            to: addr,
                        });
                    }
                }
            }
            LinkState::Linked => {
                if now.duration_since(self.last_heard) >= PING_TIMEOUT {
                    if self.maintain {
                        // keep the address and go around again
                        warn!("{} went quiet, relinking", self.peer_cs.text());
                        if let Some(addr) = self.peer_addr {
                            self.state = LinkState::Linking;
                            self.linking_started = now;
                            self.conn_sent = now;
                            let _ = out.push(LinkAction::SendConn {
                                data: control::conn(&self.my_cs, self.peer_cs.module()),
                                to: addr,
                            });
                        }
                    } else {
                        warn!("{} went quiet, unlinking", self.peer_cs.text());
                        self.clear();
                    }
                }
            }
        }
        out
    }

    fn clear(&mut self) {
        self.state = LinkState::Unlinked;
        self.peer_cs = Callsign::default();
        self.peer_addr = None;
    }
}
