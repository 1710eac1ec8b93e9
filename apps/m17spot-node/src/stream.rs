//! Per-direction stream bookkeeping: one tracker for internet-to-RF,
//! one for RF-to-internet. A tracker is keyed by the non-zero stream ID
//! and remembers the previous ID so a closed stream's tail packets
//! cannot reopen it for a moment.

use std::time::{Duration, Instant};

use log::info;
use m17spot_core::Callsign;

/// Internet-side streams stay open longer; reflector traffic can gap.
pub const GATE_STREAM_TIMEOUT: Duration = Duration::from_millis(1600);
pub const MODEM_STREAM_TIMEOUT: Duration = Duration::from_millis(1000);
/// A just-closed stream ID cannot reopen within this window. Known
/// trade-off: a genuine new stream reusing the previous SID loses up
/// to a second of audio.
pub const SID_REUSE_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct StreamTracker {
    name: &'static str,
    timeout: Duration,
    sid: u16,
    previous_sid: u16,
    count: u32,
    open: bool,
    last_packet: Instant,
    closed_at: Instant,
}

impl StreamTracker {
    #[must_use]
    pub fn new(name: &'static str, timeout: Duration, now: Instant) -> Self {
        Self {
            name,
            timeout,
            sid: 0,
            previous_sid: 0,
            count: 0,
            open: false,
            last_packet: now,
            // Instant cannot go before the platform epoch; saturate on
            // a tracker built right after boot.
            closed_at: now.checked_sub(SID_REUSE_DEBOUNCE).unwrap_or(now),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn sid(&self) -> u16 {
        self.sid
    }

    /// True when this SID just closed and must not reopen yet.
    #[must_use]
    pub fn recently_closed(&self, sid: u16, now: Instant) -> bool {
        sid == self.previous_sid && now.duration_since(self.closed_at) < SID_REUSE_DEBOUNCE
    }

    pub fn open(&mut self, sid: u16, dst: &Callsign, src: &Callsign, now: Instant) -> bool {
        if self.open {
            return false;
        }
        info!(
            "{} stream 0x{sid:04x} opened, {} -> {}",
            self.name,
            src.text(),
            dst.text()
        );
        self.open = true;
        self.sid = sid;
        self.count = 1;
        self.last_packet = now;
        true
    }

    /// Frames belonging to this stream carry its SID.
    #[must_use]
    pub fn accepts(&self, sid: u16) -> bool {
        self.open && sid == self.sid
    }

    pub fn count_and_touch(&mut self, now: Instant) {
        self.count += 1;
        self.last_packet = now;
    }

    pub fn close(&mut self, now: Instant) {
        if !self.open {
            return;
        }
        info!(
            "{} stream 0x{:04x} closed after {} frames",
            self.name, self.sid, self.count
        );
        self.previous_sid = self.sid;
        self.sid = 0;
        self.open = false;
        self.closed_at = now;
    }

    #[must_use]
    pub fn timed_out(&self, now: Instant) -> bool {
        self.open && now.duration_since(self.last_packet) >= self.timeout
    }
}
