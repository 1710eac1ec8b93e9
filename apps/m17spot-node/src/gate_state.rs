//! The one TX/RX arbitration state shared by the gateway and modem
//! threads. A single mutex-protected enum decides who may use the
//! channel; `try_state` succeeds only from idle or the same state, so
//! contention is flow control rather than an error.

use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    GateStreamIn,
    GatePacketIn,
    MessageIn,
    ModemIn,
    Bootup,
    RfTimeout,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Idle => "idle",
            State::GateStreamIn => "gatestreamin",
            State::GatePacketIn => "gatepacketin",
            State::MessageIn => "messagein",
            State::ModemIn => "modemin",
            State::Bootup => "bootup",
            State::RfTimeout => "rftimeout",
        })
    }
}

#[derive(Debug, Clone)]
pub struct GateState(Arc<Mutex<State>>);

impl GateState {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(State::Bootup)))
    }

    #[must_use]
    pub fn get(&self) -> State {
        *self.lock()
    }

    /// Claim the channel. Succeeds from idle or when already in the
    /// requested state.
    pub fn try_state(&self, new: State) -> bool {
        let mut s = self.lock();
        if *s == new {
            return true;
        }
        if *s == State::Idle {
            *s = new;
            return true;
        }
        false
    }

    pub fn idle(&self) {
        *self.lock() = State::Idle;
    }

    /// Release the channel only if the gateway side holds it.
    pub fn set_idle_if_gate_in(&self) {
        let mut s = self.lock();
        if matches!(
            *s,
            State::MessageIn | State::GateStreamIn | State::GatePacketIn
        ) {
            *s = State::Idle;
        }
    }

    pub fn set_if_from(&self, to: State, from: State) -> bool {
        let mut s = self.lock();
        if *s == from {
            *s = to;
            return true;
        }
        false
    }

    /// Take over a finished or timed-out RF reception for a local
    /// command response.
    pub fn handle_rf_command(&self, to: State) -> bool {
        let mut s = self.lock();
        if matches!(*s, State::ModemIn | State::RfTimeout) {
            *s = to;
            return true;
        }
        false
    }

    /// The receiver may decode RF while idle or already receiving.
    #[must_use]
    pub fn is_rx_ready(&self) -> bool {
        matches!(*self.lock(), State::ModemIn | State::Idle)
    }

    /// Anything but an active RF reception may key the transmitter.
    #[must_use]
    pub fn is_tx_ready(&self) -> bool {
        *self.lock() != State::ModemIn
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // a poisoned state mutex means a panicked thread; keep going
        match self.0.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }
}

impl Default for GateState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_state_from_idle_or_same() {
        let gs = GateState::new();
        assert_eq!(gs.get(), State::Bootup);
        assert!(!gs.try_state(State::ModemIn));
        gs.idle();
        assert!(gs.try_state(State::ModemIn));
        assert!(gs.try_state(State::ModemIn));
        assert!(!gs.try_state(State::GateStreamIn));
    }

    #[test]
    fn gate_in_release_leaves_modem_alone() {
        let gs = GateState::new();
        gs.idle();
        assert!(gs.try_state(State::GateStreamIn));
        gs.set_idle_if_gate_in();
        assert_eq!(gs.get(), State::Idle);

        assert!(gs.try_state(State::ModemIn));
        gs.set_idle_if_gate_in();
        assert_eq!(gs.get(), State::ModemIn);
    }

    #[test]
    fn rf_command_takeover() {
        let gs = GateState::new();
        gs.idle();
        assert!(!gs.handle_rf_command(State::MessageIn));
        assert!(gs.try_state(State::ModemIn));
        assert!(gs.handle_rf_command(State::MessageIn));
        assert_eq!(gs.get(), State::MessageIn);

        gs.idle();
        assert!(gs.set_if_from(State::RfTimeout, State::Idle));
        assert!(gs.handle_rf_command(State::Idle));
    }

    #[test]
    fn readiness() {
        let gs = GateState::new();
        gs.idle();
        assert!(gs.is_rx_ready());
        assert!(gs.is_tx_ready());
        assert!(gs.try_state(State::ModemIn));
        assert!(gs.is_rx_ready());
        assert!(!gs.is_tx_ready());
        gs.idle();
        assert!(gs.try_state(State::MessageIn));
        assert!(!gs.is_rx_ready());
        assert!(gs.is_tx_ready());
    }
}
