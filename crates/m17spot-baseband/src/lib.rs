//! 4-FSK baseband engine for the CC1200 board: root-raised-cosine
//! filtering, sync-word correlation and the RX/TX frame state machines.
//! Samples are signed bytes at five samples per 4800 baud symbol.

use std::time::Duration;

pub mod codec;
pub mod filter;
pub mod rx;
pub mod sync;
pub mod tx;

pub use codec::{FrameCodec, PacketDecode, StreamDecode};
pub use filter::{rrc_taps, MatchedFilter, PolyphaseFilter};
pub use rx::{RxEngine, RxEvent};
pub use tx::{PacketTx, StreamTx};

pub const SAMPLES_PER_SYMBOL: usize = 5;
pub const SYMBOLS_PER_FRAME: usize = 192;
pub const SYMBOLS_PER_PAYLOAD: usize = 184;
pub const SAMPLES_PER_FRAME: usize = SYMBOLS_PER_FRAME * SAMPLES_PER_SYMBOL;

/// CC1200 CFM sample-to-symbol calibration. 0xAD is the DEVIATION_M
/// register, 2^21 the deviation divisor, 40 MHz the TCXO; the CFM RX
/// register reads 130 counts at full deviation and the TX register
/// takes 64 counts.
pub const RX_SYMBOL_SCALING_COEFF: f32 =
    1.0 / (0.8 / (40.0e3 / 2_097_152.0 * 0xAD as f32) * 130.0);
pub const TX_SYMBOL_SCALING_COEFF: f32 = 0.8 / ((40.0e3 / 2_097_152.0) * 0xAD as f32) * 64.0;

/// Decoder error metric to percent: 100% / 0xffff / payload symbols / 2.
pub const ERROR_SCALE: f32 = 4.146_473_3e-6;

/// Hardware settling contract around keying the transmitter.
pub const TX_SETTLE_AFTER_RX_STOP: Duration = Duration::from_millis(2);
pub const TX_SETTLE_AFTER_KEY: Duration = Duration::from_millis(10);
/// Let the board drain its sample buffer before unkeying.
pub const STREAM_TX_TAIL: Duration = Duration::from_millis(320);
pub const PACKET_TX_TAIL: Duration = Duration::from_millis(120);
/// An active stream TX with no fresh frame for this long is abandoned.
pub const TX_WATCHDOG: Duration = Duration::from_millis(240);

/// Raw samples without sync activity before a synced receiver gives up.
pub const RX_SYNC_TIMEOUT_SAMPLES: usize = SAMPLES_PER_FRAME * 2;
