//! UART command protocol for the CC1200 hat. Every exchange is a framed
//! command `[cmd][len_lo][len_hi][payload...]` where the length counts the
//! header too, answered by a 4-byte status (7 bytes for PING). Baseband
//! samples ride the same link as 963-byte TX_DATA / RX_DATA frames.

use log::{debug, warn};
use thiserror::Error;

#[cfg(unix)]
mod tty;
#[cfg(unix)]
pub use tty::TtyPort;

/// Samples per baseband frame in either direction.
pub const BASEBAND_SAMPLES: usize = 960;
/// A baseband frame wrapped in its command header.
pub const BASEBAND_CHUNK: usize = BASEBAND_SAMPLES + 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Ping = 0,
    SetRxFreq = 1,
    SetTxFreq = 2,
    SetTxPower = 3,
    SetReserved = 4,
    SetFreqCorr = 5,
    SetAfc = 6,
    TxStart = 7,
    RxStart = 8,
    RxData = 9,
    TxData = 10,
    DbgEnable = 11,
    DbgTxt = 12,
    GetIdent = 0x80,
    GetCaps = 0x81,
    GetRxFreq = 0x82,
    GetTxFreq = 0x83,
    GetTxPower = 0x84,
    GetFreqCorr = 0x85,
    GetBsbBuff = 0x86,
    GetRssi = 0x87,
}

/// Status codes in the last byte of a 4-byte response.
pub mod status {
    pub const OK: u8 = 0;
    pub const TRX_PLL: u8 = 1;
    pub const TRX_SPI: u8 = 2;
    pub const RANGE: u8 = 3;
    pub const CMD_MALFORM: u8 = 4;
    pub const BUSY: u8 = 5;
    pub const BUFF_FULL: u8 = 6;
    pub const NOP: u8 = 7;
}

#[derive(Debug, Error)]
pub enum RadioIoError {
    #[error("could not open {0}: {1}")]
    Open(String, std::io::Error),
    #[error("unsupported baud rate {0}")]
    BadBaud(u32),
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("device returned error {code:#04x} to {cmd:?}")]
    Device { cmd: Command, code: u8 },
    #[error("malformed response to {0:?}")]
    BadResponse(Command),
}

/// Byte transport under the command codec: a serial device in production,
/// a scripted mock in tests.
pub trait RadioPort {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), RadioIoError>;
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), RadioIoError>;
    /// Discard any unread input, used before a command/response exchange.
    fn flush_input(&mut self) -> Result<(), RadioIoError>;
}

/// Typed command interface to the radio board.
pub struct Cc1200Control<P: RadioPort> {
    port: P,
}

impl<P: RadioPort> Cc1200Control<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// PING expects a 7-byte reply carrying a 32-bit error code.
    pub fn ping(&mut self) -> Result<(), RadioIoError> {
        self.port.flush_input()?;
        self.port.write_all(&frame(Command::Ping, &[]))?;
        let mut resp = [0u8; 7];
        self.port.read_exact(&mut resp)?;
        if resp == [Command::Ping as u8, 7, 0, 0, 0, 0, 0] {
            debug!("radio answered PING");
            Ok(())
        } else {
            let code = u32::from_le_bytes([resp[3], resp[4], resp[5], resp[6]]);
            warn!("PING error code {code:#x}");
            Err(RadioIoError::Device {
                cmd: Command::Ping,
                code: resp[3],
            })
        }
    }

    pub fn set_rx_freq(&mut self, hz: u32) -> Result<(), RadioIoError> {
        self.command(Command::SetRxFreq, &hz.to_le_bytes())
    }

    pub fn set_tx_freq(&mut self, hz: u32) -> Result<(), RadioIoError> {
        self.command(Command::SetTxFreq, &hz.to_le_bytes())
    }

    pub fn set_freq_corr(&mut self, corr: i16) -> Result<(), RadioIoError> {
        self.command(Command::SetFreqCorr, &corr.to_le_bytes())
    }

    /// Power in dBm, quantized to quarter-dB steps by the board.
    pub fn set_tx_power(&mut self, dbm: f32) -> Result<(), RadioIoError> {
        self.command(Command::SetTxPower, &[(dbm * 4.0).round() as u8])
    }

    pub fn set_afc(&mut self, enable: bool) -> Result<(), RadioIoError> {
        // the board takes 0 for on, 1 for off
        self.command(Command::SetAfc, &[u8::from(!enable)])
    }

    pub fn start_rx(&mut self) -> Result<(), RadioIoError> {
        self.command(Command::RxStart, &[1])
    }

    pub fn stop_rx(&mut self) -> Result<(), RadioIoError> {
        self.command(Command::RxStart, &[0])
    }

    pub fn start_tx(&mut self) -> Result<(), RadioIoError> {
        self.command(Command::TxStart, &[1])
    }

    pub fn stop_tx(&mut self) -> Result<(), RadioIoError> {
        self.command(Command::TxStart, &[0])
    }

    /// Ship one filtered baseband frame. No response is read; the board
    /// streams these back-to-back while transmitting.
    pub fn send_baseband(&mut self, samples: &[i8; BASEBAND_SAMPLES]) -> Result<(), RadioIoError> {
        let mut chunk = [0u8; BASEBAND_CHUNK];
        chunk[0] = Command::TxData as u8;
        chunk[1..3].copy_from_slice(&(BASEBAND_CHUNK as u16).to_le_bytes());
        for (out, &s) in chunk[3..].iter_mut().zip(samples.iter()) {
            *out = s as u8;
        }
        self.port.write_all(&chunk)
    }

    pub fn read_byte(&mut self) -> Result<u8, RadioIoError> {
        let mut b = [0u8; 1];
        self.port.read_exact(&mut b)?;
        Ok(b[0])
    }

    /// Read the sample body of an RX_DATA frame whose header has already
    /// been recognized.
    pub fn read_baseband(
        &mut self,
        samples: &mut [i8; BASEBAND_SAMPLES],
    ) -> Result<(), RadioIoError> {
        let mut raw = [0u8; BASEBAND_SAMPLES];
        self.port.read_exact(&mut raw)?;
        for (out, &b) in samples.iter_mut().zip(raw.iter()) {
            *out = b as i8;
        }
        Ok(())
    }

    fn command(&mut self, cmd: Command, payload: &[u8]) -> Result<(), RadioIoError> {
        self.port.flush_input()?;
        self.port.write_all(&frame(cmd, payload))?;
        let mut resp = [0u8; 4];
        self.port.read_exact(&mut resp)?;
        if resp[0] != cmd as u8 || resp[1] != 4 || resp[2] != 0 {
            return Err(RadioIoError::BadResponse(cmd));
        }
        match resp[3] {
            status::OK | status::NOP => Ok(()),
            code => Err(RadioIoError::Device { cmd, code }),
        }
    }
}

/// The RX_DATA header announcing a 960-sample baseband frame.
#[must_use]
pub fn rx_data_header() -> [u8; 3] {
    [
        Command::RxData as u8,
        (BASEBAND_CHUNK & 0xff) as u8,
        (BASEBAND_CHUNK >> 8) as u8,
    ]
}

fn frame(cmd: Command, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 3) as u16;
    let mut out = Vec::with_capacity(payload.len() + 3);
    out.push(cmd as u8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Scripted transport for tests: records writes, replays canned reads.
#[derive(Debug, Default)]
pub struct MockRadioPort {
    pub written: Vec<Vec<u8>>,
    reads: std::collections::VecDeque<u8>,
    pub flushes: usize,
}

impl MockRadioPort {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_read(&mut self, bytes: &[u8]) {
        self.reads.extend(bytes.iter().copied());
    }

    /// Queue the all-good 4-byte status for a command.
    pub fn queue_ok(&mut self, cmd: Command) {
        self.queue_read(&[cmd as u8, 4, 0, status::OK]);
    }
}

impl RadioPort for MockRadioPort {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), RadioIoError> {
        self.written.push(buf.to_vec());
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), RadioIoError> {
        for b in buf.iter_mut() {
            *b = self
                .reads
                .pop_front()
                .ok_or_else(|| RadioIoError::Io(std::io::ErrorKind::UnexpectedEof.into()))?;
        }
        Ok(())
    }

    fn flush_input(&mut self) -> Result<(), RadioIoError> {
        self.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trip() {
        let mut port = MockRadioPort::new();
        port.queue_read(&[0, 7, 0, 0, 0, 0, 0]);
        let mut radio = Cc1200Control::new(port);
        radio.ping().unwrap();
        assert_eq!(radio.port_mut().written[0], vec![0, 3, 0]);
    }

    #[test]
    fn ping_reports_device_error() {
        let mut port = MockRadioPort::new();
        port.queue_read(&[0, 7, 0, status::TRX_PLL, 0, 0, 0]);
        let mut radio = Cc1200Control::new(port);
        assert!(matches!(
            radio.ping(),
            Err(RadioIoError::Device {
                cmd: Command::Ping,
                code: status::TRX_PLL
            })
        ));
    }

    #[test]
    fn set_rx_freq_frames_little_endian() {
        let mut port = MockRadioPort::new();
        port.queue_ok(Command::SetRxFreq);
        let mut radio = Cc1200Control::new(port);
        radio.set_rx_freq(435_000_000).unwrap();
        let written = &radio.port_mut().written[0];
        assert_eq!(written[0], Command::SetRxFreq as u8);
        assert_eq!(written[1], 7);
        assert_eq!(written[2], 0);
        assert_eq!(&written[3..], &435_000_000u32.to_le_bytes());
    }

    #[test]
    fn freq_corr_is_signed_little_endian() {
        let mut port = MockRadioPort::new();
        port.queue_ok(Command::SetFreqCorr);
        let mut radio = Cc1200Control::new(port);
        radio.set_freq_corr(-12).unwrap();
        let written = &radio.port_mut().written[0];
        assert_eq!(written.len(), 5);
        assert_eq!(&written[3..], &(-12i16).to_le_bytes());
    }

    #[test]
    fn tx_power_quarter_db() {
        let mut port = MockRadioPort::new();
        port.queue_ok(Command::SetTxPower);
        let mut radio = Cc1200Control::new(port);
        radio.set_tx_power(10.0).unwrap();
        assert_eq!(radio.port_mut().written[0][3], 40);
    }

    #[test]
    fn nop_status_is_accepted() {
        let mut port = MockRadioPort::new();
        port.queue_read(&[Command::TxStart as u8, 4, 0, status::NOP]);
        let mut radio = Cc1200Control::new(port);
        radio.stop_tx().unwrap();
        assert_eq!(radio.port_mut().written[0], vec![Command::TxStart as u8, 4, 0, 0]);
    }

    #[test]
    fn busy_status_is_an_error() {
        let mut port = MockRadioPort::new();
        port.queue_read(&[Command::RxStart as u8, 4, 0, status::BUSY]);
        let mut radio = Cc1200Control::new(port);
        assert!(radio.start_rx().is_err());
    }

    #[test]
    fn baseband_chunk_shape() {
        let mut radio = Cc1200Control::new(MockRadioPort::new());
        let samples = [-3i8; BASEBAND_SAMPLES];
        radio.send_baseband(&samples).unwrap();
        let written = &radio.port_mut().written[0];
        assert_eq!(written.len(), BASEBAND_CHUNK);
        assert_eq!(written[0], Command::TxData as u8);
        assert_eq!(written[1], 0xc3);
        assert_eq!(written[2], 0x03);
        assert_eq!(written[3], (-3i8) as u8);
        assert_eq!(rx_data_header(), [Command::RxData as u8, 0xc3, 0x03]);
    }
}
