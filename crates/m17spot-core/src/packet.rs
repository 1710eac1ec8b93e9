//! Internet-side M17 frames: the 54-byte stream frame, the variable-length
//! packet frame and the short reflector link-control packets, all sharing
//! one UDP socket and discriminated by magic and length.

use heapless::Vec;
use thiserror::Error;

use crate::callsign::Callsign;
use crate::crc::Crc16;
use crate::frame_type::{FrameType, PayloadType};

pub const STREAM_FRAME_SIZE: usize = 54;
pub const MIN_PACKET_FRAME_SIZE: usize = 38;
pub const MAX_PACKET_FRAME_SIZE: usize = 859;

/// Last-frame flag in the 16-bit frame number.
pub const EOT_BIT: u16 = 0x8000;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad frame length {0}")]
    BadLength(usize),
    #[error("bad magic")]
    BadMagic,
    #[error("CRC mismatch")]
    Crc,
    #[error("payload type disagrees with transport")]
    TypeMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Stream,
    Packet,
}

/// One internet frame, stream or packet, stored in wire form. Field
/// accessors hide the offset differences between the two layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: PacketKind,
    data: Vec<u8, MAX_PACKET_FRAME_SIZE>,
}

impl Packet {
    /// A zeroed stream frame with its magic in place.
    #[must_use]
    pub fn stream() -> Self {
        let mut data = Vec::new();
        let _ = data.resize(STREAM_FRAME_SIZE, 0);
        data[..4].copy_from_slice(b"M17 ");
        Self {
            kind: PacketKind::Stream,
            data,
        }
    }

    /// A zeroed packet frame of `length` bytes with its magic in place.
    pub fn packet(length: usize) -> Result<Self, FrameError> {
        if !(MIN_PACKET_FRAME_SIZE..=MAX_PACKET_FRAME_SIZE).contains(&length) {
            return Err(FrameError::BadLength(length));
        }
        let mut data = Vec::new();
        let _ = data.resize(length, 0);
        data[..4].copy_from_slice(b"M17P");
        Ok(Self {
            kind: PacketKind::Packet,
            data,
        })
    }

    /// Validate a datagram as a stream or packet frame: magic, length
    /// window, CRC, and agreement between transport and payload type.
    pub fn parse(buf: &[u8], crc: &Crc16) -> Result<Self, FrameError> {
        if buf.len() < 4 {
            return Err(FrameError::BadLength(buf.len()));
        }
        match &buf[..4] {
            b"M17 " => {
                if buf.len() != STREAM_FRAME_SIZE {
                    return Err(FrameError::BadLength(buf.len()));
                }
                if !crc.check(buf) {
                    return Err(FrameError::Crc);
                }
                let mut p = Self::stream();
                p.data.copy_from_slice(buf);
                let ft = FrameType::from_wire(p.frame_type());
                if ft.payload() == PayloadType::Packet {
                    return Err(FrameError::TypeMismatch);
                }
                Ok(p)
            }
            b"M17P" => {
                if !(MIN_PACKET_FRAME_SIZE..=MAX_PACKET_FRAME_SIZE).contains(&buf.len()) {
                    return Err(FrameError::BadLength(buf.len()));
                }
                // the LSF image and the payload carry separate CRCs
                if !crc.check(&buf[4..34]) || !crc.check(&buf[34..]) {
                    return Err(FrameError::Crc);
                }
                let mut p = Self::packet(buf.len())?;
                p.data.copy_from_slice(buf);
                let ft = FrameType::from_wire(p.frame_type());
                if ft.payload() != PayloadType::Packet {
                    return Err(FrameError::TypeMismatch);
                }
                Ok(p)
            }
            _ => Err(FrameError::BadMagic),
        }
    }

    #[must_use]
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn is_stream(&self) -> bool {
        self.kind == PacketKind::Stream
    }

    fn get16(&self, pos: usize) -> u16 {
        u16::from_be_bytes([self.data[pos], self.data[pos + 1]])
    }

    fn set16(&mut self, pos: usize, val: u16) {
        self.data[pos..pos + 2].copy_from_slice(&val.to_be_bytes());
    }

    #[must_use]
    pub fn stream_id(&self) -> u16 {
        if self.is_stream() {
            self.get16(4)
        } else {
            0
        }
    }

    pub fn set_stream_id(&mut self, sid: u16) {
        if self.is_stream() {
            self.set16(4, sid);
        }
    }

    #[must_use]
    pub fn dst(&self) -> &[u8] {
        let at = if self.is_stream() { 6 } else { 4 };
        &self.data[at..at + 6]
    }

    pub fn set_dst(&mut self, code: &[u8; 6]) {
        let at = if self.is_stream() { 6 } else { 4 };
        self.data[at..at + 6].copy_from_slice(code);
    }

    #[must_use]
    pub fn src(&self) -> &[u8] {
        let at = if self.is_stream() { 12 } else { 10 };
        &self.data[at..at + 6]
    }

    pub fn set_src(&mut self, code: &[u8; 6]) {
        let at = if self.is_stream() { 12 } else { 10 };
        self.data[at..at + 6].copy_from_slice(code);
    }

    #[must_use]
    pub fn dst_callsign(&self) -> Callsign {
        let mut code = [0u8; 6];
        code.copy_from_slice(self.dst());
        Callsign::from_bytes(&code)
    }

    #[must_use]
    pub fn src_callsign(&self) -> Callsign {
        let mut code = [0u8; 6];
        code.copy_from_slice(self.src());
        Callsign::from_bytes(&code)
    }

    #[must_use]
    pub fn frame_type(&self) -> u16 {
        self.get16(if self.is_stream() { 18 } else { 16 })
    }

    pub fn set_frame_type(&mut self, ft: u16) {
        let at = if self.is_stream() { 18 } else { 16 };
        self.set16(at, ft);
    }

    #[must_use]
    pub fn meta(&self) -> &[u8] {
        let at = if self.is_stream() { 20 } else { 18 };
        &self.data[at..at + 14]
    }

    pub fn set_meta(&mut self, meta: &[u8; 14]) {
        let at = if self.is_stream() { 20 } else { 18 };
        self.data[at..at + 14].copy_from_slice(meta);
    }

    /// Stream frames only; packet frames report zero.
    #[must_use]
    pub fn frame_number(&self) -> u16 {
        if self.is_stream() {
            self.get16(34)
        } else {
            0
        }
    }

    pub fn set_frame_number(&mut self, fn_: u16) {
        if self.is_stream() {
            self.set16(34, fn_);
        }
    }

    /// Packet frames are always their own last frame.
    #[must_use]
    pub fn is_last(&self) -> bool {
        !self.is_stream() || self.frame_number() & EOT_BIT != 0
    }

    /// The 28-byte link setup data of a stream frame (dst/src/type/meta).
    #[must_use]
    pub fn lsd(&self) -> &[u8] {
        debug_assert!(self.is_stream());
        &self.data[6..34]
    }

    pub fn set_lsd(&mut self, lsd: &[u8]) {
        debug_assert!(self.is_stream());
        self.data[6..34].copy_from_slice(lsd);
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        if self.is_stream() {
            &self.data[36..52]
        } else {
            &self.data[34..]
        }
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        if self.is_stream() {
            &mut self.data[36..52]
        } else {
            &mut self.data[34..]
        }
    }

    pub fn seal_crc(&mut self, crc: &Crc16) {
        if self.is_stream() {
            crc.seal(&mut self.data);
        } else {
            crc.seal(&mut self.data[4..34]);
            crc.seal(&mut self.data[34..]);
        }
    }

    #[must_use]
    pub fn check_crc(&self, crc: &Crc16) -> bool {
        if self.is_stream() {
            crc.check(&self.data)
        } else {
            crc.check(&self.data[4..34]) && crc.check(&self.data[34..])
        }
    }
}

/// Control byte trailing each 25-byte RF packet chunk: bit 7 marks the
/// final chunk, bits 6..2 carry the chunk number or, on the final chunk,
/// the count of meaningful bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkControl {
    pub last: bool,
    pub value: u8,
}

impl ChunkControl {
    #[must_use]
    pub fn encode(self) -> u8 {
        let mut b = (self.value & 0x1f) << 2;
        if self.last {
            b |= 0x80;
        }
        b
    }

    #[must_use]
    pub fn decode(b: u8) -> Self {
        Self {
            last: b & 0x80 != 0,
            value: (b >> 2) & 0x1f,
        }
    }
}

/// Reflector link-control packets, discriminated by length on the socket.
pub mod control {
    use super::Callsign;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ControlKind {
        Conn,
        Ackn,
        Nack,
        Disc,
        Ping,
        Pong,
    }

    /// Classify a short datagram by its magic. Length discrimination is
    /// the caller's job; this only looks at the leading four bytes.
    #[must_use]
    pub fn classify(buf: &[u8]) -> Option<ControlKind> {
        if buf.len() < 4 {
            return None;
        }
        match &buf[..4] {
            b"CONN" => Some(ControlKind::Conn),
            b"ACKN" => Some(ControlKind::Ackn),
            b"NACK" => Some(ControlKind::Nack),
            b"DISC" => Some(ControlKind::Disc),
            b"PING" => Some(ControlKind::Ping),
            b"PONG" => Some(ControlKind::Pong),
            _ => None,
        }
    }

    #[must_use]
    pub fn conn(from: &Callsign, module: char) -> [u8; 11] {
        let mut out = [0u8; 11];
        out[..4].copy_from_slice(b"CONN");
        let mut code = [0u8; 6];
        from.code_out(&mut code);
        out[4..10].copy_from_slice(&code);
        out[10] = module as u8;
        out
    }

    #[must_use]
    pub fn disc(from: &Callsign) -> [u8; 10] {
        with_code(b"DISC", from)
    }

    #[must_use]
    pub fn ping(from: &Callsign) -> [u8; 10] {
        with_code(b"PING", from)
    }

    #[must_use]
    pub fn pong(from: &Callsign) -> [u8; 10] {
        with_code(b"PONG", from)
    }

    /// The callsign carried in bytes 4..10 of a 10+ byte control packet.
    #[must_use]
    pub fn peer(buf: &[u8]) -> Option<Callsign> {
        if buf.len() < 10 {
            return None;
        }
        let mut code = [0u8; 6];
        code.copy_from_slice(&buf[4..10]);
        Some(Callsign::from_bytes(&code))
    }

    fn with_code(magic: &[u8; 4], from: &Callsign) -> [u8; 10] {
        let mut out = [0u8; 10];
        out[..4].copy_from_slice(magic);
        let mut code = [0u8; 6];
        from.code_out(&mut code);
        out[4..10].copy_from_slice(&code);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_type::TypeVersion;

    fn voice_type() -> u16 {
        let mut ft = FrameType::new();
        ft.set_payload(PayloadType::Voice3200);
        ft.wire(TypeVersion::V3)
    }

    fn packet_type() -> u16 {
        let mut ft = FrameType::new();
        ft.set_payload(PayloadType::Packet);
        ft.wire(TypeVersion::V3)
    }

    #[test]
    fn stream_frame_round_trip() {
        let crc = Crc16::new();
        let mut p = Packet::stream();
        p.set_stream_id(0x1234);
        let mut dst = [0u8; 6];
        Callsign::new("#ALL").code_out(&mut dst);
        p.set_dst(&dst);
        let mut src = [0u8; 6];
        Callsign::new("W1AW").code_out(&mut src);
        p.set_src(&src);
        p.set_frame_type(voice_type());
        p.set_frame_number(5 | EOT_BIT);
        p.payload_mut().copy_from_slice(&[0x42; 16]);
        p.seal_crc(&crc);

        let parsed = Packet::parse(p.as_bytes(), &crc).unwrap();
        assert_eq!(parsed.kind(), PacketKind::Stream);
        assert_eq!(parsed.stream_id(), 0x1234);
        assert_eq!(parsed.frame_number() & !EOT_BIT, 5);
        assert!(parsed.is_last());
        assert_eq!(parsed.dst_callsign().text(), "#ALL");
        assert_eq!(parsed.src_callsign().text(), "W1AW");
    }

    #[test]
    fn parse_rejects_corruption() {
        let crc = Crc16::new();
        let mut p = Packet::stream();
        p.set_frame_type(voice_type());
        p.seal_crc(&crc);

        let mut bad = [0u8; STREAM_FRAME_SIZE];
        bad.copy_from_slice(p.as_bytes());
        bad[20] ^= 0x01;
        assert_eq!(Packet::parse(&bad, &crc), Err(FrameError::Crc));

        let mut wrong_magic = [0u8; STREAM_FRAME_SIZE];
        wrong_magic.copy_from_slice(p.as_bytes());
        wrong_magic[3] = b'X';
        assert_eq!(Packet::parse(&wrong_magic, &crc), Err(FrameError::BadMagic));

        assert_eq!(
            Packet::parse(&p.as_bytes()[..40], &crc),
            Err(FrameError::BadLength(40))
        );
    }

    #[test]
    fn stream_frame_with_packet_type_is_rejected() {
        let crc = Crc16::new();
        let mut p = Packet::stream();
        p.set_frame_type(packet_type());
        p.seal_crc(&crc);
        assert_eq!(
            Packet::parse(p.as_bytes(), &crc),
            Err(FrameError::TypeMismatch)
        );
    }

    #[test]
    fn packet_frame_dual_crc() {
        let crc = Crc16::new();
        let mut p = Packet::packet(4 + 30 + 27).unwrap();
        p.set_frame_type(packet_type());
        p.payload_mut()[..5].copy_from_slice(b"hello");
        p.seal_crc(&crc);
        assert!(p.check_crc(&crc));

        let parsed = Packet::parse(p.as_bytes(), &crc).unwrap();
        assert_eq!(parsed.kind(), PacketKind::Packet);
        assert!(parsed.is_last());
        assert_eq!(&parsed.payload()[..5], b"hello");

        // a flip in the payload fails even though the LSF CRC is intact
        let mut bytes: std::vec::Vec<u8> = p.as_bytes().to_vec();
        bytes[40] ^= 0x80;
        assert_eq!(Packet::parse(&bytes, &crc), Err(FrameError::Crc));
    }

    #[test]
    fn packet_length_window() {
        assert!(Packet::packet(MIN_PACKET_FRAME_SIZE - 1).is_err());
        assert!(Packet::packet(MAX_PACKET_FRAME_SIZE + 1).is_err());
        assert!(Packet::packet(MIN_PACKET_FRAME_SIZE).is_ok());
        assert!(Packet::packet(MAX_PACKET_FRAME_SIZE).is_ok());
    }

    #[test]
    fn chunk_control_byte() {
        let c = ChunkControl {
            last: false,
            value: 3,
        };
        assert_eq!(c.encode(), 0x0c);
        let c = ChunkControl {
            last: true,
            value: 12,
        };
        assert_eq!(c.encode(), 0x80 | (12 << 2));
        for b in [0x0cu8, 0xb0, 0x80, 0x7c] {
            let d = ChunkControl::decode(b);
            assert_eq!(d.encode(), b & 0xfc);
        }
    }

    #[test]
    fn control_packet_shapes() {
        let cs = Callsign::new("W1AW");
        let conn = control::conn(&cs, 'C');
        assert_eq!(&conn[..4], b"CONN");
        assert_eq!(conn[10], b'C');
        assert_eq!(control::classify(&conn), Some(control::ControlKind::Conn));
        assert_eq!(control::peer(&conn).unwrap(), cs);

        let pong = control::pong(&cs);
        assert_eq!(control::classify(&pong), Some(control::ControlKind::Pong));
        assert_eq!(control::peer(&pong).unwrap(), cs);
        assert_eq!(control::classify(b"BLAH"), None);
    }
}
