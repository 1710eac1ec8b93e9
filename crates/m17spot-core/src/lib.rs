//! Wire formats shared by every part of the hotspot: callsigns, the M17
//! CRC, frame-type descriptors, link setup frames, internet frames and
//! the reassembly buffers that sit between RF and IP framing.

pub mod callsign;
pub mod crc;
pub mod frame_type;
pub mod lsf;
pub mod packet;
pub mod reassembly;

pub use callsign::{callsign_code, Callsign, BROADCAST_CODE, M17_ALPHABET};
pub use crc::Crc16;
pub use frame_type::{EncryptType, FrameType, MetaType, PayloadType, TypeVersion};
pub use lsf::{Lsf, LSF_SIZE};
pub use packet::{
    control, ChunkControl, FrameError, Packet, PacketKind, EOT_BIT, MAX_PACKET_FRAME_SIZE,
    MIN_PACKET_FRAME_SIZE, STREAM_FRAME_SIZE,
};
pub use reassembly::{
    silent_payload, LichCollector, PacketFrame, SuperFrame, SILENT_C2_1600, SILENT_C2_3200,
};
