//! The 16-bit TYPE field of a link setup frame, in both its wire encodings.
//!
//! The legacy encoding packs metadata kind and encryption subtype into the
//! same two bits, so it cannot express every descriptor; the V3 encoding
//! (recognizable by a non-zero high nibble) is lossless.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadType {
    DataOnly,
    #[default]
    Voice3200,
    Voice1600,
    Packet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptType {
    #[default]
    None,
    Scrambler8,
    Scrambler16,
    Scrambler24,
    Aes128,
    Aes192,
    Aes256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetaType {
    #[default]
    None,
    Gnss,
    ExtendedCallsign,
    Text,
    Aes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeVersion {
    Legacy,
    V3,
}

/// Frame-type descriptor with lazily built wire caches. Setters invalidate
/// the caches; zero is a safe sentinel since both encodings always carry a
/// non-zero payload field.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameType {
    payload: PayloadType,
    encrypt: EncryptType,
    meta: MetaType,
    signed: bool,
    can: u8,
    is_v3: bool,
    legacy_cache: u16,
    v3_cache: u16,
}

impl FrameType {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Internalize a wire TYPE, auto-detecting the encoding: a non-zero
    /// high nibble can only be V3.
    #[must_use]
    pub fn from_wire(t: u16) -> Self {
        let mut ft = Self::new();
        if t & 0xf000 != 0 {
            ft.is_v3 = true;
            ft.v3_cache = t;
            ft.payload = match t >> 12 {
                1 => PayloadType::DataOnly,
                3 => PayloadType::Voice1600,
                15 => PayloadType::Packet,
                _ => PayloadType::Voice3200,
            };
            ft.encrypt = match (t >> 9) & 0x7 {
                1 => EncryptType::Scrambler8,
                2 => EncryptType::Scrambler16,
                3 => EncryptType::Scrambler24,
                4 => EncryptType::Aes128,
                5 => EncryptType::Aes192,
                6 => EncryptType::Aes256,
                _ => EncryptType::None,
            };
            ft.signed = t & 0x100 != 0;
            ft.meta = match (t >> 4) & 0xf {
                1 => MetaType::Gnss,
                2 => MetaType::ExtendedCallsign,
                3 => MetaType::Text,
                4 => MetaType::Aes,
                _ => MetaType::None,
            };
            ft.can = (t & 0xf) as u8;
        } else {
            ft.legacy_cache = t;
            ft.payload = if t & 1 != 0 {
                PayloadType::Packet
            } else {
                match (t >> 1) & 0x3 {
                    1 => PayloadType::DataOnly,
                    3 => PayloadType::Voice1600,
                    _ => PayloadType::Voice3200,
                }
            };
            let subtype = (t >> 5) & 0x3;
            match (t >> 3) & 0x3 {
                0 => {
                    ft.meta = match subtype {
                        1 => MetaType::Gnss,
                        2 => MetaType::ExtendedCallsign,
                        _ => MetaType::None,
                    };
                }
                1 => {
                    ft.encrypt = match subtype {
                        1 => EncryptType::Scrambler16,
                        2 => EncryptType::Scrambler24,
                        _ => EncryptType::Scrambler8,
                    };
                }
                2 => {
                    ft.encrypt = match subtype {
                        1 => EncryptType::Aes192,
                        2 => EncryptType::Aes256,
                        _ => EncryptType::Aes128,
                    };
                }
                _ => {}
            }
            ft.signed = t & 0x800 != 0;
            ft.can = ((t >> 7) & 0xf) as u8;
        }
        ft
    }

    /// Wire TYPE in the requested encoding, built on first use.
    pub fn wire(&mut self, version: TypeVersion) -> u16 {
        match version {
            TypeVersion::V3 => {
                if self.v3_cache == 0 {
                    self.v3_cache = self.build_v3();
                }
                self.v3_cache
            }
            TypeVersion::Legacy => {
                if self.legacy_cache == 0 {
                    self.legacy_cache = self.build_legacy();
                }
                self.legacy_cache
            }
        }
    }

    #[must_use]
    pub fn version(&self) -> TypeVersion {
        if self.is_v3 {
            TypeVersion::V3
        } else {
            TypeVersion::Legacy
        }
    }

    #[must_use]
    pub fn payload(&self) -> PayloadType {
        self.payload
    }

    #[must_use]
    pub fn encrypt(&self) -> EncryptType {
        self.encrypt
    }

    #[must_use]
    pub fn meta(&self) -> MetaType {
        self.meta
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    #[must_use]
    pub fn can(&self) -> u8 {
        self.can
    }

    pub fn set_payload(&mut self, t: PayloadType) {
        self.payload = t;
        self.invalidate();
    }

    pub fn set_encrypt(&mut self, t: EncryptType) {
        self.encrypt = t;
        self.invalidate();
    }

    pub fn set_meta(&mut self, t: MetaType) {
        self.meta = t;
        self.invalidate();
    }

    pub fn set_signed(&mut self, signed: bool) {
        self.signed = signed;
        self.invalidate();
    }

    pub fn set_can(&mut self, can: u8) {
        self.can = can & 0xf;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.legacy_cache = 0;
        self.v3_cache = 0;
    }

    fn build_v3(&self) -> u16 {
        let mut t: u16 = match self.payload {
            PayloadType::DataOnly => 1,
            PayloadType::Voice3200 => 2,
            PayloadType::Voice1600 => 3,
            PayloadType::Packet => 0xf,
        };
        t <<= 3;
        t |= match self.encrypt {
            EncryptType::None => 0,
            EncryptType::Scrambler8 => 1,
            EncryptType::Scrambler16 => 2,
            EncryptType::Scrambler24 => 3,
            EncryptType::Aes128 => 4,
            EncryptType::Aes192 => 5,
            EncryptType::Aes256 => 6,
        };
        t <<= 1;
        if self.signed {
            t |= 1;
        }
        t <<= 4;
        t |= match self.meta {
            MetaType::None => 0,
            MetaType::Gnss => 1,
            MetaType::ExtendedCallsign => 2,
            MetaType::Text => 3,
            MetaType::Aes => 4,
        };
        t <<= 4;
        t | u16::from(self.can)
    }

    fn build_legacy(&self) -> u16 {
        let mut t: u16 = match self.payload {
            PayloadType::Packet => 1,
            PayloadType::DataOnly => 2,
            PayloadType::Voice3200 => 4,
            PayloadType::Voice1600 => 6,
        };
        match self.encrypt {
            EncryptType::None => {
                // metadata kind shares the subtype bits; only text and aes
                // have no legacy representation at all
                t |= match self.meta {
                    MetaType::Gnss => 0x20,
                    MetaType::ExtendedCallsign => 0x40,
                    _ => 0,
                };
            }
            EncryptType::Scrambler8 => t |= 0x08,
            EncryptType::Scrambler16 => t |= 0x28,
            EncryptType::Scrambler24 => t |= 0x48,
            EncryptType::Aes128 => t |= 0x10,
            EncryptType::Aes192 => t |= 0x30,
            EncryptType::Aes256 => t |= 0x50,
        }
        t |= u16::from(self.can) << 7;
        if self.signed {
            t |= 0x800;
        }
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOADS: [PayloadType; 4] = [
        PayloadType::DataOnly,
        PayloadType::Voice3200,
        PayloadType::Voice1600,
        PayloadType::Packet,
    ];
    const ENCRYPTS: [EncryptType; 7] = [
        EncryptType::None,
        EncryptType::Scrambler8,
        EncryptType::Scrambler16,
        EncryptType::Scrambler24,
        EncryptType::Aes128,
        EncryptType::Aes192,
        EncryptType::Aes256,
    ];
    const METAS: [MetaType; 5] = [
        MetaType::None,
        MetaType::Gnss,
        MetaType::ExtendedCallsign,
        MetaType::Text,
        MetaType::Aes,
    ];

    fn build(payload: PayloadType, encrypt: EncryptType, meta: MetaType, signed: bool, can: u8) -> FrameType {
        let mut ft = FrameType::new();
        ft.set_payload(payload);
        ft.set_encrypt(encrypt);
        ft.set_meta(meta);
        ft.set_signed(signed);
        ft.set_can(can);
        ft
    }

    #[test]
    fn v3_round_trips_every_descriptor() {
        for payload in PAYLOADS {
            for encrypt in ENCRYPTS {
                for meta in METAS {
                    for signed in [false, true] {
                        for can in [0u8, 7, 15] {
                            let mut ft = build(payload, encrypt, meta, signed, can);
                            let wire = ft.wire(TypeVersion::V3);
                            let back = FrameType::from_wire(wire);
                            assert_eq!(back.version(), TypeVersion::V3);
                            assert_eq!(back.payload(), payload);
                            assert_eq!(back.encrypt(), encrypt);
                            assert_eq!(back.meta(), meta);
                            assert_eq!(back.is_signed(), signed);
                            assert_eq!(back.can(), can);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn v3_aes_metadata_uses_nibble_four() {
        // the nibble value every decoder in the fleet maps back to AES
        let mut ft = build(
            PayloadType::Voice3200,
            EncryptType::Aes256,
            MetaType::Aes,
            false,
            0,
        );
        let wire = ft.wire(TypeVersion::V3);
        assert_eq!((wire >> 4) & 0xf, 4);
        assert_eq!(FrameType::from_wire(wire).meta(), MetaType::Aes);
    }

    #[test]
    fn legacy_round_trips_representable_descriptors() {
        for payload in PAYLOADS {
            for encrypt in ENCRYPTS {
                for signed in [false, true] {
                    for can in [0u8, 9, 15] {
                        // with encryption active the metadata bits are the
                        // scrambler/aes subtype, so only meta=None survives
                        let metas: &[MetaType] = if encrypt == EncryptType::None {
                            &[MetaType::None, MetaType::Gnss, MetaType::ExtendedCallsign]
                        } else {
                            &[MetaType::None]
                        };
                        for &meta in metas {
                            let mut ft = build(payload, encrypt, meta, signed, can);
                            let wire = ft.wire(TypeVersion::Legacy);
                            let back = FrameType::from_wire(wire);
                            assert_eq!(back.version(), TypeVersion::Legacy);
                            assert_eq!(back.payload(), payload);
                            assert_eq!(back.encrypt(), encrypt);
                            assert_eq!(back.meta(), meta);
                            assert_eq!(back.is_signed(), signed);
                            assert_eq!(back.can(), can);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn legacy_drops_text_and_aes_metadata() {
        let mut ft = build(
            PayloadType::Voice3200,
            EncryptType::None,
            MetaType::Text,
            false,
            0,
        );
        let back = FrameType::from_wire(ft.wire(TypeVersion::Legacy));
        assert_eq!(back.meta(), MetaType::None);

        let mut ft = build(
            PayloadType::Voice3200,
            EncryptType::Aes128,
            MetaType::Aes,
            false,
            0,
        );
        let back = FrameType::from_wire(ft.wire(TypeVersion::Legacy));
        assert_eq!(back.meta(), MetaType::None);
        assert_eq!(back.encrypt(), EncryptType::Aes128);
    }

    #[test]
    fn version_detect_boundary() {
        assert_eq!(FrameType::from_wire(0x0fff).version(), TypeVersion::Legacy);
        assert_eq!(FrameType::from_wire(0x1000).version(), TypeVersion::V3);
        assert_eq!(
            FrameType::from_wire(0x1000).payload(),
            PayloadType::DataOnly
        );
    }

    #[test]
    fn setters_invalidate_the_cache() {
        let mut ft = FrameType::new();
        let voice = ft.wire(TypeVersion::V3);
        ft.set_payload(PayloadType::Packet);
        let packet = ft.wire(TypeVersion::V3);
        assert_ne!(voice, packet);
        assert_eq!(packet >> 12, 0xf);
    }

    #[test]
    fn cross_version_conversion_preserves_fields() {
        // a legacy TYPE re-encoded as V3 keeps the descriptor
        let mut legacy = build(
            PayloadType::Voice1600,
            EncryptType::Scrambler16,
            MetaType::None,
            true,
            5,
        );
        let wire = legacy.wire(TypeVersion::Legacy);
        let mut decoded = FrameType::from_wire(wire);
        let v3 = decoded.wire(TypeVersion::V3);
        let back = FrameType::from_wire(v3);
        assert_eq!(back.payload(), PayloadType::Voice1600);
        assert_eq!(back.encrypt(), EncryptType::Scrambler16);
        assert_eq!(back.is_signed(), true);
        assert_eq!(back.can(), 5);
    }
}
