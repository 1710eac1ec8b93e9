use crate::crc::Crc16;

pub const LSF_SIZE: usize = 30;

/// Link setup frame: dst(6) src(6) type(2,BE) meta(14) crc(2,BE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lsf {
    data: [u8; LSF_SIZE],
}

impl Lsf {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: [0; LSF_SIZE],
        }
    }

    #[must_use]
    pub fn from_bytes(data: [u8; LSF_SIZE]) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; LSF_SIZE] {
        &self.data
    }

    #[must_use]
    pub fn dst(&self) -> &[u8] {
        &self.data[0..6]
    }

    pub fn set_dst(&mut self, code: &[u8; 6]) {
        self.data[0..6].copy_from_slice(code);
    }

    #[must_use]
    pub fn src(&self) -> &[u8] {
        &self.data[6..12]
    }

    pub fn set_src(&mut self, code: &[u8; 6]) {
        self.data[6..12].copy_from_slice(code);
    }

    #[must_use]
    pub fn frame_type(&self) -> u16 {
        u16::from_be_bytes([self.data[12], self.data[13]])
    }

    pub fn set_frame_type(&mut self, t: u16) {
        self.data[12..14].copy_from_slice(&t.to_be_bytes());
    }

    #[must_use]
    pub fn meta(&self) -> &[u8] {
        &self.data[14..28]
    }

    pub fn set_meta(&mut self, meta: &[u8; 14]) {
        self.data[14..28].copy_from_slice(meta);
    }

    pub fn seal_crc(&mut self, crc: &Crc16) {
        crc.seal(&mut self.data);
    }

    #[must_use]
    pub fn check_crc(&self, crc: &Crc16) -> bool {
        crc.check(&self.data)
    }
}

impl Default for Lsf {
    fn default() -> Self {
        Self::new()
    }
}
