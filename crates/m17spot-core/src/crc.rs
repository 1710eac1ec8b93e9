/// CRC-16/M17: polynomial 0x5935, init 0xffff, no reflection, no final xor.
///
/// Every wire structure carries this CRC big-endian in its last two bytes,
/// so a correct frame computes to zero over its full length.
pub struct Crc16 {
    table: [u16; 256],
}

const POLY: u16 = 0x5935;

impl Crc16 {
    #[must_use]
    pub fn new() -> Self {
        let mut table = [0u16; 256];
        for (value, entry) in table.iter_mut().enumerate() {
            let mut reg = (value as u16) << 8;
            for _ in 0..8 {
                reg = if reg & 0x8000 != 0 {
                    (reg << 1) ^ POLY
                } else {
                    reg << 1
                };
            }
            *entry = reg;
        }
        Self { table }
    }

    #[must_use]
    pub fn compute(&self, data: &[u8]) -> u16 {
        data.iter().fold(0xffffu16, |crc, &b| {
            (crc << 8) ^ self.table[usize::from((crc >> 8) as u8 ^ b)]
        })
    }

    /// Compute over everything but the last two bytes and store big-endian.
    pub fn seal(&self, frame: &mut [u8]) {
        let n = frame.len();
        debug_assert!(n >= 2);
        let crc = self.compute(&frame[..n - 2]);
        frame[n - 2..].copy_from_slice(&crc.to_be_bytes());
    }

    /// True when the trailing CRC matches the rest of the frame.
    #[must_use]
    pub fn check(&self, frame: &[u8]) -> bool {
        self.compute(frame) == 0
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_check_values() {
        let crc = Crc16::new();
        assert_eq!(crc.compute(&[]), 0xffff);
        assert_eq!(crc.compute(b"A"), 0x206e);
        assert_eq!(crc.compute(b"123456789"), 0x772b);
    }

    #[test]
    fn seal_then_check() {
        let crc = Crc16::new();
        let mut frame = [0u8; 30];
        for (i, b) in frame.iter_mut().enumerate() {
            *b = i as u8;
        }
        crc.seal(&mut frame);
        assert!(crc.check(&frame));
    }

    #[test]
    fn detects_single_bit_flips() {
        let crc = Crc16::new();
        let mut frame = [0u8; 54];
        for (i, b) in frame.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        crc.seal(&mut frame);
        let mut trials = 0;
        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut bad = frame;
                bad[byte] ^= 1 << bit;
                assert!(!crc.check(&bad), "missed flip at byte {byte} bit {bit}");
                trials += 1;
            }
        }
        assert!(trials >= 1000);
    }
}
