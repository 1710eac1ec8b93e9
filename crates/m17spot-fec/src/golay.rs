//! Extended Golay(24,12): generator polynomial 0xC75 plus an overall
//! parity bit. The full 4096-word codebook is built once; decode is a
//! nearest-codeword search, exact for up to three bit errors.

const POLY: u32 = 0xc75;

fn checkbits(data: u16) -> u32 {
    let mut r = u32::from(data) << 11;
    for i in (11..23).rev() {
        if r & (1 << i) != 0 {
            r ^= POLY << (i - 11);
        }
    }
    r & 0x7ff
}

pub struct Golay {
    codewords: Vec<u32>,
}

impl Golay {
    #[must_use]
    pub fn new() -> Self {
        let mut codewords = Vec::with_capacity(4096);
        for data in 0..4096u16 {
            let cw23 = (u32::from(data) << 11) | checkbits(data);
            let parity = cw23.count_ones() & 1;
            codewords.push((cw23 << 1) | parity);
        }
        Self { codewords }
    }

    #[must_use]
    pub fn encode(&self, data: u16) -> u32 {
        self.codewords[usize::from(data & 0xfff)]
    }

    /// Nearest-codeword decode: the 12 data bits and the error count.
    #[must_use]
    pub fn decode(&self, word: u32) -> (u16, u32) {
        let word = word & 0xff_ffff;
        let mut best = (0u16, u32::MAX);
        for (data, &cw) in self.codewords.iter().enumerate() {
            let d = (cw ^ word).count_ones();
            if d < best.1 {
                best = (data as u16, d);
                if d == 0 {
                    break;
                }
            }
        }
        best
    }
}

impl Default for Golay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_systematic() {
        let g = Golay::new();
        for data in [0u16, 1, 0x555, 0xfff, 0x123] {
            let cw = g.encode(data);
            assert_eq!((cw >> 12) as u16, data);
        }
    }

    #[test]
    fn corrects_up_to_three_errors() {
        let g = Golay::new();
        let cw = g.encode(0xa5c);
        for flips in [0x1u32, 0x0900, 0x40_0021] {
            let (data, errs) = g.decode(cw ^ flips);
            assert_eq!(data, 0xa5c);
            assert_eq!(errs, flips.count_ones());
        }
    }

    #[test]
    fn clean_word_decodes_with_zero_errors() {
        let g = Golay::new();
        let (data, errs) = g.decode(g.encode(0x7b1));
        assert_eq!(data, 0x7b1);
        assert_eq!(errs, 0);
    }
}
