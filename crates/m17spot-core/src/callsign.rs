use std::fmt;

use log::warn;

/// The 40-symbol base-40 alphabet. Position 0 is the pad/space symbol.
pub const M17_ALPHABET: &[u8; 40] = b" ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-/.";

/// Encoded destination meaning "everyone".
pub const BROADCAST_CODE: u64 = 0xffff_ffff_ffff;

/// Largest value a 9-character base-40 callsign can encode.
const MAX_CALLSIGN_CODE: u64 = 0xee6b_27ff_ffff;

const fn alphabet_pos(c: u8) -> u64 {
    match c {
        b'A'..=b'Z' => (c - b'A' + 1) as u64,
        b'0'..=b'9' => (c - b'0' + 27) as u64,
        b'-' => 37,
        b'/' => 38,
        b'.' => 39,
        _ => 0,
    }
}

/// Base-40 encode a callsign string, usable in const context so command
/// words can be matched against compile-time values.
#[must_use]
pub const fn callsign_code(cs: &str) -> u64 {
    let b = cs.as_bytes();
    let mut i = if b.len() > 9 { 9 } else { b.len() };
    let mut coded = 0u64;
    while i > 0 {
        i -= 1;
        coded = coded * 40 + alphabet_pos(b[i]);
    }
    coded
}

/// A packed 48-bit M17 callsign with its canonical display form.
///
/// Equality is on the packed value only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Callsign {
    coded: u64,
    cs: [u8; 9],
}

impl Callsign {
    #[must_use]
    pub fn new(callsign: &str) -> Self {
        let mut cs = [0u8; 9];
        if callsign.starts_with("#ALL") {
            cs[..4].copy_from_slice(b"#ALL");
            return Self {
                coded: BROADCAST_CODE,
                cs,
            };
        }
        for (slot, ch) in cs.iter_mut().zip(callsign.bytes()) {
            // characters outside the alphabet degrade to the pad symbol
            *slot = if ch != b' ' && alphabet_pos(ch) == 0 {
                b' '
            } else {
                ch
            };
        }
        let mut len = 9usize;
        while len > 0 && (cs[len - 1] == 0 || cs[len - 1] == b' ') {
            cs[len - 1] = 0;
            len -= 1;
        }
        let mut coded = 0u64;
        let mut i = len;
        while i > 0 {
            i -= 1;
            coded = coded * 40 + alphabet_pos(cs[i]);
        }
        Self { coded, cs }
    }

    /// Decode the 6-byte big-endian form found in LSFs and internet frames.
    /// Out-of-range values log a warning and yield the empty callsign.
    #[must_use]
    pub fn from_bytes(code: &[u8; 6]) -> Self {
        let coded = code.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        if coded == BROADCAST_CODE {
            return Self::new("#ALL");
        }
        if coded > MAX_CALLSIGN_CODE {
            warn!("callsign code 0x{coded:012x} is out of range");
            return Self::default();
        }
        let mut cs = [0u8; 9];
        let mut c = coded;
        let mut i = 0;
        while c != 0 && i < 9 {
            cs[i] = M17_ALPHABET[(c % 40) as usize];
            c /= 40;
            i += 1;
        }
        Self { coded, cs }
    }

    #[must_use]
    pub fn code(&self) -> u64 {
        self.coded
    }

    /// Write the 6-byte big-endian wire form.
    pub fn code_out(&self, out: &mut [u8; 6]) {
        for (i, b) in out.iter_mut().enumerate() {
            *b = (self.coded >> (8 * (5 - i))) as u8;
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        let n = self.cs.iter().position(|&b| b == 0).unwrap_or(9);
        std::str::from_utf8(&self.cs[..n]).unwrap_or("")
    }

    /// Display form padded with spaces to `len` characters.
    #[must_use]
    pub fn padded(&self, len: usize) -> String {
        let mut s = self.text().to_string();
        while s.len() < len {
            s.push(' ');
        }
        s
    }

    /// The module letter is the ninth character, space when unset.
    #[must_use]
    pub fn module(&self) -> char {
        if self.cs[8] != 0 {
            self.cs[8] as char
        } else {
            ' '
        }
    }

    /// Set the module letter (ninth character). Lowercase is folded;
    /// anything not A-Z warns and leaves the callsign unchanged.
    pub fn set_module(&mut self, m: char) {
        let m = m.to_ascii_uppercase();
        if !m.is_ascii_uppercase() {
            warn!("'{m}' is not a valid module letter");
            return;
        }
        let mut full = self.padded(8);
        full.push(m);
        *self = Self::new(&full);
    }

    /// Encoded value of the callsign with any suffix removed: everything
    /// from the first space, `/` or `.` on is dropped before encoding.
    #[must_use]
    pub fn base(&self) -> u64 {
        let text = self.text();
        let end = text
            .find(|c| c == ' ' || c == '/' || c == '.')
            .unwrap_or(text.len())
            .min(8);
        callsign_code(&text[..end])
    }

    /// Reflector designators start with `M17-` or `URF`.
    #[must_use]
    pub fn is_reflector(&self) -> bool {
        let text = self.text();
        text.starts_with("M17-") || text.starts_with("URF")
    }
}

impl PartialEq for Callsign {
    fn eq(&self, other: &Self) -> bool {
        self.coded == other.coded
    }
}

impl Eq for Callsign {}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_plain_callsign() {
        let cs = Callsign::new("N7TAE");
        let mut code = [0u8; 6];
        cs.code_out(&mut code);
        let back = Callsign::from_bytes(&code);
        assert_eq!(back.text(), "N7TAE");
        assert_eq!(back, cs);
    }

    #[test]
    fn broadcast_sentinel_both_ways() {
        let all = Callsign::new("#ALL");
        assert_eq!(all.code(), BROADCAST_CODE);
        let decoded = Callsign::from_bytes(&[0xff; 6]);
        assert_eq!(decoded.text(), "#ALL");
        assert_eq!(decoded, all);
    }

    #[test]
    fn out_of_range_code_is_empty() {
        // one above the largest 9-character encoding
        let cs = Callsign::from_bytes(&[0xee, 0x6b, 0x28, 0x00, 0x00, 0x00]);
        assert_eq!(cs.code(), 0);
        assert_eq!(cs.text(), "");
    }

    #[test]
    fn invalid_characters_degrade_to_space() {
        let a = Callsign::new("AB_CD");
        let b = Callsign::new("AB CD");
        assert_eq!(a, b);
    }

    #[test]
    fn trailing_spaces_are_canonicalized() {
        let a = Callsign::new("W1AW   ");
        assert_eq!(a.text(), "W1AW");
        assert_eq!(a, Callsign::new("W1AW"));
    }

    #[test]
    fn module_set_and_get() {
        let mut cs = Callsign::new("W1AW");
        assert_eq!(cs.module(), ' ');
        cs.set_module('d');
        assert_eq!(cs.module(), 'D');
        assert_eq!(cs.padded(9), "W1AW    D");
        // invalid module letter is a no-op
        let before = cs;
        cs.set_module('3');
        assert_eq!(cs, before);
    }

    #[test]
    fn base_strips_module_and_suffix() {
        let mut cs = Callsign::new("M17-QQQ");
        cs.set_module('C');
        assert_eq!(cs.base(), callsign_code("M17-QQQ"));
        let portable = Callsign::new("W1AW/P");
        assert_eq!(portable.base(), callsign_code("W1AW"));
    }

    #[test]
    fn reflector_designators() {
        assert!(Callsign::new("M17-USA").is_reflector());
        assert!(Callsign::new("URF001").is_reflector());
        assert!(!Callsign::new("W1AW").is_reflector());
    }

    #[test]
    fn const_code_matches_runtime_encode() {
        const ECHO: u64 = callsign_code("ECHO");
        assert_eq!(Callsign::new("ECHO").code(), ECHO);
        assert_eq!(Callsign::new("E").code(), callsign_code("E"));
    }
}
