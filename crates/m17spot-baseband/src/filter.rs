//! Root-raised-cosine pulse shaping, shared between the matched RX
//! filter and the polyphase TX interpolator.

use crate::{SAMPLES_PER_FRAME, SAMPLES_PER_SYMBOL, SYMBOLS_PER_FRAME, TX_SYMBOL_SCALING_COEFF};

pub const RRC_ALPHA: f32 = 0.5;
pub const FILTER_TAPS: usize = 41;
const TAPS_PER_PHASE: usize = 9;

/// 41-tap root-raised-cosine at 5 samples per symbol, alpha 0.5,
/// normalized so the TX/RX cascade has unit energy after the sqrt(5)
/// interpolation gain.
#[must_use]
pub fn rrc_taps() -> [f32; FILTER_TAPS] {
    let mut taps = [0.0f32; FILTER_TAPS];
    let alpha = f64::from(RRC_ALPHA);
    let center = (FILTER_TAPS / 2) as f64;
    for (i, tap) in taps.iter_mut().enumerate() {
        let t = (i as f64 - center) / SAMPLES_PER_SYMBOL as f64;
        let h = if t.abs() < 1e-9 {
            1.0 + alpha * (4.0 / std::f64::consts::PI - 1.0)
        } else if ((4.0 * alpha * t).abs() - 1.0).abs() < 1e-9 {
            let x = std::f64::consts::PI / (4.0 * alpha);
            alpha / std::f64::consts::SQRT_2
                * ((1.0 + 2.0 / std::f64::consts::PI) * x.sin()
                    + (1.0 - 2.0 / std::f64::consts::PI) * x.cos())
        } else {
            let pi_t = std::f64::consts::PI * t;
            ((pi_t * (1.0 - alpha)).sin()
                + 4.0 * alpha * t * (pi_t * (1.0 + alpha)).cos())
                / (pi_t * (1.0 - (4.0 * alpha * t).powi(2)))
        };
        *tap = h as f32;
    }
    // unit energy across the 5-phase cascade
    let energy: f32 = taps.iter().map(|h| h * h).sum();
    let norm = (energy * SAMPLES_PER_SYMBOL as f32).sqrt();
    for tap in &mut taps {
        *tap /= norm;
    }
    taps
}

/// Sliding matched filter over incoming int8 samples.
#[derive(Debug, Clone)]
pub struct MatchedFilter {
    taps: [f32; FILTER_TAPS],
    hist: [f32; FILTER_TAPS],
    pos: usize,
}

impl MatchedFilter {
    #[must_use]
    pub fn new(taps: [f32; FILTER_TAPS]) -> Self {
        Self {
            taps,
            hist: [0.0; FILTER_TAPS],
            pos: 0,
        }
    }

    /// Push one raw sample, get the filtered sample out.
    pub fn push(&mut self, sample: i8) -> f32 {
        self.hist[self.pos] = f32::from(sample);
        self.pos = (self.pos + 1) % FILTER_TAPS;
        let mut acc = 0.0f32;
        for (i, tap) in self.taps.iter().enumerate() {
            acc += tap * self.hist[(self.pos + i) % FILTER_TAPS];
        }
        acc
    }
}

/// Polyphase TX interpolator: one symbol in, five shaped samples out.
/// Filter memory lives in the instance so concurrent transmitters do
/// not interfere.
#[derive(Debug, Clone)]
pub struct PolyphaseFilter {
    poly: [f32; TAPS_PER_PHASE * SAMPLES_PER_SYMBOL],
    sr: [f32; TAPS_PER_PHASE * 2],
    w: usize,
    gain: f32,
}

impl PolyphaseFilter {
    #[must_use]
    pub fn new(taps: &[f32; FILTER_TAPS]) -> Self {
        let mut poly = [0.0f32; TAPS_PER_PHASE * SAMPLES_PER_SYMBOL];
        for ph in 0..SAMPLES_PER_SYMBOL {
            for k in 0..TAPS_PER_PHASE {
                let idx = k * SAMPLES_PER_SYMBOL + ph;
                if idx < FILTER_TAPS {
                    poly[ph * TAPS_PER_PHASE + k] = taps[idx];
                }
            }
        }
        Self {
            poly,
            sr: [0.0; TAPS_PER_PHASE * 2],
            w: 0,
            gain: TX_SYMBOL_SCALING_COEFF * (SAMPLES_PER_SYMBOL as f32).sqrt(),
        }
    }

    /// Clear the filter memory before a new transmission.
    pub fn flush(&mut self) {
        self.sr = [0.0; TAPS_PER_PHASE * 2];
        self.w = 0;
    }

    /// Shape one frame of symbols into baseband samples.
    pub fn process(
        &mut self,
        symbols: &[i8; SYMBOLS_PER_FRAME],
        out: &mut [i8; SAMPLES_PER_FRAME],
    ) {
        for (i, &sym) in symbols.iter().enumerate() {
            let x = f32::from(sym);
            // duplicated store gives the dot product linear access
            self.sr[self.w] = x;
            self.sr[self.w + TAPS_PER_PHASE] = x;
            for ph in 0..SAMPLES_PER_SYMBOL {
                let tp = &self.poly[ph * TAPS_PER_PHASE..(ph + 1) * TAPS_PER_PHASE];
                let hp = &self.sr[self.w..self.w + TAPS_PER_PHASE];
                let mut acc = 0.0f32;
                for (h, t) in hp.iter().zip(tp.iter()) {
                    acc += h * t;
                }
                out[i * SAMPLES_PER_SYMBOL + ph] = (acc * self.gain) as i8;
            }
            self.w = if self.w == 0 {
                TAPS_PER_PHASE - 1
            } else {
                self.w - 1
            };
        }
    }
}
