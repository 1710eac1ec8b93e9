//! Rate 1/2 convolutional code, constraint length 5, and its soft
//! Viterbi decoder. Soft bits are u16 confidences where 0 means a sure
//! zero and 0xffff a sure one; punctured positions are restored as the
//! neutral midpoint before decoding.

const G1: u8 = 0x19;
const G2: u8 = 0x17;
const STATES: usize = 16;

/// Soft value carrying no information.
pub const SOFT_NEUTRAL: u16 = 0x7fff;

fn parity(v: u8) -> u8 {
    (v.count_ones() & 1) as u8
}

/// Encode `bits` plus four flushing zeros; output is 2*(bits+4) bits.
#[must_use]
pub fn encode(bits: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * (bits.len() + 4));
    let mut sr = 0u8;
    for &b in bits.iter().chain([0u8; 4].iter()) {
        sr = ((sr << 1) | b) & 0x1f;
        out.push(parity(sr & G1));
        out.push(parity(sr & G2));
    }
    out
}

/// Drop encoder output bits where the cycled pattern holds a zero.
#[must_use]
pub fn puncture(bits: &[u8], pattern: &[u8]) -> Vec<u8> {
    bits.iter()
        .enumerate()
        .filter(|(i, _)| pattern[i % pattern.len()] == 1)
        .map(|(_, &b)| b)
        .collect()
}

/// Re-expand a punctured soft stream to `out_len` positions, inserting
/// the neutral value where bits were dropped.
#[must_use]
pub fn depuncture(soft: &[u16], pattern: &[u8], out_len: usize) -> Vec<u16> {
    let mut out = Vec::with_capacity(out_len);
    let mut at = 0;
    for i in 0..out_len {
        if pattern[i % pattern.len()] == 1 {
            out.push(soft.get(at).copied().unwrap_or(SOFT_NEUTRAL));
            at += 1;
        } else {
            out.push(SOFT_NEUTRAL);
        }
    }
    out
}

fn branch_metric(expected: u8, soft: u16) -> u64 {
    if expected == 1 {
        u64::from(0xffffu16 - soft)
    } else {
        u64::from(soft)
    }
}

/// Decode a full soft stream (2 soft bits per step). Returns every
/// decoded bit, flushing tail included, and the winning path metric.
#[must_use]
pub fn viterbi(soft: &[u16]) -> (Vec<u8>, u32) {
    let steps = soft.len() / 2;
    const UNREACHED: u64 = 1 << 40;
    let mut metrics = [UNREACHED; STATES];
    metrics[0] = 0;
    // decisions[t][s] is the predecessor of state s at step t
    let mut decisions = vec![[0u8; STATES]; steps];

    for (t, pair) in soft.chunks_exact(2).enumerate() {
        let mut next = [UNREACHED; STATES];
        for (s, slot) in next.iter_mut().enumerate() {
            let b = (s & 1) as u8;
            for p in [s >> 1, (s >> 1) | 8] {
                let window = ((p as u8) << 1) | b;
                let cost = metrics[p]
                    + branch_metric(parity(window & G1), pair[0])
                    + branch_metric(parity(window & G2), pair[1]);
                if cost < *slot {
                    *slot = cost;
                    decisions[t][s] = p as u8;
                }
            }
        }
        metrics = next;
    }

    // the encoder flushes to state zero
    let mut bits = vec![0u8; steps];
    let mut state = 0usize;
    for t in (0..steps).rev() {
        bits[t] = (state & 1) as u8;
        state = usize::from(decisions[t][state]);
    }
    (bits, metrics[0].min(u64::from(u32::MAX)) as u32)
}
