//! Sync-word patterns at the four-level symbol alphabet and the
//! Euclidean metric used to hunt for them in the filtered sample stream.

/// Preamble (alternating +3/-3) followed by the LSF sync word 0x55f7.
pub const LSF_SYNC_EXT: [i8; 16] = [
    3, -3, 3, -3, 3, -3, 3, -3, 3, 3, 3, 3, -3, -3, 3, -3,
];
/// Stream sync word 0xff5d.
pub const STREAM_SYNC: [i8; 8] = [-3, -3, -3, -3, 3, 3, -3, 3];
/// Packet sync word 0x75ff.
pub const PACKET_SYNC: [i8; 8] = [3, -3, 3, 3, -3, -3, -3, -3];
/// End-of-transmission marker.
pub const EOT_SYNC: [i8; 8] = [3, 3, 3, 3, 3, 3, -3, 3];

/// Detection thresholds as plain Euclidean distances. The frame metric
/// combines the distance at the frame's own sync with the best of the
/// following frame's sync-or-EOT distance, root-sum-square.
pub const LSF_SYNC_THRESHOLD: f32 = 4.5;
pub const FRAME_SYNC_THRESHOLD: f32 = 5.0;

/// Squared Euclidean distance between filtered symbols and a pattern.
#[must_use]
pub fn distance_sq(symbols: &[f32], pattern: &[i8]) -> f32 {
    symbols
        .iter()
        .zip(pattern.iter())
        .map(|(&s, &p)| {
            let d = s - f32::from(p);
            d * d
        })
        .sum()
}

#[must_use]
pub fn below(threshold: f32, dist_sq: f32) -> bool {
    dist_sq <= threshold * threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_floats(pattern: &[i8]) -> Vec<f32> {
        pattern.iter().map(|&p| f32::from(p)).collect()
    }

    #[test]
    fn exact_match_is_zero() {
        assert_eq!(distance_sq(&as_floats(&STREAM_SYNC), &STREAM_SYNC), 0.0);
        assert_eq!(distance_sq(&as_floats(&LSF_SYNC_EXT), &LSF_SYNC_EXT), 0.0);
    }

    #[test]
    fn patterns_are_well_separated() {
        // the closest pair of 8-symbol patterns stays far outside the
        // detection threshold
        let pairs: [(&[i8; 8], &[i8; 8]); 3] = [
            (&STREAM_SYNC, &PACKET_SYNC),
            (&STREAM_SYNC, &EOT_SYNC),
            (&PACKET_SYNC, &EOT_SYNC),
        ];
        for (a, b) in pairs {
            let d = distance_sq(&as_floats(a), b);
            assert!(d > FRAME_SYNC_THRESHOLD * FRAME_SYNC_THRESHOLD * 4.0);
        }
    }

    #[test]
    fn threshold_compare_is_on_the_square() {
        assert!(below(4.5, 20.25));
        assert!(!below(4.5, 20.26));
        assert!(below(5.0, 25.0));
    }

    #[test]
    fn noisy_match_stays_inside_threshold() {
        let noisy: Vec<f32> = STREAM_SYNC.iter().map(|&p| f32::from(p) + 0.4).collect();
        // 8 * 0.4^2 = 1.28
        assert!(below(FRAME_SYNC_THRESHOLD, distance_sq(&noisy, &STREAM_SYNC)));
    }
}
