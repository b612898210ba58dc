//! Helpers shared between test modules.
#![allow(dead_code)]

use ndarray::Array2;

/// Deterministic pseudo-noise, roughly uniform on [-1, 1), from a 64-bit
/// LCG. Keeps the tests reproducible without a rand dependency.
pub(crate) fn lcg_noise(seed: u64, n: usize) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) as f64 / f64::from(1u32 << 31)) * 2.0 - 1.0
        })
        .collect()
}

/// A (time, frequency) array of [`lcg_noise`].
pub(crate) fn lcg_noise_array(seed: u64, num_times: usize, num_freqs: usize) -> Array2<f64> {
    Array2::from_shape_vec(
        (num_times, num_freqs),
        lcg_noise(seed, num_times * num_freqs),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcg_noise_is_deterministic_and_bounded() {
        let a = lcg_noise(42, 1000);
        let b = lcg_noise(42, 1000);
        assert_eq!(a, b);
        assert!(a.iter().all(|&v| (-1.0..1.0).contains(&v)));
        // not constant
        assert!(a.iter().any(|&v| v > 0.5));
        assert!(a.iter().any(|&v| v < -0.5));
    }
}
