//! SIMD-optimized row conversion kernels
//!
//! Each entry point picks the AVX2 kernel at runtime when the CPU supports it
//! and falls back to a scalar loop otherwise. Both produce identical results.

#[cfg(target_arch = "x86_64")]
pub mod avx2;

use crate::scalar::{clamp, round_half_up};

/// Round every value half up, in place.
pub fn round_half_up_row(values: &mut [f64]) {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            unsafe { avx2::round_half_up_row_avx2(values) };
            return;
        }
    }

    for v in values.iter_mut() {
        *v = round_half_up(*v);
    }
}

/// Clamp every value to `[lo, hi]` and round it half up, in place.
pub fn clamp_round_row(values: &mut [f64], lo: f64, hi: f64) {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            unsafe { avx2::clamp_round_row_avx2(values, lo, hi) };
            return;
        }
    }

    for v in values.iter_mut() {
        *v = round_half_up(clamp(*v, lo, hi));
    }
}

/// Narrow a row of f64 into f32.
pub fn narrow_row_f32(src: &[f64], dst: &mut [f32]) {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            unsafe { avx2::narrow_row_f32_avx2(src, dst) };
            return;
        }
    }

    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d = *s as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_round_row_odd_length() {
        // 7 values exercises both the vector body and the scalar tail
        let mut values = vec![-1.0, 0.5, 1.49, 2.5, 300.0, f64::NAN, 254.5];
        clamp_round_row(&mut values, 0.0, 255.0);
        assert_eq!(values, vec![0.0, 1.0, 1.0, 3.0, 255.0, 0.0, 255.0]);
    }

    #[test]
    fn test_round_half_up_row_negative() {
        let mut values = vec![-2.5, -2.4, -0.5, 0.0, 3.5];
        round_half_up_row(&mut values);
        assert_eq!(values, vec![-2.0, -2.0, 0.0, 0.0, 4.0]);
    }

    #[test]
    fn test_narrow_row_f32() {
        let src: Vec<f64> = (0..11).map(|i| i as f64 * 0.25).collect();
        let mut dst = vec![0.0f32; 11];
        narrow_row_f32(&src, &mut dst);
        for (s, d) in src.iter().zip(dst.iter()) {
            assert_eq!(*d, *s as f32);
        }
    }
}
