//! AVX2 row conversion kernels
//!
//! Processes 4 f64 values per iteration (256-bit registers); the tail is
//! handled with the same scalar rule so results never depend on length.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use crate::scalar::{clamp, round_half_up};

/// AVX2 round-half-up, in place.
///
/// # Safety
///
/// Requires the AVX2 CPU feature. Caller must verify it is available.
#[target_feature(enable = "avx2")]
pub unsafe fn round_half_up_row_avx2(values: &mut [f64]) {
    let n = values.len();
    let chunks = n / 4;
    let ptr = values.as_mut_ptr();
    let half = _mm256_set1_pd(0.5);

    for i in 0..chunks {
        let p = ptr.add(i * 4);
        let v = _mm256_loadu_pd(p);
        let r = _mm256_floor_pd(_mm256_add_pd(v, half));
        _mm256_storeu_pd(p, r);
    }

    for v in values[chunks * 4..].iter_mut() {
        *v = round_half_up(*v);
    }
}

/// AVX2 clamp to `[lo, hi]` followed by round-half-up, in place.
///
/// `max(v, lo)` returns `lo` for NaN lanes, which matches [`clamp`].
///
/// # Safety
///
/// Requires the AVX2 CPU feature. Caller must verify it is available.
#[target_feature(enable = "avx2")]
pub unsafe fn clamp_round_row_avx2(values: &mut [f64], lo: f64, hi: f64) {
    let n = values.len();
    let chunks = n / 4;
    let ptr = values.as_mut_ptr();
    let half = _mm256_set1_pd(0.5);
    let lo_v = _mm256_set1_pd(lo);
    let hi_v = _mm256_set1_pd(hi);

    for i in 0..chunks {
        let p = ptr.add(i * 4);
        let v = _mm256_loadu_pd(p);
        // operand order matters: the second operand is returned for NaN
        let c = _mm256_min_pd(_mm256_max_pd(v, lo_v), hi_v);
        let r = _mm256_floor_pd(_mm256_add_pd(c, half));
        _mm256_storeu_pd(p, r);
    }

    for v in values[chunks * 4..].iter_mut() {
        *v = round_half_up(clamp(*v, lo, hi));
    }
}

/// AVX2 f64 -> f32 narrowing.
///
/// # Safety
///
/// Requires the AVX2 CPU feature. Caller must verify it is available.
#[target_feature(enable = "avx2")]
pub unsafe fn narrow_row_f32_avx2(src: &[f64], dst: &mut [f32]) {
    let n = src.len().min(dst.len());
    let chunks = n / 4;
    let sp = src.as_ptr();
    let dp = dst.as_mut_ptr();

    for i in 0..chunks {
        let v = _mm256_loadu_pd(sp.add(i * 4));
        let f = _mm256_cvtpd_ps(v);
        _mm_storeu_ps(dp.add(i * 4), f);
    }

    for i in chunks * 4..n {
        dst[i] = src[i] as f32;
    }
}
