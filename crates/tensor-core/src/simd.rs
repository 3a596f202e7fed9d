// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Vectorised row primitives with runtime dispatch.
//!
//! On `x86_64` the AVX2 path is chosen when the CPU supports it; on
//! `aarch64` NEON is always available. Every other target uses the scalar
//! loops, which are also exported so tests can compare both paths.
//!
//! Elementwise `mul` and `add` produce bit-identical results on every path.
//! `dot` may differ in the last bits because lanes are summed in a
//! different order.

/// `out[i] = a[i] * b[i]`.
#[inline]
pub fn mul(a: &[f32], b: &[f32], out: &mut [f32]) {
    debug_assert!(a.len() == out.len() && b.len() == out.len());

    #[cfg(target_arch = "x86_64")]
    {
        if out.len() >= 8 && is_x86_feature_detected!("avx2") {
            // SAFETY: AVX2 support checked above; lengths checked by caller.
            unsafe { x86::mul_avx2(a, b, out) };
            return;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        if out.len() >= 4 {
            // SAFETY: NEON is part of the aarch64 baseline.
            unsafe { neon::mul(a, b, out) };
            return;
        }
    }
    mul_scalar(a, b, out)
}

/// `out[i] = a[i] + b[i]`.
#[inline]
pub fn add(a: &[f32], b: &[f32], out: &mut [f32]) {
    debug_assert!(a.len() == out.len() && b.len() == out.len());

    #[cfg(target_arch = "x86_64")]
    {
        if out.len() >= 8 && is_x86_feature_detected!("avx2") {
            // SAFETY: AVX2 support checked above.
            unsafe { x86::add_avx2(a, b, out) };
            return;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        if out.len() >= 4 {
            // SAFETY: NEON is part of the aarch64 baseline.
            unsafe { neon::add(a, b, out) };
            return;
        }
    }
    add_scalar(a, b, out)
}

/// Dot product of two equally long rows.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if a.len() >= 8 && is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            // SAFETY: AVX2 and FMA support checked above.
            return unsafe { x86::dot_avx2(a, b) };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        if a.len() >= 4 {
            // SAFETY: NEON is part of the aarch64 baseline.
            return unsafe { neon::dot(a, b) };
        }
    }
    dot_scalar(a, b)
}

/// Portable `mul`.
pub fn mul_scalar(a: &[f32], b: &[f32], out: &mut [f32]) {
    for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
        *o = x * y;
    }
}

/// Portable `add`.
pub fn add_scalar(a: &[f32], b: &[f32], out: &mut [f32]) {
    for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
        *o = x + y;
    }
}

/// Portable `dot`.
pub fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use std::arch::x86_64::{
        _mm256_add_ps, _mm256_castps256_ps128, _mm256_extractf128_ps, _mm256_fmadd_ps,
        _mm256_loadu_ps, _mm256_mul_ps, _mm256_setzero_ps, _mm256_storeu_ps, _mm_add_ps,
        _mm_cvtss_f32, _mm_hadd_ps,
    };

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn mul_avx2(a: &[f32], b: &[f32], out: &mut [f32]) {
        let n = out.len();
        let chunks = n / 8;
        for i in 0..chunks {
            let off = i * 8;
            let va = _mm256_loadu_ps(a.as_ptr().add(off));
            let vb = _mm256_loadu_ps(b.as_ptr().add(off));
            _mm256_storeu_ps(out.as_mut_ptr().add(off), _mm256_mul_ps(va, vb));
        }
        for i in chunks * 8..n {
            out[i] = a[i] * b[i];
        }
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn add_avx2(a: &[f32], b: &[f32], out: &mut [f32]) {
        let n = out.len();
        let chunks = n / 8;
        for i in 0..chunks {
            let off = i * 8;
            let va = _mm256_loadu_ps(a.as_ptr().add(off));
            let vb = _mm256_loadu_ps(b.as_ptr().add(off));
            _mm256_storeu_ps(out.as_mut_ptr().add(off), _mm256_add_ps(va, vb));
        }
        for i in chunks * 8..n {
            out[i] = a[i] + b[i];
        }
    }

    #[target_feature(enable = "avx2", enable = "fma")]
    pub(super) unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len();
        let chunks = n / 8;
        let mut acc = _mm256_setzero_ps();
        for i in 0..chunks {
            let off = i * 8;
            let va = _mm256_loadu_ps(a.as_ptr().add(off));
            let vb = _mm256_loadu_ps(b.as_ptr().add(off));
            acc = _mm256_fmadd_ps(va, vb, acc);
        }
        let hi = _mm256_extractf128_ps(acc, 1);
        let lo = _mm256_castps256_ps128(acc);
        let s = _mm_add_ps(lo, hi);
        let s = _mm_hadd_ps(s, s);
        let s = _mm_hadd_ps(s, s);
        let mut sum = _mm_cvtss_f32(s);
        for i in chunks * 8..n {
            sum += a[i] * b[i];
        }
        sum
    }
}

#[cfg(target_arch = "aarch64")]
mod neon {
    use std::arch::aarch64::{vaddq_f32, vaddvq_f32, vdupq_n_f32, vfmaq_f32, vld1q_f32, vmulq_f32, vst1q_f32};

    pub(super) unsafe fn mul(a: &[f32], b: &[f32], out: &mut [f32]) {
        let n = out.len();
        let chunks = n / 4;
        for i in 0..chunks {
            let off = i * 4;
            let va = vld1q_f32(a.as_ptr().add(off));
            let vb = vld1q_f32(b.as_ptr().add(off));
            vst1q_f32(out.as_mut_ptr().add(off), vmulq_f32(va, vb));
        }
        for i in chunks * 4..n {
            out[i] = a[i] * b[i];
        }
    }

    pub(super) unsafe fn add(a: &[f32], b: &[f32], out: &mut [f32]) {
        let n = out.len();
        let chunks = n / 4;
        for i in 0..chunks {
            let off = i * 4;
            let va = vld1q_f32(a.as_ptr().add(off));
            let vb = vld1q_f32(b.as_ptr().add(off));
            vst1q_f32(out.as_mut_ptr().add(off), vaddq_f32(va, vb));
        }
        for i in chunks * 4..n {
            out[i] = a[i] + b[i];
        }
    }

    pub(super) unsafe fn dot(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len();
        let chunks = n / 4;
        let mut acc = vdupq_n_f32(0.0);
        for i in 0..chunks {
            let off = i * 4;
            acc = vfmaq_f32(acc, vld1q_f32(a.as_ptr().add(off)), vld1q_f32(b.as_ptr().add(off)));
        }
        let mut sum = vaddvq_f32(acc);
        for i in chunks * 4..n {
            sum += a[i] * b[i];
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize, seed: f32) -> Vec<f32> {
        (0..n).map(|i| ((i as f32 + seed) * 0.37).sin()).collect()
    }

    #[test]
    fn test_mul_matches_scalar_bitwise() {
        for n in [1, 7, 8, 9, 31, 64, 67] {
            let a = sample(n, 1.0);
            let b = sample(n, 2.0);
            let mut fast = vec![0.0; n];
            let mut slow = vec![0.0; n];
            mul(&a, &b, &mut fast);
            mul_scalar(&a, &b, &mut slow);
            assert_eq!(fast, slow, "n = {n}");
        }
    }

    #[test]
    fn test_add_matches_scalar_bitwise() {
        let a = sample(37, 3.0);
        let b = sample(37, 4.0);
        let mut fast = vec![0.0; 37];
        let mut slow = vec![0.0; 37];
        add(&a, &b, &mut fast);
        add_scalar(&a, &b, &mut slow);
        assert_eq!(fast, slow);
    }

    #[test]
    fn test_dot_close_to_scalar() {
        let a = sample(129, 5.0);
        let b = sample(129, 6.0);
        assert!((dot(&a, &b) - dot_scalar(&a, &b)).abs() < 1e-4);
        assert_eq!(dot(&[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0]), 70.0);
    }
}
