// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Row encoders and decoders for every storage dtype.
//!
//! Kernels compute in `f32`. Any row that is not already a packed `f32`
//! row is decoded into a scratch buffer first. Block layouts follow the
//! GGML convention:
//!
//! - `Q8_0`: `f16` scale, then 32 `i8` values; `x = scale * q`.
//! - `Q4_0`: `f16` scale, then 16 bytes. The low nibble of byte `j` is
//!   element `j`, the high nibble element `j + 16`; `x = (q - 8) * scale`.

use crate::{DType, TensorError};
use half::{bf16, f16};

const QK: usize = 32;

/// Decodes one row of `dst.len()` logical elements from `src`.
///
/// `src` must hold at least `byte_len(dtype, dst.len())` bytes.
///
/// # Errors
/// Returns [`TensorError::PartialBlock`] if a quantized row length is not a
/// multiple of 32, or [`TensorError::BufferSizeMismatch`] if `src` is short.
pub fn decode_row(dtype: DType, src: &[u8], dst: &mut [f32]) -> Result<(), TensorError> {
    let n = dst.len();
    check_row(dtype, src.len(), n)?;
    match dtype {
        DType::F32 => {
            for (d, b) in dst.iter_mut().zip(src.chunks_exact(4)) {
                *d = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            }
        }
        DType::F16 => {
            for (d, b) in dst.iter_mut().zip(src.chunks_exact(2)) {
                *d = f16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32();
            }
        }
        DType::BF16 => {
            for (d, b) in dst.iter_mut().zip(src.chunks_exact(2)) {
                *d = bf16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32();
            }
        }
        DType::I32 => {
            for (d, b) in dst.iter_mut().zip(src.chunks_exact(4)) {
                *d = i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32;
            }
        }
        DType::Q8_0 => {
            for (out, block) in dst.chunks_exact_mut(QK).zip(src.chunks_exact(34)) {
                let scale = f16::from_bits(u16::from_le_bytes([block[0], block[1]])).to_f32();
                for (o, &q) in out.iter_mut().zip(&block[2..]) {
                    *o = scale * (q as i8) as f32;
                }
            }
        }
        DType::Q4_0 => {
            for (out, block) in dst.chunks_exact_mut(QK).zip(src.chunks_exact(18)) {
                let scale = f16::from_bits(u16::from_le_bytes([block[0], block[1]])).to_f32();
                let (lo, hi) = out.split_at_mut(QK / 2);
                for (j, &byte) in block[2..].iter().enumerate() {
                    lo[j] = ((byte & 0x0F) as i32 - 8) as f32 * scale;
                    hi[j] = ((byte >> 4) as i32 - 8) as f32 * scale;
                }
            }
        }
    }
    Ok(())
}

/// Encodes one row of `src.len()` elements into `dst` as `dtype`.
///
/// # Errors
/// Same conditions as [`decode_row`].
pub fn encode_row(dtype: DType, src: &[f32], dst: &mut [u8]) -> Result<(), TensorError> {
    let n = src.len();
    check_row(dtype, dst.len(), n)?;
    match dtype {
        DType::F32 => {
            for (b, &v) in dst.chunks_exact_mut(4).zip(src) {
                b.copy_from_slice(&v.to_le_bytes());
            }
        }
        DType::F16 => {
            for (b, &v) in dst.chunks_exact_mut(2).zip(src) {
                b.copy_from_slice(&f16::from_f32(v).to_bits().to_le_bytes());
            }
        }
        DType::BF16 => {
            for (b, &v) in dst.chunks_exact_mut(2).zip(src) {
                b.copy_from_slice(&bf16::from_f32(v).to_bits().to_le_bytes());
            }
        }
        DType::I32 => {
            for (b, &v) in dst.chunks_exact_mut(4).zip(src) {
                b.copy_from_slice(&(v as i32).to_le_bytes());
            }
        }
        DType::Q8_0 => {
            for (block, vals) in dst.chunks_exact_mut(34).zip(src.chunks_exact(QK)) {
                let amax = vals.iter().fold(0.0f32, |m, v| m.max(v.abs()));
                let scale = amax / 127.0;
                let inv = if scale != 0.0 { 1.0 / scale } else { 0.0 };
                block[..2].copy_from_slice(&f16::from_f32(scale).to_bits().to_le_bytes());
                for (q, &v) in block[2..].iter_mut().zip(vals) {
                    *q = ((v * inv).round() as i8) as u8;
                }
            }
        }
        DType::Q4_0 => {
            for (block, vals) in dst.chunks_exact_mut(18).zip(src.chunks_exact(QK)) {
                // Signed value with the largest magnitude maps to -8.
                let max = vals
                    .iter()
                    .fold(0.0f32, |m, &v| if v.abs() > m.abs() { v } else { m });
                let scale = max / -8.0;
                let inv = if scale != 0.0 { 1.0 / scale } else { 0.0 };
                block[..2].copy_from_slice(&f16::from_f32(scale).to_bits().to_le_bytes());
                for j in 0..QK / 2 {
                    let lo = ((vals[j] * inv + 8.5) as i32).clamp(0, 15) as u8;
                    let hi = ((vals[j + QK / 2] * inv + 8.5) as i32).clamp(0, 15) as u8;
                    block[2 + j] = lo | (hi << 4);
                }
            }
        }
    }
    Ok(())
}

/// Bytes occupied by a packed row of `n` elements.
pub fn byte_len(dtype: DType, n: usize) -> usize {
    n.div_ceil(dtype.block_size()) * dtype.type_size()
}

/// Reads one non-quantized element at `ptr` as `f32`.
///
/// # Safety
/// `ptr` must point at `dtype.type_size()` readable bytes. Alignment is not
/// required.
pub unsafe fn read_scalar(dtype: DType, ptr: *const u8) -> f32 {
    match dtype {
        DType::F32 => std::ptr::read_unaligned(ptr.cast::<f32>()),
        DType::F16 => f16::from_bits(std::ptr::read_unaligned(ptr.cast::<u16>())).to_f32(),
        DType::BF16 => bf16::from_bits(std::ptr::read_unaligned(ptr.cast::<u16>())).to_f32(),
        DType::I32 => std::ptr::read_unaligned(ptr.cast::<i32>()) as f32,
        DType::Q8_0 | DType::Q4_0 => {
            unreachable!("scalar access into a block-quantized tensor")
        }
    }
}

/// Writes one non-quantized element at `ptr`.
///
/// # Safety
/// `ptr` must point at `dtype.type_size()` writable bytes.
pub unsafe fn write_scalar(dtype: DType, ptr: *mut u8, v: f32) {
    match dtype {
        DType::F32 => std::ptr::write_unaligned(ptr.cast::<f32>(), v),
        DType::F16 => std::ptr::write_unaligned(ptr.cast::<u16>(), f16::from_f32(v).to_bits()),
        DType::BF16 => std::ptr::write_unaligned(ptr.cast::<u16>(), bf16::from_f32(v).to_bits()),
        DType::I32 => std::ptr::write_unaligned(ptr.cast::<i32>(), v as i32),
        DType::Q8_0 | DType::Q4_0 => {
            unreachable!("scalar access into a block-quantized tensor")
        }
    }
}

fn check_row(dtype: DType, bytes: usize, n: usize) -> Result<(), TensorError> {
    if dtype.is_quantized() && n % dtype.block_size() != 0 {
        return Err(TensorError::PartialBlock { dtype, len: n });
    }
    let expected = byte_len(dtype, n);
    if bytes < expected {
        return Err(TensorError::BufferSizeMismatch {
            expected,
            actual: bytes,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| (i as f32 - n as f32 / 2.0) / 8.0).collect()
    }

    #[test]
    fn test_q8_0_decode_known_block() {
        let mut block = vec![0u8; 34];
        block[..2].copy_from_slice(&f16::from_f32(0.5).to_bits().to_le_bytes());
        for i in 0..32 {
            block[2 + i] = (i as i8 - 16) as u8;
        }
        let mut out = vec![0.0f32; 32];
        decode_row(DType::Q8_0, &block, &mut out).unwrap();
        for (i, v) in out.iter().enumerate() {
            assert_eq!(*v, 0.5 * (i as f32 - 16.0));
        }
    }

    #[test]
    fn test_q4_0_nibble_order() {
        let mut block = vec![0u8; 18];
        block[..2].copy_from_slice(&f16::from_f32(1.0).to_bits().to_le_bytes());
        // low nibble 9 -> +1 at j, high nibble 5 -> -3 at j + 16.
        for b in block[2..].iter_mut() {
            *b = 0x59;
        }
        let mut out = vec![0.0f32; 32];
        decode_row(DType::Q4_0, &block, &mut out).unwrap();
        assert!(out[..16].iter().all(|&v| v == 1.0));
        assert!(out[16..].iter().all(|&v| v == -3.0));
    }

    #[test]
    fn test_quantized_encoding_is_close() {
        let src = ramp(64);
        for (dtype, tol) in [(DType::Q8_0, 0.02), (DType::Q4_0, 0.3), (DType::F16, 1e-3)] {
            let mut bytes = vec![0u8; byte_len(dtype, 64)];
            encode_row(dtype, &src, &mut bytes).unwrap();
            let mut back = vec![0.0f32; 64];
            decode_row(dtype, &bytes, &mut back).unwrap();
            for (a, b) in src.iter().zip(&back) {
                assert!((a - b).abs() <= tol, "{dtype}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_partial_block_rejected() {
        let mut out = vec![0.0f32; 20];
        let err = decode_row(DType::Q8_0, &[0u8; 34], &mut out).unwrap_err();
        assert!(matches!(err, TensorError::PartialBlock { .. }));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut out = vec![0.0f32; 4];
        assert!(decode_row(DType::F32, &[0u8; 8], &mut out).is_err());
    }

    #[test]
    fn test_scalar_roundtrip_unaligned() {
        let mut buf = [0u8; 9];
        unsafe {
            write_scalar(DType::F32, buf.as_mut_ptr().add(1), 2.5);
            assert_eq!(read_scalar(DType::F32, buf.as_ptr().add(1)), 2.5);
            write_scalar(DType::F16, buf.as_mut_ptr().add(5), -1.5);
            assert_eq!(read_scalar(DType::F16, buf.as_ptr().add(5)), -1.5);
        }
    }
}
