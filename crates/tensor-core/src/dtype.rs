// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Supported tensor element data types.
//!
//! Quantized types store `block_size()` logical elements in one physical
//! block of `type_size()` bytes. Non-quantized types have a block size of 1.

/// Enumerates the element types an op can produce or consume.
///
/// The graph uses `DType` to size arena slices, derive byte strides, and
/// pick the row decoder used by the kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    /// 32-bit IEEE 754 floating point.
    F32,
    /// 16-bit IEEE 754 floating point.
    F16,
    /// 16-bit brain floating point.
    BF16,
    /// 32-bit signed integer (token ids, positions).
    I32,
    /// 32 weights sharing one f16 scale, stored as i8.
    #[serde(rename = "q8_0")]
    Q8_0,
    /// 32 weights sharing one f16 scale, stored as packed 4-bit nibbles.
    #[serde(rename = "q4_0")]
    Q4_0,
}

impl DType {
    /// Bytes occupied by one physical block.
    pub const fn type_size(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::BF16 => 2,
            DType::I32 => 4,
            DType::Q8_0 => 34, // f16 scale + 32 x i8
            DType::Q4_0 => 18, // f16 scale + 16 bytes of nibbles
        }
    }

    /// Logical elements per physical block (quantization group size).
    pub const fn block_size(self) -> usize {
        match self {
            DType::Q8_0 | DType::Q4_0 => 32,
            _ => 1,
        }
    }

    /// Returns `true` for block-quantized types.
    pub const fn is_quantized(self) -> bool {
        self.block_size() > 1
    }

    /// Returns `true` for integer index types.
    pub const fn is_integral(self) -> bool {
        matches!(self, DType::I32)
    }

    /// Returns `true` if kernels can read this type as a float row.
    pub const fn is_float_like(self) -> bool {
        !self.is_integral()
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::I32 => "i32",
            DType::Q8_0 => "q8_0",
            DType::Q4_0 => "q4_0",
        }
    }

    /// Parses a dtype label, accepting common aliases.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "f32" | "float32" | "float" => Some(DType::F32),
            "f16" | "float16" | "half" => Some(DType::F16),
            "bf16" | "bfloat16" => Some(DType::BF16),
            "i32" | "int32" => Some(DType::I32),
            "q8_0" | "q8" => Some(DType::Q8_0),
            "q4_0" | "q4" => Some(DType::Q4_0),
            _ => None,
        }
    }

    /// Maps a GGML numeric type id onto a supported dtype.
    pub fn from_ggml_type(id: u32) -> Option<Self> {
        match id {
            0 => Some(DType::F32),
            1 => Some(DType::F16),
            2 => Some(DType::Q4_0),
            8 => Some(DType::Q8_0),
            26 => Some(DType::I32),
            30 => Some(DType::BF16),
            _ => None,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
