// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model hyper-parameters.
//!
//! A [`ModelConfig`] is built once, either from a named preset or from the
//! key/value metadata of a model file, and is immutable afterwards. Every
//! op shape in the graph is derived from it.

use crate::ModelError;
use std::collections::BTreeMap;
use tensor_core::DType;

// ── Metadata ───────────────────────────────────────────────────────

/// One metadata value from a model file header.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    /// Parses a header string, preferring integer, then float.
    pub fn parse(s: &str) -> Self {
        if let Ok(i) = s.parse::<i64>() {
            MetadataValue::Int(i)
        } else if let Ok(f) = s.parse::<f64>() {
            MetadataValue::Float(f)
        } else {
            MetadataValue::Str(s.to_string())
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            MetadataValue::Int(i) => u64::try_from(*i).ok(),
            MetadataValue::Float(f) if f.fract() == 0.0 && *f >= 0.0 => Some(*f as u64),
            MetadataValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            MetadataValue::Str(s) => s.parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Key/value metadata map (GGUF-style keys).
pub type Metadata = BTreeMap<String, MetadataValue>;

// ── Enumerations ───────────────────────────────────────────────────

/// Supported model architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelArch {
    Llama,
}

impl ModelArch {
    /// Metadata key prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            ModelArch::Llama => "llama",
        }
    }
}

/// Published LLaMA model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSize {
    Llama1B,
    Llama7B,
    Llama8B,
    Llama13B,
    Llama70B,
    /// Anything that does not match a published size.
    Custom,
}

impl ModelSize {
    /// Parses labels such as `"7b"` or `"llama-13b"`.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        let s = s.trim_start_matches("llama").trim_start_matches(['-', '_']);
        match s {
            "1b" => Some(ModelSize::Llama1B),
            "7b" => Some(ModelSize::Llama7B),
            "8b" => Some(ModelSize::Llama8B),
            "13b" => Some(ModelSize::Llama13B),
            "70b" => Some(ModelSize::Llama70B),
            "custom" => Some(ModelSize::Custom),
            _ => None,
        }
    }
}

/// LLaMA model generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelGeneration {
    V1,
    V2,
    V3,
}

/// KV cache layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KvCacheStrategy {
    /// One `[head_dim, kv_heads, context]` tensor per block for keys and one for values.
    #[default]
    Contiguous,
}

/// Element types per tensor category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct KernelProfile {
    /// Projection and embedding weights.
    pub weight: DType,
    /// Norm scale vectors.
    pub norm: DType,
    /// Intermediate activations.
    pub activation: DType,
    /// KV cache.
    pub kv_cache: DType,
    /// Token ids and positions.
    pub index: DType,
}

impl KernelProfile {
    const fn with_weight(weight: DType) -> Self {
        Self {
            weight,
            norm: DType::F32,
            activation: DType::F32,
            kv_cache: DType::F16,
            index: DType::I32,
        }
    }

    /// All-f32 weights.
    pub const fn f32() -> Self {
        Self::with_weight(DType::F32)
    }

    /// Half-precision weights.
    pub const fn f16() -> Self {
        Self::with_weight(DType::F16)
    }

    /// 8-bit block-quantized weights.
    pub const fn q8_0() -> Self {
        Self::with_weight(DType::Q8_0)
    }

    /// 4-bit block-quantized weights.
    pub const fn q4_0() -> Self {
        Self::with_weight(DType::Q4_0)
    }

    /// Looks up a profile by weight dtype label (`"f16"`, `"q4_0"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match DType::from_str_loose(name)? {
            DType::F32 => Some(Self::f32()),
            DType::F16 => Some(Self::f16()),
            DType::BF16 => Some(Self::with_weight(DType::BF16)),
            DType::Q8_0 => Some(Self::q8_0()),
            DType::Q4_0 => Some(Self::q4_0()),
            DType::I32 => None,
        }
    }
}

impl Default for KernelProfile {
    fn default() -> Self {
        Self::f16()
    }
}

/// Rotary embedding parameters.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RopeParams {
    /// Base of the inverse-frequency progression.
    pub freq_base: f32,
    /// Linear position scale (`1 / scale_linear`).
    pub freq_scale: f32,
    /// Number of rotated dimensions per head.
    pub dimension_count: usize,
}

// ── ModelConfig ────────────────────────────────────────────────────

/// Hyper-parameters of one LLaMA model instance.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelConfig {
    pub architecture: ModelArch,
    pub size: ModelSize,
    pub generation: ModelGeneration,
    pub kernel_profile: KernelProfile,
    #[serde(default)]
    pub kv_cache: KvCacheStrategy,
    pub rope: RopeParams,
    pub rms_norm_eps: f32,
    pub vocab_size: usize,
    pub embedding_length: usize,
    pub feed_forward_length: usize,
    pub head_count: usize,
    pub head_count_kv: usize,
    pub block_count: usize,
    pub context_length: usize,
    /// Maximum tokens per forward pass.
    pub batch_size: usize,
}

/// Shape parameters of a published size: (E, F, H, Hkv, blocks).
fn size_dims(size: ModelSize, generation: ModelGeneration) -> Option<(usize, usize, usize, usize, usize)> {
    match (size, generation) {
        (ModelSize::Llama1B, _) => Some((2048, 8192, 32, 8, 16)),
        (ModelSize::Llama7B, _) => Some((4096, 11008, 32, 32, 32)),
        (ModelSize::Llama8B, _) => Some((4096, 14336, 32, 8, 32)),
        (ModelSize::Llama13B, _) => Some((5120, 13824, 40, 40, 40)),
        (ModelSize::Llama70B, ModelGeneration::V1) => Some((8192, 22016, 64, 64, 80)),
        (ModelSize::Llama70B, _) => Some((8192, 28672, 64, 8, 80)),
        (ModelSize::Custom, _) => None,
    }
}

impl ModelConfig {
    /// Builds the configuration of a published model size.
    ///
    /// The batch size defaults to 1; use [`with_batch_size`](Self::with_batch_size)
    /// for prompt processing.
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidConfig`] for [`ModelSize::Custom`].
    pub fn preset(
        size: ModelSize,
        generation: ModelGeneration,
        kernel_profile: KernelProfile,
    ) -> Result<Self, ModelError> {
        let (embedding_length, feed_forward_length, head_count, head_count_kv, block_count) =
            size_dims(size, generation).ok_or_else(|| {
                ModelError::InvalidConfig("custom sizes have no preset; use from_metadata".into())
            })?;
        let (vocab_size, context_length, rms_norm_eps, freq_base) = match generation {
            ModelGeneration::V1 => (32000, 2048, 1e-6, 10000.0),
            ModelGeneration::V2 => (32000, 4096, 1e-5, 10000.0),
            ModelGeneration::V3 => (128256, 8192, 1e-5, 500000.0),
        };
        let config = Self {
            architecture: ModelArch::Llama,
            size,
            generation,
            kernel_profile,
            kv_cache: KvCacheStrategy::Contiguous,
            rope: RopeParams {
                freq_base,
                freq_scale: 1.0,
                dimension_count: embedding_length / head_count,
            },
            rms_norm_eps,
            vocab_size,
            embedding_length,
            feed_forward_length,
            head_count,
            head_count_kv,
            block_count,
            context_length,
            batch_size: 1,
        };
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from model-file metadata.
    ///
    /// # Errors
    /// - [`ModelError::UnsupportedArchitecture`] if `general.architecture` is not `llama`.
    /// - [`ModelError::MissingMetadata`] if a required key is absent.
    pub fn from_metadata(meta: &Metadata, kernel_profile: KernelProfile) -> Result<Self, ModelError> {
        let arch = meta
            .get("general.architecture")
            .and_then(MetadataValue::as_str)
            .ok_or_else(|| ModelError::MissingMetadata {
                key: "general.architecture".into(),
            })?;
        if arch != ModelArch::Llama.as_str() {
            return Err(ModelError::UnsupportedArchitecture(arch.to_string()));
        }

        let get_usize = |suffix: &str| -> Result<usize, ModelError> {
            let key = format!("{arch}.{suffix}");
            meta.get(&key)
                .and_then(MetadataValue::as_u64)
                .map(|v| v as usize)
                .ok_or(ModelError::MissingMetadata { key })
        };
        let get_f64 = |suffix: &str| meta.get(&format!("{arch}.{suffix}")).and_then(MetadataValue::as_f64);

        let embedding_length = get_usize("embedding_length")?;
        let head_count = get_usize("attention.head_count")?;
        let head_count_kv = get_usize("attention.head_count_kv").unwrap_or(head_count);
        let block_count = get_usize("block_count")?;
        let feed_forward_length = get_usize("feed_forward_length")?;
        let context_length = get_usize("context_length")?;
        let vocab_size = get_usize("vocab_size")?;
        let head_dim = embedding_length / head_count.max(1);
        let rms_norm_eps = get_f64("attention.layer_norm_rms_epsilon").unwrap_or(1e-5) as f32;
        let freq_base = get_f64("rope.freq_base").unwrap_or(10000.0) as f32;
        let dimension_count = get_usize("rope.dimension_count").unwrap_or(head_dim);
        let freq_scale = get_f64("rope.scale_linear").map_or(1.0, |s| 1.0 / s) as f32;

        let generation = if vocab_size >= 128_000 {
            ModelGeneration::V3
        } else if context_length >= 4096 {
            ModelGeneration::V2
        } else {
            ModelGeneration::V1
        };
        let size = [
            ModelSize::Llama1B,
            ModelSize::Llama7B,
            ModelSize::Llama8B,
            ModelSize::Llama13B,
            ModelSize::Llama70B,
        ]
        .into_iter()
        .find(|&s| {
            size_dims(s, generation)
                == Some((embedding_length, feed_forward_length, head_count, head_count_kv, block_count))
        })
        .unwrap_or(ModelSize::Custom);

        let config = Self {
            architecture: ModelArch::Llama,
            size,
            generation,
            kernel_profile,
            kv_cache: KvCacheStrategy::Contiguous,
            rope: RopeParams {
                freq_base,
                freq_scale,
                dimension_count,
            },
            rms_norm_eps,
            vocab_size,
            embedding_length,
            feed_forward_length,
            head_count,
            head_count_kv,
            block_count,
            context_length,
            batch_size: 1,
        };
        config.validate()?;
        tracing::debug!(?size, ?generation, block_count, embedding_length, "model config from metadata");
        Ok(config)
    }

    /// The metadata keys [`from_metadata`](Self::from_metadata) reads.
    pub fn to_metadata(&self) -> Metadata {
        let arch = self.architecture.as_str();
        let int = |v: usize| MetadataValue::Int(v as i64);
        let mut meta = Metadata::new();
        meta.insert("general.architecture".into(), MetadataValue::Str(arch.into()));
        for (suffix, value) in [
            ("embedding_length", self.embedding_length),
            ("feed_forward_length", self.feed_forward_length),
            ("attention.head_count", self.head_count),
            ("attention.head_count_kv", self.head_count_kv),
            ("block_count", self.block_count),
            ("context_length", self.context_length),
            ("vocab_size", self.vocab_size),
            ("rope.dimension_count", self.rope.dimension_count),
        ] {
            meta.insert(format!("{arch}.{suffix}"), int(value));
        }
        meta.insert(
            format!("{arch}.attention.layer_norm_rms_epsilon"),
            MetadataValue::Float(f64::from(self.rms_norm_eps)),
        );
        meta.insert(format!("{arch}.rope.freq_base"), MetadataValue::Float(f64::from(self.rope.freq_base)));
        if self.rope.freq_scale != 1.0 {
            meta.insert(
                format!("{arch}.rope.scale_linear"),
                MetadataValue::Float(1.0 / f64::from(self.rope.freq_scale)),
            );
        }
        meta
    }

    /// A miniature V2-style model: E=64, F=128, 4 heads over 2 KV heads,
    /// 2 blocks, vocabulary 256, context 64, batch 8.
    ///
    /// Used with synthetic weights by tests, benches and `ginfer benchmark`.
    pub fn tiny(kernel_profile: KernelProfile) -> Self {
        Self {
            architecture: ModelArch::Llama,
            size: ModelSize::Custom,
            generation: ModelGeneration::V2,
            kernel_profile,
            kv_cache: KvCacheStrategy::Contiguous,
            rope: RopeParams {
                freq_base: 10000.0,
                freq_scale: 1.0,
                dimension_count: 16,
            },
            rms_norm_eps: 1e-5,
            vocab_size: 256,
            embedding_length: 64,
            feed_forward_length: 128,
            head_count: 4,
            head_count_kv: 2,
            block_count: 2,
            context_length: 64,
            batch_size: 8,
        }
    }

    /// Returns a copy with a different maximum tokens per pass.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Returns a copy with a different context length.
    pub fn with_context_length(mut self, context_length: usize) -> Self {
        self.context_length = context_length;
        self
    }

    /// Per-head dimension.
    pub fn head_dim(&self) -> usize {
        self.embedding_length / self.head_count
    }

    /// Width of the key/value projections.
    pub fn kv_dim(&self) -> usize {
        self.head_dim() * self.head_count_kv
    }

    /// Query heads per key/value head.
    pub fn gqa_ratio(&self) -> usize {
        self.head_count / self.head_count_kv
    }

    /// Checks the structural constraints every graph shape relies on.
    pub fn validate(&self) -> Result<(), ModelError> {
        let sizes = [
            ("vocab_size", self.vocab_size),
            ("embedding_length", self.embedding_length),
            ("feed_forward_length", self.feed_forward_length),
            ("head_count", self.head_count),
            ("head_count_kv", self.head_count_kv),
            ("block_count", self.block_count),
            ("context_length", self.context_length),
            ("batch_size", self.batch_size),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(ModelError::InvalidConfig(format!("{name} must be non-zero")));
        }
        if self.head_count % self.head_count_kv != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "head_count {} is not a multiple of head_count_kv {}",
                self.head_count, self.head_count_kv
            )));
        }
        if self.embedding_length % self.head_count != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "embedding_length {} is not divisible by head_count {}",
                self.embedding_length, self.head_count
            )));
        }
        if self.head_dim() % 2 != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "head_dim {} must be even for rotary embedding",
                self.head_dim()
            )));
        }
        if self.rope.dimension_count != self.head_dim() {
            return Err(ModelError::InvalidConfig(format!(
                "partial rotary embedding ({} of {} dims) is not supported",
                self.rope.dimension_count,
                self.head_dim()
            )));
        }
        if self.batch_size > self.context_length {
            return Err(ModelError::InvalidConfig(format!(
                "batch_size {} exceeds context_length {}",
                self.batch_size, self.context_length
            )));
        }
        let p = &self.kernel_profile;
        if p.weight.is_quantized() {
            let block = p.weight.block_size();
            for (name, len) in [
                ("embedding_length", self.embedding_length),
                ("feed_forward_length", self.feed_forward_length),
            ] {
                if len % block != 0 {
                    return Err(ModelError::InvalidConfig(format!(
                        "{name} {len} is not a multiple of the {} block size {block}",
                        p.weight
                    )));
                }
            }
        }
        if p.activation != DType::F32 || p.norm.is_quantized() {
            return Err(ModelError::InvalidConfig(format!(
                "unsupported profile: activation {} / norm {}",
                p.activation, p.norm
            )));
        }
        if p.kv_cache.is_quantized() || p.kv_cache.is_integral() || !p.index.is_integral() {
            return Err(ModelError::InvalidConfig(format!(
                "unsupported profile: kv_cache {} / index {}",
                p.kv_cache, p.index
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llama_meta() -> Metadata {
        let mut m = Metadata::new();
        m.insert("general.architecture".into(), MetadataValue::Str("llama".into()));
        for (k, v) in [
            ("llama.block_count", 32),
            ("llama.embedding_length", 4096),
            ("llama.feed_forward_length", 11008),
            ("llama.attention.head_count", 32),
            ("llama.attention.head_count_kv", 32),
            ("llama.context_length", 4096),
            ("llama.vocab_size", 32000),
            ("llama.rope.dimension_count", 128),
        ] {
            m.insert(k.into(), MetadataValue::Int(v));
        }
        m.insert("llama.attention.layer_norm_rms_epsilon".into(), MetadataValue::Float(1e-5));
        m
    }

    #[test]
    fn test_7b_preset_dims() {
        let c = ModelConfig::preset(ModelSize::Llama7B, ModelGeneration::V2, KernelProfile::f16()).unwrap();
        assert_eq!(c.embedding_length, 4096);
        assert_eq!(c.head_count, 32);
        assert_eq!(c.head_count_kv, 32);
        assert_eq!(c.head_dim(), 128);
        assert_eq!(c.block_count, 32);
        assert_eq!(c.vocab_size, 32000);
        assert_eq!(c.gqa_ratio(), 1);
    }

    #[test]
    fn test_gqa_preset() {
        let c = ModelConfig::preset(ModelSize::Llama8B, ModelGeneration::V3, KernelProfile::q4_0()).unwrap();
        assert_eq!(c.kv_dim(), 1024);
        assert_eq!(c.gqa_ratio(), 4);
        assert_eq!(c.rope.freq_base, 500000.0);
    }

    #[test]
    fn test_custom_has_no_preset() {
        assert!(ModelConfig::preset(ModelSize::Custom, ModelGeneration::V1, KernelProfile::f32()).is_err());
    }

    #[test]
    fn test_tiny_validates_for_every_profile() {
        for profile in [KernelProfile::f32(), KernelProfile::f16(), KernelProfile::q8_0(), KernelProfile::q4_0()] {
            let c = ModelConfig::tiny(profile);
            c.validate().unwrap();
            assert_eq!(c.head_dim(), 16);
            assert_eq!(c.gqa_ratio(), 2);
        }
    }

    #[test]
    fn test_metadata_roundtrip() {
        let c = ModelConfig::tiny(KernelProfile::f32());
        let back = ModelConfig::from_metadata(&c.to_metadata(), KernelProfile::f32()).unwrap();
        assert_eq!(back.embedding_length, c.embedding_length);
        assert_eq!(back.head_count_kv, c.head_count_kv);
        assert_eq!(back.block_count, c.block_count);
        assert_eq!(back.rope, c.rope);
        assert_eq!(back.rms_norm_eps, c.rms_norm_eps);
        assert_eq!(back.size, ModelSize::Custom);
    }

    #[test]
    fn test_from_metadata_detects_size() {
        let c = ModelConfig::from_metadata(&llama_meta(), KernelProfile::q8_0()).unwrap();
        assert_eq!(c.size, ModelSize::Llama7B);
        assert_eq!(c.generation, ModelGeneration::V2);
        assert_eq!(c.kernel_profile.weight, DType::Q8_0);
    }

    #[test]
    fn test_from_metadata_rope_scale() {
        let mut m = llama_meta();
        m.insert("llama.rope.scale_linear".into(), MetadataValue::Float(4.0));
        let c = ModelConfig::from_metadata(&m, KernelProfile::f32()).unwrap();
        assert_eq!(c.rope.freq_scale, 0.25);
    }

    #[test]
    fn test_from_metadata_missing_key() {
        let mut m = llama_meta();
        m.remove("llama.block_count");
        let err = ModelConfig::from_metadata(&m, KernelProfile::f32()).unwrap_err();
        assert!(matches!(err, ModelError::MissingMetadata { key } if key == "llama.block_count"));
    }

    #[test]
    fn test_from_metadata_rejects_other_arch() {
        let mut m = llama_meta();
        m.insert("general.architecture".into(), MetadataValue::Str("gpt2".into()));
        assert!(matches!(
            ModelConfig::from_metadata(&m, KernelProfile::f32()),
            Err(ModelError::UnsupportedArchitecture(a)) if a == "gpt2"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_heads() {
        let mut c = ModelConfig::preset(ModelSize::Llama7B, ModelGeneration::V1, KernelProfile::f32()).unwrap();
        c.head_count_kv = 5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_partial_quant_rows() {
        let mut c = ModelConfig::preset(ModelSize::Llama7B, ModelGeneration::V1, KernelProfile::q4_0()).unwrap();
        c.feed_forward_length = 11000;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_metadata_value_parse() {
        assert_eq!(MetadataValue::parse("32"), MetadataValue::Int(32));
        assert_eq!(MetadataValue::parse("1e-5"), MetadataValue::Float(1e-5));
        assert_eq!(MetadataValue::parse("llama").as_str(), Some("llama"));
        assert_eq!(MetadataValue::Float(128.0).as_u64(), Some(128));
    }

    #[test]
    fn test_size_labels() {
        assert_eq!(ModelSize::from_str_loose("7b"), Some(ModelSize::Llama7B));
        assert_eq!(ModelSize::from_str_loose("llama-70b"), Some(ModelSize::Llama70B));
        assert_eq!(ModelSize::from_str_loose("3b"), None);
    }

    #[test]
    fn test_profile_from_name() {
        assert_eq!(KernelProfile::from_name("q4_0"), Some(KernelProfile::q4_0()));
        assert_eq!(KernelProfile::from_name("i32"), None);
    }
}
