// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight loading and zero-copy binding.
//!
//! [`WeightLoader`] provides two modes:
//!
//! 1. **File-backed**: memory-maps the weight file of a model directory and
//!    binds every weight op straight into the mapping. A directory holds
//!    either `catalog.json` + `weights.bin` (the catalog written by an
//!    external GGUF parser) or a single `model.safetensors`.
//! 2. **Synthetic**: generates deterministic weights for a graph into an
//!    owned arena, for tests and benchmarks without model files.

use crate::storage::StorageMap;
use crate::RuntimeError;
use memory_manager::{round_up, ArenaSlice, MemoryArena};
use model_ir::{names::gguf_name, OpGraph, OpRole, TensorCatalog, TensorRecord, Validated};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tensor_core::quant;

/// Catalog filename of a GGUF-derived model directory.
pub const CATALOG_FILE: &str = "catalog.json";
/// Raw weight blob the catalog offsets point into.
pub const WEIGHTS_FILE: &str = "weights.bin";
/// Single-file SafeTensors checkpoint.
pub const SAFETENSORS_FILE: &str = "model.safetensors";

enum Backing {
    Mapped(memmap2::Mmap),
    Owned(MemoryArena),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(mmap) => &mmap[..],
            Backing::Owned(arena) => arena.bytes(ArenaSlice {
                offset: 0,
                len: arena.capacity(),
            }),
        }
    }
}

/// Owns the weight bytes and the catalog describing them.
pub struct WeightLoader {
    source: PathBuf,
    catalog: TensorCatalog,
    backing: Backing,
}

fn load_error(tensor: &str, detail: impl Into<String>) -> RuntimeError {
    RuntimeError::WeightLoadError {
        tensor: tensor.to_string(),
        detail: detail.into(),
    }
}

fn map_file(path: &Path) -> Result<memmap2::Mmap, RuntimeError> {
    let file = std::fs::File::open(path)
        .map_err(|e| load_error("<file>", format!("cannot open '{}': {e}", path.display())))?;
    // SAFETY: the mapping is read-only; the file must not be truncated while
    // the engine runs.
    let mmap = unsafe { memmap2::Mmap::map(&file) }
        .map_err(|e| load_error("<file>", format!("mmap of '{}' failed: {e}", path.display())))?;
    tracing::info!(
        "weight loader: mmap'd {} ({:.2} MB)",
        path.display(),
        mmap.len() as f64 / (1024.0 * 1024.0),
    );
    Ok(mmap)
}

impl WeightLoader {
    /// Opens a model directory (or a `.safetensors` file directly).
    ///
    /// # Errors
    /// [`RuntimeError::WeightLoadError`] if neither layout is present or a
    /// file cannot be mapped; [`RuntimeError::ModelError`] for a malformed
    /// catalog or header.
    pub fn open(path: &Path) -> Result<Self, RuntimeError> {
        let catalog_path = path.join(CATALOG_FILE);
        let safetensors_path = if path.is_file() {
            path.to_path_buf()
        } else {
            path.join(SAFETENSORS_FILE)
        };

        let (catalog, mmap) = if catalog_path.is_file() {
            let catalog = TensorCatalog::from_file(&catalog_path)?;
            (catalog, map_file(&path.join(WEIGHTS_FILE))?)
        } else if safetensors_path.is_file() {
            let mmap = map_file(&safetensors_path)?;
            (TensorCatalog::from_safetensors(&mmap)?, mmap)
        } else {
            return Err(load_error(
                "<model>",
                format!(
                    "'{}' has neither {CATALOG_FILE} nor {SAFETENSORS_FILE}",
                    path.display()
                ),
            ));
        };

        tracing::info!(tensors = catalog.tensors.len(), "weight catalog loaded");
        Ok(Self {
            source: path.to_path_buf(),
            catalog,
            backing: Backing::Mapped(mmap),
        })
    }

    /// Generates deterministic weights for every weight op of `graph`.
    ///
    /// Norm scales are drawn near 1.0, everything else uniformly in
    /// `±1/sqrt(ne0)`, then encoded to each op's dtype. The catalog carries
    /// GGUF names and the config's metadata, so [`export`](Self::export)
    /// produces a directory [`open`](Self::open) can read back.
    pub fn synthetic(graph: &OpGraph<Validated>, seed: u64) -> Result<Self, RuntimeError> {
        let weights: Vec<_> = graph
            .instances()
            .filter(|inst| graph.op(inst.kind).role == OpRole::Weight)
            .collect();
        let total: usize = weights
            .iter()
            .map(|inst| round_up(graph.op(inst.kind).total_required_bytes()))
            .sum();

        let mut arena = MemoryArena::new(total)?;
        let mut catalog = TensorCatalog {
            metadata: graph.config().to_metadata(),
            ..TensorCatalog::default()
        };
        let mut rng = StdRng::seed_from_u64(seed);

        for inst in weights {
            let op = graph.op(inst.kind);
            let name = gguf_name(inst.kind, inst.block).unwrap_or_else(|| inst.to_string());
            let slice = arena.carve(op.name, inst.block, op.total_required_bytes())?;

            let ne0 = op.shape.dim(0);
            let row_bytes = quant::byte_len(op.dtype, ne0);
            let is_norm = op.shape.rank() == 1;
            let scale = 1.0 / (ne0 as f32).sqrt();
            let mut row = vec![0.0f32; ne0];
            let bytes = arena.bytes_mut(slice);
            for dst in bytes.chunks_exact_mut(row_bytes).take(op.shape.num_rows()) {
                for v in row.iter_mut() {
                    *v = if is_norm {
                        1.0 + rng.gen_range(-0.1f32..0.1)
                    } else {
                        rng.gen_range(-scale..scale)
                    };
                }
                quant::encode_row(op.dtype, &row, dst).map_err(|e| load_error(&name, e.to_string()))?;
            }

            let dims = op.shape.dims();
            catalog.tensors.insert(
                name,
                TensorRecord {
                    dims: dims[..op.shape.rank()].to_vec(),
                    dtype: op.dtype.as_str().to_string(),
                    byte_offset: slice.offset,
                },
            );
        }

        tracing::info!(
            tensors = catalog.tensors.len(),
            mb = total as f64 / (1024.0 * 1024.0),
            seed,
            "synthetic weights generated"
        );
        Ok(Self {
            source: PathBuf::from("<synthetic>"),
            catalog,
            backing: Backing::Owned(arena),
        })
    }

    /// Points every weight slot of `storage` into the backing bytes.
    ///
    /// # Errors
    /// - [`RuntimeError::ModelError`] if a weight is missing or its dims or
    ///   dtype disagree with the op.
    /// - [`RuntimeError::WeightLoadError`] if a tensor's byte range falls
    ///   outside the weight file.
    pub fn bind(&self, graph: &OpGraph<Validated>, storage: &mut StorageMap) -> Result<usize, RuntimeError> {
        let bytes = self.backing.bytes();
        let entries = self.catalog.weight_entries(graph)?;
        for entry in &entries {
            let end = entry.byte_offset.checked_add(entry.byte_len);
            if end.map_or(true, |end| end > bytes.len()) {
                return Err(load_error(
                    &entry.name,
                    format!(
                        "bytes [{}, +{}) outside weight data of {} bytes",
                        entry.byte_offset,
                        entry.byte_len,
                        bytes.len()
                    ),
                ));
            }
            let ptr = NonNull::new(bytes[entry.byte_offset..].as_ptr() as *mut u8)
                .ok_or_else(|| load_error(&entry.name, "null weight pointer"))?;
            storage.bind_weight(graph.instance_id(entry.instance), ptr);
            tracing::trace!(tensor = %entry.name, offset = entry.byte_offset, "weight bound");
        }
        storage.check_bound(graph)?;
        tracing::info!(weights = entries.len(), "weights bound");
        Ok(entries.len())
    }

    /// Writes `catalog.json` and `weights.bin` into `dir`.
    pub fn export(&self, dir: &Path) -> Result<(), RuntimeError> {
        let io = |e: std::io::Error| load_error("<export>", format!("{}: {e}", dir.display()));
        std::fs::create_dir_all(dir).map_err(io)?;
        std::fs::write(dir.join(CATALOG_FILE), self.catalog.to_json()?).map_err(io)?;
        std::fs::write(dir.join(WEIGHTS_FILE), self.backing.bytes()).map_err(io)?;
        tracing::info!(dir = %dir.display(), "weights exported");
        Ok(())
    }

    pub fn catalog(&self) -> &TensorCatalog {
        &self.catalog
    }

    /// Returns `true` if the weights come from a mapped file.
    pub fn is_file_backed(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    /// Path the weights came from, or `<synthetic>`.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Bytes of weight data.
    pub fn size_bytes(&self) -> usize {
        self.backing.bytes().len()
    }
}

impl std::fmt::Debug for WeightLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightLoader")
            .field("source", &self.source)
            .field("file_backed", &self.is_file_backed())
            .field("tensors", &self.catalog.tensors.len())
            .finish()
    }
}
