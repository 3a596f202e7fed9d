// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the reference kernels.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tensor_core::{ops, quant, DType, Shape, TensorRef};

fn filled(n: usize) -> Vec<f32> {
    (0..n).map(|i| ((i as f32) * 0.013).sin()).collect()
}

fn bench_mul_mat(c: &mut Criterion) {
    let mut group = c.benchmark_group("mul_mat");
    let (k, m) = (1024, 256);

    for dtype in [DType::F32, DType::F16, DType::Q8_0, DType::Q4_0] {
        let weights = filled(k * m);
        let mut packed = vec![0u8; Shape::matrix(k, m).byte_size(dtype)];
        let row_bytes = quant::byte_len(dtype, k);
        for (src, dst) in weights.chunks(k).zip(packed.chunks_mut(row_bytes)) {
            quant::encode_row(dtype, src, dst).unwrap();
        }
        let mut x = filled(k);
        let mut out = vec![0.0f32; m];
        let a = TensorRef::from_bytes(&mut packed, dtype, Shape::matrix(k, m)).unwrap();
        let b = TensorRef::from_f32_slice(&mut x, Shape::vector(k)).unwrap();
        let dst = TensorRef::from_f32_slice(&mut out, Shape::vector(m)).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(dtype), &dtype, |bench, _| {
            bench.iter(|| unsafe { ops::mul_mat(black_box(&dst), &a, &b, 0..m) }.unwrap());
        });
    }
    group.finish();
}

fn bench_softmax(c: &mut Criterion) {
    let (n, rows) = (512, 32);
    let mut x = filled(n * rows);
    let mut out = vec![0.0f32; n * rows];
    let src = TensorRef::from_f32_slice(&mut x, Shape::matrix(n, rows)).unwrap();
    let dst = TensorRef::from_f32_slice(&mut out, Shape::matrix(n, rows)).unwrap();

    c.bench_function("softmax_512x32", |bench| {
        bench.iter(|| unsafe { ops::softmax(black_box(&dst), &src, None, 0.125, 0..rows) }.unwrap());
    });
}

fn bench_rms_norm(c: &mut Criterion) {
    let (n, rows) = (4096, 8);
    let mut x = filled(n * rows);
    let mut out = vec![0.0f32; n * rows];
    let src = TensorRef::from_f32_slice(&mut x, Shape::matrix(n, rows)).unwrap();
    let dst = TensorRef::from_f32_slice(&mut out, Shape::matrix(n, rows)).unwrap();

    c.bench_function("rms_norm_4096x8", |bench| {
        bench.iter(|| unsafe { ops::rms_norm(black_box(&dst), &src, 1e-5, 0..rows) }.unwrap());
    });
}

criterion_group!(benches, bench_mul_mat, bench_softmax, bench_rms_norm);
criterion_main!(benches);
