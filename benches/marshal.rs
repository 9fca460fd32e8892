//! Benchmarks for tensor marshaling

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use inferlink::{DType, InferInput, InferOutput};

fn bench_input_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("input_encode");

    for size in [256usize, 4096, 65536].iter() {
        let values: Vec<f32> = (0..*size).map(|i| i as f32).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                InferInput::from_f32("input0", vec![size as i64], black_box(&values)).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_output_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_decode");

    for size in [256usize, 4096, 65536].iter() {
        let mut data = Vec::with_capacity(size * 4);
        for i in 0..*size {
            data.extend_from_slice(&(i as f32).to_le_bytes());
        }
        let output = InferOutput {
            name: "output0".to_string(),
            dtype: DType::Fp32,
            shape: vec![*size as i64],
            data: Bytes::from(data),
        };
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(&output).as_f32().unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_input_encode, bench_output_decode);
criterion_main!(benches);
