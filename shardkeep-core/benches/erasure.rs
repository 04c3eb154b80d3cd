//! Benchmarks for the Cauchy erasure coder
//!
//! Run with: cargo bench --package shardkeep-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shardkeep_core::erasure::{ErasureCoder, WordWidth};

/// Generate test data of specified size
fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// Benchmark encoding at various data sizes
fn bench_encode(c: &mut Criterion) {
    let coder = ErasureCoder::new(5, 3, WordWidth::W8).unwrap();

    let mut group = c.benchmark_group("erasure_encode");

    for size in [
        64 * 1024,       // 64 KB
        1024 * 1024,     // 1 MB
        4 * 1024 * 1024, // 4 MB
    ] {
        let data = generate_data(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new("streaming", format!("{}KB", size / 1024)),
            &data,
            |b, data| {
                b.iter(|| {
                    let mut shards: Vec<Vec<u8>> = vec![Vec::new(); coder.shard_count()];
                    let mut input = black_box(data.as_slice());
                    coder.encode(&mut input, &mut shards).unwrap();
                    shards
                })
            },
        );
    }

    group.finish();
}

/// Benchmark decoding with various excluded-shard sets
fn bench_decode(c: &mut Criterion) {
    let coder = ErasureCoder::new(5, 3, WordWidth::W8).unwrap();
    let data = generate_data(1024 * 1024); // 1 MB

    // Encode once
    let mut shards: Vec<Vec<u8>> = vec![Vec::new(); coder.shard_count()];
    let mut input = data.as_slice();
    coder.encode(&mut input, &mut shards).unwrap();

    let mut group = c.benchmark_group("erasure_decode");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for excluded in [vec![3usize, 4], vec![0, 1], vec![0, 3]] {
        group.bench_with_input(
            BenchmarkId::new("excluded", format!("{:?}", excluded)),
            &excluded,
            |b, excluded| {
                b.iter(|| {
                    let mut readers: Vec<&[u8]> = (0..coder.shard_count())
                        .filter(|i| !excluded.contains(i))
                        .map(|i| shards[i].as_slice())
                        .collect();
                    let mut out = Vec::with_capacity(data.len());
                    coder
                        .decode(&mut readers, black_box(excluded), &mut out)
                        .unwrap();
                    out
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
