//! Benchmarks for distance kernels and the exact baseline.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use forge_ivfpq::distance::{scalar, simd};
use forge_ivfpq::VectorStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn benchmark_distances(c: &mut Criterion) {
    let dimensions = vec![8, 16, 64, 128, 256, 1024];

    for dim in &dimensions {
        let pair = random_vectors(2, *dim, *dim as u64);
        let (v1, v2) = (&pair[0], &pair[1]);

        let mut group = c.benchmark_group(format!("squared_euclidean_{}", dim));

        group.bench_function("scalar", |b| {
            b.iter(|| scalar::euclidean_distance_squared(black_box(v1), black_box(v2)))
        });

        group.bench_function("simd", |b| {
            b.iter(|| simd::euclidean_distance_squared(black_box(v1), black_box(v2)))
        });

        group.finish();
    }

    // Throughput benchmark: 10K vectors at 64 dimensions
    let dim = 64;
    let vectors = random_vectors(10_000, dim, 1);
    let store = VectorStore::from_vectors(dim, &vectors).unwrap();
    let query = random_vectors(1, dim, 2).remove(0);

    c.bench_function("distance_throughput_10k_64d", |b| {
        b.iter(|| {
            let sum: f32 = store
                .iter()
                .map(|v| simd::euclidean_distance_squared(black_box(&query), black_box(v)))
                .sum();
            black_box(sum)
        })
    });

    c.bench_function("exact_top10_10k_64d", |b| {
        b.iter(|| black_box(store.top_n(black_box(&query), 10).unwrap()))
    });
}

criterion_group!(benches, benchmark_distances);
criterion_main!(benches);
