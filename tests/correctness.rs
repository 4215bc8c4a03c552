//! Correctness tests verifying SIMD kernels and the exact baseline.
//!
//! Run with: cargo test

use forge_ivfpq::distance::{scalar, simd};
use forge_ivfpq::{Neighbor, VectorStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

#[test]
fn test_simd_matches_scalar() {
    // Test various dimensions including edge cases
    let dims = vec![1, 7, 8, 15, 16, 64, 128, 256];
    let mut rng = StdRng::seed_from_u64(1);

    for dim in dims {
        let v1 = random_vector(&mut rng, dim);
        let v2 = random_vector(&mut rng, dim);

        let scalar_result = scalar::euclidean_distance(&v1, &v2);
        let simd_result = simd::euclidean_distance(&v1, &v2);
        let diff = (scalar_result - simd_result).abs();

        assert!(
            diff < 1e-5,
            "Euclidean mismatch at dim {}: scalar={}, simd={}, diff={}",
            dim,
            scalar_result,
            simd_result,
            diff
        );
    }
}

#[test]
fn test_simd_squared_matches_scalar() {
    let dims = vec![1, 7, 8, 15, 16, 64, 128, 256];
    let mut rng = StdRng::seed_from_u64(2);

    for dim in dims {
        let v1 = random_vector(&mut rng, dim);
        let v2 = random_vector(&mut rng, dim);

        let scalar_result = scalar::euclidean_distance_squared(&v1, &v2);
        let simd_result = simd::euclidean_distance_squared(&v1, &v2);
        let diff = (scalar_result - simd_result).abs() / scalar_result.max(1.0);

        assert!(
            diff < 1e-5,
            "Squared Euclidean mismatch at dim {}: scalar={}, simd={}",
            dim,
            scalar_result,
            simd_result
        );
    }
}

#[test]
fn test_euclidean_properties() {
    let mut rng = StdRng::seed_from_u64(3);
    let v1 = random_vector(&mut rng, 128);
    let v2 = random_vector(&mut rng, 128);

    // Identity
    assert!(simd::euclidean_distance_squared(&v1, &v1) < 1e-6);
    // Symmetry
    let d12 = simd::euclidean_distance_squared(&v1, &v2);
    let d21 = simd::euclidean_distance_squared(&v2, &v1);
    assert!((d12 - d21).abs() < 1e-5);
    // Non-negativity
    assert!(d12 >= 0.0);
}

#[test]
fn test_exact_search_matches_full_sort() {
    let mut rng = StdRng::seed_from_u64(4);
    let vectors: Vec<Vec<f32>> = (0..500).map(|_| random_vector(&mut rng, 24)).collect();
    let store = VectorStore::from_vectors(24, &vectors).unwrap();
    let query = random_vector(&mut rng, 24);

    let mut expected: Vec<Neighbor> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| Neighbor::new(i as i64, scalar::euclidean_distance_squared(&query, v)))
        .collect();
    expected.sort();

    let knn = store.search_knn(&query, 10).unwrap();
    for ((id, d), e) in knn.iter().zip(&expected) {
        assert_eq!(*id, e.id);
        assert!((d - e.distance).abs() < 1e-4);
    }
}
