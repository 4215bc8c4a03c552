//! Scalar (non-SIMD) distance function implementations.
//! These serve as baselines for comparison and fallbacks on other platforms.

/// Compute the squared Euclidean distance between two vectors.
///
/// Returns sum((a[i] - b[i])^2)
#[inline]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Compute the Euclidean (L2) distance between two vectors.
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_distance_squared(a, b).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!(euclidean_distance(&a, &a) < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_squared_simple() {
        let a = vec![1.0, -2.0, 3.0];
        let b = vec![-1.0, 2.0, -3.0];
        // 4 + 16 + 36
        assert!((euclidean_distance_squared(&a, &b) - 56.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_vectors() {
        let a: Vec<f32> = Vec::new();
        assert_eq!(euclidean_distance_squared(&a, &a), 0.0);
    }
}
