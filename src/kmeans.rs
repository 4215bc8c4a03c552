//! K-Means clustering for coarse and product quantizer training.
//!
//! Implements Lloyd's algorithm with seeded random or k-means++
//! initialization. Large training sets are subsampled to
//! `k * max_points_per_centroid` points, empty clusters are refilled by
//! splitting the largest one, and a shared cancellation flag is checked
//! between iterations.
//!
//! The assignment step runs in parallel; centroid sums are accumulated
//! sequentially in point order so a fixed seed always yields the same
//! centroids.

use crate::constants::kmeans::{
    CONVERGENCE_THRESHOLD, DEFAULT_ITERATIONS, DEFAULT_SEED, KMEANSPP_THRESHOLD,
    MAX_POINTS_PER_CENTROID, MIN_POINTS_PER_CENTROID, SPLIT_EPSILON,
};
use crate::distance::euclidean_distance_squared;
use crate::error::{IvfPqError, Result};
use crate::vector::VectorStore;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Centroid initialization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KMeansInit {
    /// k-means++ for small k, random sampling above
    /// [`KMEANSPP_THRESHOLD`](crate::constants::kmeans::KMEANSPP_THRESHOLD).
    #[default]
    Auto,
    /// k distinct training points chosen uniformly.
    Random,
    /// D²-weighted seeding.
    PlusPlus,
}

/// Serializable k-means settings shared by coarse and PQ training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansParams {
    /// Lloyd iterations.
    pub iterations: usize,
    pub init: KMeansInit,
    pub seed: u64,
    /// Subsampling cap per centroid; `0` trains on every point.
    pub max_points_per_centroid: usize,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            init: KMeansInit::Auto,
            seed: DEFAULT_SEED,
            max_points_per_centroid: MAX_POINTS_PER_CENTROID,
        }
    }
}

/// K-Means clustering algorithm.
#[derive(Debug, Clone)]
pub struct KMeans {
    /// The computed cluster centroids.
    centroids: VectorStore,
    /// Number of clusters.
    k: usize,
    /// Maximum iterations before stopping.
    max_iters: usize,
    init: KMeansInit,
    seed: u64,
    max_points_per_centroid: usize,
    cancel: Option<Arc<AtomicBool>>,
    /// Sum of squared distances from each point to its centroid after the last fit.
    inertia: f32,
}

impl KMeans {
    /// Create a new K-Means instance.
    ///
    /// # Arguments
    /// * `k` - Number of clusters
    /// * `max_iters` - Maximum iterations for convergence
    pub fn new(k: usize, max_iters: usize) -> Self {
        Self {
            centroids: VectorStore::new(1),
            k,
            max_iters,
            init: KMeansInit::Auto,
            seed: DEFAULT_SEED,
            max_points_per_centroid: MAX_POINTS_PER_CENTROID,
            cancel: None,
            inertia: f32::INFINITY,
        }
    }

    /// Build a `k`-cluster instance from shared settings.
    pub fn from_params(k: usize, params: &KMeansParams) -> Self {
        Self::new(k, params.iterations)
            .with_init(params.init)
            .with_seed(params.seed)
            .with_max_points_per_centroid(params.max_points_per_centroid)
    }

    /// Same as `new(k, DEFAULT_ITERATIONS)`.
    pub fn with_k(k: usize) -> Self {
        Self::new(k, DEFAULT_ITERATIONS)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_init(mut self, init: KMeansInit) -> Self {
        self.init = init;
        self
    }

    /// Cap on training points per centroid; `0` disables subsampling.
    pub fn with_max_points_per_centroid(mut self, max_points: usize) -> Self {
        self.max_points_per_centroid = max_points;
        self
    }

    /// Abort [`fit`](Self::fit) with [`IvfPqError::Cancelled`] once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// The trained centroids (empty before `fit`).
    pub fn centroids(&self) -> &VectorStore {
        &self.centroids
    }

    pub fn into_centroids(self) -> VectorStore {
        self.centroids
    }

    /// Objective of the last fit: total squared distance to the nearest centroid.
    pub fn inertia(&self) -> f32 {
        self.inertia
    }

    /// Fit the model to `data`.
    ///
    /// # Errors
    /// - [`IvfPqError::InvalidConfiguration`] if `k` is zero
    /// - [`IvfPqError::InsufficientData`] if `data` holds fewer than `k` points
    /// - [`IvfPqError::Cancelled`] if the cancellation flag was raised
    pub fn fit(&mut self, data: &VectorStore) -> Result<()> {
        if self.k == 0 {
            return Err(IvfPqError::invalid_configuration(
                "k-means requires at least one cluster",
            ));
        }
        let n = data.len();
        if n < self.k {
            return Err(IvfPqError::insufficient_data(self.k, n));
        }
        if n < self.k * MIN_POINTS_PER_CENTROID {
            tracing::warn!(
                points = n,
                clusters = self.k,
                "too few training points, recommended at least {}",
                self.k * MIN_POINTS_PER_CENTROID
            );
        }

        let mut rng = StdRng::seed_from_u64(self.seed);

        let subsample;
        let data = match self.max_points_per_centroid.checked_mul(self.k) {
            Some(cap) if cap > 0 && n > cap => {
                tracing::debug!(points = n, sampled = cap, "subsampling k-means training set");
                let mut picked = sample(&mut rng, n, cap).into_vec();
                picked.sort_unstable();
                let mut store = VectorStore::new(data.dimension());
                for i in picked {
                    store.push_unchecked(data.row(i));
                }
                subsample = store;
                &subsample
            }
            _ => data,
        };

        self.check_cancelled()?;
        self.centroids = match self.init {
            KMeansInit::PlusPlus => self.kmeans_plus_plus_init(data, &mut rng),
            KMeansInit::Random => self.random_init(data, &mut rng),
            KMeansInit::Auto if self.k <= KMEANSPP_THRESHOLD => {
                self.kmeans_plus_plus_init(data, &mut rng)
            }
            KMeansInit::Auto => self.random_init(data, &mut rng),
        };

        for iter in 0..self.max_iters {
            self.check_cancelled()?;

            let assignments = self.assign_points(data);
            let objective: f32 = assignments.iter().map(|&(_, d)| d).sum();
            let new_centroids = self.update_centroids(data, &assignments);
            let change = self.measure_change(&new_centroids);
            self.centroids = new_centroids;

            tracing::debug!(iter, objective, change, k = self.k, "k-means iteration");

            if change < CONVERGENCE_THRESHOLD {
                break;
            }
        }

        self.inertia = self.assign_points(data).iter().map(|&(_, d)| d).sum();
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(IvfPqError::Cancelled),
            _ => Ok(()),
        }
    }

    fn random_init(&self, data: &VectorStore, rng: &mut StdRng) -> VectorStore {
        let mut picked = sample(rng, data.len(), self.k).into_vec();
        picked.sort_unstable();
        let mut centroids = VectorStore::new(data.dimension());
        for i in picked {
            centroids.push_unchecked(data.row(i));
        }
        centroids
    }

    /// Selects initial centroids with probability proportional to squared
    /// distance from the closest centroid chosen so far.
    fn kmeans_plus_plus_init(&self, data: &VectorStore, rng: &mut StdRng) -> VectorStore {
        let n = data.len();
        let mut centroids = VectorStore::new(data.dimension());
        centroids.push_unchecked(data.row(rng.gen_range(0..n)));

        let mut min_dist: Vec<f32> = (0..n)
            .into_par_iter()
            .map(|i| euclidean_distance_squared(data.row(i), centroids.row(0)))
            .collect();

        while centroids.len() < self.k {
            let total: f64 = min_dist.iter().map(|&d| d as f64).sum();

            let next = if total <= 0.0 {
                // Every point coincides with a centroid already.
                rng.gen_range(0..n)
            } else {
                let mut r = rng.gen_range(0.0..total);
                let mut chosen = n - 1;
                for (i, &d) in min_dist.iter().enumerate() {
                    r -= d as f64;
                    if r <= 0.0 {
                        chosen = i;
                        break;
                    }
                }
                chosen
            };

            centroids.push_unchecked(data.row(next));
            let newest = centroids.row(centroids.len() - 1);
            min_dist
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, best)| {
                    let d = euclidean_distance_squared(data.row(i), newest);
                    if d < *best {
                        *best = d;
                    }
                });
        }

        centroids
    }

    /// Nearest centroid and squared distance for each point.
    fn assign_points(&self, data: &VectorStore) -> Vec<(usize, f32)> {
        (0..data.len())
            .into_par_iter()
            .map(|i| {
                self.centroids
                    .nearest_unchecked(data.row(i))
                    .unwrap_or((0, 0.0))
            })
            .collect()
    }

    /// Recompute centroids as the mean of their assigned points.
    ///
    /// An empty cluster takes over half of the largest cluster: it is placed
    /// at a slightly perturbed copy of that centroid, the donor is perturbed
    /// in the opposite direction.
    fn update_centroids(&self, data: &VectorStore, assignments: &[(usize, f32)]) -> VectorStore {
        let dim = data.dimension();
        let mut sums = vec![0.0f64; self.k * dim];
        let mut counts = vec![0usize; self.k];

        for (i, &(c, _)) in assignments.iter().enumerate() {
            counts[c] += 1;
            let acc = &mut sums[c * dim..(c + 1) * dim];
            for (a, &x) in acc.iter_mut().zip(data.row(i)) {
                *a += x as f64;
            }
        }

        let mut centroids = VectorStore::new(dim);
        for c in 0..self.k {
            if counts[c] == 0 {
                centroids.push_unchecked(self.centroids.row(c));
                continue;
            }
            let inv = 1.0 / counts[c] as f64;
            let mean: Vec<f32> = sums[c * dim..(c + 1) * dim]
                .iter()
                .map(|&s| (s * inv) as f32)
                .collect();
            centroids.push_unchecked(&mean);
        }

        let mut splits = 0usize;
        for empty in 0..self.k {
            if counts[empty] != 0 {
                continue;
            }
            let Some(donor) = (0..self.k).max_by_key(|&c| (counts[c], std::cmp::Reverse(c)))
            else {
                break;
            };
            if counts[donor] < 2 {
                break;
            }

            let donor_row = centroids.row(donor).to_vec();
            {
                let target = centroids.row_mut(empty);
                for (j, (t, &v)) in target.iter_mut().zip(&donor_row).enumerate() {
                    let delta = SPLIT_EPSILON * (v.abs() + 1.0);
                    *t = if j % 2 == 0 { v + delta } else { v - delta };
                }
            }
            {
                let source = centroids.row_mut(donor);
                for (j, v) in source.iter_mut().enumerate() {
                    let delta = SPLIT_EPSILON * (v.abs() + 1.0);
                    *v = if j % 2 == 0 { *v - delta } else { *v + delta };
                }
            }

            counts[empty] = counts[donor] / 2;
            counts[donor] -= counts[empty];
            splits += 1;
        }

        if splits > 0 {
            tracing::warn!(splits, k = self.k, "split clusters to refill empty centroids");
        }

        centroids
    }

    /// Average squared movement of the centroids between two iterations.
    fn measure_change(&self, new_centroids: &VectorStore) -> f32 {
        let total: f32 = self
            .centroids
            .iter()
            .zip(new_centroids.iter())
            .map(|(old, new)| euclidean_distance_squared(old, new))
            .sum();

        total / self.k as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_store(n: usize, dim: usize, seed: u64) -> VectorStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let data: Vec<f32> = (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        VectorStore::from_flat(dim, data).unwrap()
    }

    /// Three tight blobs far apart.
    fn blobs() -> VectorStore {
        let mut rng = StdRng::seed_from_u64(7);
        let centers = [[0.0f32, 0.0], [50.0, 0.0], [0.0, 50.0]];
        let mut data = Vec::new();
        for i in 0..300 {
            let c = centers[i % 3];
            data.push(c[0] + rng.gen_range(-1.0..1.0));
            data.push(c[1] + rng.gen_range(-1.0..1.0));
        }
        VectorStore::from_flat(2, data).unwrap()
    }

    #[test]
    fn test_kmeans_basic() {
        let data = random_store(300, 8, 1);

        let mut kmeans = KMeans::new(5, 50);
        kmeans.fit(&data).unwrap();

        assert_eq!(kmeans.centroids().len(), 5);
        assert_eq!(kmeans.centroids().dimension(), 8);
        assert!(kmeans.inertia().is_finite());
        assert!(kmeans.inertia() > 0.0);
    }

    #[test]
    fn test_kmeans_finds_blobs() {
        let data = blobs();
        for init in [KMeansInit::Auto, KMeansInit::PlusPlus] {
            let mut kmeans = KMeans::new(3, 25).with_init(init);
            kmeans.fit(&data).unwrap();

            // Each true center must have a centroid within the blob radius,
            // regardless of the order the centroids came out in.
            for center in [[0.0f32, 0.0], [50.0, 0.0], [0.0, 50.0]] {
                let (_, d) = kmeans.centroids().nearest_unchecked(&center).unwrap();
                assert!(d < 1.0, "{:?}: no centroid near {:?}", init, center);
            }
        }
    }

    #[test]
    fn test_kmeans_improves_on_single_iteration() {
        let data = random_store(1000, 4, 2);

        let mut one = KMeans::new(16, 1).with_init(KMeansInit::Random);
        one.fit(&data).unwrap();
        let mut many = KMeans::new(16, 25).with_init(KMeansInit::Random);
        many.fit(&data).unwrap();

        assert!(many.inertia() <= one.inertia() * 1.0001);
    }

    #[test]
    fn test_kmeans_deterministic_with_seed() {
        let data = random_store(500, 6, 3);

        let mut a = KMeans::new(10, 10).with_seed(99);
        let mut b = KMeans::new(10, 10).with_seed(99);
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();

        assert_eq!(a.centroids().as_slice(), b.centroids().as_slice());
    }

    #[test]
    fn test_kmeans_insufficient_data() {
        let data = random_store(4, 2, 4);
        let err = KMeans::new(5, 10).fit(&data).unwrap_err();
        assert!(matches!(
            err,
            IvfPqError::InsufficientData {
                required: 5,
                actual: 4
            }
        ));
    }

    #[test]
    fn test_kmeans_k_equals_n() {
        let data = random_store(8, 3, 5);
        let mut kmeans = KMeans::new(8, 10).with_init(KMeansInit::Random);
        kmeans.fit(&data).unwrap();
        assert!(kmeans.inertia() < 1e-6);
    }

    #[test]
    fn test_kmeans_subsamples() {
        let data = random_store(2000, 2, 6);
        let mut kmeans = KMeans::new(4, 10).with_max_points_per_centroid(50);
        kmeans.fit(&data).unwrap();
        assert_eq!(kmeans.centroids().len(), 4);
    }

    #[test]
    fn test_kmeans_duplicate_points_split_empty_clusters() {
        // Only two distinct points but four clusters requested.
        let mut data = Vec::new();
        for i in 0..40 {
            if i % 2 == 0 {
                data.extend_from_slice(&[1.0f32, 1.0]);
            } else {
                data.extend_from_slice(&[-1.0f32, -1.0]);
            }
        }
        let data = VectorStore::from_flat(2, data).unwrap();

        let mut kmeans = KMeans::new(4, 10).with_init(KMeansInit::Random);
        kmeans.fit(&data).unwrap();
        assert_eq!(kmeans.centroids().len(), 4);
        assert!(kmeans.inertia() < 1e-2);
    }

    #[test]
    fn test_kmeans_cancelled() {
        let data = random_store(200, 4, 8);
        let flag = Arc::new(AtomicBool::new(true));
        let err = KMeans::new(4, 10)
            .with_cancel_flag(flag)
            .fit(&data)
            .unwrap_err();
        assert!(matches!(err, IvfPqError::Cancelled));
    }
}
