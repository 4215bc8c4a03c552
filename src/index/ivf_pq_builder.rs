//! Builder pattern for IVFPQIndex with parameter auto-tuning.
//!
//! The builder provides a fluent API over [`IvfPqConfig`]. Without vectors it
//! produces an untrained index; given vectors it trains on them and adds
//! them, filling in the list count and subvector count from the data when
//! they were not set.
//!
//! # Example
//!
//! ```ignore
//! use forge_ivfpq::IVFPQIndexBuilder;
//!
//! // Untrained index, explicit parameters
//! let index = IVFPQIndexBuilder::new()
//!     .dimension(64)
//!     .num_clusters(100)
//!     .num_subvectors(8)
//!     .nprobe(10)
//!     .build()?;
//!
//! // Trained and populated in one go
//! let index = IVFPQIndexBuilder::new()
//!     .vectors(my_vectors)
//!     .bits_per_code(6)
//!     .build()?;
//! ```

use crate::constants::pq::DEFAULT_NBITS;
use crate::error::{IvfPqError, Result};
use crate::kmeans::{KMeansInit, KMeansParams};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::{IVFPQIndex, IvfPqConfig};

/// Builder for constructing an IVFPQIndex.
pub struct IVFPQIndexBuilder {
    /// Vectors to train on and index.
    vectors: Option<Vec<Vec<f32>>>,
    dimension: Option<usize>,
    /// Number of IVF clusters (lists).
    num_clusters: Option<usize>,
    /// Number of PQ subvectors.
    num_subvectors: Option<usize>,
    /// Bits per PQ code.
    bits_per_code: usize,
    by_residual: bool,
    kmeans: KMeansParams,
    /// Number of lists to probe by default.
    nprobe: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for IVFPQIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IVFPQIndexBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            vectors: None,
            dimension: None,
            num_clusters: None,
            num_subvectors: None,
            bits_per_code: DEFAULT_NBITS,
            by_residual: true,
            kmeans: KMeansParams::default(),
            nprobe: 1,
            cancel: None,
        }
    }

    /// Vectors to train on and then index.
    ///
    /// When set, `build` returns a populated index and the dimension is
    /// taken from the first vector unless set explicitly.
    pub fn vectors(mut self, vectors: Vec<Vec<f32>>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// Set the number of IVF clusters (lists).
    ///
    /// If not set and vectors are given, `sqrt(n)` is used.
    pub fn num_clusters(mut self, n: usize) -> Self {
        self.num_clusters = Some(n);
        self
    }

    /// Set the number of PQ subvectors.
    ///
    /// Must evenly divide the vector dimension. If not set, the largest
    /// divisor of the dimension not above `dim / 4` is used.
    pub fn num_subvectors(mut self, m: usize) -> Self {
        self.num_subvectors = Some(m);
        self
    }

    /// Set the bits per PQ code (1..=32).
    ///
    /// - 8 bits = 256 centroids per subspace (default)
    /// - 4 bits = 16 centroids per subspace (more compression, lower recall)
    pub fn bits_per_code(mut self, bits: usize) -> Self {
        self.bits_per_code = bits;
        self
    }

    /// Encode residuals to the coarse centroid (default) or raw vectors.
    pub fn by_residual(mut self, enable: bool) -> Self {
        self.by_residual = enable;
        self
    }

    pub fn kmeans_iterations(mut self, iterations: usize) -> Self {
        self.kmeans.iterations = iterations;
        self
    }

    pub fn kmeans_init(mut self, init: KMeansInit) -> Self {
        self.kmeans.init = init;
        self
    }

    /// Seed for every k-means run.
    pub fn seed(mut self, seed: u64) -> Self {
        self.kmeans.seed = seed;
        self
    }

    /// Training subsample cap per centroid; `0` trains on everything.
    pub fn max_points_per_centroid(mut self, max_points: usize) -> Self {
        self.kmeans.max_points_per_centroid = max_points;
        self
    }

    /// Set the number of lists to probe during search.
    ///
    /// Higher values improve recall but slow down search.
    /// Default: 1
    pub fn nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe;
        self
    }

    /// Flag that aborts training when raised.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Resolve every parameter into a validated configuration.
    pub fn config(&self) -> Result<IvfPqConfig> {
        let n = self.vectors.as_ref().map_or(0, |v| v.len());
        let dimension = self
            .dimension
            .or_else(|| self.vectors.as_ref().and_then(|v| v.first()).map(|v| v.len()))
            .ok_or_else(|| {
                IvfPqError::invalid_configuration("dimension is required when no vectors are given")
            })?;
        let nlist = match self.num_clusters {
            Some(nlist) => nlist,
            None if n > 0 => auto_tune_clusters(n),
            None => {
                return Err(IvfPqError::invalid_configuration(
                    "num_clusters is required when no vectors are given",
                ))
            }
        };
        let m = self
            .num_subvectors
            .unwrap_or_else(|| auto_tune_subvectors(dimension));

        let mut config = IvfPqConfig::new(dimension, nlist, m, self.bits_per_code);
        config.by_residual = self.by_residual;
        config.kmeans = self.kmeans.clone();
        config.nprobe = self.nprobe.min(nlist);
        config.validate()?;
        Ok(config)
    }

    /// Build the IVFPQIndex with the configured parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - neither a dimension nor vectors were provided
    /// - the parameters fail [`IvfPqConfig::validate`]
    /// - training or adding the given vectors fails
    pub fn build(mut self) -> Result<IVFPQIndex> {
        let config = self.config()?;
        let estimated = estimate_memory_bytes(
            self.vectors.as_ref().map_or(0, |v| v.len()),
            &config,
        );
        tracing::debug!(?config, estimated_bytes = estimated, "building IVF-PQ index");

        let mut index = IVFPQIndex::with_config(config)?;
        if let Some(flag) = self.cancel.take() {
            index.set_cancel_flag(flag);
        }

        if let Some(vectors) = self.vectors.take() {
            index.train(&vectors)?;
            index.add(&vectors)?;
        }
        Ok(index)
    }
}

/// `sqrt(n)` lists, at least one.
fn auto_tune_clusters(n: usize) -> usize {
    ((n as f64).sqrt().round() as usize).max(1)
}

/// Largest divisor of `dim` not above `dim / 4`, aiming for ~4 dimensions
/// per subvector.
fn auto_tune_subvectors(dim: usize) -> usize {
    let target = (dim / 4).max(1);
    (1..=target).rev().find(|m| dim % m == 0).unwrap_or(1)
}

/// Estimate memory usage in bytes once `n_vectors` are stored.
fn estimate_memory_bytes(n_vectors: usize, config: &IvfPqConfig) -> usize {
    let code_size = (config.m * config.nbits + 7) / 8;
    let postings = n_vectors * (code_size + std::mem::size_of::<i64>());
    let centroids = config.nlist * config.dimension * 4;
    let codebooks = 1usize
        .checked_shl(config.nbits as u32)
        .map_or(usize::MAX, |ksub| ksub.saturating_mul(config.dimension * 4));
    postings
        .saturating_add(centroids)
        .saturating_add(codebooks)
}
