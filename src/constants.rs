//! Named constants for configuration values.
//!
//! This module centralizes magic numbers and default values used throughout
//! the codebase, making them easier to find, document, and tune.

/// Constants for Product Quantization (PQ).
pub mod pq {
    /// Default bits per sub-quantizer code (256 centroids per codebook).
    pub const DEFAULT_NBITS: usize = 8;

    /// Largest supported code width. Codes are stored as `u32`.
    pub const MAX_NBITS: usize = 32;
}

/// Constants for k-means clustering.
pub mod kmeans {
    /// Threshold for switching from k-means++ to random initialization
    /// under [`KMeansInit::Auto`](crate::kmeans::KMeansInit::Auto).
    /// k-means++ has O(k²n) complexity, which becomes expensive for large k.
    pub const KMEANSPP_THRESHOLD: usize = 64;

    /// Convergence threshold for early stopping.
    /// Training stops when mean centroid movement falls below this value.
    pub const CONVERGENCE_THRESHOLD: f32 = 1e-6;

    /// Default number of Lloyd iterations, for both coarse and PQ training.
    pub const DEFAULT_ITERATIONS: usize = 25;

    /// Training sets larger than `k * MAX_POINTS_PER_CENTROID` are subsampled.
    pub const MAX_POINTS_PER_CENTROID: usize = 256;

    /// Below `k * MIN_POINTS_PER_CENTROID` training points a warning is logged.
    pub const MIN_POINTS_PER_CENTROID: usize = 39;

    /// Relative perturbation applied when splitting a cluster to refill an empty one.
    pub const SPLIT_EPSILON: f32 = 1.0 / 1024.0;

    /// Default RNG seed so repeated training runs give identical centroids.
    pub const DEFAULT_SEED: u64 = 1234;
}

/// Constants for the IVF-PQ index.
pub mod ivf_pq {
    /// Default number of lists probed by [`IVFPQIndex::search_default`](crate::IVFPQIndex::search_default).
    pub const DEFAULT_NPROBE: usize = 1;

    /// Id reported for result slots that could not be filled.
    pub const SENTINEL_ID: i64 = -1;

    /// Lists whose largest/mean size ratio exceeds this are reported by the health check.
    pub const IMBALANCE_WARNING: f32 = 4.0;

    /// Fraction of empty lists above which the health check warns.
    pub const EMPTY_LIST_WARNING_RATIO: f32 = 0.25;
}

/// Constants for cache optimization.
pub mod cache {
    /// Number of postings to prefetch ahead while scanning a list.
    pub const PREFETCH_DISTANCE: usize = 4;
}
