//! Index statistics, per-search counters and health checks.
//!
//! [`IndexStatistics`] is a snapshot of list sizes, balance and memory:
//!
//! ```ignore
//! let stats = index.statistics();
//! println!("{}", stats.summary());
//! // IndexStatistics (populated):
//! //   Vectors: 1000
//! //   Lists: 32 (min=25, max=38, mean=31.3, std=3.2, empty=0, imbalance=1.01)
//! ```
//!
//! [`SearchStatistics`] reports what one batched search touched:
//!
//! ```ignore
//! let (results, stats) = index.search_with_stats(&queries, 10, 8)?;
//! println!("{:.3}ms, {} codes scanned", stats.query_time_ms(), stats.codes_scanned);
//! ```

use std::time::Duration;

/// Outcome of [`IVFPQIndex::health_check`](crate::IVFPQIndex::health_check).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Searchable, but recall or latency may suffer.
    Warning(Vec<String>),
    /// Searches will fail.
    Unhealthy(Vec<String>),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        *self == Self::Healthy
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warning(_))
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }

    /// Reported problems, most severe first. `None` when healthy.
    pub fn issues(&self) -> Option<&[String]> {
        match self {
            Self::Warning(found) | Self::Unhealthy(found) => Some(found),
            Self::Healthy => None,
        }
    }
}

/// Statistics about the current state of an IVF-PQ index.
#[derive(Clone, Debug, Default)]
pub struct IndexStatistics {
    pub num_vectors: usize,
    /// Number of inverted lists.
    pub nlist: usize,
    /// Vector dimension.
    pub dimension: usize,
    /// Number of PQ subvectors.
    pub num_subvectors: usize,
    /// Bits per PQ code.
    pub nbits: usize,
    /// Bytes per packed code.
    pub code_size: usize,
    /// Codes, ids, centroids and codebooks.
    pub memory_bytes: usize,
    /// Raw vector bytes over stored bytes (code plus id) per vector.
    pub compression_ratio: f32,
    pub list_size_min: usize,
    pub list_size_max: usize,
    pub list_size_mean: f32,
    /// Standard deviation of list sizes.
    pub list_size_std: f32,
    /// Lists holding no postings.
    pub empty_lists: usize,
    /// `nlist * sum(size²) / total²`; 1.0 is perfectly balanced.
    pub imbalance_factor: f32,
    /// Default nprobe.
    pub nprobe: usize,
    /// Lifecycle state name.
    pub state: &'static str,
}

impl IndexStatistics {
    /// Multi-line report for logs and demos.
    pub fn summary(&self) -> String {
        format!(
            "IndexStatistics ({}):\n  \
             Vectors: {}\n  \
             Lists: {} (min={}, max={}, mean={:.1}, std={:.1}, empty={}, imbalance={:.2})\n  \
             Dimension: {}, Subvectors: {}, Bits: {} ({} bytes/code)\n  \
             Memory: {:.2} MB (compression ratio: {:.1}x)\n  \
             nprobe: {}",
            self.state,
            self.num_vectors,
            self.nlist,
            self.list_size_min,
            self.list_size_max,
            self.list_size_mean,
            self.list_size_std,
            self.empty_lists,
            self.imbalance_factor,
            self.dimension,
            self.num_subvectors,
            self.nbits,
            self.code_size,
            self.memory_bytes as f64 / (1024.0 * 1024.0),
            self.compression_ratio,
            self.nprobe
        )
    }
}

/// Statistics about a single batched search.
#[derive(Clone, Debug, Default)]
pub struct SearchStatistics {
    /// Total query execution time.
    pub query_time: Duration,
    /// Number of queries in the batch.
    pub num_queries: usize,
    /// Lists probed, summed over queries.
    pub lists_probed: usize,
    /// PQ codes scored, summed over queries.
    pub codes_scanned: usize,
}

impl SearchStatistics {
    pub fn query_time_ms(&self) -> f32 {
        self.query_time.as_secs_f32() * 1000.0
    }

    /// Mean codes scored per query.
    pub fn codes_per_query(&self) -> f32 {
        if self.num_queries == 0 {
            0.0
        } else {
            self.codes_scanned as f32 / self.num_queries as f32
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "SearchStatistics:\n  \
             Time: {:.3}ms\n  \
             Queries: {}\n  \
             Lists probed: {}\n  \
             Codes scanned: {} ({:.1} per query)",
            self.query_time_ms(),
            self.num_queries,
            self.lists_probed,
            self.codes_scanned,
            self.codes_per_query()
        )
    }
}

/// Accumulates [`SearchStatistics`] while a search runs.
#[derive(Default)]
pub struct SearchStatsBuilder {
    stats: SearchStatistics,
}

impl SearchStatsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queries(&mut self, count: usize) {
        self.stats.num_queries = count;
    }

    pub fn lists_probed(&mut self, count: usize) {
        self.stats.lists_probed = count;
    }

    /// Add to the count of codes scanned.
    pub fn add_codes_scanned(&mut self, count: usize) {
        self.stats.codes_scanned += count;
    }

    pub fn set_query_time(&mut self, duration: Duration) {
        self.stats.query_time = duration;
    }

    pub fn build(self) -> SearchStatistics {
        self.stats
    }
}
