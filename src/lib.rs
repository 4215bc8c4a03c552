//! forge-ivfpq: inverted-file product-quantization search in Rust.
//!
//! This crate provides an IVF-PQ index for approximate nearest neighbor
//! search under the L2 metric, together with the pieces it is built from.
//!
//! # Features
//!
//! - **SIMD Distance Functions**: AVX2/FMA and NEON squared-L2 kernels
//! - **Automatic CPU Detection**: Falls back to scalar on unsupported hardware
//! - **Product Quantization**: 1 to 32 bits per code, bit-packed storage
//! - **Parallel Training, Encoding and Search**: Multi-core scaling with Rayon
//! - **Persistence**: Checksummed, versioned single-file format
//!
//! # Example
//!
//! ```no_run
//! use forge_ivfpq::{Dataset, IVFPQIndex};
//!
//! let data = Dataset::generate(10_000, 5, 64, 1234);
//!
//! let mut index = IVFPQIndex::new(64, 100, 8, 8)?;
//! index.train(&data.vectors)?;
//! index.add(&data.vectors)?;
//!
//! let results = index.search(&data.vectors[..5], 4, 10)?;
//! for q in 0..results.len() {
//!     println!("{:?}", results.query_ids(q));
//! }
//! # Ok::<(), forge_ivfpq::IvfPqError>(())
//! ```

pub mod coarse;
pub mod constants;
pub mod dataset;
pub mod distance;
pub mod error;
pub mod index;
pub mod kmeans;
pub mod metrics;
pub mod persistence;
pub mod pq;
pub mod topk;
pub mod vector;

// Re-export commonly used types at crate root
pub use coarse::CoarseQuantizer;
pub use dataset::{recall_at_k, Dataset};
pub use error::{IvfPqError, Result};
pub use index::{IVFPQIndex, IVFPQIndexBuilder, IndexState, InvertedFile, IvfPqConfig, SearchResults};
pub use kmeans::{KMeans, KMeansInit, KMeansParams};
pub use metrics::{HealthStatus, IndexStatistics, SearchStatistics};
pub use persistence::Persistable;
pub use pq::ProductQuantizer;
pub use topk::{Neighbor, TopK};
pub use vector::VectorStore;
