//! The IVF-PQ index and its inverted lists.

pub mod invlists;
pub mod ivf_pq;
pub mod ivf_pq_builder;

pub use invlists::InvertedFile;
pub use ivf_pq::{IVFPQIndex, IndexState, IvfPqConfig, SearchResults};
pub use ivf_pq_builder::IVFPQIndexBuilder;
