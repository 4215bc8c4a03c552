//! Squared-L2 distance kernels.
//!
//! The public functions select the fastest available implementation at
//! runtime: AVX2+FMA on x86_64, NEON on aarch64, scalar everywhere else.
//! Only the L2 metric is supported; every ranking in the crate is done on
//! squared distances.

pub mod scalar;
pub mod simd;

pub use simd::{euclidean_distance, euclidean_distance_squared};
