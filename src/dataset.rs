//! Dataset utilities for generating, loading, and evaluating vector search.

use crate::constants::ivf_pq::SENTINEL_ID;
use crate::error::{IvfPqError, Result};
use crate::vector::VectorStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// A dataset containing vectors, queries, and ground truth for evaluation.
pub struct Dataset {
    pub dimension: usize,
    pub vectors: Vec<Vec<f32>>,
    pub queries: Vec<Vec<f32>>,
    /// Exact nearest ids per query, nearest first.
    pub ground_truth: Vec<Vec<i64>>,
}

impl Dataset {
    /// Generate a seeded synthetic dataset.
    ///
    /// Components are uniform in `[0, 1)`, and vector `i` gets `i / 1000`
    /// added to its first component, so ids are spread along one axis.
    /// Queries follow the same rule with their own index.
    pub fn generate(n_vectors: usize, n_queries: usize, dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut make = |count: usize| -> Vec<Vec<f32>> {
            (0..count)
                .map(|i| {
                    let mut v: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>()).collect();
                    if let Some(first) = v.first_mut() {
                        *first += i as f32 / 1000.0;
                    }
                    v
                })
                .collect()
        };

        let vectors = make(n_vectors);
        let queries = make(n_queries);
        Self {
            dimension: dim,
            vectors,
            queries,
            ground_truth: Vec::new(),
        }
    }

    /// Compute exact k nearest neighbors for every query by brute force.
    pub fn compute_ground_truth(&mut self, k: usize) -> Result<()> {
        let store = VectorStore::from_vectors(self.dimension, &self.vectors)?;
        self.ground_truth = store
            .batch_top_n(&self.queries, k)?
            .into_iter()
            .map(|row| row.into_iter().map(|n| n.id).collect())
            .collect();
        Ok(())
    }

    /// Load the SIFT1M dataset from disk.
    ///
    /// Expects files in the standard format:
    /// - `{base_path}/sift_base.fvecs` - 1M base vectors
    /// - `{base_path}/sift_query.fvecs` - 10K query vectors
    /// - `{base_path}/sift_groundtruth.ivecs` - ground truth neighbors
    pub fn load_sift1m(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref();
        let vectors = read_fvecs(base_path.join("sift_base.fvecs"))?;
        let queries = read_fvecs(base_path.join("sift_query.fvecs"))?;
        let ground_truth = read_ivecs(base_path.join("sift_groundtruth.ivecs"))?;

        let dimension = vectors.first().map_or(0, |v| v.len());
        Ok(Self {
            dimension,
            vectors,
            queries,
            ground_truth,
        })
    }
}

/// Read `[dim i32][dim × 4-byte value]` records until end of file.
fn read_records<T>(path: impl AsRef<Path>, convert: impl Fn([u8; 4]) -> T) -> Result<Vec<Vec<T>>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();

    loop {
        let mut dim_buf = [0u8; 4];
        match reader.read_exact(&mut dim_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let dim = i32::from_le_bytes(dim_buf);
        let dim = usize::try_from(dim)
            .map_err(|_| IvfPqError::invalid_format(format!("negative record length {}", dim)))?;

        let mut data_buf = vec![0u8; dim * 4];
        reader.read_exact(&mut data_buf)?;
        records.push(
            data_buf
                .chunks_exact(4)
                .map(|c| convert([c[0], c[1], c[2], c[3]]))
                .collect(),
        );
    }

    Ok(records)
}

/// Read an `.fvecs` file.
pub fn read_fvecs(path: impl AsRef<Path>) -> Result<Vec<Vec<f32>>> {
    read_records(path, f32::from_le_bytes)
}

/// Read an `.ivecs` file as ids.
pub fn read_ivecs(path: impl AsRef<Path>) -> Result<Vec<Vec<i64>>> {
    read_records(path, |b| i32::from_le_bytes(b) as i64)
}

/// Compute recall@k between predicted and ground truth results.
///
/// Recall is the fraction of the first `k` true neighbors found among the
/// first `k` predictions. Sentinel ids never count as hits.
/// Returns a value between 0.0 and 1.0.
pub fn recall_at_k(predicted: &[i64], ground_truth: &[i64], k: usize) -> f32 {
    if k == 0 {
        return 0.0;
    }
    let pred_set: HashSet<i64> = predicted
        .iter()
        .take(k)
        .copied()
        .filter(|&id| id != SENTINEL_ID)
        .collect();
    let truth_set: HashSet<i64> = ground_truth.iter().take(k).copied().collect();

    let intersection = pred_set.intersection(&truth_set).count();
    intersection as f32 / k as f32
}
