//! Flat, contiguous storage of raw `f32` vectors with exact L2 search.
//!
//! `VectorStore` is the flat index behind the coarse quantizer and the
//! ground truth used to evaluate approximate results. Vectors are stored
//! back to back in a single allocation, so vector `i` occupies
//! `data[i * d..(i + 1) * d]`.

use crate::distance::euclidean_distance_squared;
use crate::error::{check_batch, check_dimension, IvfPqError, Result};
use crate::topk::{Neighbor, TopK};
use rayon::prelude::*;

fn check_nonzero(dimension: usize) -> Result<()> {
    if dimension == 0 {
        return Err(IvfPqError::invalid_configuration(
            "VectorStore dimension must be non-zero",
        ));
    }
    Ok(())
}

/// Append-only flat vector storage of fixed dimension.
#[derive(Clone, Debug)]
pub struct VectorStore {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorStore {
    /// Create an empty store for vectors of `dimension` components.
    ///
    /// # Panics
    /// Panics if `dimension` is zero.
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "VectorStore dimension must be non-zero");
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Create a store from an already-flattened buffer of `n * dimension` floats.
    pub fn from_flat(dimension: usize, data: Vec<f32>) -> Result<Self> {
        check_nonzero(dimension)?;
        let mut store = Self::new(dimension);
        if data.len() % dimension != 0 {
            return Err(IvfPqError::invalid_argument(format!(
                "flat buffer of {} floats is not a multiple of dimension {}",
                data.len(),
                dimension
            )));
        }
        store.data = data;
        Ok(store)
    }

    /// Create a store holding copies of `vectors`.
    pub fn from_vectors<V: AsRef<[f32]>>(dimension: usize, vectors: &[V]) -> Result<Self> {
        check_nonzero(dimension)?;
        let mut store = Self::new(dimension);
        store.store(vectors)?;
        Ok(store)
    }

    /// Append `vectors`. Nothing is appended unless every vector has the
    /// store's dimension.
    pub fn store<V: AsRef<[f32]>>(&mut self, vectors: &[V]) -> Result<()> {
        check_batch(self.dimension, vectors)?;
        self.data.reserve(vectors.len() * self.dimension);
        for v in vectors {
            self.data.extend_from_slice(v.as_ref());
        }
        Ok(())
    }

    /// Vector dimension.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Vector `i`, or `None` if out of range.
    #[inline]
    pub fn get(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Vector `i` without a bounds check on the id.
    #[inline]
    pub(crate) fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }

    #[inline]
    pub(crate) fn row_mut(&mut self, i: usize) -> &mut [f32] {
        let d = self.dimension;
        &mut self.data[i * d..(i + 1) * d]
    }

    /// Append one vector the caller has already validated.
    #[inline]
    pub(crate) fn push_unchecked(&mut self, v: &[f32]) {
        debug_assert_eq!(v.len(), self.dimension);
        self.data.extend_from_slice(v);
    }

    /// All stored components, vector after vector.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Iterate over stored vectors in id order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[f32]> + '_ {
        self.data.chunks_exact(self.dimension)
    }

    /// Exact squared Euclidean distance between two vectors of the store's dimension.
    pub fn distance_l2_squared(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        check_dimension(self.dimension, a)?;
        check_dimension(self.dimension, b)?;
        Ok(euclidean_distance_squared(a, b))
    }

    /// The candidate nearest to `query`, with its squared distance.
    ///
    /// Ties go to the lowest candidate id. Returns `None` when `candidates`
    /// is empty. Out-of-range candidate ids are skipped.
    pub fn nearest(&self, query: &[f32], candidates: &[usize]) -> Result<Option<(usize, f32)>> {
        check_dimension(self.dimension, query)?;
        let mut best: Option<(usize, f32)> = None;
        for &id in candidates {
            let Some(v) = self.get(id) else { continue };
            let d = euclidean_distance_squared(query, v);
            best = match best {
                Some((bid, bd)) if bd < d || (bd == d && bid < id) => Some((bid, bd)),
                _ => Some((id, d)),
            };
        }
        Ok(best)
    }

    /// Nearest stored vector over the whole store.
    pub fn nearest_all(&self, query: &[f32]) -> Result<Option<(usize, f32)>> {
        check_dimension(self.dimension, query)?;
        Ok(self.nearest_unchecked(query))
    }

    /// Linear scan without the dimension check; callers validate first.
    /// Strict `<` keeps the lowest id on ties.
    #[inline]
    pub(crate) fn nearest_unchecked(&self, query: &[f32]) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (id, v) in self.iter().enumerate() {
            let d = euclidean_distance_squared(query, v);
            match best {
                Some((_, bd)) if d >= bd => {}
                _ => best = Some((id, d)),
            }
        }
        best
    }

    /// The `n` nearest stored vectors by increasing distance, ties by lowest id.
    pub fn top_n(&self, query: &[f32], n: usize) -> Result<Vec<Neighbor>> {
        check_dimension(self.dimension, query)?;
        Ok(self.top_n_unchecked(query, n))
    }

    pub(crate) fn top_n_unchecked(&self, query: &[f32], n: usize) -> Vec<Neighbor> {
        let mut topk = TopK::new(n.min(self.len()));
        for (id, v) in self.iter().enumerate() {
            let d = euclidean_distance_squared(query, v);
            if d <= topk.threshold() {
                topk.push(id as i64, d);
            }
        }
        topk.into_sorted_vec()
    }

    /// Exact k-NN as `(id, squared distance)` pairs, nearest first.
    pub fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        Ok(self
            .top_n(query, k)?
            .into_iter()
            .map(|n| (n.id, n.distance))
            .collect())
    }

    /// Exact k-NN for a batch of queries, computed in parallel.
    ///
    /// This is the brute-force baseline approximate results are checked against.
    pub fn batch_top_n<Q: AsRef<[f32]> + Sync>(
        &self,
        queries: &[Q],
        n: usize,
    ) -> Result<Vec<Vec<Neighbor>>> {
        check_batch(self.dimension, queries)?;
        Ok(queries
            .par_iter()
            .map(|q| self.top_n_unchecked(q.as_ref(), n))
            .collect())
    }

    /// Drop all stored vectors, keeping the dimension.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}
