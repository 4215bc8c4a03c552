//! Coarse quantizer: the first level of the inverted file.
//!
//! Holds `nlist` centroids in a flat [`VectorStore`] and maps any vector to
//! its nearest centroid by exhaustive L2 scan. At search time the `nprobe`
//! nearest centroids select which inverted lists are visited.

use crate::error::{check_dimension, IvfPqError, Result};
use crate::kmeans::KMeans;
use crate::vector::VectorStore;

/// Flat coarse quantizer over `nlist` centroids.
#[derive(Debug, Clone)]
pub struct CoarseQuantizer {
    dimension: usize,
    centroids: VectorStore,
}

impl CoarseQuantizer {
    /// Create an untrained quantizer for `dimension`-d vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            centroids: VectorStore::new(dimension),
        }
    }

    /// Wrap centroids that were trained elsewhere (or loaded from disk).
    pub fn from_centroids(centroids: VectorStore) -> Self {
        Self {
            dimension: centroids.dimension(),
            centroids,
        }
    }

    /// Learn `nlist` centroids from `data` with the given k-means settings.
    ///
    /// `kmeans` must have been created with `k == nlist`; its seed, init
    /// strategy and cancellation flag are honoured.
    ///
    /// # Errors
    /// [`IvfPqError::InsufficientData`] if `data` has fewer than `nlist` vectors.
    pub fn train(&mut self, data: &VectorStore, nlist: usize, mut kmeans: KMeans) -> Result<()> {
        if data.dimension() != self.dimension {
            return Err(IvfPqError::dimension_mismatch(self.dimension, data.dimension()));
        }
        if data.len() < nlist {
            return Err(IvfPqError::insufficient_data(nlist, data.len()));
        }

        kmeans.fit(data)?;
        tracing::info!(
            nlist,
            points = data.len(),
            inertia = kmeans.inertia(),
            "coarse quantizer trained"
        );
        self.centroids = kmeans.into_centroids();
        Ok(())
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Number of centroids (`nlist` once trained).
    pub fn nlist(&self) -> usize {
        self.centroids.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn centroids(&self) -> &VectorStore {
        &self.centroids
    }

    /// Centroid `id`.
    pub fn centroid(&self, id: usize) -> Option<&[f32]> {
        self.centroids.get(id)
    }

    /// Id of the centroid nearest to `vector`; ties go to the lowest id.
    pub fn assign(&self, vector: &[f32]) -> Result<usize> {
        check_dimension(self.dimension, vector)?;
        self.assign_unchecked(vector)
    }

    pub(crate) fn assign_unchecked(&self, vector: &[f32]) -> Result<usize> {
        self.centroids
            .nearest_unchecked(vector)
            .map(|(id, _)| id)
            .ok_or_else(|| IvfPqError::invalid_state("assign", "untrained"))
    }

    /// The `n` nearest centroid ids by increasing distance, ties by lowest id.
    /// `n` is clamped to `nlist`.
    pub fn top_n(&self, vector: &[f32], n: usize) -> Result<Vec<usize>> {
        check_dimension(self.dimension, vector)?;
        Ok(self.top_n_unchecked(vector, n))
    }

    pub(crate) fn top_n_unchecked(&self, vector: &[f32], n: usize) -> Vec<usize> {
        self.centroids
            .top_n_unchecked(vector, n)
            .into_iter()
            .map(|nb| nb.id as usize)
            .collect()
    }

    /// `vector - centroid(id)`, written into `out`.
    #[inline]
    pub fn residual_into(&self, vector: &[f32], id: usize, out: &mut [f32]) {
        let centroid = self.centroids.row(id);
        for ((o, &x), &c) in out.iter_mut().zip(vector).zip(centroid) {
            *o = x - c;
        }
    }

    /// `vector - centroid(id)`.
    pub fn residual(&self, vector: &[f32], id: usize) -> Result<Vec<f32>> {
        check_dimension(self.dimension, vector)?;
        if id >= self.nlist() {
            return Err(IvfPqError::invalid_argument(format!(
                "centroid id {} out of range (nlist = {})",
                id,
                self.nlist()
            )));
        }
        let mut out = vec![0.0; self.dimension];
        self.residual_into(vector, id, &mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> CoarseQuantizer {
        CoarseQuantizer::from_centroids(
            VectorStore::from_vectors(
                2,
                &[vec![0.0, 0.0], vec![10.0, 0.0], vec![5.0, 10.0]],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_assign() {
        let q = fixed();
        assert_eq!(q.assign(&[0.1, 0.1]).unwrap(), 0);
        assert_eq!(q.assign(&[9.0, 1.0]).unwrap(), 1);
        assert_eq!(q.assign(&[5.0, 9.0]).unwrap(), 2);
        assert!(q.assign(&[1.0]).is_err());
    }

    #[test]
    fn test_assign_tie_lowest_id() {
        let q = fixed();
        // Equidistant from centroids 0 and 1.
        assert_eq!(q.assign(&[5.0, 0.0]).unwrap(), 0);
    }

    #[test]
    fn test_top_n() {
        let q = fixed();
        assert_eq!(q.top_n(&[0.1, 0.1], 2).unwrap(), vec![0, 1]);
        assert_eq!(q.top_n(&[5.0, 8.0], 5).unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn test_residual() {
        let q = fixed();
        assert_eq!(q.residual(&[11.0, 2.0], 1).unwrap(), vec![1.0, 2.0]);
        assert!(q.residual(&[11.0, 2.0], 3).is_err());
    }

    #[test]
    fn test_untrained_assign_fails() {
        let q = CoarseQuantizer::new(2);
        assert!(!q.is_trained());
        assert!(matches!(
            q.assign(&[0.0, 0.0]),
            Err(IvfPqError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_train() {
        let data: Vec<Vec<f32>> = (0..200)
            .map(|i| vec![(i % 4) as f32 * 20.0, (i % 7) as f32 * 0.01])
            .collect();
        let data = VectorStore::from_vectors(2, &data).unwrap();

        let mut q = CoarseQuantizer::new(2);
        q.train(&data, 4, KMeans::with_k(4)).unwrap();
        assert_eq!(q.nlist(), 4);

        // Assignment is deterministic for fixed centroids.
        let first = q.assign(&[20.0, 0.0]).unwrap();
        for _ in 0..10 {
            assert_eq!(q.assign(&[20.0, 0.0]).unwrap(), first);
        }
    }

    #[test]
    fn test_train_insufficient() {
        let data = VectorStore::from_vectors(2, &vec![vec![0.0, 0.0]; 3]).unwrap();
        let mut q = CoarseQuantizer::new(2);
        let err = q.train(&data, 4, KMeans::with_k(4)).unwrap_err();
        assert!(matches!(err, IvfPqError::InsufficientData { .. }));
    }
}
