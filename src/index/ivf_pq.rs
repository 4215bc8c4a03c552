//! IVF-PQ Index: Inverted File with Product Quantization.
//!
//! Combines IVF (coarse quantization for partitioning) with PQ (fine
//! quantization for compression). This achieves both fast search through
//! reduced search space and low memory through vector compression.
//!
//! Lifecycle: `Untrained → Trained → Populated`. `train` learns both
//! quantizers, `add` fills the inverted lists, `search` reads them.
//!
//! Search process:
//! 1. Find nprobe nearest IVF centroids to query
//! 2. Build PQ lookup table for the query (per list when encoding residuals)
//! 3. Scan vectors in selected lists using asymmetric PQ distance
//! 4. Return top-k results

use crate::coarse::CoarseQuantizer;
use crate::constants::ivf_pq::{
    DEFAULT_NPROBE, EMPTY_LIST_WARNING_RATIO, IMBALANCE_WARNING, SENTINEL_ID,
};
use crate::constants::pq::MAX_NBITS;
use crate::error::{check_batch, IvfPqError, Result};
use crate::index::invlists::InvertedFile;
use crate::kmeans::{KMeans, KMeansParams};
use crate::metrics::{HealthStatus, IndexStatistics, SearchStatistics, SearchStatsBuilder};
use crate::pq::ProductQuantizer;
use crate::topk::{Neighbor, TopK};
use crate::vector::VectorStore;
use rayon::prelude::*;
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

/// Construction parameters of an IVF-PQ index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfPqConfig {
    /// Vector dimension.
    pub dimension: usize,
    /// Number of coarse centroids (inverted lists).
    pub nlist: usize,
    /// Number of PQ subvectors.
    pub m: usize,
    /// Bits per PQ code.
    pub nbits: usize,
    /// Encode `x - centroid(x)` instead of `x`.
    pub by_residual: bool,
    /// Settings shared by coarse and PQ k-means.
    pub kmeans: KMeansParams,
    /// Lists probed by [`IVFPQIndex::search_default`].
    pub nprobe: usize,
}

impl IvfPqConfig {
    pub fn new(dimension: usize, nlist: usize, m: usize, nbits: usize) -> Self {
        Self {
            dimension,
            nlist,
            m,
            nbits,
            by_residual: true,
            kmeans: KMeansParams::default(),
            nprobe: DEFAULT_NPROBE,
        }
    }

    /// Check that the parameters describe a buildable index.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(IvfPqError::invalid_configuration("dimension must be non-zero"));
        }
        if self.nlist == 0 {
            return Err(IvfPqError::invalid_configuration("nlist must be non-zero"));
        }
        if self.m == 0 {
            return Err(IvfPqError::invalid_configuration(
                "number of subvectors must be non-zero",
            ));
        }
        if self.dimension % self.m != 0 {
            return Err(IvfPqError::invalid_configuration(format!(
                "vector dimension {} must be divisible by number of subvectors {}",
                self.dimension, self.m
            )));
        }
        if self.nbits == 0 || self.nbits > MAX_NBITS {
            return Err(IvfPqError::invalid_configuration(format!(
                "bits per code must be in 1..={}, got {}",
                MAX_NBITS, self.nbits
            )));
        }
        if self.kmeans.iterations == 0 {
            return Err(IvfPqError::invalid_configuration(
                "k-means needs at least one iteration",
            ));
        }
        if self.nprobe == 0 {
            return Err(IvfPqError::invalid_configuration("nprobe must be non-zero"));
        }
        Ok(())
    }
}

/// Lifecycle state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Untrained,
    Trained,
    Populated,
}

impl IndexState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Untrained => "untrained",
            Self::Trained => "trained",
            Self::Populated => "populated",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Untrained => 0,
            Self::Trained => 1,
            Self::Populated => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Untrained),
            1 => Some(Self::Trained),
            2 => Some(Self::Populated),
            _ => None,
        }
    }
}

/// Top-k results for a batch of queries.
///
/// `ids` and `distances` are row-major `nq × k`. Each row is sorted by
/// increasing squared distance; slots that could not be filled hold id `-1`
/// and distance `+inf`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    pub k: usize,
    pub ids: Vec<i64>,
    pub distances: Vec<f32>,
}

impl SearchResults {
    fn from_rows(k: usize, rows: Vec<Vec<Neighbor>>) -> Self {
        let mut ids = Vec::with_capacity(rows.len() * k);
        let mut distances = Vec::with_capacity(rows.len() * k);
        for row in rows {
            let filled = row.len();
            for n in row {
                ids.push(n.id);
                distances.push(n.distance);
            }
            for _ in filled..k {
                ids.push(SENTINEL_ID);
                distances.push(f32::INFINITY);
            }
        }
        Self { k, ids, distances }
    }

    /// Number of queries.
    pub fn len(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.ids.len() / self.k
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids of query `q`, including sentinel slots.
    pub fn query_ids(&self, q: usize) -> &[i64] {
        &self.ids[q * self.k..(q + 1) * self.k]
    }

    pub fn query_distances(&self, q: usize) -> &[f32] {
        &self.distances[q * self.k..(q + 1) * self.k]
    }

    /// Filled `(id, distance)` pairs of query `q`.
    pub fn neighbors(&self, q: usize) -> impl Iterator<Item = (i64, f32)> + '_ {
        self.query_ids(q)
            .iter()
            .copied()
            .zip(self.query_distances(q).iter().copied())
            .filter(|&(id, _)| id != SENTINEL_ID)
    }
}

/// IVF-PQ Index for scalable approximate nearest neighbor search.
///
/// Uses inverted file indexing for coarse partitioning and product
/// quantization for memory-efficient storage within lists.
#[derive(Debug, Clone)]
pub struct IVFPQIndex {
    config: IvfPqConfig,
    state: IndexState,
    quantizer: CoarseQuantizer,
    pq: ProductQuantizer,
    invlists: InvertedFile,
    /// Ids currently stored.
    ids: RoaringTreemap,
    /// Next id handed out by `add`.
    ntotal: i64,
    cancel: Option<Arc<AtomicBool>>,
}

impl IVFPQIndex {
    /// Create an untrained index with default training settings.
    ///
    /// # Errors
    /// [`IvfPqError::InvalidConfiguration`] if `dimension`, `nlist`, `m` or
    /// `nbits` is zero, `dimension % m != 0` or `nbits > 32`.
    pub fn new(dimension: usize, nlist: usize, m: usize, nbits: usize) -> Result<Self> {
        Self::with_config(IvfPqConfig::new(dimension, nlist, m, nbits))
    }

    /// Create an untrained index from a full configuration.
    pub fn with_config(config: IvfPqConfig) -> Result<Self> {
        config.validate()?;
        let pq = ProductQuantizer::new(config.dimension, config.m, config.nbits)?;
        let invlists = InvertedFile::new(config.nlist, pq.code_size());
        Ok(Self {
            quantizer: CoarseQuantizer::new(config.dimension),
            pq,
            invlists,
            state: IndexState::Untrained,
            ids: RoaringTreemap::new(),
            ntotal: 0,
            cancel: None,
            config,
        })
    }

    /// Reassemble a loaded index. The caller has checked that the parts agree.
    pub(crate) fn from_parts(
        config: IvfPqConfig,
        state: IndexState,
        quantizer: CoarseQuantizer,
        pq: ProductQuantizer,
        invlists: InvertedFile,
    ) -> Self {
        let mut ids = RoaringTreemap::new();
        let mut max_id = -1i64;
        for list in 0..invlists.nlist() {
            for &id in invlists.list_ids(list) {
                ids.insert(id as u64);
                max_id = max_id.max(id);
            }
        }
        Self {
            config,
            state,
            quantizer,
            pq,
            invlists,
            ids,
            ntotal: max_id + 1,
            cancel: None,
        }
    }

    /// Abort [`train`](Self::train) with [`IvfPqError::Cancelled`] once `flag` is set.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    pub fn config(&self) -> &IvfPqConfig {
        &self.config
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn is_trained(&self) -> bool {
        self.state != IndexState::Untrained
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn nlist(&self) -> usize {
        self.config.nlist
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.invlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invlists.is_empty()
    }

    /// Whether `id` is stored.
    pub fn contains(&self, id: i64) -> bool {
        id >= 0 && self.ids.contains(id as u64)
    }

    pub fn quantizer(&self) -> &CoarseQuantizer {
        &self.quantizer
    }

    pub fn pq(&self) -> &ProductQuantizer {
        &self.pq
    }

    pub fn invlists(&self) -> &InvertedFile {
        &self.invlists
    }

    /// Lists probed by [`search_default`](Self::search_default).
    pub fn default_nprobe(&self) -> usize {
        self.config.nprobe
    }

    /// Change the default nprobe; clamped to `1..=nlist`.
    pub fn set_default_nprobe(&mut self, nprobe: usize) {
        self.config.nprobe = nprobe.clamp(1, self.config.nlist);
    }

    fn require_trained(&self, operation: &'static str) -> Result<()> {
        if self.state == IndexState::Untrained {
            return Err(IvfPqError::invalid_state(operation, self.state.as_str()));
        }
        Ok(())
    }

    fn kmeans(&self, k: usize, seed: u64) -> KMeans {
        let kmeans = KMeans::from_params(k, &self.config.kmeans).with_seed(seed);
        match &self.cancel {
            Some(flag) => kmeans.with_cancel_flag(Arc::clone(flag)),
            None => kmeans,
        }
    }

    /// Learn the coarse centroids and the PQ codebooks from `vectors`.
    ///
    /// The index is left untouched unless both quantizers train successfully.
    ///
    /// # Errors
    /// - [`IvfPqError::InvalidState`] if the index is already trained
    /// - [`IvfPqError::DimensionMismatch`] if any vector has the wrong length
    /// - [`IvfPqError::InsufficientData`] with fewer than `max(nlist, 2^nbits)` vectors
    /// - [`IvfPqError::Cancelled`] if the cancellation flag was raised
    pub fn train<V: AsRef<[f32]>>(&mut self, vectors: &[V]) -> Result<()> {
        if self.state != IndexState::Untrained {
            return Err(IvfPqError::invalid_state("train", self.state.as_str()));
        }
        check_batch(self.config.dimension, vectors)?;
        let required = self.config.nlist.max(self.pq.ksub());
        if vectors.len() < required {
            return Err(IvfPqError::insufficient_data(required, vectors.len()));
        }

        let data = VectorStore::from_vectors(self.config.dimension, vectors)?;
        tracing::info!(
            n = data.len(),
            dimension = self.config.dimension,
            nlist = self.config.nlist,
            m = self.config.m,
            nbits = self.config.nbits,
            "training IVF-PQ index"
        );

        let mut quantizer = CoarseQuantizer::new(self.config.dimension);
        quantizer.train(
            &data,
            self.config.nlist,
            self.kmeans(self.config.nlist, self.config.kmeans.seed),
        )?;

        let pq_data = if self.config.by_residual {
            let assignments: Vec<usize> = data
                .as_slice()
                .par_chunks_exact(self.config.dimension)
                .map(|v| quantizer.assign_unchecked(v))
                .collect::<Result<_>>()?;
            let mut residuals = VectorStore::new(self.config.dimension);
            let mut buf = vec![0.0f32; self.config.dimension];
            for (v, &list) in data.iter().zip(&assignments) {
                quantizer.residual_into(v, list, &mut buf);
                residuals.push_unchecked(&buf);
            }
            residuals
        } else {
            data
        };

        let mut pq = self.pq.clone();
        pq.train(&pq_data, &self.config.kmeans, self.cancel.as_ref())?;

        self.quantizer = quantizer;
        self.pq = pq;
        self.invlists = InvertedFile::new(self.config.nlist, self.pq.code_size());
        self.state = IndexState::Trained;
        tracing::info!("IVF-PQ index trained");
        Ok(())
    }

    /// Add vectors with sequential ids starting one past the largest id
    /// ever stored.
    ///
    /// # Errors
    /// - [`IvfPqError::InvalidState`] if the index is untrained
    /// - [`IvfPqError::DimensionMismatch`] if any vector has the wrong length
    /// - [`IvfPqError::InvalidArgument`] if a generated id is already taken
    ///   by [`add_with_ids`](Self::add_with_ids), or the id space is exhausted
    pub fn add<V: AsRef<[f32]> + Sync>(&mut self, vectors: &[V]) -> Result<()> {
        let ids = (0..vectors.len() as i64)
            .map(|i| {
                self.ntotal
                    .checked_add(i)
                    .ok_or_else(|| IvfPqError::invalid_argument("sequential ids exhausted"))
            })
            .collect::<Result<Vec<i64>>>()?;
        self.add_with_ids(vectors, &ids)
    }

    /// Add vectors under caller-chosen ids.
    ///
    /// Nothing is added unless every vector and every id is valid.
    ///
    /// # Errors
    /// - [`IvfPqError::InvalidState`] if the index is untrained
    /// - [`IvfPqError::InvalidArgument`] if `ids.len() != vectors.len()`, or
    ///   an id is negative, repeated within the batch, already stored or
    ///   `i64::MAX` (no sequential id could follow it)
    /// - [`IvfPqError::DimensionMismatch`] if any vector has the wrong length
    pub fn add_with_ids<V: AsRef<[f32]> + Sync>(&mut self, vectors: &[V], ids: &[i64]) -> Result<()> {
        self.require_trained("add")?;
        if ids.len() != vectors.len() {
            return Err(IvfPqError::invalid_argument(format!(
                "{} ids supplied for {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        check_batch(self.config.dimension, vectors)?;
        let next_id = self.check_new_ids(ids)?;

        let cs = self.pq.code_size();
        let mut codes = vec![0u8; vectors.len() * cs];
        let lists: Vec<usize> = codes
            .par_chunks_mut(cs)
            .zip(vectors.par_iter())
            .map_init(
                || vec![0.0f32; self.config.dimension],
                |residual, (out, v)| -> Result<usize> {
                    let v = v.as_ref();
                    let list = self.quantizer.assign_unchecked(v)?;
                    if self.config.by_residual {
                        self.quantizer.residual_into(v, list, residual);
                        self.pq.encode_packed_unchecked(residual, out);
                    } else {
                        self.pq.encode_packed_unchecked(v, out);
                    }
                    Ok(list)
                },
            )
            .collect::<Result<_>>()?;

        for (i, (&list, &id)) in lists.iter().zip(ids).enumerate() {
            self.invlists.append(list, id, &codes[i * cs..(i + 1) * cs]);
        }
        self.ids.extend(ids.iter().map(|&id| id as u64));
        self.ntotal = next_id;
        self.state = IndexState::Populated;

        tracing::info!(added = vectors.len(), total = self.len(), "vectors added");
        Ok(())
    }

    /// Validate a batch of new ids and return the next sequential id.
    fn check_new_ids(&self, ids: &[i64]) -> Result<i64> {
        let mut batch = RoaringTreemap::new();
        let mut next_id = self.ntotal;
        for &id in ids {
            if id < 0 {
                return Err(IvfPqError::invalid_argument(format!(
                    "vector id {} is negative",
                    id
                )));
            }
            if self.ids.contains(id as u64) {
                return Err(IvfPqError::invalid_argument(format!(
                    "vector id {} is already present",
                    id
                )));
            }
            if !batch.insert(id as u64) {
                return Err(IvfPqError::invalid_argument(format!(
                    "vector id {} appears twice in the batch",
                    id
                )));
            }
            let after = id.checked_add(1).ok_or_else(|| {
                IvfPqError::invalid_argument(format!("vector id {} leaves no room for later ids", id))
            })?;
            next_id = next_id.max(after);
        }
        Ok(next_id)
    }

    /// Search for the `k` nearest neighbors of each query, probing `nprobe`
    /// lists (clamped to `nlist`).
    ///
    /// # Errors
    /// - [`IvfPqError::InvalidArgument`] if `k` or `nprobe` is zero
    /// - [`IvfPqError::InvalidState`] unless the index is populated
    /// - [`IvfPqError::DimensionMismatch`] if any query has the wrong length
    pub fn search<Q: AsRef<[f32]> + Sync>(
        &self,
        queries: &[Q],
        k: usize,
        nprobe: usize,
    ) -> Result<SearchResults> {
        self.search_inner(queries, k, nprobe).map(|(results, _)| results)
    }

    /// [`search`](Self::search) with the configured default nprobe.
    pub fn search_default<Q: AsRef<[f32]> + Sync>(
        &self,
        queries: &[Q],
        k: usize,
    ) -> Result<SearchResults> {
        self.search(queries, k, self.config.nprobe)
    }

    /// [`search`](Self::search), also reporting what the search touched.
    pub fn search_with_stats<Q: AsRef<[f32]> + Sync>(
        &self,
        queries: &[Q],
        k: usize,
        nprobe: usize,
    ) -> Result<(SearchResults, SearchStatistics)> {
        let start = Instant::now();
        let (results, scanned) = self.search_inner(queries, k, nprobe)?;

        let mut stats = SearchStatsBuilder::new();
        stats.queries(queries.len());
        stats.lists_probed(queries.len() * nprobe.min(self.config.nlist));
        stats.add_codes_scanned(scanned);
        stats.set_query_time(start.elapsed());
        Ok((results, stats.build()))
    }

    fn search_inner<Q: AsRef<[f32]> + Sync>(
        &self,
        queries: &[Q],
        k: usize,
        nprobe: usize,
    ) -> Result<(SearchResults, usize)> {
        if k == 0 {
            return Err(IvfPqError::invalid_argument("k must be at least 1"));
        }
        if nprobe == 0 {
            return Err(IvfPqError::invalid_argument("nprobe must be at least 1"));
        }
        if self.state != IndexState::Populated {
            return Err(IvfPqError::invalid_state("search", self.state.as_str()));
        }
        check_batch(self.config.dimension, queries)?;
        let nprobe = nprobe.min(self.config.nlist);

        let rows: Vec<(Vec<Neighbor>, usize)> = queries
            .par_iter()
            .map(|q| self.search_one(q.as_ref(), k, nprobe))
            .collect();

        let scanned: usize = rows.iter().map(|(_, s)| s).sum();
        let rows = rows.into_iter().map(|(r, _)| r).collect();
        Ok((SearchResults::from_rows(k, rows), scanned))
    }

    /// Top-k for one validated query, with the number of codes scanned.
    fn search_one(&self, query: &[f32], k: usize, nprobe: usize) -> (Vec<Neighbor>, usize) {
        let probes = self.quantizer.top_n_unchecked(query, nprobe);
        let mut topk = TopK::new(k);
        let mut table = Vec::new();
        let mut scanned = 0usize;

        let mut scan = |lists: &[usize], table: &[f32], topk: &mut TopK| {
            self.invlists.scan(lists, |id, code| {
                let d = self.pq.distance_from_packed(table, code);
                if d <= topk.threshold() {
                    topk.push(id, d);
                }
                scanned += 1;
            });
        };

        if self.config.by_residual {
            let mut residual = vec![0.0f32; self.config.dimension];
            for &list in &probes {
                if self.invlists.list_len(list) == 0 {
                    continue;
                }
                self.quantizer.residual_into(query, list, &mut residual);
                self.pq.compute_distance_table_into(&residual, &mut table);
                scan(std::slice::from_ref(&list), &table[..], &mut topk);
            }
        } else {
            self.pq.compute_distance_table_into(query, &mut table);
            scan(&probes[..], &table[..], &mut topk);
        }

        (topk.into_sorted_vec(), scanned)
    }

    /// Drop every stored vector and return to `Trained`. A no-op while untrained.
    pub fn reset(&mut self) {
        if self.state == IndexState::Untrained {
            return;
        }
        self.invlists.clear();
        self.ids.clear();
        self.ntotal = 0;
        self.state = IndexState::Trained;
    }

    /// Snapshot of sizes, balance and memory use.
    pub fn statistics(&self) -> IndexStatistics {
        let sizes = self.invlists.list_sizes();
        let n = self.len();
        let nlist = sizes.len().max(1);
        let mean = n as f32 / nlist as f32;
        let variance = sizes
            .iter()
            .map(|&s| {
                let diff = s as f32 - mean;
                diff * diff
            })
            .sum::<f32>()
            / nlist as f32;

        let code_size = self.pq.code_size();
        let centroid_bytes = self.quantizer.centroids().as_slice().len() * 4;
        let codebook_bytes = self.pq.num_subvectors() * self.pq.ksub() * self.pq.subvector_dim() * 4;
        let raw_bytes = self.config.dimension * 4;

        IndexStatistics {
            num_vectors: n,
            nlist: self.config.nlist,
            dimension: self.config.dimension,
            num_subvectors: self.config.m,
            nbits: self.config.nbits,
            code_size,
            memory_bytes: self.invlists.memory_bytes()
                + if self.is_trained() { centroid_bytes + codebook_bytes } else { 0 },
            compression_ratio: raw_bytes as f32 / (code_size + std::mem::size_of::<i64>()) as f32,
            list_size_min: sizes.iter().copied().min().unwrap_or(0),
            list_size_max: sizes.iter().copied().max().unwrap_or(0),
            list_size_mean: mean,
            list_size_std: variance.sqrt(),
            empty_lists: sizes.iter().filter(|&&s| s == 0).count(),
            imbalance_factor: self.invlists.imbalance_factor() as f32,
            nprobe: self.config.nprobe,
            state: self.state.as_str(),
        }
    }

    /// Flag conditions that degrade search quality.
    pub fn health_check(&self) -> HealthStatus {
        let mut critical = Vec::new();
        let mut warnings = Vec::new();

        match self.state {
            IndexState::Untrained => critical.push("index is not trained".to_string()),
            IndexState::Trained => warnings.push("index holds no vectors".to_string()),
            IndexState::Populated => {}
        }

        let stats = self.statistics();
        if stats.num_vectors > 0 {
            if stats.list_size_mean > 0.0 {
                let ratio = stats.list_size_max as f32 / stats.list_size_mean;
                if ratio > IMBALANCE_WARNING {
                    warnings.push(format!(
                        "largest list holds {:.1}x the mean list size",
                        ratio
                    ));
                }
            }
            let empty_ratio = stats.empty_lists as f32 / stats.nlist as f32;
            if stats.num_vectors >= stats.nlist && empty_ratio > EMPTY_LIST_WARNING_RATIO {
                warnings.push(format!(
                    "{} of {} lists are empty",
                    stats.empty_lists, stats.nlist
                ));
            }
        }

        if !critical.is_empty() {
            critical.extend(warnings);
            HealthStatus::Unhealthy(critical)
        } else if !warnings.is_empty() {
            HealthStatus::Warning(warnings)
        } else {
            HealthStatus::Healthy
        }
    }
}
