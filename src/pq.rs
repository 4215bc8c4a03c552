//! Product Quantization for vector compression.
//!
//! Product Quantization (PQ) compresses vectors by splitting them into
//! subvectors and quantizing each subspace independently.
//!
//! Key concepts:
//! - Split D-dimensional vectors into M subvectors of D/M dimensions
//! - Train 2^nbits centroids (codebook) for each subspace using k-means
//! - Encode each vector as M codes (one centroid index per subspace)
//! - Use asymmetric distance: query stays uncompressed, database is compressed
//!
//! Codes are handled as `u32` indices at the API boundary and bit-packed
//! little-endian into `ceil(M * nbits / 8)` bytes for storage, so any
//! `1 <= nbits <= 32` is supported. The common 8-bit case has a byte-wise
//! fast path.
//!
//! Asymmetric distance is computed through a per-query table of
//! `M * 2^nbits` squared distances: once the table is built, the distance to
//! any compressed vector is M lookups.

use crate::constants::pq::MAX_NBITS;
use crate::distance::euclidean_distance_squared;
use crate::error::{check_dimension, IvfPqError, Result};
use crate::kmeans::{KMeans, KMeansParams};
use crate::vector::VectorStore;
use rayon::prelude::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Product Quantizer for vector compression.
///
/// Splits vectors into subvectors and maintains a codebook (set of centroids)
/// for each subspace. Vectors are encoded as indices into these codebooks.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    /// Original vector dimension.
    dim: usize,
    /// Number of subvectors (M).
    m: usize,
    /// Bits per code.
    nbits: usize,
    /// Dimension of each subvector.
    dsub: usize,
    /// Centroids per codebook (2^nbits).
    ksub: usize,
    /// M codebooks of `ksub` centroids each; empty until trained.
    codebooks: Vec<VectorStore>,
}

impl ProductQuantizer {
    /// Create an untrained quantizer.
    ///
    /// # Errors
    /// [`IvfPqError::InvalidConfiguration`] unless `m > 0`, `dim % m == 0` and
    /// `1 <= nbits <= 32`.
    pub fn new(dim: usize, m: usize, nbits: usize) -> Result<Self> {
        if dim == 0 {
            return Err(IvfPqError::invalid_configuration("dimension must be non-zero"));
        }
        if m == 0 {
            return Err(IvfPqError::invalid_configuration(
                "number of subvectors must be non-zero",
            ));
        }
        if dim % m != 0 {
            return Err(IvfPqError::invalid_configuration(format!(
                "vector dimension {} must be divisible by number of subvectors {}",
                dim, m
            )));
        }
        if nbits == 0 || nbits > MAX_NBITS {
            return Err(IvfPqError::invalid_configuration(format!(
                "bits per code must be in 1..={}, got {}",
                MAX_NBITS, nbits
            )));
        }
        let ksub = 1usize.checked_shl(nbits as u32).ok_or_else(|| {
            IvfPqError::invalid_configuration(format!(
                "2^{} centroids do not fit this platform",
                nbits
            ))
        })?;

        Ok(Self {
            dim,
            m,
            nbits,
            dsub: dim / m,
            ksub,
            codebooks: Vec::new(),
        })
    }

    /// Rebuild a trained quantizer from its codebooks.
    pub fn from_codebooks(
        dim: usize,
        m: usize,
        nbits: usize,
        codebooks: Vec<VectorStore>,
    ) -> Result<Self> {
        let mut pq = Self::new(dim, m, nbits)?;
        if codebooks.len() != m {
            return Err(IvfPqError::invalid_format(format!(
                "expected {} codebooks, got {}",
                m,
                codebooks.len()
            )));
        }
        for cb in &codebooks {
            if cb.dimension() != pq.dsub || cb.len() != pq.ksub {
                return Err(IvfPqError::invalid_format(format!(
                    "codebook shape {}x{} does not match {}x{}",
                    cb.len(),
                    cb.dimension(),
                    pq.ksub,
                    pq.dsub
                )));
            }
        }
        pq.codebooks = codebooks;
        Ok(pq)
    }

    /// Train the M codebooks on `data`, one k-means run per subspace.
    ///
    /// Sub-quantizers train in parallel; sub-quantizer `j` uses
    /// `params.seed + j` so their initializations differ.
    ///
    /// # Errors
    /// - [`IvfPqError::DimensionMismatch`] if `data` is not `dim`-dimensional
    /// - [`IvfPqError::InsufficientData`] if `data` has fewer than `2^nbits` vectors
    /// - [`IvfPqError::Cancelled`] if `cancel` was raised
    pub fn train(
        &mut self,
        data: &VectorStore,
        params: &KMeansParams,
        cancel: Option<&Arc<AtomicBool>>,
    ) -> Result<()> {
        if data.dimension() != self.dim {
            return Err(IvfPqError::dimension_mismatch(self.dim, data.dimension()));
        }
        if data.len() < self.ksub {
            return Err(IvfPqError::insufficient_data(self.ksub, data.len()));
        }

        let codebooks: Vec<VectorStore> = (0..self.m)
            .into_par_iter()
            .map(|j| -> Result<VectorStore> {
                let mut sub = VectorStore::new(self.dsub);
                for v in data.iter() {
                    sub.push_unchecked(self.subvector(v, j));
                }

                let mut kmeans = KMeans::from_params(self.ksub, params)
                    .with_seed(params.seed.wrapping_add(j as u64));
                if let Some(flag) = cancel {
                    kmeans = kmeans.with_cancel_flag(Arc::clone(flag));
                }
                kmeans.fit(&sub)?;
                Ok(kmeans.into_centroids())
            })
            .collect::<Result<_>>()?;

        tracing::info!(
            m = self.m,
            ksub = self.ksub,
            points = data.len(),
            "product quantizer trained"
        );
        self.codebooks = codebooks;
        Ok(())
    }

    pub fn is_trained(&self) -> bool {
        self.codebooks.len() == self.m
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Number of subvectors (M).
    pub fn num_subvectors(&self) -> usize {
        self.m
    }

    pub fn nbits(&self) -> usize {
        self.nbits
    }

    /// Dimension of each subvector (D/M).
    pub fn subvector_dim(&self) -> usize {
        self.dsub
    }

    /// Centroids per codebook (2^nbits).
    pub fn ksub(&self) -> usize {
        self.ksub
    }

    /// Bytes of one packed code.
    pub fn code_size(&self) -> usize {
        (self.m * self.nbits + 7) / 8
    }

    /// Codebook of subspace `j`.
    pub fn codebook(&self, j: usize) -> Option<&VectorStore> {
        self.codebooks.get(j)
    }

    #[inline]
    fn subvector<'a>(&self, v: &'a [f32], j: usize) -> &'a [f32] {
        &v[j * self.dsub..(j + 1) * self.dsub]
    }

    fn ensure_trained(&self, operation: &'static str) -> Result<()> {
        if self.is_trained() {
            Ok(())
        } else {
            Err(IvfPqError::invalid_state(operation, "untrained"))
        }
    }

    /// Encode a vector into M centroid indices.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u32>> {
        check_dimension(self.dim, vector)?;
        self.ensure_trained("encode")?;
        Ok(self.encode_unchecked(vector))
    }

    pub(crate) fn encode_unchecked(&self, vector: &[f32]) -> Vec<u32> {
        self.codebooks
            .iter()
            .enumerate()
            .map(|(j, cb)| {
                cb.nearest_unchecked(self.subvector(vector, j))
                    .map_or(0, |(id, _)| id as u32)
            })
            .collect()
    }

    /// Encode straight into a packed code of [`code_size`](Self::code_size) bytes.
    pub(crate) fn encode_packed_unchecked(&self, vector: &[f32], out: &mut [u8]) {
        let code = self.encode_unchecked(vector);
        pack_bits(&code, self.nbits, out);
    }

    /// Reconstruct a vector from its code.
    pub fn decode(&self, code: &[u32]) -> Result<Vec<f32>> {
        self.ensure_trained("decode")?;
        self.check_code(code)?;
        let mut out = Vec::with_capacity(self.dim);
        for (cb, &c) in self.codebooks.iter().zip(code) {
            out.extend_from_slice(cb.row(c as usize));
        }
        Ok(out)
    }

    fn check_code(&self, code: &[u32]) -> Result<()> {
        if code.len() != self.m {
            return Err(IvfPqError::invalid_argument(format!(
                "code has {} entries, expected {}",
                code.len(),
                self.m
            )));
        }
        if let Some(&bad) = code.iter().find(|&&c| c as usize >= self.ksub) {
            return Err(IvfPqError::invalid_argument(format!(
                "code entry {} out of range for {} centroids",
                bad, self.ksub
            )));
        }
        Ok(())
    }

    /// Pack M indices into [`code_size`](Self::code_size) bytes.
    pub fn pack_code(&self, code: &[u32]) -> Result<Vec<u8>> {
        self.check_code(code)?;
        let mut out = vec![0u8; self.code_size()];
        pack_bits(code, self.nbits, &mut out);
        Ok(out)
    }

    /// Inverse of [`pack_code`](Self::pack_code).
    pub fn unpack_code(&self, packed: &[u8]) -> Result<Vec<u32>> {
        if packed.len() != self.code_size() {
            return Err(IvfPqError::invalid_argument(format!(
                "packed code has {} bytes, expected {}",
                packed.len(),
                self.code_size()
            )));
        }
        Ok(unpack_bits(packed, self.nbits, self.m))
    }

    /// Sum over subspaces of the squared distance between the query
    /// subvector and the centroid the code selects.
    pub fn asymmetric_distance(&self, query: &[f32], code: &[u32]) -> Result<f32> {
        check_dimension(self.dim, query)?;
        self.ensure_trained("compute distances")?;
        self.check_code(code)?;
        Ok(self
            .codebooks
            .iter()
            .zip(code)
            .enumerate()
            .map(|(j, (cb, &c))| euclidean_distance_squared(self.subvector(query, j), cb.row(c as usize)))
            .sum())
    }

    /// Precompute `table[j * ksub + c]` = squared distance from query
    /// subvector j to centroid c of codebook j.
    pub fn compute_distance_table(&self, query: &[f32]) -> Result<Vec<f32>> {
        check_dimension(self.dim, query)?;
        self.ensure_trained("compute distances")?;
        let mut table = Vec::new();
        self.compute_distance_table_into(query, &mut table);
        Ok(table)
    }

    /// Fill `table` in place, reusing its allocation.
    pub(crate) fn compute_distance_table_into(&self, query: &[f32], table: &mut Vec<f32>) {
        table.clear();
        table.reserve(self.m * self.ksub);
        for (j, cb) in self.codebooks.iter().enumerate() {
            let q = self.subvector(query, j);
            table.extend(cb.iter().map(|c| euclidean_distance_squared(q, c)));
        }
    }

    /// Distance from a table to an unpacked code.
    #[inline]
    pub fn distance_from_table(&self, table: &[f32], code: &[u32]) -> f32 {
        code.iter()
            .enumerate()
            .map(|(j, &c)| table[j * self.ksub + c as usize])
            .sum()
    }

    /// Distance from a table to a packed code.
    #[inline]
    pub fn distance_from_packed(&self, table: &[f32], packed: &[u8]) -> f32 {
        if self.nbits == 8 {
            return packed
                .iter()
                .enumerate()
                .map(|(j, &c)| table[j * 256 + c as usize])
                .sum();
        }
        let mut reader = BitReader::new(packed, self.nbits);
        let mut sum = 0.0f32;
        for j in 0..self.m {
            sum += table[j * self.ksub + reader.next_code() as usize];
        }
        sum
    }
}

/// Pack `codes` of `nbits` each into `out`, least significant bit first.
///
/// `out` must hold at least `ceil(codes.len() * nbits / 8)` bytes; bytes
/// past the last code are left untouched.
pub fn pack_bits(codes: &[u32], nbits: usize, out: &mut [u8]) {
    let used = (codes.len() * nbits + 7) / 8;
    out[..used].fill(0);
    let mut bit = 0usize;
    for &code in codes {
        let mut value = code as u64;
        let mut remaining = nbits;
        while remaining > 0 {
            let offset = bit % 8;
            let take = (8 - offset).min(remaining);
            let mask = (1u64 << take) - 1;
            out[bit / 8] |= ((value & mask) as u8) << offset;
            value >>= take;
            remaining -= take;
            bit += take;
        }
    }
}

/// Unpack `count` codes of `nbits` each.
pub fn unpack_bits(packed: &[u8], nbits: usize, count: usize) -> Vec<u32> {
    let mut reader = BitReader::new(packed, nbits);
    (0..count).map(|_| reader.next_code()).collect()
}

/// Sequential reader over a little-endian bit-packed code.
struct BitReader<'a> {
    bytes: &'a [u8],
    nbits: usize,
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8], nbits: usize) -> Self {
        Self { bytes, nbits, bit: 0 }
    }

    #[inline]
    fn next_code(&mut self) -> u32 {
        let mut value = 0u64;
        let mut filled = 0usize;
        while filled < self.nbits {
            let offset = self.bit % 8;
            let take = (8 - offset).min(self.nbits - filled);
            let byte = self.bytes[self.bit / 8] as u64;
            let chunk = (byte >> offset) & ((1u64 << take) - 1);
            value |= chunk << filled;
            filled += take;
            self.bit += take;
        }
        value as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_store(n: usize, dim: usize, seed: u64) -> VectorStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let data: Vec<f32> = (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        VectorStore::from_flat(dim, data).unwrap()
    }

    fn trained(dim: usize, m: usize, nbits: usize) -> (ProductQuantizer, VectorStore) {
        let data = random_store(1000, dim, 11);
        let mut pq = ProductQuantizer::new(dim, m, nbits).unwrap();
        pq.train(&data, &KMeansParams::default(), None).unwrap();
        (pq, data)
    }

    #[test]
    fn test_new_validates() {
        assert!(ProductQuantizer::new(64, 8, 8).is_ok());
        assert!(matches!(
            ProductQuantizer::new(64, 7, 8),
            Err(IvfPqError::InvalidConfiguration(_))
        ));
        assert!(ProductQuantizer::new(64, 0, 8).is_err());
        assert!(ProductQuantizer::new(64, 8, 0).is_err());
        assert!(ProductQuantizer::new(64, 8, 33).is_err());
        assert!(ProductQuantizer::new(64, 8, 32).is_ok());
    }

    #[test]
    fn test_code_size() {
        assert_eq!(ProductQuantizer::new(64, 8, 8).unwrap().code_size(), 8);
        assert_eq!(ProductQuantizer::new(64, 8, 4).unwrap().code_size(), 4);
        assert_eq!(ProductQuantizer::new(30, 3, 5).unwrap().code_size(), 2);
        assert_eq!(ProductQuantizer::new(64, 8, 12).unwrap().code_size(), 12);
    }

    #[test]
    fn test_train_insufficient() {
        let data = random_store(100, 16, 1);
        let mut pq = ProductQuantizer::new(16, 4, 8).unwrap();
        let err = pq.train(&data, &KMeansParams::default(), None).unwrap_err();
        assert!(matches!(
            err,
            IvfPqError::InsufficientData {
                required: 256,
                actual: 100
            }
        ));
        assert!(!pq.is_trained());
    }

    #[test]
    fn test_encode_before_train_fails() {
        let pq = ProductQuantizer::new(16, 4, 4).unwrap();
        assert!(matches!(
            pq.encode(&[0.0; 16]),
            Err(IvfPqError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_encode_decode() {
        let (pq, data) = trained(16, 4, 6);

        let mut total_error = 0.0f32;
        let mut total_norm = 0.0f32;
        for v in data.iter().take(100) {
            let code = pq.encode(v).unwrap();
            assert_eq!(code.len(), 4);
            assert!(code.iter().all(|&c| (c as usize) < pq.ksub()));

            let decoded = pq.decode(&code).unwrap();
            total_error += euclidean_distance_squared(v, &decoded);
            total_norm += v.iter().map(|x| x * x).sum::<f32>();
        }
        // 64 centroids per 4-d subspace must beat encoding everything as zero.
        assert!(total_error < total_norm * 0.5);
    }

    #[test]
    fn test_asymmetric_distance_matches_decoded() {
        let (pq, data) = trained(16, 4, 4);
        let query = data.row(0);
        for v in data.iter().skip(1).take(20) {
            let code = pq.encode(v).unwrap();
            let adc = pq.asymmetric_distance(query, &code).unwrap();
            let direct = euclidean_distance_squared(query, &pq.decode(&code).unwrap());
            assert!((adc - direct).abs() < 1e-4, "adc={} direct={}", adc, direct);
        }
    }

    #[test]
    fn test_lookup_table_matches_direct() {
        for nbits in [4, 8] {
            let (pq, data) = trained(16, 4, nbits);
            let query = data.row(3);
            let table = pq.compute_distance_table(query).unwrap();
            assert_eq!(table.len(), 4 * pq.ksub());

            for v in data.iter().take(20) {
                let code = pq.encode(v).unwrap();
                let packed = pq.pack_code(&code).unwrap();
                let direct = pq.asymmetric_distance(query, &code).unwrap();
                let from_table = pq.distance_from_table(&table, &code);
                let from_packed = pq.distance_from_packed(&table, &packed);
                assert!((direct - from_table).abs() < 1e-4);
                assert!((from_table - from_packed).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_check_code() {
        let (pq, _) = trained(8, 2, 4);
        assert!(pq.decode(&[0, 1, 2]).is_err());
        assert!(pq.decode(&[0, 16]).is_err());
        assert!(pq.decode(&[15, 0]).is_ok());
    }

    #[test]
    fn test_from_codebooks_checks_shape() {
        let (pq, _) = trained(8, 2, 4);
        let codebooks: Vec<VectorStore> = (0..2).map(|j| pq.codebook(j).unwrap().clone()).collect();
        let rebuilt = ProductQuantizer::from_codebooks(8, 2, 4, codebooks.clone()).unwrap();
        assert_eq!(
            rebuilt.encode(&[0.1; 8]).unwrap(),
            pq.encode(&[0.1; 8]).unwrap()
        );
        assert!(ProductQuantizer::from_codebooks(8, 2, 5, codebooks).is_err());
    }

    proptest! {
        #[test]
        fn prop_pack_unpack_lossless(
            nbits in 1usize..=32,
            raw in proptest::collection::vec(any::<u32>(), 1..24),
        ) {
            let mask = if nbits == 32 { u32::MAX } else { (1u32 << nbits) - 1 };
            let codes: Vec<u32> = raw.iter().map(|&c| c & mask).collect();

            let mut packed = vec![0xAAu8; (codes.len() * nbits + 7) / 8];
            pack_bits(&codes, nbits, &mut packed);
            prop_assert_eq!(unpack_bits(&packed, nbits, codes.len()), codes);
        }
    }
}
