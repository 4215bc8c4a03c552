//! Persistence layer for saving and loading IVF-PQ indexes.
//!
//! This module provides serialization and deserialization of indexes to
//! disk, with checksums and versioning.
//!
//! # File Format
//!
//! ```text
//! [MAGIC 8B "FORGEIVF"][VERSION u32][FLAGS u32][CHECKSUM u32]
//! [CONFIG_LEN u64][CONFIG bincode][STATE u8]
//! [CENTROIDS f32 × nlist·d]
//! [CODEBOOKS f32 × m·2^nbits·(d/m)]
//! per list: [LEN u64][IDS i64 × LEN][CODES u8 × LEN·code_size]
//! ```
//!
//! All integers and floats are little-endian. The checksum is a CRC32 of
//! everything after the header.
//!
//! # Example
//!
//! ```ignore
//! use forge_ivfpq::persistence::Persistable;
//!
//! index.save("my_index.fivf")?;
//! let loaded = IVFPQIndex::load("my_index.fivf")?;
//! ```

mod format;

pub use format::{FileHeader, FormatFlags, FORMAT_VERSION, MAGIC};

use crate::coarse::CoarseQuantizer;
use crate::error::{IvfPqError, Result};
use crate::index::{IVFPQIndex, IndexState, InvertedFile, IvfPqConfig};
use crate::pq::ProductQuantizer;
use crate::vector::VectorStore;
use format::{ByteReader, ByteWriter};
use roaring::RoaringTreemap;
use std::path::Path;

/// Trait for types that can be persisted to disk.
pub trait Persistable: Sized {
    /// Save the index to a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written or serialization fails.
    fn save(&self, path: impl AsRef<Path>) -> Result<()>;

    /// Load an index from a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is corrupted, or has an
    /// incompatible format.
    fn load(path: impl AsRef<Path>) -> Result<Self>;
}

/// Verify file header and return the data section.
pub(crate) fn verify_header(data: &[u8]) -> Result<(FileHeader, &[u8])> {
    if data.len() < FileHeader::SIZE {
        return Err(IvfPqError::invalid_format("file too small for header"));
    }

    let header = FileHeader::from_bytes(&data[..FileHeader::SIZE])?;

    let data_section = &data[FileHeader::SIZE..];
    if crc32fast::hash(data_section) != header.checksum {
        return Err(IvfPqError::ChecksumMismatch);
    }

    Ok((header, data_section))
}

/// Prefix `data` with a header carrying its checksum.
pub(crate) fn with_header(flags: FormatFlags, data: &[u8]) -> Vec<u8> {
    let header = FileHeader::new(flags, crc32fast::hash(data));
    let mut out = Vec::with_capacity(FileHeader::SIZE + data.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(data);
    out
}

/// Write bytes to a file and sync.
pub(crate) fn write_file(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

impl IVFPQIndex {
    /// Serialize a trained index, header included.
    ///
    /// # Errors
    /// [`IvfPqError::InvalidState`] if the index is untrained.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.state() == IndexState::Untrained {
            return Err(IvfPqError::invalid_state("save", self.state().as_str()));
        }

        let config = self.config();
        let mut w = ByteWriter::new();
        w.put_blob(&bincode::serialize(config)?);
        w.put_u8(self.state().to_u8());

        w.put_f32s(self.quantizer().centroids().as_slice());
        for j in 0..config.m {
            if let Some(codebook) = self.pq().codebook(j) {
                w.put_f32s(codebook.as_slice());
            }
        }

        let invlists = self.invlists();
        for list in 0..invlists.nlist() {
            let ids = invlists.list_ids(list);
            w.put_u64(ids.len() as u64);
            w.put_i64s(ids);
            w.put_bytes(invlists.list_codes(list));
        }

        let mut flags = FormatFlags::default();
        if config.by_residual {
            flags.set(FormatFlags::BY_RESIDUAL);
        }
        if self.state() == IndexState::Populated {
            flags.set(FormatFlags::POPULATED);
        }
        Ok(with_header(flags, &w.into_inner()))
    }

    /// Inverse of [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    /// - [`IvfPqError::ChecksumMismatch`] if the body was altered
    /// - [`IvfPqError::InvalidFormat`] for a bad header, a truncated body or
    ///   sizes that disagree with the stored configuration
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (header, data) = verify_header(bytes)?;
        let mut r = ByteReader::new(data);

        let config: IvfPqConfig = bincode::deserialize(r.get_blob()?)
            .map_err(|e| IvfPqError::invalid_format(format!("stored configuration: {}", e)))?;
        config
            .validate()
            .map_err(|e| IvfPqError::invalid_format(format!("stored configuration: {}", e)))?;
        if header.flags.has(FormatFlags::BY_RESIDUAL) != config.by_residual {
            return Err(IvfPqError::invalid_format(
                "header flags disagree with stored configuration",
            ));
        }

        let state = match IndexState::from_u8(r.get_u8()?) {
            Some(IndexState::Untrained) | None => {
                return Err(IvfPqError::invalid_format("invalid index state"))
            }
            Some(state) => state,
        };
        if header.flags.has(FormatFlags::POPULATED) != (state == IndexState::Populated) {
            return Err(IvfPqError::invalid_format(
                "header flags disagree with stored index state",
            ));
        }

        let d = config.dimension;
        let centroid_floats = config
            .nlist
            .checked_mul(d)
            .ok_or_else(|| IvfPqError::invalid_format("centroid array too large"))?;
        let centroids = VectorStore::from_flat(d, r.get_f32s(centroid_floats)?)?;
        let quantizer = CoarseQuantizer::from_centroids(centroids);

        let pq = ProductQuantizer::new(d, config.m, config.nbits)
            .map_err(|e| IvfPqError::invalid_format(e.to_string()))?;
        let dsub = pq.subvector_dim();
        let codebook_floats = pq
            .ksub()
            .checked_mul(dsub)
            .ok_or_else(|| IvfPqError::invalid_format("codebook too large"))?;
        let mut codebooks = Vec::with_capacity(config.m);
        for _ in 0..config.m {
            codebooks.push(VectorStore::from_flat(dsub, r.get_f32s(codebook_floats)?)?);
        }
        let pq = ProductQuantizer::from_codebooks(d, config.m, config.nbits, codebooks)?;

        let code_size = pq.code_size();
        let mut invlists = InvertedFile::new(config.nlist, code_size);
        let mut seen = RoaringTreemap::new();
        for list in 0..config.nlist {
            let len = r.get_len()?;
            let ids = r.get_i64s(len)?;
            let code_bytes = len
                .checked_mul(code_size)
                .ok_or_else(|| IvfPqError::invalid_format("list too large"))?;
            let codes = r.take(code_bytes)?.to_vec();
            for &id in &ids {
                if id < 0 || !seen.insert(id as u64) {
                    return Err(IvfPqError::invalid_format(format!(
                        "invalid or repeated vector id {}",
                        id
                    )));
                }
            }
            invlists.set_list(list, ids, codes);
        }

        if !r.is_empty() {
            return Err(IvfPqError::invalid_format("trailing bytes after last list"));
        }
        if state == IndexState::Trained && !invlists.is_empty() {
            return Err(IvfPqError::invalid_format("trained index holds postings"));
        }

        tracing::info!(
            vectors = invlists.len(),
            nlist = config.nlist,
            "IVF-PQ index loaded"
        );
        Ok(IVFPQIndex::from_parts(config, state, quantizer, pq, invlists))
    }
}

impl Persistable for IVFPQIndex {
    fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        write_file(path, &bytes)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn populated() -> (IVFPQIndex, Vec<Vec<f32>>) {
        let mut rng = StdRng::seed_from_u64(9);
        let vectors: Vec<Vec<f32>> = (0..300)
            .map(|_| (0..8).map(|_| rng.gen::<f32>()).collect())
            .collect();
        let mut index = IVFPQIndex::new(8, 4, 4, 5).unwrap();
        index.train(&vectors).unwrap();
        index.add(&vectors).unwrap();
        (index, vectors)
    }

    #[test]
    fn test_bytes_roundtrip_preserves_search() {
        let (index, vectors) = populated();
        let loaded = IVFPQIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();

        assert_eq!(loaded.config(), index.config());
        assert_eq!(loaded.state(), IndexState::Populated);
        assert_eq!(loaded.len(), index.len());
        assert_eq!(
            loaded.search(&vectors[..10], 5, 4).unwrap(),
            index.search(&vectors[..10], 5, 4).unwrap()
        );
    }

    #[test]
    fn test_loaded_index_continues_ids() {
        let (index, vectors) = populated();
        let mut loaded = IVFPQIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();
        loaded.add(&vectors[..1]).unwrap();
        assert!(loaded.contains(300));
        assert!(loaded.add_with_ids(&vectors[..1], &[5]).is_err());
    }

    #[test]
    fn test_untrained_cannot_be_saved() {
        let index = IVFPQIndex::new(8, 4, 4, 5).unwrap();
        assert!(matches!(
            index.to_bytes(),
            Err(IvfPqError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_corruption_detected() {
        let (index, _) = populated();
        let mut bytes = index.to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            IVFPQIndex::from_bytes(&bytes),
            Err(IvfPqError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_truncated_body_is_invalid_format() {
        let (index, _) = populated();
        let bytes = index.to_bytes().unwrap();
        let body = &bytes[FileHeader::SIZE..bytes.len() - 3];
        let header = FileHeader::from_bytes(&bytes[..FileHeader::SIZE]).unwrap();
        let truncated = with_header(header.flags, body);
        assert!(matches!(
            IVFPQIndex::from_bytes(&truncated),
            Err(IvfPqError::InvalidFormat(_))
        ));
    }

    /// Re-frame a body after editing it, so the checksum still matches.
    fn reframe(bytes: &[u8], flags: FormatFlags, edit: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut body = bytes[FileHeader::SIZE..].to_vec();
        edit(&mut body);
        with_header(flags, &body)
    }

    fn state_offset(bytes: &[u8]) -> usize {
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[FileHeader::SIZE..FileHeader::SIZE + 8]);
        8 + u64::from_le_bytes(len) as usize
    }

    #[test]
    fn test_populated_flag_must_match_state() {
        let (index, _) = populated();
        let bytes = index.to_bytes().unwrap();
        let mut flags = FormatFlags::default();
        flags.set(FormatFlags::BY_RESIDUAL);

        let unflagged = reframe(&bytes, flags, |_| {});
        assert!(matches!(
            IVFPQIndex::from_bytes(&unflagged),
            Err(IvfPqError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_trained_state_with_postings_rejected() {
        let (index, _) = populated();
        let bytes = index.to_bytes().unwrap();
        let offset = state_offset(&bytes);
        let mut flags = FormatFlags::default();
        flags.set(FormatFlags::BY_RESIDUAL);

        let relabelled = reframe(&bytes, flags, |body| body[offset] = IndexState::Trained.to_u8());
        assert!(matches!(
            IVFPQIndex::from_bytes(&relabelled),
            Err(IvfPqError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_trained_index_roundtrip() {
        let mut rng = StdRng::seed_from_u64(3);
        let vectors: Vec<Vec<f32>> = (0..100)
            .map(|_| (0..8).map(|_| rng.gen::<f32>()).collect())
            .collect();
        let mut index = IVFPQIndex::new(8, 4, 4, 5).unwrap();
        index.train(&vectors).unwrap();

        let loaded = IVFPQIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();
        assert_eq!(loaded.state(), IndexState::Trained);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_undecodable_config_is_invalid_format() {
        let (index, _) = populated();
        let bytes = index.to_bytes().unwrap();
        let header = FileHeader::from_bytes(&bytes[..FileHeader::SIZE]).unwrap();

        let damaged = reframe(&bytes, header.flags, |body| {
            body[..8].copy_from_slice(&1u64.to_le_bytes());
        });
        assert!(matches!(
            IVFPQIndex::from_bytes(&damaged),
            Err(IvfPqError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_short_file() {
        assert!(matches!(
            IVFPQIndex::from_bytes(b"FORGE"),
            Err(IvfPqError::InvalidFormat(_))
        ));
    }
}
