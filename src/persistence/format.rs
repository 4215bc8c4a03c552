//! File format definitions for forge-ivfpq persistence.

use crate::error::{IvfPqError, Result};

/// Magic bytes identifying a forge-ivfpq file.
pub const MAGIC: [u8; 8] = *b"FORGEIVF";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// File format flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatFlags {
    bits: u32,
}

impl FormatFlags {
    /// No special flags.
    pub const NONE: u32 = 0;
    /// PQ codes encode residuals to the coarse centroid.
    pub const BY_RESIDUAL: u32 = 1 << 0;
    /// The index holds postings.
    pub const POPULATED: u32 = 1 << 1;

    /// Create new flags from bits.
    pub fn new(bits: u32) -> Self {
        Self { bits }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Check if a flag is set.
    pub fn has(&self, flag: u32) -> bool {
        self.bits & flag != 0
    }

    pub fn set(&mut self, flag: u32) {
        self.bits |= flag;
    }
}

/// File header structure.
///
/// Total size: 20 bytes
/// ```text
/// [MAGIC 8B][VERSION u32][FLAGS u32][CHECKSUM u32]
/// ```
#[derive(Debug, Clone)]
pub struct FileHeader {
    /// Magic bytes (must be MAGIC)
    pub magic: [u8; 8],
    /// Format version
    pub version: u32,
    /// Format flags
    pub flags: FormatFlags,
    /// CRC32 checksum of the data section (everything after header)
    pub checksum: u32,
}

impl FileHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 20;

    pub fn new(flags: FormatFlags, checksum: u32) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            flags,
            checksum,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(&self.magic);
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.flags.bits().to_le_bytes());
        bytes[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize and verify a header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(IvfPqError::invalid_format("header too small"));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        if magic != MAGIC {
            return Err(IvfPqError::invalid_format("invalid magic bytes"));
        }

        let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let flags_raw = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        let checksum = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);

        if version > FORMAT_VERSION {
            return Err(IvfPqError::invalid_format(format!(
                "unsupported version {} (max supported: {})",
                version, FORMAT_VERSION
            )));
        }

        Ok(Self {
            magic,
            version,
            flags: FormatFlags::new(flags_raw),
            checksum,
        })
    }
}

/// Little-endian writer over a growable buffer.
#[derive(Default)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Length-prefixed blob.
    pub fn put_blob(&mut self, bytes: &[u8]) {
        self.put_u64(bytes.len() as u64);
        self.put_bytes(bytes);
    }

    pub fn put_f32s(&mut self, values: &[f32]) {
        self.buf.reserve(values.len() * 4);
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn put_i64s(&mut self, values: &[i64]) {
        self.buf.reserve(values.len() * 8);
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian reader that reports truncation as `InvalidFormat`.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| IvfPqError::invalid_format("unexpected end of data"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    /// A length that must fit in memory.
    pub fn get_len(&mut self) -> Result<usize> {
        let len = self.get_u64()?;
        usize::try_from(len).map_err(|_| IvfPqError::invalid_format("length overflows usize"))
    }

    pub fn get_blob(&mut self) -> Result<&'a [u8]> {
        let len = self.get_len()?;
        self.take(len)
    }

    pub fn get_f32s(&mut self, count: usize) -> Result<Vec<f32>> {
        let bytes = count
            .checked_mul(4)
            .ok_or_else(|| IvfPqError::invalid_format("array size overflows"))?;
        Ok(self
            .take(bytes)?
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn get_i64s(&mut self, count: usize) -> Result<Vec<i64>> {
        let bytes = count
            .checked_mul(8)
            .ok_or_else(|| IvfPqError::invalid_format("array size overflows"))?;
        Ok(self
            .take(bytes)?
            .chunks_exact(8)
            .map(|c| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(c);
                i64::from_le_bytes(arr)
            })
            .collect())
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }
}
