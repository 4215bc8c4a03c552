//! Inverted lists: one posting list per coarse centroid.
//!
//! Each list stores its vector ids and packed PQ codes in two parallel flat
//! buffers. Postings are only ever appended, so a list's scan order is its
//! insertion order.

use crate::constants::cache::PREFETCH_DISTANCE;

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};

/// Prefetch data into L1 cache ahead of the scan position.
#[inline(always)]
fn prefetch_read<T>(ptr: *const T) {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        _mm_prefetch(ptr as *const i8, _MM_HINT_T0);
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = ptr;
}

/// Postings of a single coarse centroid.
#[derive(Debug, Clone, Default)]
struct InvertedList {
    ids: Vec<i64>,
    /// `ids.len() * code_size` bytes.
    codes: Vec<u8>,
}

/// `nlist` append-only posting lists sharing one code size.
#[derive(Debug, Clone)]
pub struct InvertedFile {
    lists: Vec<InvertedList>,
    code_size: usize,
}

impl InvertedFile {
    /// Create `nlist` empty lists holding codes of `code_size` bytes.
    pub fn new(nlist: usize, code_size: usize) -> Self {
        Self {
            lists: vec![InvertedList::default(); nlist],
            code_size,
        }
    }

    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Append one posting to `list`. The caller guarantees `list < nlist`
    /// and `code.len() == code_size`.
    #[inline]
    pub fn append(&mut self, list: usize, id: i64, code: &[u8]) {
        debug_assert_eq!(code.len(), self.code_size);
        let l = &mut self.lists[list];
        l.ids.push(id);
        l.codes.extend_from_slice(code);
    }

    /// Visit every posting of the given lists as `(id, packed_code)`.
    ///
    /// Lists are visited in the order given and postings within a list in
    /// insertion order. Out-of-range list ids are skipped.
    pub fn scan<F>(&self, list_ids: &[usize], mut visitor: F)
    where
        F: FnMut(i64, &[u8]),
    {
        let cs = self.code_size;
        for &list_id in list_ids {
            let Some(list) = self.lists.get(list_id) else {
                continue;
            };
            let len = list.ids.len();
            for i in 0..len {
                if i + PREFETCH_DISTANCE < len {
                    prefetch_read(list.codes[(i + PREFETCH_DISTANCE) * cs..].as_ptr());
                }
                visitor(list.ids[i], &list.codes[i * cs..(i + 1) * cs]);
            }
        }
    }

    /// Number of postings in `list` (0 for an out-of-range id).
    pub fn list_len(&self, list: usize) -> usize {
        self.lists.get(list).map_or(0, |l| l.ids.len())
    }

    /// Total number of postings.
    pub fn len(&self) -> usize {
        self.lists.iter().map(|l| l.ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(|l| l.ids.is_empty())
    }

    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(|l| l.ids.len()).collect()
    }

    /// `nlist * sum(size²) / total²`: 1.0 for perfectly balanced lists,
    /// `nlist` when everything sits in one list. 0.0 when empty.
    pub fn imbalance_factor(&self) -> f64 {
        let total = self.len();
        if total == 0 {
            return 0.0;
        }
        let sum_sq: f64 = self
            .lists
            .iter()
            .map(|l| {
                let n = l.ids.len() as f64;
                n * n
            })
            .sum();
        self.lists.len() as f64 * sum_sq / (total as f64 * total as f64)
    }

    /// Drop every posting, keeping `nlist` empty lists.
    pub fn clear(&mut self) {
        for l in &mut self.lists {
            l.ids.clear();
            l.codes.clear();
        }
    }

    /// Ids of `list` in insertion order.
    pub fn list_ids(&self, list: usize) -> &[i64] {
        self.lists.get(list).map_or(&[], |l| &l.ids)
    }

    /// Packed codes of `list`, back to back.
    pub fn list_codes(&self, list: usize) -> &[u8] {
        self.lists.get(list).map_or(&[], |l| &l.codes)
    }

    /// Replace `list` wholesale, used when loading from disk.
    pub(crate) fn set_list(&mut self, list: usize, ids: Vec<i64>, codes: Vec<u8>) {
        debug_assert_eq!(ids.len() * self.code_size, codes.len());
        self.lists[list] = InvertedList { ids, codes };
    }

    /// Approximate heap bytes held by postings.
    pub fn memory_bytes(&self) -> usize {
        self.lists
            .iter()
            .map(|l| l.ids.capacity() * std::mem::size_of::<i64>() + l.codes.capacity())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_scan_in_order() {
        let mut inv = InvertedFile::new(3, 2);
        inv.append(1, 10, &[1, 2]);
        inv.append(0, 11, &[3, 4]);
        inv.append(1, 12, &[5, 6]);

        let mut seen = Vec::new();
        inv.scan(&[1, 0], |id, code| seen.push((id, code.to_vec())));
        assert_eq!(
            seen,
            vec![(10, vec![1, 2]), (12, vec![5, 6]), (11, vec![3, 4])]
        );
    }

    #[test]
    fn test_scan_skips_out_of_range() {
        let mut inv = InvertedFile::new(2, 1);
        inv.append(0, 1, &[0]);
        let mut count = 0;
        inv.scan(&[0, 7], |_, _| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_scan_long_list_visits_everything() {
        let mut inv = InvertedFile::new(1, 3);
        for i in 0..100 {
            inv.append(0, i, &[i as u8, 0, 1]);
        }
        let mut ids = Vec::new();
        inv.scan(&[0], |id, code| {
            assert_eq!(code[0], id as u8);
            ids.push(id);
        });
        assert_eq!(ids, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_sizes_and_imbalance() {
        let mut inv = InvertedFile::new(4, 1);
        assert_eq!(inv.imbalance_factor(), 0.0);
        assert!(inv.is_empty());

        for i in 0..8 {
            inv.append((i % 4) as usize, i, &[0]);
        }
        assert_eq!(inv.list_sizes(), vec![2, 2, 2, 2]);
        assert!((inv.imbalance_factor() - 1.0).abs() < 1e-12);

        let mut skewed = InvertedFile::new(4, 1);
        for i in 0..8 {
            skewed.append(0, i, &[0]);
        }
        assert!((skewed.imbalance_factor() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_clear_keeps_lists() {
        let mut inv = InvertedFile::new(2, 1);
        inv.append(0, 1, &[0]);
        inv.clear();
        assert_eq!(inv.len(), 0);
        assert_eq!(inv.nlist(), 2);
        assert_eq!(inv.list_len(0), 0);
    }
}
