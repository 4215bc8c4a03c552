//! Bounded top-k selection.
//!
//! Keeps the k smallest `(distance, id)` pairs seen so far in a max-heap so
//! the current worst candidate sits at the top and can be evicted in
//! O(log k). Equal distances are ordered by id, which makes every ranking in
//! the crate deterministic: among equally distant candidates the lowest id
//! wins.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A candidate id with its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Candidate id (vector id or centroid id).
    pub id: i64,
    /// Squared L2 distance to the query.
    pub distance: f32,
}

impl Neighbor {
    #[inline]
    pub fn new(id: i64, distance: f32) -> Self {
        Self { id, distance }
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Collector for the k best neighbors.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    heap: BinaryHeap<Neighbor>,
}

impl TopK {
    /// Create a collector that retains at most `k` neighbors.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    /// Offer a candidate. Returns `true` if it was retained.
    #[inline]
    pub fn push(&mut self, id: i64, distance: f32) -> bool {
        if self.k == 0 {
            return false;
        }
        let candidate = Neighbor::new(id, distance);
        if self.heap.len() < self.k {
            self.heap.push(candidate);
            return true;
        }
        match self.heap.peek() {
            Some(worst) if candidate < *worst => {
                self.heap.pop();
                self.heap.push(candidate);
                true
            }
            _ => false,
        }
    }

    /// Distance a new candidate has to beat, `+inf` while not yet full.
    #[inline]
    pub fn threshold(&self) -> f32 {
        if self.heap.len() < self.k {
            f32::INFINITY
        } else {
            self.heap.peek().map_or(f32::INFINITY, |n| n.distance)
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Consume the collector, returning neighbors by increasing distance.
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_keeps_smallest() {
        let mut topk = TopK::new(3);
        for (id, d) in [(0, 5.0), (1, 1.0), (2, 4.0), (3, 0.5), (4, 9.0)] {
            topk.push(id, d);
        }
        let ids: Vec<i64> = topk.into_sorted_vec().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_ties_prefer_lowest_id() {
        let mut topk = TopK::new(2);
        topk.push(7, 1.0);
        topk.push(3, 1.0);
        topk.push(5, 1.0);
        let ids: Vec<i64> = topk.into_sorted_vec().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 5]);
    }

    #[test]
    fn test_threshold() {
        let mut topk = TopK::new(2);
        assert_eq!(topk.threshold(), f32::INFINITY);
        topk.push(0, 2.0);
        assert_eq!(topk.threshold(), f32::INFINITY);
        topk.push(1, 3.0);
        assert_eq!(topk.threshold(), 3.0);
    }

    #[test]
    fn test_zero_k() {
        let mut topk = TopK::new(0);
        assert!(!topk.push(0, 1.0));
        assert!(topk.is_empty());
    }

    proptest! {
        #[test]
        fn prop_matches_full_sort(
            distances in proptest::collection::vec(0u8..16, 0..200),
            k in 0usize..40,
        ) {
            let mut topk = TopK::new(k);
            for (id, &d) in distances.iter().enumerate() {
                topk.push(id as i64, d as f32);
            }

            let mut expected: Vec<Neighbor> = distances
                .iter()
                .enumerate()
                .map(|(id, &d)| Neighbor::new(id as i64, d as f32))
                .collect();
            expected.sort();
            expected.truncate(k);

            prop_assert_eq!(topk.into_sorted_vec(), expected);
        }
    }
}
