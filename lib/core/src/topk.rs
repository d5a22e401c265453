//! Bounded top-k accumulation for scan-based search.
//!
//! Memory stays O(k) regardless of store size: a size-k min-heap keeps the
//! k best candidates seen so far, evicting the current worst on each
//! improvement. Ordering is deterministic: descending score, with equal
//! scores broken by ascending record id.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::record::RecordId;

struct Entry<T> {
    score: OrderedFloat<f32>,
    id: RecordId,
    payload: T,
}

// "Greater" means worse (lower score, then larger id), so the BinaryHeap
// root is always the next candidate to evict.
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.id == other.id
    }
}

impl<T> Eq for Entry<T> {}

/// Accumulator for the k best (score, id, payload) candidates.
pub struct TopK<T> {
    k: usize,
    heap: BinaryHeap<Entry<T>>,
}

impl<T> TopK<T> {
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Offer a candidate. Kept only if fewer than k candidates are held
    /// or it beats the current worst.
    pub fn push(&mut self, id: RecordId, score: f32, payload: T) {
        let entry = Entry {
            score: OrderedFloat(score),
            id,
            payload,
        };

        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(worst) = self.heap.peek() {
            if entry.cmp(worst) == Ordering::Less {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
    }

    /// Drain into ranked order: best first.
    #[must_use]
    pub fn into_sorted(self) -> Vec<(RecordId, f32, T)> {
        let mut entries = self.heap.into_vec();
        entries.sort_unstable_by(|a, b| a.cmp(b));
        entries
            .into_iter()
            .map(|e| (e.id, e.score.into_inner(), e.payload))
            .collect()
    }
}
