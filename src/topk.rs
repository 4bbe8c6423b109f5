//! Bounded top-K reduction over score records.
//!
//! The reducer keeps the K highest-scoring records seen so far in a
//! min-heap: the root is always the weakest retained candidate, so a
//! stronger arrival evicts exactly one record in O(log K). Flattening pops
//! the min repeatedly, which yields the retained set in ascending score
//! order — the order the reply is encoded in.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::record::{ScoreRecord, TopKArg};

/// Total order on records by score. `total_cmp` gives the heap a real
/// `Ord` over f32 without panicking comparators.
struct ByScore(ScoreRecord);

impl PartialEq for ByScore {
    fn eq(&self, other: &Self) -> bool {
        self.0.score.total_cmp(&other.0.score) == Ordering::Equal
    }
}

impl Eq for ByScore {}

impl PartialOrd for ByScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.score.total_cmp(&other.0.score)
    }
}

/// Bounded min-heap of score records.
///
/// Capacity 0 lets the heap grow without bound; the command layer always
/// passes K >= 1, so that mode only serves callers that want a full sort.
pub struct TopKHeap {
    cap: usize,
    heap: BinaryHeap<Reverse<ByScore>>,
}

impl TopKHeap {
    pub fn bounded(cap: usize) -> Self {
        Self {
            cap,
            heap: BinaryHeap::with_capacity(cap.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Insert below capacity; at capacity, replace the minimum only when
    /// the newcomer scores strictly higher, otherwise drop it. Ties keep
    /// the incumbent.
    pub fn offer(&mut self, record: ScoreRecord) {
        if self.cap == 0 || self.heap.len() < self.cap {
            self.heap.push(Reverse(ByScore(record)));
            return;
        }
        if let Some(Reverse(ByScore(weakest))) = self.heap.peek() {
            if weakest.score < record.score {
                self.heap.pop();
                self.heap.push(Reverse(ByScore(record)));
            }
        }
    }

    pub fn peek_min(&self) -> Option<&ScoreRecord> {
        self.heap.peek().map(|Reverse(ByScore(r))| r)
    }

    pub fn pop_min(&mut self) -> Option<ScoreRecord> {
        self.heap.pop().map(|Reverse(ByScore(r))| r)
    }

    /// Flatten the heap into a list ordered ascending by score.
    pub fn into_sorted(mut self) -> Vec<ScoreRecord> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(record) = self.pop_min() {
            out.push(record);
        }
        out
    }
}

/// The accumulator stage: fold one record into the running top-K state,
/// creating the heap on the first record.
pub fn accumulate(acc: Option<TopKHeap>, record: ScoreRecord, arg: TopKArg) -> TopKHeap {
    let mut heap = acc.unwrap_or_else(|| TopKHeap::bounded(arg.top_k as usize));
    heap.offer(record);
    heap
}
