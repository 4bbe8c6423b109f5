//! Segmented vector arena and per-key entry handles.
//!
//! All corpus vectors live in fixed-capacity segments, each a single
//! contiguous row-major `f32` slab reserved once at segment construction —
//! a query scores an entire segment with one matrix–vector pass, and
//! growth never reallocates a slab. Only the last segment may be partially
//! filled. Deletion is O(1): the tail vector of the arena overwrites the
//! vacated slot and the arena shrinks by one.
//!
//! Vectors are L2-normalized at insert, so cosine similarity degenerates
//! to a dot product on the scan path.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::kernels;
use crate::VEC_DIM;

/// Default segment capacity: 2^18 vectors, a 128 MiB slab at dimension 128.
pub const DEFAULT_SEGMENT_CAPACITY: usize = 1 << 18;

/// Where an entry's vector currently lives.
///
/// `Detached` is the flush state: the arena has already been torn down and
/// the per-key free that follows must only drop the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySlot {
    Attached { segment: usize, slot: usize },
    Detached,
}

/// The per-key handle installed as the host's value for the key.
///
/// Owns the key name; holds the back-reference into the arena. Swap-delete
/// rewrites the back-reference of whatever entry gets moved into the
/// vacated slot, which is why the slot sits behind a mutex: the arena
/// mutates it through the shared handles in the parallel entry array. The
/// mutex is only ever taken while the store's data lock is held, so lock
/// order is always store -> entry.
#[derive(Debug)]
pub struct VecEntry {
    key: Arc<str>,
    slot: Mutex<EntrySlot>,
}

impl VecEntry {
    pub fn key(&self) -> &Arc<str> {
        &self.key
    }

    pub fn slot(&self) -> EntrySlot {
        *self.slot.lock()
    }
}

/// A fixed-capacity block of vectors plus the parallel entry-handle array.
///
/// Slots `[0, len)` are live. For every live slot `i`,
/// `entries[i].slot == Attached { this segment, i }` and
/// `vecs[i*D .. (i+1)*D]` is unit-norm.
pub struct Segment {
    vecs: Vec<f32>,
    entries: Vec<Arc<VecEntry>>,
}

impl Segment {
    fn with_capacity(capacity: usize) -> Self {
        // One reservation for the whole slab; filling is a plain append.
        Self {
            vecs: Vec::with_capacity(capacity * VEC_DIM),
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The contiguous row-major matrix of all live vectors.
    pub fn matrix(&self) -> &[f32] {
        &self.vecs
    }

    pub fn vector(&self, slot: usize) -> &[f32] {
        &self.vecs[slot * VEC_DIM..(slot + 1) * VEC_DIM]
    }

    pub fn entry(&self, slot: usize) -> &Arc<VecEntry> {
        &self.entries[slot]
    }
}

/// Ordered sequence of segments. An empty arena is represented as absent
/// at the store level; inside this type the segment list is never left
/// with an empty segment.
pub struct Arena {
    segment_capacity: usize,
    segments: Vec<Segment>,
}

impl Arena {
    pub fn new(segment_capacity: usize) -> Self {
        assert!(segment_capacity > 0, "segment capacity must be > 0");
        Self {
            segment_capacity,
            segments: Vec::new(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Total live vectors across all segments.
    pub fn len(&self) -> usize {
        match self.segments.split_last() {
            Some((tail, full)) => full.len() * self.segment_capacity + tail.len(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a vector into the tail segment (allocating a fresh one when
    /// the tail is full), normalize it in place, and return the handle.
    ///
    /// The caller guarantees the key is absent; no deduplication happens
    /// here.
    pub fn insert(&mut self, key: Arc<str>, raw: &[f32]) -> Result<Arc<VecEntry>> {
        assert_eq!(raw.len(), VEC_DIM, "vector dimension mismatch");

        let norm = kernels::l2_norm(raw);
        if !norm.is_finite() || norm <= 0.0 {
            return Err(Error::ZeroNorm);
        }

        if self
            .segments
            .last()
            .map_or(true, |tail| tail.len() == self.segment_capacity)
        {
            debug!(
                segment = self.segments.len(),
                capacity = self.segment_capacity,
                "allocating vector segment"
            );
            self.segments.push(Segment::with_capacity(self.segment_capacity));
        }

        let segment = self.segments.len() - 1;
        let tail = &mut self.segments[segment];
        let slot = tail.len();

        tail.vecs.extend_from_slice(raw);
        kernels::scale(&mut tail.vecs[slot * VEC_DIM..], 1.0 / norm);

        let entry = Arc::new(VecEntry {
            key,
            slot: Mutex::new(EntrySlot::Attached { segment, slot }),
        });
        tail.entries.push(Arc::clone(&entry));

        Ok(entry)
    }

    /// Swap-delete the entry's vector and detach the handle. Returns true
    /// when the arena became empty (the caller drops it — an empty arena
    /// is represented as absent).
    ///
    /// A detached entry is a no-op: the arena it pointed into was already
    /// torn down by a flush.
    pub fn remove(&mut self, entry: &VecEntry) -> bool {
        let mut slot_guard = entry.slot.lock();
        let (seg, slot) = match *slot_guard {
            EntrySlot::Attached { segment, slot } => (segment, slot),
            EntrySlot::Detached => return self.segments.is_empty(),
        };
        *slot_guard = EntrySlot::Detached;
        drop(slot_guard);

        assert!(seg < self.segments.len(), "entry points past the arena");
        let tail_idx = self.segments.len() - 1;
        let last_slot = self.segments[tail_idx].len() - 1;

        if (seg, slot) == (tail_idx, last_slot) {
            // The deleted entry is the arena tail: no move, no rewrite.
            let tail = &mut self.segments[tail_idx];
            let removed = tail.entries.pop();
            tail.vecs.truncate(last_slot * VEC_DIM);
            assert!(
                removed.is_some_and(|r| std::ptr::eq(&*r, entry)),
                "tail slot does not hold the deleted entry"
            );
        } else if seg == tail_idx {
            // Same segment: the tail row slides into the vacated slot.
            let tail = &mut self.segments[tail_idx];
            tail.vecs
                .copy_within(last_slot * VEC_DIM..(last_slot + 1) * VEC_DIM, slot * VEC_DIM);
            tail.vecs.truncate(last_slot * VEC_DIM);
            let removed = tail.entries.swap_remove(slot);
            assert!(
                std::ptr::eq(&*removed, entry),
                "slot does not hold the deleted entry"
            );
            *tail.entries[slot].slot.lock() = EntrySlot::Attached { segment: seg, slot };
        } else {
            // Cross-segment: the arena tail migrates into another segment.
            // This is the only case where an entry changes segment.
            let (head, tail_part) = self.segments.split_at_mut(tail_idx);
            let dst = &mut head[seg];
            let src = &mut tail_part[0];

            dst.vecs[slot * VEC_DIM..(slot + 1) * VEC_DIM]
                .copy_from_slice(&src.vecs[last_slot * VEC_DIM..]);
            src.vecs.truncate(last_slot * VEC_DIM);

            let moved = match src.entries.pop() {
                Some(moved) => moved,
                None => unreachable!("tail segment was empty during swap-delete"),
            };
            *moved.slot.lock() = EntrySlot::Attached { segment: seg, slot };
            let removed = std::mem::replace(&mut dst.entries[slot], moved);
            assert!(
                std::ptr::eq(&*removed, entry),
                "slot does not hold the deleted entry"
            );
        }

        if self.segments[tail_idx].is_empty() {
            debug!(segment = tail_idx, "freeing drained vector segment");
            self.segments.pop();
        }

        self.segments.is_empty()
    }

    /// Flush support: mark every live entry detached and drop all
    /// segments. Per-key frees fired afterwards observe `Detached` and
    /// leave the (gone) arena alone.
    pub fn detach_all(&mut self) -> usize {
        let mut detached = 0;
        for segment in &self.segments {
            for entry in &segment.entries {
                *entry.slot.lock() = EntrySlot::Detached;
                detached += 1;
            }
        }
        self.segments.clear();
        detached
    }

    /// Every live entry with its normalized vector, in segment order.
    pub fn entries(&self) -> impl Iterator<Item = (&Arc<VecEntry>, &[f32])> + '_ {
        self.segments.iter().flat_map(|segment| {
            segment
                .entries
                .iter()
                .enumerate()
                .map(move |(slot, entry)| (entry, segment.vector(slot)))
        })
    }
}
