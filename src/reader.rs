//! Per-segment scored-record producer.
//!
//! The reader walks the arena one segment at a time: score the whole
//! segment with a single matrix–vector pass, pick out the segment's best
//! min(size, K) records by repeated argmax, queue them, and yield. The
//! store's shared data lock is held for exactly one segment batch and
//! released before any record is handed downstream, so the command thread
//! is never stalled for longer than one segment scan.
//!
//! Emitting only K records per segment loses nothing: a vector in the
//! global top-K is beaten by at most K-1 vectors anywhere, hence by at
//! most K-1 inside its own segment, so every global winner survives the
//! per-segment cut.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::kernels;
use crate::record::{ProbeSpec, ScoreRecord};
use crate::store::Store;
use crate::VEC_DIM;

pub struct SimReader {
    store: Arc<Store>,
    /// Normalized probe; dot products against it are cosine scores.
    probe: Vec<f32>,
    top_k: usize,
    /// Scan cursor: index of the next unscanned segment.
    segment_index: usize,
    /// Records materialized from the last scanned segment, awaiting
    /// emission.
    pending: VecDeque<ScoreRecord>,
    /// Per-reader score scratch, reused across segments.
    scores: Vec<f32>,
}

impl SimReader {
    /// Build a reader over `store` for `top_k` neighbors of `probe`.
    /// The probe is copied and normalized up front; a zero-norm probe
    /// cannot be scored and is rejected.
    pub fn new(store: Arc<Store>, probe: &[f32], top_k: usize) -> Result<Self> {
        assert_eq!(probe.len(), VEC_DIM, "probe dimension mismatch");

        let norm = kernels::l2_norm(probe);
        if !norm.is_finite() || norm <= 0.0 {
            return Err(Error::ZeroNorm);
        }
        let mut probe = probe.to_vec();
        kernels::scale(&mut probe, 1.0 / norm);

        Ok(Self {
            store,
            probe,
            top_k,
            segment_index: 0,
            pending: VecDeque::new(),
            scores: Vec::new(),
        })
    }

    /// Reconstruct a reader on a remote shard from its wire form.
    pub fn from_spec(store: Arc<Store>, spec: &ProbeSpec) -> Result<Self> {
        Self::new(store, &spec.probe, spec.top_k as usize)
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }
}

impl Iterator for SimReader {
    type Item = ScoreRecord;

    fn next(&mut self) -> Option<ScoreRecord> {
        if let Some(record) = self.pending.pop_front() {
            return Some(record);
        }

        let store = Arc::clone(&self.store);
        let world = store.world();
        let arena = world.arena.as_ref()?;

        while self.segment_index < arena.segments().len() {
            let segment = &arena.segments()[self.segment_index];
            self.segment_index += 1;

            kernels::matvec(segment.matrix(), VEC_DIM, &self.probe, &mut self.scores);

            for _ in 0..segment.len().min(self.top_k) {
                let Some(idx) = kernels::argmax(&self.scores) else {
                    break;
                };
                self.pending.push_back(ScoreRecord {
                    key: Arc::clone(segment.entry(idx).key()),
                    score: self.scores[idx],
                });
                // consumed; can never win another signed argmax
                self.scores[idx] = f32::NEG_INFINITY;
            }

            if !self.pending.is_empty() {
                drop(world);
                return self.pending.pop_front();
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_blob;

    fn basis(axis: usize, value: f32) -> Vec<f32> {
        let mut v = vec![0.0; VEC_DIM];
        v[axis] = value;
        v
    }

    fn seeded_store(segment_capacity: usize, vectors: &[(&str, Vec<f32>)]) -> Arc<Store> {
        let store = Arc::new(Store::with_segment_capacity(segment_capacity));
        for (key, v) in vectors {
            store.vec_add(key, &encode_blob(v)).expect("vec_add");
        }
        store
    }

    #[test]
    fn empty_store_ends_immediately() {
        let store = Arc::new(Store::new());
        let mut reader = SimReader::new(store, &basis(0, 1.0), 3).unwrap();
        assert!(reader.next().is_none());
    }

    #[test]
    fn zero_norm_probe_is_rejected() {
        let store = Arc::new(Store::new());
        assert!(matches!(
            SimReader::new(store, &vec![0.0; VEC_DIM], 1),
            Err(Error::ZeroNorm)
        ));
    }

    #[test]
    fn emits_at_most_k_per_segment_best_first() {
        let store = seeded_store(
            8,
            &[
                ("k0", basis(0, 1.0)),
                ("k1", basis(1, 1.0)),
                ("mix", {
                    let mut v = basis(0, 1.0);
                    v[1] = 1.0;
                    v
                }),
            ],
        );

        let reader = SimReader::new(store, &basis(0, 1.0), 2).unwrap();
        let records: Vec<ScoreRecord> = reader.collect();

        // one segment, three vectors, K = 2 -> exactly two records,
        // strongest first within the segment batch
        assert_eq!(records.len(), 2);
        assert_eq!(&*records[0].key, "k0");
        assert!((records[0].score - 1.0).abs() < 1e-5);
        assert_eq!(&*records[1].key, "mix");
    }

    #[test]
    fn scans_every_segment() {
        let vectors: Vec<(String, Vec<f32>)> = (0..7)
            .map(|i| (format!("k{i}"), basis(i, 1.0)))
            .collect();
        let store = Arc::new(Store::with_segment_capacity(2));
        for (key, v) in &vectors {
            store.vec_add(key, &encode_blob(v)).unwrap();
        }

        // K of 1 still visits all four segments
        let reader = SimReader::new(store, &basis(6, 1.0), 1).unwrap();
        let records: Vec<ScoreRecord> = reader.collect();
        assert_eq!(records.len(), 4);
        assert!(records.iter().any(|r| &*r.key == "k6" && r.score > 0.999));
    }

    #[test]
    fn negative_scores_are_emitted_in_order() {
        let mut opposite = basis(0, -1.0);
        opposite[1] = -0.001;
        let store = seeded_store(8, &[("neg", opposite), ("orth", basis(1, 1.0))]);

        let reader = SimReader::new(store, &basis(0, 1.0), 2).unwrap();
        let records: Vec<ScoreRecord> = reader.collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&*records[0].key, "orth");
        assert_eq!(&*records[1].key, "neg");
        assert!(records[1].score < -0.99);
    }
}
