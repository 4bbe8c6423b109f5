//! The staged query pipeline, on one node and across shards.
//!
//! Single node: reader -> top-K accumulator -> flatten. The stages are
//! fused here because nothing crosses a thread or a wire between them.
//!
//! Cluster: every shard runs the same local pipeline over its own corpus
//! and ships its flattened partial list — never a heap — to the
//! originator, which reduces the union with a second accumulator and
//! flattens again. The local top-K of a shard is a superset of that
//! shard's contribution to the global top-K, so the two-phase reduction
//! is exact. The hop between the first flatten and the merge is the shard
//! boundary; it stays a real serialization point even when the shards
//! share a process.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::executor::{Executor, QueryHandle};
use crate::reader::SimReader;
use crate::record::{self, ProbeSpec, ScoreRecord, TopKArg};
use crate::store::Store;
use crate::topk::{accumulate, TopKHeap};

/// Reader -> accumulator -> flatten on one node. Returns the local top-K
/// ordered ascending by score; empty corpus yields an empty list.
pub fn run_local(reader: SimReader) -> Vec<ScoreRecord> {
    let arg = TopKArg {
        top_k: reader.top_k() as u64,
    };
    let mut acc: Option<TopKHeap> = None;
    for record in reader {
        acc = Some(accumulate(acc.take(), record, arg));
    }
    acc.map(TopKHeap::into_sorted).unwrap_or_default()
}

/// Reduce already-flattened partial lists into the global top-K.
fn merge_partials(partials: Vec<Vec<ScoreRecord>>, arg: TopKArg) -> Vec<ScoreRecord> {
    let mut acc: Option<TopKHeap> = None;
    for partial in partials {
        for record in partial {
            acc = Some(accumulate(acc.take(), record, arg));
        }
    }
    acc.map(TopKHeap::into_sorted).unwrap_or_default()
}

/// A set of shards, each owning an independent store. Inserts are routed
/// by key hash; queries fan out to every shard and reduce at the
/// originator.
pub struct Cluster {
    shards: Vec<Arc<Store>>,
}

impl Cluster {
    pub fn new(shard_count: usize, segment_capacity: usize) -> Self {
        assert!(shard_count > 0, "a cluster needs at least one shard");
        Self {
            shards: (0..shard_count)
                .map(|_| Arc::new(Store::with_segment_capacity(segment_capacity)))
                .collect(),
        }
    }

    pub fn shards(&self) -> &[Arc<Store>] {
        &self.shards
    }

    fn route(&self, key: &str) -> &Arc<Store> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    pub fn vec_add(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.route(key).vec_add(key, blob)
    }

    pub fn delete_key(&self, key: &str) -> bool {
        self.route(key).delete_key(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `vec_sim` across every shard. The reader context travels to the
    /// shards in wire form and each shard's partial result travels back
    /// the same way, exactly as it would across nodes.
    pub fn vec_sim(
        &self,
        executor: &Executor,
        k_arg: &str,
        blob: &[u8],
    ) -> Result<QueryHandle<Vec<ScoreRecord>>> {
        let top_k: u64 = k_arg.parse().map_err(|_| Error::BadTopK)?;
        if top_k == 0 {
            return Err(Error::BadTopK);
        }
        let probe = record::decode_blob(blob).ok_or(Error::BadProbeBlob)?;

        let payload = ProbeSpec { probe, top_k }.to_bytes()?;
        let shards = self.shards.clone();

        Ok(executor.spawn(move || {
            // fan out: each shard reconstructs the reader from the wire
            // form, runs its local pipeline, and serializes the flattened
            // partial list
            let partial_frames = shards
                .par_iter()
                .map(|shard| -> Result<Vec<u8>> {
                    let spec = ProbeSpec::from_bytes(&payload)?;
                    let reader = SimReader::from_spec(Arc::clone(shard), &spec)?;
                    Ok(bincode::serialize(&run_local(reader))?)
                })
                .collect::<Result<Vec<_>>>()?;

            // collect: decode every partial at the originator and reduce
            let partials = partial_frames
                .iter()
                .map(|frame| Ok(bincode::deserialize(frame)?))
                .collect::<Result<Vec<Vec<ScoreRecord>>>>()?;
            Ok(merge_partials(partials, TopKArg { top_k }))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_blob;
    use crate::VEC_DIM;

    fn basis(axis: usize, value: f32) -> Vec<f32> {
        let mut v = vec![0.0; VEC_DIM];
        v[axis] = value;
        v
    }

    #[test]
    fn run_local_on_an_empty_store_is_empty() {
        let store = Arc::new(Store::new());
        let reader = SimReader::new(store, &basis(0, 1.0), 1).unwrap();
        assert!(run_local(reader).is_empty());
    }

    #[test]
    fn run_local_orders_ascending_and_caps_at_k() {
        let store = Arc::new(Store::with_segment_capacity(2));
        for i in 0..6 {
            let mut v = basis(0, 1.0);
            v[1] = i as f32; // decreasing similarity to e0 as i grows
            store.vec_add(&format!("k{i}"), &encode_blob(&v)).unwrap();
        }

        let reader = SimReader::new(Arc::clone(&store), &basis(0, 1.0), 3).unwrap();
        let hits = run_local(reader);
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
        // k0 is the exact match and must sit last (strongest)
        assert_eq!(&*hits[2].key, "k0");
    }

    #[test]
    fn merge_is_exact_over_partial_lists() {
        let arg = TopKArg { top_k: 2 };
        let partials = vec![
            vec![
                ScoreRecord { key: Arc::from("a"), score: 0.1 },
                ScoreRecord { key: Arc::from("b"), score: 0.9 },
            ],
            vec![
                ScoreRecord { key: Arc::from("c"), score: 0.5 },
                ScoreRecord { key: Arc::from("d"), score: 0.95 },
            ],
        ];
        let merged = merge_partials(partials, arg);
        let keys: Vec<&str> = merged.iter().map(|r| &*r.key).collect();
        assert_eq!(keys, vec!["b", "d"]);
    }

    #[test]
    fn cluster_routing_is_stable() {
        let cluster = Cluster::new(4, 8);
        for i in 0..32 {
            cluster
                .vec_add(&format!("k{i}"), &encode_blob(&basis(i % VEC_DIM, 1.0)))
                .unwrap();
        }
        assert_eq!(cluster.len(), 32);
        // re-adding any key must land on the shard that already holds it
        let err = cluster.vec_add("k7", &encode_blob(&basis(1, 1.0))).unwrap_err();
        assert_eq!(err.to_string(), "Key is not empty");
        assert!(cluster.delete_key("k7"));
        assert_eq!(cluster.len(), 31);
    }
}
