//! The keyspace-facing store: command surface, lifecycle events, and the
//! data lock shared between the command thread and the executor.
//!
//! All mutation (insert, per-key free, flush, snapshot load) happens under
//! the write lock — the single-writer command thread. Readers take the
//! read lock one segment batch at a time (see `reader`). The arena is
//! created lazily on first insert or load and dropped as soon as it holds
//! nothing, so an empty corpus costs nothing.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::arena::{Arena, VecEntry, DEFAULT_SEGMENT_CAPACITY};
use crate::error::{Error, Result};
use crate::executor::{Executor, QueryHandle};
use crate::kernels;
use crate::pipeline;
use crate::reader::SimReader;
use crate::record::{self, ScoreRecord};
use crate::VEC_DIM;

/// A write command propagated verbatim to replicas. Blob semantics are
/// deterministic, so replay through the same code path reproduces the
/// corpus exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplOp {
    VecAdd { key: String, blob: Vec<u8> },
}

pub(crate) struct World {
    pub(crate) arena: Option<Arena>,
    pub(crate) keys: HashMap<Arc<str>, Arc<VecEntry>>,
}

pub struct Store {
    pub(crate) data: RwLock<World>,
    segment_capacity: usize,
    replication: Option<Sender<ReplOp>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::with_segment_capacity(DEFAULT_SEGMENT_CAPACITY)
    }

    pub fn with_segment_capacity(segment_capacity: usize) -> Self {
        Self {
            data: RwLock::new(World {
                arena: None,
                keys: HashMap::new(),
            }),
            segment_capacity,
            replication: None,
        }
    }

    /// Install a replication feed; every successful `vec_add` is
    /// propagated through it.
    pub fn with_replication(mut self, feed: Sender<ReplOp>) -> Self {
        self.replication = Some(feed);
        self
    }

    pub(crate) fn world(&self) -> RwLockReadGuard<'_, World> {
        self.data.read()
    }

    /// `vec_add <key> <blob>`: insert a vector under an absent key.
    pub fn vec_add(&self, key: &str, blob: &[u8]) -> Result<()> {
        let vector = record::decode_blob(blob).ok_or(Error::BadVectorBlob(VEC_DIM))?;

        // Reject un-normalizable input before touching the arena, so a
        // failed insert never leaves a freshly created empty arena behind.
        let norm = kernels::l2_norm(&vector);
        if !norm.is_finite() || norm <= 0.0 {
            return Err(Error::ZeroNorm);
        }

        {
            let mut world = self.data.write();
            let world = &mut *world;
            if world.keys.contains_key(key) {
                return Err(Error::KeyExists);
            }
            let arena = world
                .arena
                .get_or_insert_with(|| Arena::new(self.segment_capacity));
            let key: Arc<str> = Arc::from(key);
            let entry = arena.insert(Arc::clone(&key), &vector)?;
            world.keys.insert(key, entry);
        }

        if let Some(feed) = &self.replication {
            let _ = feed.send(ReplOp::VecAdd {
                key: key.to_string(),
                blob: blob.to_vec(),
            });
        }
        Ok(())
    }

    /// `vec_sim <k> <blob>`: asynchronous top-K query. Validation happens
    /// here on the command thread; the scan and reduction run on the
    /// executor, and the returned handle blocks the client until the
    /// completion callback delivers the ascending hit list.
    ///
    /// Takes an owned `Arc` because the scan outlives this call on the
    /// executor threads; callers clone their handle.
    pub fn vec_sim(
        self: Arc<Self>,
        executor: &Executor,
        k_arg: &str,
        blob: &[u8],
    ) -> Result<QueryHandle<Vec<ScoreRecord>>> {
        let top_k: u64 = k_arg.parse().map_err(|_| Error::BadTopK)?;
        if top_k == 0 {
            return Err(Error::BadTopK);
        }
        let probe = record::decode_blob(blob).ok_or(Error::BadProbeBlob)?;
        let reader = SimReader::new(self, &probe, top_k as usize)?;

        Ok(executor.spawn(move || Ok(pipeline::run_local(reader))))
    }

    /// Host per-key free (explicit delete, expiry, eviction, replica
    /// re-sync). A detached entry only drops the handle; an attached one
    /// swap-deletes out of the arena. Returns false for unknown keys.
    pub fn delete_key(&self, key: &str) -> bool {
        let mut world = self.data.write();
        let world = &mut *world;
        let Some(entry) = world.keys.remove(key) else {
            return false;
        };
        if let Some(arena) = world.arena.as_mut() {
            if arena.remove(&entry) {
                world.arena = None;
            }
        }
        true
    }

    /// Whole-DB wipe: detach every entry, drop the arena, clear the
    /// keyspace. Frees fired for individual keys afterwards observe the
    /// detached state and never touch the gone arena.
    pub fn flush(&self) {
        let mut world = self.data.write();
        if let Some(mut arena) = world.arena.take() {
            let detached = arena.detach_all();
            info!(entries = detached, "flush: detached all vector entries");
        }
        world.keys.clear();
    }

    /// Apply a replicated write on a replica.
    pub fn apply(&self, op: &ReplOp) -> Result<()> {
        match op {
            ReplOp::VecAdd { key, blob } => self.vec_add(key, blob),
        }
    }

    /// Number of keys holding a vector.
    pub fn len(&self) -> usize {
        self.data.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().keys.contains_key(key)
    }

    /// The host's view of keys holding this value type.
    pub fn live_keys(&self) -> Vec<Arc<str>> {
        self.data.read().keys.keys().cloned().collect()
    }

    /// Number of allocated segments; 0 for an absent arena.
    pub fn segment_count(&self) -> usize {
        self.data
            .read()
            .arena
            .as_ref()
            .map_or(0, |arena| arena.segment_count())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let world = self.data.get_mut();
        if let Some(arena) = world.arena.as_mut() {
            debug!(entries = arena.len(), "dropping store");
            arena.detach_all();
        }
    }
}
