//! # vecsim — exact top-K cosine similarity over segmented vector storage
//!
//! An in-memory vector similarity index built to live inside a key-value
//! server as a custom value type with two commands: `vec_add` installs a
//! fixed-dimension vector under an absent key, `vec_sim` answers top-K
//! nearest-neighbor queries over the whole corpus by cosine similarity.
//!
//! ## Memory layout: segmented contiguous storage
//!
//! A `Vec<Vec<f32>>` corpus chases one heap pointer per scored vector and
//! thrashes the cache. Here every vector lives in a fixed-capacity
//! [`arena::Segment`]: one contiguous row-major `f32` slab, reserved once,
//! scored in a single matrix–vector sweep at memory bandwidth. Segments
//! chain into an [`arena::Arena`]; growth allocates a new tail segment
//! instead of reallocating the world, and the gap between two segments is
//! the scan's cooperative yield point.
//!
//! Deletion is O(1) by swap-with-last across segment boundaries: the
//! arena's tail vector overwrites the vacated slot and the moved entry's
//! back-reference is rewritten. No tombstones, no compaction debt.
//!
//! ## Normalize once, scan forever
//!
//! Vectors are L2-normalized at insert, probes at reader construction.
//! Cosine similarity then degenerates to a dot product: the scan path is
//! pure multiply-add with no division and no square root anywhere.
//!
//! ## The query pipeline
//!
//! `vec_sim` never replies inline. A [`reader::SimReader`] streams scored
//! records segment by segment under the store's shared lock, a bounded
//! min-heap ([`topk::TopKHeap`]) reduces them to the K strongest, and a
//! flatten pops the heap into the ascending reply list. Across shards the
//! same pipeline runs twice: every shard ships its flattened partial
//! top-K to the originator, which reduces the union — exact, because a
//! shard's local top-K is a superset of its contribution to the global
//! answer. The whole pipeline runs on a background [`executor::Executor`]
//! and unblocks the waiting client through a completion handle.

// mimalloc replaces the system allocator for the whole process: O(1)
// size-segregated small allocations, no futex on the fast path.
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod arena;
pub mod error;
pub mod executor;
pub mod kernels;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod snapshot;
pub mod store;
pub mod topk;

/// Vector dimension of this build. Every stored vector and every probe
/// carries exactly this many f32 components.
pub const VEC_DIM: usize = 128;

/// Byte length of a client vector blob: `VEC_DIM` little-endian f32s.
pub const VEC_BLOB_LEN: usize = VEC_DIM * std::mem::size_of::<f32>();

pub use arena::{Arena, EntrySlot, Segment, VecEntry, DEFAULT_SEGMENT_CAPACITY};
pub use error::{Error, Result};
pub use executor::{Executor, QueryHandle};
pub use pipeline::{run_local, Cluster};
pub use reader::SimReader;
pub use record::{decode_blob, encode_blob, ProbeSpec, ScoreRecord, TopKArg};
pub use snapshot::{TYPE_ID, VEC_TYPE_VERSION};
pub use store::{ReplOp, Store};
pub use topk::TopKHeap;
