use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Command, pipeline, and persistence failures.
///
/// The first four variants carry the exact strings surfaced to clients;
/// the rest propagate through the async query path and the snapshot codec.
#[derive(Debug, Error)]
pub enum Error {
    /// `vec_add` blob whose length is not `VEC_DIM * 4`.
    #[error("Given blob is not float vector of size {0}")]
    BadVectorBlob(usize),

    /// `vec_sim` probe blob whose length is not `VEC_DIM * 4`.
    #[error("Given blob is not at the right size")]
    BadProbeBlob,

    /// `vec_add` on a key that already holds a value.
    #[error("Key is not empty")]
    KeyExists,

    /// `vec_sim` K argument that is not an integer >= 1.
    #[error("Failed extracting <k>")]
    BadTopK,

    /// A vector that cannot be L2-normalized (zero or non-finite norm).
    #[error("Given blob has zero norm")]
    ZeroNorm,

    #[error("unknown snapshot type id {0:?}")]
    SnapshotTypeId(String),

    #[error("unsupported vec_index version {0}")]
    SnapshotVersion(u32),

    #[error("failed building executor pool: {0}")]
    Executor(String),

    /// The completion callback was dropped before delivering a reply.
    #[error("query aborted before completion")]
    Aborted,

    /// Snapshot or transport stream failure; wraps the underlying I/O
    /// error when the stream itself broke.
    #[error("snapshot codec: {0}")]
    Codec(#[from] bincode::Error),
}
