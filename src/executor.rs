//! Background query executor and blocked-client completion.
//!
//! Queries never reply inline on the command thread: the command layer
//! validates, builds the pipeline, hands the job to the executor pool and
//! returns a `QueryHandle` immediately. The completion callback runs on
//! the pool thread and delivers through a one-slot channel — the
//! thread-safe reply context. A client that went away simply drops its
//! handle; the computation runs to completion and the send becomes a
//! no-op, discarding the reply.

use crossbeam_channel::{bounded, Receiver};
use tracing::warn;

use crate::error::{Error, Result};

pub struct Executor {
    pool: rayon::ThreadPool,
}

impl Executor {
    /// Build an executor with `threads` workers; 0 means one per core.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("vecsim-exec-{i}"))
            .build()
            .map_err(|e| Error::Executor(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Run `job` on the pool and return the blocked-client handle for its
    /// reply.
    pub fn spawn<T, F>(&self, job: F) -> QueryHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.pool.spawn(move || {
            let result = job();
            if let Err(err) = &result {
                warn!(%err, "query pipeline failed");
            }
            // the client may have disconnected; the reply is discarded
            let _ = tx.send(result);
        });
        QueryHandle { rx }
    }
}

/// The blocked client: one pending reply slot.
#[derive(Debug)]
pub struct QueryHandle<T> {
    rx: Receiver<Result<T>>,
}

impl<T> QueryHandle<T> {
    /// Block until the pipeline completes and take its result.
    pub fn wait(self) -> Result<T> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(Error::Aborted),
        }
    }
}
