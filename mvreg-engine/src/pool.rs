//! Worker thread pool
//!
//! One explicitly owned rayon pool per dispatcher. Batches run inside
//! `install`, so the parallel iterators of the algorithms crate they call
//! share the same threads.

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// Shared handle to a fixed-size rayon pool
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
}

impl WorkerPool {
    /// Build a pool sized and named by `config`
    pub fn new(config: &DispatcherConfig) -> Result<Self, DispatchError> {
        let mut builder = ThreadPoolBuilder::new();

        if let Some(num_threads) = config.num_threads {
            builder = builder.num_threads(num_threads);
        }
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        if !config.thread_name_prefix.is_empty() {
            let prefix = config.thread_name_prefix.clone();
            builder = builder.thread_name(move |i| format!("{}-{}", prefix, i));
        }

        let pool = builder
            .build()
            .map_err(|e| DispatchError::Pool(format!("Failed to create thread pool: {}", e)))?;
        debug!("worker pool started with {} threads", pool.current_num_threads());

        Ok(Self { pool: Arc::new(pool) })
    }

    /// Number of worker threads
    pub fn concurrency(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the pool
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("concurrency", &self.concurrency())
            .finish()
    }
}
