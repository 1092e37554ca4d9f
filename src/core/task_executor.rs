use std::sync::Arc;

use rayon::{Scope, ThreadPool, ThreadPoolBuilder, prelude::*};

use crate::BatchError;

/// Default worker count of a pool, also the default throttle limit of
/// multi-threaded steps.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// A bounded pool of worker threads shared by multi-threaded steps,
/// partition handlers, async processors and job splits.
///
/// Cloning is cheap and every clone drives the same threads.
#[derive(Clone)]
pub struct TaskExecutor {
    pool: Arc<ThreadPool>,
    concurrency: usize,
}

impl TaskExecutor {
    pub fn new(concurrency: usize) -> Result<Self, BatchError> {
        if concurrency == 0 {
            return Err(BatchError::Configuration(
                "task executor needs at least one worker thread".to_string(),
            ));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|index| format!("batch-worker-{index}"))
            .build()
            .map_err(|error| BatchError::Configuration(error.to_string()))?;

        Ok(Self {
            pool: Arc::new(pool),
            concurrency,
        })
    }

    pub fn with_default_concurrency() -> Result<Self, BatchError> {
        Self::new(DEFAULT_CONCURRENCY)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `op` inside the pool and blocks until it returns.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Opens a scope whose spawned tasks may borrow from the caller; returns
    /// once every spawned task has finished.
    pub fn scope<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&Scope<'scope>) -> R + Send,
        R: Send,
    {
        self.pool.scope(op)
    }

    /// Applies `function` to every item on the pool and returns the results in
    /// the order of `items`, whatever order the tasks complete in.
    pub fn map_ordered<T, R, F>(&self, items: &[T], function: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        self.pool
            .install(|| items.par_iter().map(|item| function(item)).collect())
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("concurrency", &self.concurrency)
            .finish()
    }
}
