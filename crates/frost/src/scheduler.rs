//! Fixed-size worker pool for partitioned blur passes.
//!
//! A blur pass is split into independent [`BlurTask`]s that write disjoint
//! regions. [`ConcurrentTaskScheduler::invoke_all`] runs one batch on the pool
//! and returns only after every task finished, which gives the barrier
//! between the horizontal and the vertical pass.

use std::num::NonZeroUsize;
use std::ops::Range;

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::config::Direction;
use crate::{BlurError, FrostResult};

/// Position of one task inside a partitioned pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Total number of partitions in the pass.
    pub count: u32,
    /// Index of this partition, `0..count`.
    pub index: u32,
    pub direction: Direction,
}

impl Partition {
    pub fn new(count: u32, index: u32, direction: Direction) -> Self {
        Self { count, index, direction }
    }

    /// Whole-pass descriptor.
    pub fn single(direction: Direction) -> Self {
        Self::new(1, 0, direction)
    }

    /// Slice of `0..len` covered by this partition.
    ///
    /// Every partition gets `len / count` lines; the last one also takes the
    /// remainder.
    pub fn range(&self, len: usize) -> Range<usize> {
        band_range(len, self.count as usize, self.index as usize)
    }
}

/// Lines `[start, end)` of band `index` when `len` lines are split `count` ways.
pub fn band_range(len: usize, count: usize, index: usize) -> Range<usize> {
    let step = len / count;
    let start = index * step;
    let end = if index + 1 == count { len } else { start + step };
    start..end
}

/// One independent unit of work of a pass.
pub trait BlurTask: Send {
    fn partition(&self) -> Partition;

    fn run(self) -> FrostResult<()>;
}

/// Fixed-size worker pool.
pub struct ConcurrentTaskScheduler {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl ConcurrentTaskScheduler {
    /// Pool sized to the available parallelism.
    pub fn new() -> FrostResult<Self> {
        let workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::with_workers(workers)
    }

    pub fn with_workers(workers: usize) -> FrostResult<Self> {
        if workers == 0 {
            return Err(BlurError::InvalidConfiguration("worker count must be > 0".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("frost-worker-{i}"))
            .build()
            .map_err(|e| BlurError::BackendFailure(format!("failed to start worker pool: {e}")))?;
        debug!(workers, "worker pool started");
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every task of the batch and block until all have finished.
    ///
    /// All tasks run even if one fails; the first error in task order is
    /// returned.
    pub fn invoke_all<T: BlurTask>(&self, tasks: Vec<T>) -> FrostResult<()> {
        trace!(tasks = tasks.len(), "invoke_all");
        let results: Vec<FrostResult<()>> = self.pool.install(|| {
            tasks
                .into_par_iter()
                .map(|task| {
                    let p = task.partition();
                    task.run().inspect_err(|e| {
                        debug!(index = p.index, count = p.count, direction = ?p.direction, "task failed: {e}")
                    })
                })
                .collect()
        });
        results.into_iter().collect()
    }
}

impl std::fmt::Debug for ConcurrentTaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentTaskScheduler")
            .field("workers", &self.workers)
            .finish()
    }
}
