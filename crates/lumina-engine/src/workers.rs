//! Worker pool for data-parallel passes inside a frame.
//!
//! One fixed-size [`rayon::ThreadPool`] is owned by the
//! [`Engine`](crate::engine::Engine) and lent to worlds through an `Arc`.
//! Every entry point blocks until all spawned work has finished, so nothing
//! submitted from a system outlives the system call.

use rayon::prelude::*;

use crate::EngineError;

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    /// A pool with exactly `threads` workers (minimum 1).
    pub fn new(threads: usize) -> Result<Self, EngineError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("lumina-worker-{i}"))
            .build()
            .map_err(|e| EngineError::WorkerPool(e.to_string()))?;
        tracing::debug!(threads, "worker pool started");
        Ok(Self { pool, threads })
    }

    /// A pool sized to the machine minus `reserved` threads, keeping at
    /// least one worker.
    pub fn from_reserved(reserved: usize) -> Result<Self, EngineError> {
        let available = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self::new(available.saturating_sub(reserved))
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `f` on every element, in parallel. Each element is visited
    /// exactly once by one worker.
    pub fn parallel_for<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(&mut T) + Send + Sync,
    {
        self.pool.install(|| items.par_iter_mut().for_each(|item| f(item)));
    }

    /// Like [`parallel_for`](Self::parallel_for) with the element index.
    pub fn parallel_for_indexed<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Send + Sync,
    {
        self.pool
            .install(|| items.par_iter_mut().enumerate().for_each(|(i, item)| f(i, item)));
    }

    /// Run `op` inside the pool so nested rayon calls use these workers.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_threads_means_one() {
        assert_eq!(WorkerPool::new(0).unwrap().threads(), 1);
    }

    #[test]
    fn reserving_everything_still_leaves_a_worker() {
        assert!(WorkerPool::from_reserved(usize::MAX).unwrap().threads() >= 1);
    }

    #[test]
    fn parallel_for_visits_every_element_once() {
        let pool = WorkerPool::new(4).unwrap();
        let mut items: Vec<u64> = (0..10_000).collect();
        pool.parallel_for(&mut items, |v| *v *= 2);
        assert!(items.iter().enumerate().all(|(i, &v)| v == 2 * i as u64));

        let mut slots = vec![0usize; 256];
        pool.parallel_for_indexed(&mut slots, |i, v| *v = i);
        assert!(slots.iter().enumerate().all(|(i, &v)| v == i));
    }

    #[test]
    fn install_returns_value() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.install(|| (1..=10).into_par_iter().sum::<i32>()), 55);
    }
}
