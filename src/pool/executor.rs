// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, TryRecvError};
use rayon::ThreadPoolBuilder;
use tracing::error;

use super::PoolError;

/// A unit of background work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs loading jobs off the calling thread. Several pools may share one
/// executor.
pub trait LoadExecutor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Executor backed by a dedicated Rayon thread pool.
pub struct RayonExecutor {
    pool: rayon::ThreadPool,
}

impl RayonExecutor {
    /// Creates a new executor with the given number of worker threads.
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        let threads = num_threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("samplepool-loader-{i}"))
            .panic_handler(|_| error!("Loading job panicked"))
            .build()
            .map_err(|e| PoolError::Executor(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl LoadExecutor for RayonExecutor {
    fn execute(&self, job: Job) {
        self.pool.spawn(job);
    }
}

/// Completion signal of a job handed to a [`LoadExecutor`].
///
/// Resolves when the job returns, and also when it unwinds or is dropped
/// without running.
pub struct JobFuture {
    done: Receiver<()>,
    ready: AtomicBool,
}

impl JobFuture {
    /// Returns true if the job has finished.
    pub fn is_ready(&self) -> bool {
        if self.ready.load(Ordering::Acquire) {
            return true;
        }
        match self.done.try_recv() {
            Err(TryRecvError::Empty) => false,
            _ => {
                self.ready.store(true, Ordering::Release);
                true
            }
        }
    }

    /// Blocks until the job has finished.
    pub fn wait(&self) {
        if self.ready.load(Ordering::Acquire) {
            return;
        }
        let _ = self.done.recv();
        self.ready.store(true, Ordering::Release);
    }
}

/// Hands `job` to `executor` and returns a future for its completion.
pub fn spawn_job<F>(executor: &dyn LoadExecutor, job: F) -> JobFuture
where
    F: FnOnce() + Send + 'static,
{
    let (done_sender, done) = crossbeam_channel::bounded(1);
    executor.execute(Box::new(move || {
        job();
        let _ = done_sender.send(());
    }));
    JobFuture {
        done,
        ready: AtomicBool::new(false),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    struct DroppingExecutor;

    impl LoadExecutor for DroppingExecutor {
        fn execute(&self, _job: Job) {}
    }

    #[test]
    fn test_rayon_executor_runs_jobs() {
        let executor = RayonExecutor::new(2).unwrap();
        assert_eq!(executor.num_threads(), 2);

        let counter = Arc::new(AtomicUsize::new(0));
        let futures: Vec<_> = (0..10)
            .map(|_| {
                let counter = counter.clone();
                spawn_job(&executor, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for future in &futures {
            future.wait();
            assert!(future.is_ready());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_future_pending_until_job_finishes() {
        let executor = RayonExecutor::new(1).unwrap();
        let (release, gate) = crossbeam_channel::bounded::<()>(0);
        let future = spawn_job(&executor, move || {
            let _ = gate.recv();
        });
        std::thread::sleep(Duration::from_millis(20));
        assert!(!future.is_ready());
        release.send(()).unwrap();
        future.wait();
        assert!(future.is_ready());
    }

    #[test]
    fn test_dropped_job_resolves() {
        let future = spawn_job(&DroppingExecutor, || {});
        assert!(future.is_ready());
        future.wait();
    }

    #[test]
    fn test_zero_threads_means_one() {
        let executor = RayonExecutor::new(0).unwrap();
        assert_eq!(executor.num_threads(), 1);
    }
}
