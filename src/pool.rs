// src/pool.rs

//! Bounded worker pools for parallel scans and batch conversions
//!
//! A batch of `N` jobs is processed by `min(max_workers, N)` threads. Both the
//! job queue and the result queue are buffered to `N`, so submitting never
//! blocks and workers never wait on a slow consumer. Closing the job side
//! joins every worker before the result side is handed back.
//!
//! There is no retry and no cancellation. A job that fails must say so in
//! its result value.

use std::thread::{self, JoinHandle};
use tracing::warn;

/// Default number of workers used by the parallel scanners
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// A batch-scoped pool of worker threads
pub struct WorkerPool<J, R> {
    jobs: Option<flume::Sender<J>>,
    results: flume::Receiver<R>,
    workers: Vec<JoinHandle<()>>,
}

impl<J, R> WorkerPool<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    /// Spawn a pool sized for `job_count` jobs
    pub fn new<F>(max_workers: usize, job_count: usize, worker: F) -> Self
    where
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        let capacity = job_count.max(1);
        let (job_tx, job_rx) = flume::bounded::<J>(capacity);
        let (result_tx, result_rx) = flume::bounded::<R>(capacity);

        let worker = std::sync::Arc::new(worker);
        let workers = (0..worker_count(max_workers, job_count))
            .map(|_| {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let worker = worker.clone();
                thread::spawn(move || drain(&job_rx, &result_tx, worker.as_ref()))
            })
            .collect();

        Self {
            jobs: Some(job_tx),
            results: result_rx,
            workers,
        }
    }

    /// Queue a job. Returns the job back if the pool has no live workers.
    pub fn submit(&self, job: J) -> Result<(), J> {
        match &self.jobs {
            Some(tx) => tx.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        }
    }

    /// Close the job queue, wait for every worker, and return the results
    pub fn close(mut self) -> flume::Receiver<R> {
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread panicked; its in-flight job produced no result");
            }
        }
        self.results.clone()
    }
}

/// Map `jobs` through `worker` on a bounded set of scoped threads
///
/// Unlike [`WorkerPool`] the worker may borrow from the caller. Results come
/// back in completion order, one per job.
pub fn run_bounded<J, R, F>(jobs: Vec<J>, max_workers: usize, worker: F) -> Vec<R>
where
    J: Send,
    R: Send,
    F: Fn(J) -> R + Sync,
{
    let job_count = jobs.len();
    if job_count == 0 {
        return Vec::new();
    }

    let (job_tx, job_rx) = flume::bounded::<J>(job_count);
    let (result_tx, result_rx) = flume::bounded::<R>(job_count);

    for job in jobs {
        // Cannot fail: the receiver is alive and the buffer holds every job
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    thread::scope(|scope| {
        for _ in 0..worker_count(max_workers, job_count) {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let worker = &worker;
            scope.spawn(move || drain(&job_rx, &result_tx, worker));
        }
    });
    drop(result_tx);

    result_rx.drain().collect()
}

fn worker_count(max_workers: usize, job_count: usize) -> usize {
    max_workers.max(1).min(job_count.max(1))
}

fn drain<J, R, F: Fn(J) -> R>(jobs: &flume::Receiver<J>, results: &flume::Sender<R>, worker: &F) {
    while let Ok(job) = jobs.recv() {
        if results.send(worker(job)).is_err() {
            break;
        }
    }
}
