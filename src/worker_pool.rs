//! Bounded execution of blocking inference jobs.
//!
//! Generation is compute-bound and synchronous, so jobs run on tokio's
//! blocking thread pool. Two semaphores bound the work:
//!
//! - `admission` holds `workers + queue_depth` permits. A request that
//!   cannot get one is rejected immediately with `Error::Overloaded`.
//! - `workers` holds `workers` permits and limits how many generations
//!   share the device at once. Admitted requests wait here in FIFO order.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct InferencePool {
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    worker_count: usize,
    queue_depth: usize,
}

impl InferencePool {
    /// `workers` is clamped to at least one.
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let worker_count = workers.max(1);
        Self {
            admission: Arc::new(Semaphore::new(worker_count + queue_depth)),
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            queue_depth,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Requests currently admitted, running or waiting for a worker.
    pub fn in_flight(&self) -> usize {
        self.worker_count + self.queue_depth - self.admission.available_permits()
    }

    /// Runs `job` on a blocking thread once a worker is free.
    ///
    /// Fails fast with `Error::Overloaded` when the pool is full. A job that
    /// panics surfaces as `Error::Worker`.
    ///
    /// Both permits travel with the job, so dropping the returned future
    /// (client disconnect, timeout) keeps the slot busy until the job ends.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let admitted = self
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::Overloaded {
                queued: self.queue_depth,
            })?;

        let worker = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Worker(e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permits = (admitted, worker);
            job()
        })
        .await
        .map_err(|e| Error::Worker(e.to_string()))?
    }
}
