//! Bounded producer/consumer worker pool.
//!
//! One producer ([`Executor::generate_jobs`]) feeds a bounded queue drained by
//! a fixed number of workers running [`Executor::task`]. Every executed job is
//! handed back, with its result, to a single completion callback, so the
//! callback may own mutable state without locking.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const DEFAULT_BUFFER_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_workers: usize,
    /// Capacity of the job queue; a full queue blocks the producer
    pub buffer_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Producer side of the job queue handed to [`Executor::generate_jobs`]
pub struct JobSink<J> {
    tx: mpsc::Sender<J>,
    cancel: CancellationToken,
}

impl<J: Send> JobSink<J> {
    pub(crate) fn new(tx: mpsc::Sender<J>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Queues `job`, waiting for room. Returns `false` once the run is
    /// cancelled or the workers are gone; the producer should stop then.
    pub async fn send(&self, job: J) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.tx.send(job) => sent.is_ok(),
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync + 'static {
    type Job: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produces every job of the run. An error aborts the run.
    async fn generate_jobs(&self, sink: JobSink<Self::Job>) -> Result<(), Self::Error>;

    /// Executes one job; the outcome is reported to the completion callback
    async fn task(&self, job: &Self::Job) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerPool {
    config: PoolConfig,
}

impl WorkerPool {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    /// Runs `executor` to completion.
    ///
    /// `on_finish` is called exactly once per executed job. Jobs still queued
    /// when `cancel` fires are dropped without a callback; jobs already
    /// running finish and are reported. Returns the generation error, if any.
    pub async fn run<E, F>(
        &self,
        executor: Arc<E>,
        cancel: CancellationToken,
        mut on_finish: F,
    ) -> Result<(), E::Error>
    where
        E: Executor,
        F: FnMut(E::Job, Result<(), E::Error>) + Send,
    {
        let max_workers = self.config.max_workers.max(1);
        let (job_tx, job_rx) = mpsc::channel::<E::Job>(self.config.buffer_size.max(1));
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        // Generation failure stops the workers without cancelling the caller.
        let run_cancel = cancel.child_token();

        let mut workers = JoinSet::new();
        for worker_id in 0..max_workers {
            let executor = Arc::clone(&executor);
            let job_rx = Arc::clone(&job_rx);
            let done_tx = done_tx.clone();
            let cancel = run_cancel.clone();

            workers.spawn(async move {
                loop {
                    let job = {
                        let mut rx = job_rx.lock().await;
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => None,
                            job = rx.recv() => job,
                        }
                    };
                    let Some(job) = job else {
                        break;
                    };

                    let result = executor.task(&job).await;
                    if done_tx.send((job, result)).is_err() {
                        break;
                    }
                }
                debug!(worker_id, "worker stopped");
            });
        }
        drop(done_tx);

        let sink = JobSink::new(job_tx, run_cancel.clone());
        let generate = async {
            let generated = executor.generate_jobs(sink).await;
            if generated.is_err() {
                run_cancel.cancel();
            }
            generated
        };
        let drain = async {
            while let Some((job, result)) = done_rx.recv().await {
                on_finish(job, result);
            }
        };

        let (generated, ()) = tokio::join!(generate, drain);

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "worker task failed");
            }
        }

        generated
    }
}
