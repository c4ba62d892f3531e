use crate::scheduler::{Backends, SchedulerError};
use crate::status::StoreError;
use crate::storage::StorageError;
use crate::tasks::config::ControllerConfig;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Status store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Object storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Sync run error: {0}")]
    SchedulerError(#[from] SchedulerError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Missing object key")]
    MissingObjectKey,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Background copy run registered for one dataset key
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub id: u64,
    pub cancel: CancellationToken,
    /// Cancelled once the run task has exited
    pub finished: CancellationToken,
}

impl RunHandle {
    /// Waits until the run task has exited, including its in-flight jobs
    pub async fn wait(&self) {
        self.finished.cancelled().await;
    }
}

/// Context shared by all reconciles
#[derive(Clone)]
pub struct Context {
    pub backends: Backends,
    pub config: Arc<ControllerConfig>,
    /// Running copy scheduler per `namespace/name`
    pub running: Arc<DashMap<String, RunHandle>>,
    next_run_id: Arc<AtomicU64>,
}

impl Context {
    #[must_use]
    pub fn new(backends: Backends, config: Arc<ControllerConfig>) -> Self {
        Self {
            backends,
            config,
            running: Arc::new(DashMap::new()),
            next_run_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers a run for `key`, stopping the one it replaces. The run task
    /// must cancel the returned handle's `finished` token when it exits.
    pub fn register_run(&self, key: &str, cancel: CancellationToken) -> RunHandle {
        let handle = RunHandle {
            id: self.next_run_id.fetch_add(1, Ordering::Relaxed),
            cancel,
            finished: CancellationToken::new(),
        };
        if let Some(previous) = self.running.insert(key.to_string(), handle.clone()) {
            previous.cancel.cancel();
        }
        handle
    }

    /// Drops the registration of run `id` unless a newer run replaced it
    pub fn finish_run(&self, key: &str, id: u64) {
        self.running.remove_if(key, |_, handle| handle.id == id);
    }

    /// Stops the run registered for `key` and returns its handle so the
    /// caller can wait for it to drain
    pub fn stop_run(&self, key: &str) -> Option<RunHandle> {
        let (_, handle) = self.running.remove(key)?;
        handle.cancel.cancel();
        Some(handle)
    }
}
