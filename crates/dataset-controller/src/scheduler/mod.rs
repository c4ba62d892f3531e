//! Sync runs for one `VersionedDataset`.
//!
//! A [`Scheduler`] drives the [`WorkerPool`] over the jobs produced by
//! [`SyncExecutor`], folds each copy result into its own copy of the status
//! tree, then re-reads the document and commits the Ready condition if nobody
//! else changed it in the meantime.

use crate::crds::{FileProcessPhase, FileStatus, VersionedDataset};
use crate::resolver::SourceResolver;
use crate::status::{StatusStore, StoreError};
use crate::storage::{ObjectStore, StorageError};
use crate::versioneddataset::{aggregate_condition, update_file_status};
use kube::ResourceExt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

pub mod executor;
pub mod pool;

pub use executor::{JobPayload, SyncExecutor};
pub use pool::{
    Executor, JobSink, PoolConfig, WorkerPool, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_WORKERS,
};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{namespace}/{name} has no resourceVersion")]
    MissingVersionToken { namespace: String, name: String },
}

/// Capabilities a run needs
#[derive(Clone)]
pub struct Backends {
    pub object_store: Arc<dyn ObjectStore>,
    pub status_store: Arc<dyn StatusStore>,
    pub resolver: Arc<dyn SourceResolver>,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Status was patched; `ready` mirrors the committed Ready condition
    Committed { ready: bool },
    /// Computed status equals the stored one, nothing written
    Unchanged,
    /// The document moved on during the run; results were discarded
    Superseded,
    /// The document is being deleted and its finalizers were cleared
    Finalized,
    /// Removal run finished; removals never touch status
    Removed,
    /// The document no longer exists
    Gone,
    /// Stopped before completion; nothing was committed
    Cancelled,
}

pub struct Scheduler {
    pool: WorkerPool,
    executor: Arc<SyncExecutor>,
    status_store: Arc<dyn StatusStore>,
    instance: VersionedDataset,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Copies every `Processing` file of `instance`'s status tree
    #[must_use]
    pub fn copy(backends: &Backends, config: PoolConfig, instance: VersionedDataset) -> Self {
        let groups = instance.files().to_vec();
        Self::build(backends, config, instance, groups, false)
    }

    /// Removes every file in `deleted_files` from the version prefix
    #[must_use]
    pub fn remove(
        backends: &Backends,
        config: PoolConfig,
        instance: VersionedDataset,
        deleted_files: Vec<FileStatus>,
    ) -> Self {
        Self::build(backends, config, instance, deleted_files, true)
    }

    fn build(
        backends: &Backends,
        config: PoolConfig,
        instance: VersionedDataset,
        groups: Vec<FileStatus>,
        remove: bool,
    ) -> Self {
        let executor = SyncExecutor::new(
            Arc::clone(&backends.object_store),
            Arc::clone(&backends.resolver),
            &instance,
            groups,
            remove,
        );
        Self {
            pool: WorkerPool::new(config),
            executor: Arc::new(executor),
            status_store: Arc::clone(&backends.status_store),
            instance,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops this run when cancelled
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops job generation; in-flight jobs finish, nothing is committed
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Executes the run and commits its result
    pub async fn start(self) -> Result<RunOutcome, SchedulerError> {
        let namespace = self.instance.namespace().unwrap_or_default();
        let name = self.instance.name_any();
        let remove = self.executor.is_remove();
        let span = info_span!("sync_run", namespace = %namespace, name = %name, remove);

        self.run(namespace, name).instrument(span).await
    }

    async fn run(self, namespace: String, name: String) -> Result<RunOutcome, SchedulerError> {
        let remove = self.executor.is_remove();
        let mut files = self.instance.files().to_vec();
        let executor = Arc::clone(&self.executor);

        info!("starting sync run");
        self.pool
            .run(Arc::clone(&self.executor), self.cancel.clone(), |job, result| {
                if job.remove {
                    match result {
                        Ok(()) => debug!(key = %job.dst_key, "object removed"),
                        Err(err) => warn!(key = %job.dst_key, error = %err, "failed to remove object"),
                    }
                    return;
                }

                let (phase, err_message) = match result {
                    Ok(()) => (FileProcessPhase::Succeeded, String::new()),
                    Err(err) => (FileProcessPhase::Failed, err.to_string()),
                };
                let path = executor.logical_path(&job);
                if let Err(err) = update_file_status(
                    &mut files,
                    &job.source_namespace,
                    &job.source_name,
                    path,
                    phase,
                    &err_message,
                ) {
                    warn!(error = %err, "job finished but its file status could not be updated");
                }
            })
            .await?;

        if self.cancel.is_cancelled() {
            info!("sync run cancelled, discarding results");
            return Ok(RunOutcome::Cancelled);
        }

        let Some(mut latest) = self.status_store.get(&namespace, &name).await? else {
            info!("VersionedDataset is gone");
            return Ok(RunOutcome::Gone);
        };

        if latest.is_deleting() {
            info!("VersionedDataset is being deleted, clearing finalizers");
            latest.metadata.finalizers = None;
            return match self.status_store.update(&latest).await {
                Ok(_) | Err(StoreError::NotFound { .. }) => Ok(RunOutcome::Finalized),
                Err(err) => Err(err.into()),
            };
        }

        if remove {
            return Ok(RunOutcome::Removed);
        }

        let token = self
            .instance
            .version_token()
            .ok_or_else(|| SchedulerError::MissingVersionToken {
                namespace: namespace.clone(),
                name: name.clone(),
            })?;
        if latest.version_token() != Some(token) {
            info!(
                current = latest.version_token().unwrap_or_default(),
                previous = token,
                "VersionedDataset changed during the run, discarding results"
            );
            return Ok(RunOutcome::Superseded);
        }

        let mut status = latest.status.clone().unwrap_or_default();
        status.files = files;
        status.set_condition(aggregate_condition(&status.files));
        let ready = status.ready_condition().is_some_and(|c| c.is_true());

        if latest.status.as_ref() == Some(&status) {
            debug!("status unchanged, skipping patch");
            return Ok(RunOutcome::Unchanged);
        }

        match self
            .status_store
            .patch_status(&namespace, &name, token, &status)
            .await
        {
            Ok(()) => {
                info!(ready, "committed sync status");
                Ok(RunOutcome::Committed { ready })
            }
            Err(StoreError::Conflict { .. }) => {
                info!("status patch conflicted, discarding results");
                Ok(RunOutcome::Superseded)
            }
            Err(StoreError::NotFound { .. }) => Ok(RunOutcome::Gone),
            Err(err) => Err(err.into()),
        }
    }
}
