//! Turns a `VersionedDataset` file tree into copy or remove jobs

use super::pool::{Executor, JobSink};
use super::SchedulerError;
use crate::crds::{FileProcessPhase, FileStatus, VersionedDataset, KIND_VERSIONED_DATASET};
use crate::resolver::SourceResolver;
use crate::storage::{dataset_object_key, dataset_prefix, ObjectStore};
use crate::versioneddataset::lineage_parent;
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One whole-object copy or removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPayload {
    /// Empty for removals
    pub src_bucket: String,
    /// Empty for removals
    pub src_key: String,
    pub dst_bucket: String,
    pub dst_key: String,
    /// Status group the file belongs to, as `(source_namespace, source_name)`
    pub source_namespace: String,
    pub source_name: String,
    pub remove: bool,
}

/// Where the files of one status group are copied from
struct SourceLocation {
    bucket: String,
    /// Key prefix in front of each status path
    prefix: String,
}

/// [`Executor`] over the file tree of one `VersionedDataset`
pub struct SyncExecutor {
    object_store: Arc<dyn ObjectStore>,
    resolver: Arc<dyn SourceResolver>,
    namespace: String,
    dataset_bucket: String,
    dataset_name: String,
    version: String,
    groups: Vec<FileStatus>,
    remove: bool,
}

impl SyncExecutor {
    /// `groups` are copied when `remove` is false, otherwise every file in
    /// them is removed from the version prefix.
    #[must_use]
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        resolver: Arc<dyn SourceResolver>,
        instance: &VersionedDataset,
        groups: Vec<FileStatus>,
        remove: bool,
    ) -> Self {
        Self {
            object_store,
            resolver,
            namespace: instance.namespace().unwrap_or_default(),
            dataset_bucket: instance.dataset_namespace(),
            dataset_name: instance.dataset_name().to_string(),
            version: instance.spec.version.clone(),
            groups,
            remove,
        }
    }

    #[must_use]
    pub fn is_remove(&self) -> bool {
        self.remove
    }

    /// Status path a copy job was generated from
    #[must_use]
    pub fn logical_path<'a>(&self, job: &'a JobPayload) -> &'a str {
        match lineage_parent(&job.source_name) {
            Some(parent) => {
                let prefix = dataset_prefix(&self.dataset_name, parent);
                job.src_key.strip_prefix(&prefix).unwrap_or(&job.src_key)
            }
            None => &job.src_key,
        }
    }

    async fn source_location(&self, group: &FileStatus) -> Result<SourceLocation, SchedulerError> {
        let source = &group.source_ref;
        if source.kind == KIND_VERSIONED_DATASET {
            let parent = lineage_parent(&source.name).unwrap_or(&source.name);
            return Ok(SourceLocation {
                bucket: self.dataset_bucket.clone(),
                prefix: dataset_prefix(&self.dataset_name, parent),
            });
        }

        let bucket = self
            .resolver
            .resolve_bucket(source, &self.namespace)
            .await?;
        Ok(SourceLocation {
            bucket,
            prefix: String::new(),
        })
    }

    async fn ensure_bucket(&self) -> Result<(), SchedulerError> {
        if !self.object_store.bucket_exists(&self.dataset_bucket).await? {
            info!(bucket = %self.dataset_bucket, "creating destination bucket");
            self.object_store.make_bucket(&self.dataset_bucket).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for SyncExecutor {
    type Job = JobPayload;
    type Error = SchedulerError;

    async fn generate_jobs(&self, sink: JobSink<JobPayload>) -> Result<(), SchedulerError> {
        let mut bucket_checked = false;

        for group in &self.groups {
            if sink.is_cancelled() {
                return Ok(());
            }

            let source = if self.remove {
                None
            } else {
                Some(self.source_location(group).await?)
            };

            if !bucket_checked {
                self.ensure_bucket().await?;
                bucket_checked = true;
            }

            for file in &group.files {
                if sink.is_cancelled() {
                    return Ok(());
                }
                if !self.remove && file.phase != FileProcessPhase::Processing {
                    continue;
                }
                if file.path.ends_with('/') {
                    warn!(
                        source = %group.source_ref.name,
                        path = %file.path,
                        "skipping path ending with '/', not a valid object"
                    );
                    continue;
                }

                let (src_bucket, src_key) = match &source {
                    Some(location) if location.prefix.is_empty() => {
                        (location.bucket.clone(), file.path.clone())
                    }
                    Some(location) => (
                        location.bucket.clone(),
                        format!("{}{}", location.prefix, file.path),
                    ),
                    None => (String::new(), String::new()),
                };

                let job = JobPayload {
                    src_bucket,
                    src_key,
                    dst_bucket: self.dataset_bucket.clone(),
                    dst_key: dataset_object_key(&self.dataset_name, &self.version, &file.path),
                    source_namespace: group.source_ref.namespace.clone().unwrap_or_default(),
                    source_name: group.source_ref.name.clone(),
                    remove: self.remove,
                };
                debug!(?job, "queueing job");
                if !sink.send(job).await {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn task(&self, job: &JobPayload) -> Result<(), SchedulerError> {
        if job.remove {
            self.object_store
                .remove_object(&job.dst_bucket, &job.dst_key)
                .await?;
            debug!(bucket = %job.dst_bucket, key = %job.dst_key, "removed object");
        } else {
            self.object_store
                .copy_object(&job.dst_bucket, &job.dst_key, &job.src_bucket, &job.src_key)
                .await?;
            debug!(
                from = %format!("{}/{}", job.src_bucket, job.src_key),
                to = %format!("{}/{}", job.dst_bucket, job.dst_key),
                "copied object"
            );
        }
        Ok(())
    }
}
