//! In-memory backends with operation tracing.
//!
//! Used by unit and integration tests in place of MinIO and the Kubernetes
//! API. Clones share state, so a test can keep a handle for assertions after
//! passing one into the engine.

use crate::crds::{TypedObjectReference, VersionedDataset, VersionedDatasetStatus};
use crate::resolver::SourceResolver;
use crate::status::{Result as StoreResult, StatusStore, StoreError};
use crate::storage::{ObjectInfo, ObjectStore, Result as StorageResult, StorageError};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Record of an object store call for test assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    BucketExists(String),
    MakeBucket(String),
    Copy {
        dst_bucket: String,
        dst_key: String,
        src_bucket: String,
        src_key: String,
    },
    Remove {
        bucket: String,
        key: String,
    },
    List {
        bucket: String,
        prefix: String,
    },
}

#[derive(Debug, Default)]
struct ObjectState {
    buckets: BTreeMap<String, BTreeSet<String>>,
    operations: Vec<StorageOp>,
    /// key -> injected error message
    failing_keys: HashMap<String, String>,
    /// bucket -> injected error message
    failing_buckets: HashMap<String, String>,
}

impl ObjectState {
    fn check_bucket(&self, operation: &'static str, bucket: &str) -> StorageResult<()> {
        match self.failing_buckets.get(bucket) {
            Some(message) => Err(StorageError::Request {
                operation,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_key(&self, operation: &'static str, key: &str) -> StorageResult<()> {
        match self.failing_keys.get(key) {
            Some(message) => Err(StorageError::Request {
                operation,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// [`ObjectStore`] keeping keys per bucket in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<ObjectState>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bucket(self, bucket: &str) -> Self {
        lock(&self.state)
            .buckets
            .entry(bucket.to_string())
            .or_default();
        self
    }

    /// Seeds `bucket/key`, creating the bucket when needed
    #[must_use]
    pub fn with_object(self, bucket: &str, key: &str) -> Self {
        lock(&self.state)
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string());
        self
    }

    /// Copies and removals touching `key` (as source or destination) fail with `message`
    #[must_use]
    pub fn fail_key(self, key: &str, message: &str) -> Self {
        lock(&self.state)
            .failing_keys
            .insert(key.to_string(), message.to_string());
        self
    }

    /// Every call touching `bucket` fails with `message`
    #[must_use]
    pub fn fail_bucket(self, bucket: &str, message: &str) -> Self {
        lock(&self.state)
            .failing_buckets
            .insert(bucket.to_string(), message.to_string());
        self
    }

    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        lock(&self.state).operations.clone()
    }

    /// Keys currently stored in `bucket`, sorted
    #[must_use]
    pub fn objects(&self, bucket: &str) -> Vec<String> {
        lock(&self.state)
            .buckets
            .get(bucket)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn bucket_exists_now(&self, bucket: &str) -> bool {
        lock(&self.state).buckets.contains_key(bucket)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        let mut state = lock(&self.state);
        state
            .operations
            .push(StorageOp::BucketExists(bucket.to_string()));
        state.check_bucket("HeadBucket", bucket)?;
        Ok(state.buckets.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut state = lock(&self.state);
        state
            .operations
            .push(StorageOp::MakeBucket(bucket.to_string()));
        state.check_bucket("CreateBucket", bucket)?;
        state.buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn copy_object(
        &self,
        dst_bucket: &str,
        dst_key: &str,
        src_bucket: &str,
        src_key: &str,
    ) -> StorageResult<()> {
        let mut state = lock(&self.state);
        state.operations.push(StorageOp::Copy {
            dst_bucket: dst_bucket.to_string(),
            dst_key: dst_key.to_string(),
            src_bucket: src_bucket.to_string(),
            src_key: src_key.to_string(),
        });
        state.check_bucket("CopyObject", src_bucket)?;
        state.check_bucket("CopyObject", dst_bucket)?;
        state.check_key("CopyObject", src_key)?;
        state.check_key("CopyObject", dst_key)?;

        let source_exists = state
            .buckets
            .get(src_bucket)
            .is_some_and(|keys| keys.contains(src_key));
        if !source_exists {
            return Err(StorageError::ObjectNotFound {
                bucket: src_bucket.to_string(),
                key: src_key.to_string(),
            });
        }

        let Some(destination) = state.buckets.get_mut(dst_bucket) else {
            return Err(StorageError::BucketNotFound {
                bucket: dst_bucket.to_string(),
            });
        };
        destination.insert(dst_key.to_string());
        Ok(())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut state = lock(&self.state);
        state.operations.push(StorageOp::Remove {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        state.check_bucket("DeleteObject", bucket)?;
        state.check_key("DeleteObject", key)?;

        match state.buckets.get_mut(bucket) {
            Some(keys) => {
                keys.remove(key);
                Ok(())
            }
            None => Err(StorageError::BucketNotFound {
                bucket: bucket.to_string(),
            }),
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> StorageResult<Vec<ObjectInfo>> {
        let mut state = lock(&self.state);
        state.operations.push(StorageOp::List {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        });
        state.check_bucket("ListObjectsV2", bucket)?;

        let Some(keys) = state.buckets.get(bucket) else {
            return Err(StorageError::BucketNotFound {
                bucket: bucket.to_string(),
            });
        };
        Ok(keys
            .iter()
            .filter(|key| {
                key.strip_prefix(prefix)
                    .is_some_and(|rest| recursive || !rest.contains('/'))
            })
            .map(|key| ObjectInfo {
                key: key.clone(),
                ..ObjectInfo::default()
            })
            .collect())
    }
}

#[derive(Debug, Default)]
struct DocumentState {
    documents: BTreeMap<(String, String), VersionedDataset>,
    next_version: u64,
    patches: usize,
    updates: usize,
}

impl DocumentState {
    fn next_token(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// [`StatusStore`] with `resourceVersion` semantics: every write bumps the
/// token and writes carrying a stale token fail with a conflict.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    state: Arc<Mutex<DocumentState>>,
}

impl MemoryStatusStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `dataset` under a fresh token and returns the stored copy
    pub fn insert(&self, mut dataset: VersionedDataset) -> VersionedDataset {
        let mut state = lock(&self.state);
        dataset.metadata.resource_version = Some(state.next_token());
        let key = (dataset.namespace().unwrap_or_default(), dataset.name_any());
        state.documents.insert(key, dataset.clone());
        dataset
    }

    #[must_use]
    pub fn document(&self, namespace: &str, name: &str) -> Option<VersionedDataset> {
        lock(&self.state)
            .documents
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Simulates a write by another client
    pub fn bump(&self, namespace: &str, name: &str) {
        let mut state = lock(&self.state);
        let token = state.next_token();
        if let Some(document) = state
            .documents
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            document.metadata.resource_version = Some(token);
        }
    }

    /// Sets the deletion timestamp, as the API server does on delete
    pub fn mark_deleted(&self, namespace: &str, name: &str) -> Option<VersionedDataset> {
        let mut state = lock(&self.state);
        let token = state.next_token();
        let document = state
            .documents
            .get_mut(&(namespace.to_string(), name.to_string()))?;
        document.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        document.metadata.resource_version = Some(token);
        Some(document.clone())
    }

    pub fn remove(&self, namespace: &str, name: &str) -> Option<VersionedDataset> {
        lock(&self.state)
            .documents
            .remove(&(namespace.to_string(), name.to_string()))
    }

    /// Successful status patches so far
    #[must_use]
    pub fn patch_count(&self) -> usize {
        lock(&self.state).patches
    }

    /// Successful updates so far
    #[must_use]
    pub fn update_count(&self) -> usize {
        lock(&self.state).updates
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<VersionedDataset>> {
        Ok(self.document(namespace, name))
    }

    async fn update(&self, dataset: &VersionedDataset) -> StoreResult<VersionedDataset> {
        let namespace = dataset
            .namespace()
            .ok_or(StoreError::MissingMetadata("namespace"))?;
        let name = dataset.name_any();
        let key = (namespace.clone(), name.clone());

        let mut state = lock(&self.state);
        let token = state.next_token();
        let Some(stored) = state.documents.get_mut(&key) else {
            return Err(StoreError::NotFound { namespace, name });
        };
        if stored.metadata.resource_version != dataset.metadata.resource_version {
            return Err(StoreError::Conflict { namespace, name });
        }

        // Replacing the main resource never touches status.
        let status = stored.status.take();
        *stored = dataset.clone();
        stored.status = status;
        stored.metadata.resource_version = Some(token);
        let updated = stored.clone();

        let released = updated.is_deleting()
            && updated
                .metadata
                .finalizers
                .as_ref()
                .map_or(true, Vec::is_empty);
        if released {
            state.documents.remove(&key);
        }
        state.updates += 1;
        Ok(updated)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        version_token: &str,
        status: &VersionedDatasetStatus,
    ) -> StoreResult<()> {
        let mut state = lock(&self.state);
        let token = state.next_token();
        let Some(stored) = state
            .documents
            .get_mut(&(namespace.to_string(), name.to_string()))
        else {
            return Err(StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        };
        if stored.version_token() != Some(version_token) {
            return Err(StoreError::Conflict {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }

        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(token);
        state.patches += 1;
        Ok(())
    }
}

/// [`SourceResolver`] answering from a fixed `name -> bucket` table.
/// Unknown datasources resolve to their namespace, like a datasource
/// without a bucket of its own.
#[derive(Debug, Clone, Default)]
pub struct StaticSourceResolver {
    buckets: HashMap<String, String>,
}

impl StaticSourceResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bucket(mut self, datasource: &str, bucket: &str) -> Self {
        self.buckets
            .insert(datasource.to_string(), bucket.to_string());
        self
    }
}

#[async_trait]
impl SourceResolver for StaticSourceResolver {
    async fn resolve_bucket(
        &self,
        source: &TypedObjectReference,
        default_namespace: &str,
    ) -> StoreResult<String> {
        Ok(self
            .buckets
            .get(&source.name)
            .cloned()
            .unwrap_or_else(|| source.namespace_or(default_namespace).to_string()))
    }
}
