//! Object storage capability used by the sync engine.
//!
//! The engine never reads object bodies. It only needs to check and create
//! buckets, copy whole objects server-side, remove objects and list keys under
//! a prefix. [`ObjectStore`] captures exactly that, so the S3/MinIO client in
//! [`s3`] and the in-memory double in [`crate::testing`] are interchangeable.

use async_trait::async_trait;
use thiserror::Error;

pub mod s3;

pub use s3::S3ObjectStore;

/// Errors raised by an [`ObjectStore`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("bucket {bucket} does not exist")]
    BucketNotFound { bucket: String },

    #[error("object {bucket}/{key} does not exist")]
    ObjectNotFound { bucket: String, key: String },

    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Listing entry returned by [`ObjectStore::list_objects`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    pub etag: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn make_bucket(&self, bucket: &str) -> Result<()>;

    /// Server-side copy of `src_bucket/src_key` to `dst_bucket/dst_key`
    async fn copy_object(
        &self,
        dst_bucket: &str,
        dst_key: &str,
        src_bucket: &str,
        src_key: &str,
    ) -> Result<()>;

    /// Removing a missing key is not an error
    async fn remove_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Lists keys under `prefix`; without `recursive` only the first level is returned
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>>;
}

/// `dataset/<dataset>/<version>/`, the prefix every synced file lives under
#[must_use]
pub fn dataset_prefix(dataset: &str, version: &str) -> String {
    format!("dataset/{dataset}/{version}/")
}

/// Destination key of `path` inside a dataset version
#[must_use]
pub fn dataset_object_key(dataset: &str, version: &str, path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    format!("{}{path}", dataset_prefix(dataset, version))
}
