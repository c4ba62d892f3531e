//! Versioned document store holding `VersionedDataset` spec and status.
//!
//! Writes are guarded by the `metadata.resourceVersion` token read at the start
//! of a run: a patch carrying a stale token fails with [`StoreError::Conflict`]
//! and the caller discards its result instead of merging it.

use crate::crds::{VersionedDataset, VersionedDatasetStatus};
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{namespace}/{name} was modified concurrently")]
    Conflict { namespace: String, name: String },

    #[error("{namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("{0} is missing from object metadata")]
    MissingMetadata(&'static str),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Latest document, `None` once it is gone
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<VersionedDataset>>;

    /// Replaces metadata and spec (e.g. to clear finalizers)
    async fn update(&self, dataset: &VersionedDataset) -> Result<VersionedDataset>;

    /// Replaces the status, failing with [`StoreError::Conflict`] when
    /// `version_token` is no longer current
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        version_token: &str,
        status: &VersionedDatasetStatus,
    ) -> Result<()>;
}

/// [`StatusStore`] over the `VersionedDataset` custom resource
#[derive(Clone)]
pub struct KubeStatusStore {
    client: Client,
}

impl KubeStatusStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<VersionedDataset> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_conflict(err: kube::Error, namespace: &str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        other => StoreError::KubeError(other),
    }
}

#[async_trait]
impl StatusStore for KubeStatusStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<VersionedDataset>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn update(&self, dataset: &VersionedDataset) -> Result<VersionedDataset> {
        let namespace = dataset
            .namespace()
            .ok_or(StoreError::MissingMetadata("namespace"))?;
        let name = dataset.name_any();
        self.api(&namespace)
            .replace(&name, &PostParams::default(), dataset)
            .await
            .map_err(|err| map_conflict(err, &namespace, &name))
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        version_token: &str,
        status: &VersionedDatasetStatus,
    ) -> Result<()> {
        // The API server rejects a merge patch whose resourceVersion is stale.
        let patch = json!({
            "metadata": { "resourceVersion": version_token },
            "status": serde_json::to_value(status)?,
        });

        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|err| map_conflict(err, namespace, name))?;

        debug!(namespace, name, version_token, "patched VersionedDataset status");
        Ok(())
    }
}
