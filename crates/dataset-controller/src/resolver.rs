//! Resolves upstream `Datasource` references to the bucket holding their files

use crate::crds::{Datasource, TypedObjectReference};
use crate::status::StoreError;
use async_trait::async_trait;
use kube::api::Api;
use kube::Client;
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Bucket of the referenced datasource. Falls back to the datasource's
    /// namespace when it has no bucket configured.
    async fn resolve_bucket(
        &self,
        source: &TypedObjectReference,
        default_namespace: &str,
    ) -> Result<String, StoreError>;
}

/// [`SourceResolver`] reading the `Datasource` custom resource
#[derive(Clone)]
pub struct KubeSourceResolver {
    client: Client,
}

impl KubeSourceResolver {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceResolver for KubeSourceResolver {
    async fn resolve_bucket(
        &self,
        source: &TypedObjectReference,
        default_namespace: &str,
    ) -> Result<String, StoreError> {
        let namespace = source.namespace_or(default_namespace);
        let datasources: Api<Datasource> = Api::namespaced(self.client.clone(), namespace);

        let datasource = match datasources.get(&source.name).await {
            Ok(datasource) => datasource,
            Err(kube::Error::Api(response)) if response.code == 404 => {
                return Err(StoreError::NotFound {
                    namespace: namespace.to_string(),
                    name: source.name.clone(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        let bucket = datasource
            .spec
            .bucket()
            .map_or_else(|| namespace.to_string(), str::to_string);
        debug!(datasource = %source.name, namespace, bucket = %bucket, "resolved datasource bucket");
        Ok(bucket)
    }
}
