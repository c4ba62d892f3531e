//! `Datasource` Custom Resource Definition (read-only here)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Object storage location of a datasource
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct OssLocation {
    #[serde(default)]
    pub bucket: String,
    /// Must end with a slash "/" if it is a directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "arcadia.kubeagi.k8s.com.cn",
    version = "v1alpha1",
    kind = "Datasource"
)]
#[kube(namespaced)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oss: Option<OssLocation>,
}

impl DatasourceSpec {
    /// Configured bucket, if any
    #[must_use]
    pub fn bucket(&self) -> Option<&str> {
        self.oss
            .as_ref()
            .map(|oss| oss.bucket.as_str())
            .filter(|bucket| !bucket.is_empty())
    }
}
