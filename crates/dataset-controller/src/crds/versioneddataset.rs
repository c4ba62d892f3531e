//! `VersionedDataset` Custom Resource Definition for immutable dataset snapshots

use super::condition::{set_condition, Condition, TYPE_READY};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const KIND_DATASOURCE: &str = "Datasource";
pub const KIND_VERSIONED_DATASET: &str = "VersionedDataset";

/// Reference to another resource, optionally in a different namespace
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypedObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    #[serde(default)]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl TypedObjectReference {
    #[must_use]
    pub fn new(kind: &str, name: &str, namespace: Option<&str>) -> Self {
        Self {
            api_group: None,
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
        }
    }

    /// Namespace of the referenced object, defaulting to `fallback`
    #[must_use]
    pub fn namespace_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(fallback)
    }
}

/// Files declared to come from one upstream source
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct FileGroup {
    /// Datasource providing these files
    pub source: TypedObjectReference,
    /// Object paths relative to the datasource bucket
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "arcadia.kubeagi.k8s.com.cn",
    version = "v1alpha1",
    kind = "VersionedDataset"
)]
#[kube(namespaced)]
#[kube(derive = "PartialEq")]
#[kube(status = "VersionedDatasetStatus")]
#[kube(printcolumn = r#"{"name":"Dataset","type":"string","jsonPath":".spec.dataset.name"}"#)]
#[kube(printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct VersionedDatasetSpec {
    /// Dataset this version belongs to; its namespace is the destination bucket
    pub dataset: TypedObjectReference,

    /// Version name, used as the object key segment under the dataset
    pub version: String,

    /// Optional: earlier version whose objects seed this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherited_from: Option<String>,

    /// Files grouped by the datasource they are copied from
    #[serde(default)]
    pub file_groups: Vec<FileGroup>,

    #[serde(default)]
    pub released: bool,
}

impl VersionedDatasetSpec {
    /// Parent version, ignoring an empty string
    #[must_use]
    pub fn inherited_from(&self) -> Option<&str> {
        self.inherited_from.as_deref().filter(|v| !v.is_empty())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionedDatasetStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Per-source file sync state, sorted by source name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileStatus>,
}

impl VersionedDatasetStatus {
    #[must_use]
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == TYPE_READY)
    }

    /// See [`set_condition`]
    pub fn set_condition(&mut self, condition: Condition) -> bool {
        set_condition(&mut self.conditions, condition)
    }
}

/// Sync state of every file drawn from one source
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    pub source_ref: TypedObjectReference,
    /// Unique paths, sorted
    #[serde(default)]
    pub files: Vec<FileDetail>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileDetail {
    pub path: String,

    #[serde(default)]
    pub phase: FileProcessPhase,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,

    /// Last successful sync (RFC3339 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub err_message: String,
}

impl FileDetail {
    #[must_use]
    pub fn new(path: impl Into<String>, phase: FileProcessPhase) -> Self {
        Self {
            path: path.into(),
            phase,
            ..Self::default()
        }
    }
}

/// Phase of a single file sync
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum FileProcessPhase {
    #[default]
    Pending,
    Processing,
    Succeeded,
    Failed,
    Skipped,
}

impl FileProcessPhase {
    /// Only `Pending -> Processing` and `Processing -> {Succeeded, Failed}` are legal
    #[must_use]
    pub fn can_transition_to(self, to: FileProcessPhase) -> bool {
        matches!(
            (self, to),
            (FileProcessPhase::Pending, FileProcessPhase::Processing)
                | (FileProcessPhase::Processing, FileProcessPhase::Succeeded)
                | (FileProcessPhase::Processing, FileProcessPhase::Failed)
        )
    }
}

impl fmt::Display for FileProcessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            FileProcessPhase::Pending => "Pending",
            FileProcessPhase::Processing => "Processing",
            FileProcessPhase::Succeeded => "Succeeded",
            FileProcessPhase::Failed => "Failed",
            FileProcessPhase::Skipped => "Skipped",
        };
        f.write_str(phase)
    }
}

impl VersionedDataset {
    /// Namespace of the dataset, which doubles as the destination bucket
    #[must_use]
    pub fn dataset_namespace(&self) -> String {
        self.spec
            .dataset
            .namespace
            .clone()
            .or_else(|| self.namespace())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn dataset_name(&self) -> &str {
        &self.spec.dataset.name
    }

    #[must_use]
    pub fn files(&self) -> &[FileStatus] {
        self.status.as_ref().map_or(&[], |s| s.files.as_slice())
    }

    /// `metadata.resourceVersion`, the optimistic concurrency token
    #[must_use]
    pub fn version_token(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
