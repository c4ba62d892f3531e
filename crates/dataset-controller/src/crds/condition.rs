//! Status conditions shared by the dataset resources

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition type reported once the file set of a version is usable
pub const TYPE_READY: &str = "Ready";

pub const REASON_FILE_SYNCING: &str = "FileSyncing";
pub const REASON_FILE_SYNC_SUCCESS: &str = "FileSyncSuccess";
pub const REASON_FILE_SYNC_FAILED: &str = "FileSyncFailed";

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => f.write_str("True"),
            ConditionStatus::False => f.write_str("False"),
            ConditionStatus::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Condition for a `VersionedDataset`
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition; at most one condition of each type is kept
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, or Unknown)
    pub status: ConditionStatus,

    /// Last time the condition transitioned (RFC3339 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Reason for the condition's last transition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message about the condition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Condition {
    #[must_use]
    pub fn ready(status: ConditionStatus, reason: &str, message: impl Into<String>) -> Self {
        Self {
            condition_type: TYPE_READY.to_string(),
            status,
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    /// Compares everything except the transition timestamp
    #[must_use]
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Replaces the condition of the same type, keeping the existing entry
/// untouched when it is equivalent. Returns whether anything changed.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions
        .iter_mut()
        .find(|existing| existing.condition_type == condition.condition_type)
    {
        Some(existing) if existing.equivalent(&condition) => false,
        Some(existing) => {
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}
