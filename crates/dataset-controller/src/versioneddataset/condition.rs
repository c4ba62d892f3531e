//! Ready condition derived from the file tree

use crate::crds::condition::{
    Condition, ConditionStatus, REASON_FILE_SYNCING, REASON_FILE_SYNC_FAILED,
    REASON_FILE_SYNC_SUCCESS, TYPE_READY,
};
use crate::crds::{FileProcessPhase, FileStatus};

/// Condition to set while a sync is about to start: `None` when the current
/// Ready condition is already true, or when other conditions exist without a
/// Ready one.
#[must_use]
pub fn syncing_condition(conditions: &[Condition]) -> Option<Condition> {
    if conditions.is_empty() {
        return Some(Condition::ready(
            ConditionStatus::False,
            REASON_FILE_SYNCING,
            "sync files.",
        ));
    }

    let ready = conditions
        .iter()
        .find(|c| c.condition_type == TYPE_READY)?;
    if ready.is_true() {
        return None;
    }
    Some(Condition::ready(
        ConditionStatus::False,
        REASON_FILE_SYNCING,
        "file synchronization failed, try again",
    ))
}

/// Ready condition summarising `files`.
///
/// The first failed file in stored order is reported, so the message is
/// deterministic for a given tree.
#[must_use]
pub fn aggregate_condition(files: &[FileStatus]) -> Condition {
    let mut all_done = true;
    for file in files.iter().flat_map(|group| group.files.iter()) {
        match file.phase {
            FileProcessPhase::Failed => {
                return Condition::ready(
                    ConditionStatus::False,
                    REASON_FILE_SYNC_FAILED,
                    format!("{} sync failed, {}", file.path, file.err_message),
                );
            }
            FileProcessPhase::Succeeded | FileProcessPhase::Skipped => {}
            FileProcessPhase::Pending | FileProcessPhase::Processing => all_done = false,
        }
    }

    if all_done {
        Condition::ready(ConditionStatus::True, REASON_FILE_SYNC_SUCCESS, "")
    } else {
        Condition::ready(ConditionStatus::False, REASON_FILE_SYNCING, "sync files.")
    }
}
