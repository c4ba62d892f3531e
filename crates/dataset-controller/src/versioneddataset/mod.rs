//! File topology of a `VersionedDataset`: diffing the declared spec against
//! observed status, the per-file phase transition and the Ready condition.

use crate::crds::VersionedDataset;
use crate::storage::{dataset_prefix, ObjectStore, StorageError};
use tracing::debug;

pub mod condition;
pub mod diff;
pub mod transition;

pub use condition::{aggregate_condition, syncing_condition};
pub use diff::{reconcile, DiffOutcome};
pub use transition::{update_file_status, TransitionError};

/// Name prefix of the pseudo-source holding files inherited from a parent version
pub const INHERITED_FROM_PREFIX: &str = "inherited-from-";

/// Pseudo-source name for files inherited from `version`
#[must_use]
pub fn lineage_source_name(version: &str) -> String {
    format!("{INHERITED_FROM_PREFIX}{version}")
}

/// Parent version named by a lineage pseudo-source, `None` for regular sources
#[must_use]
pub fn lineage_parent(source_name: &str) -> Option<&str> {
    source_name.strip_prefix(INHERITED_FROM_PREFIX)
}

/// Paths (relative to the parent version prefix, sorted) of every object the
/// parent version holds. Empty when the instance inherits from nothing.
pub async fn list_lineage(
    store: &dyn ObjectStore,
    instance: &VersionedDataset,
) -> Result<Vec<String>, StorageError> {
    let Some(parent) = instance.spec.inherited_from() else {
        return Ok(Vec::new());
    };

    let bucket = instance.dataset_namespace();
    let prefix = dataset_prefix(instance.dataset_name(), parent);
    let objects = store.list_objects(&bucket, &prefix, true).await?;

    let mut paths: Vec<String> = objects
        .into_iter()
        .filter_map(|object| {
            object
                .key
                .strip_prefix(&prefix)
                .filter(|path| !path.is_empty())
                .map(str::to_string)
        })
        .collect();
    paths.sort();
    paths.dedup();

    debug!(bucket = %bucket, prefix = %prefix, count = paths.len(), "listed lineage objects");
    Ok(paths)
}
