//! Declared-versus-observed diff of a `VersionedDataset` file set

use super::condition::syncing_condition;
use super::lineage_source_name;
use crate::crds::{
    FileDetail, FileProcessPhase, FileStatus, TypedObjectReference, VersionedDataset,
    VersionedDatasetStatus, KIND_DATASOURCE, KIND_VERSIONED_DATASET,
};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Result of [`reconcile`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffOutcome {
    /// A source or file appeared that status did not know about
    pub status_updated: bool,
    /// Status to persist: conditions plus the merged file tree, sorted by source
    pub target_status: VersionedDatasetStatus,
    /// Files present in the old status but no longer declared, grouped by source
    pub deleted_files: Vec<FileStatus>,
}

/// `(namespace, name)` identifying a source group
type SourceKey = (String, String);

/// Merges the declared topology (file groups plus `lineage_paths`, the parent
/// version's objects from [`super::list_lineage`]) with the status observed so
/// far. Known files keep their recorded state; new ones start `Processing`.
#[must_use]
pub fn reconcile(
    instance: &VersionedDataset,
    lineage_paths: &[String],
    deletion_requested: bool,
) -> DiffOutcome {
    let mut target_status = instance.status.clone().unwrap_or_default();

    if deletion_requested {
        let deleted_files = std::mem::take(&mut target_status.files);
        return DiffOutcome {
            status_updated: false,
            target_status,
            deleted_files,
        };
    }

    let namespace = instance.namespace().unwrap_or_default();
    let mut target = declared_groups(instance, &namespace);
    target.push(lineage_group(instance, &namespace, lineage_paths));

    let mut previous: BTreeMap<SourceKey, (TypedObjectReference, BTreeMap<String, FileDetail>)> =
        BTreeMap::new();
    for group in &target_status.files {
        let key = source_key(&group.source_ref, &namespace);
        let entry = previous
            .entry(key)
            .or_insert_with(|| (group.source_ref.clone(), BTreeMap::new()));
        for file in &group.files {
            entry.1.insert(file.path.clone(), file.clone());
        }
    }

    let mut status_updated = false;
    for group in &mut target {
        let key = source_key(&group.source_ref, &namespace);
        let Some((_, known)) = previous.get_mut(&key) else {
            debug!(source = %group.source_ref.name, "new source");
            status_updated = true;
            continue;
        };

        for file in &mut group.files {
            match known.remove(&file.path) {
                Some(existing) => *file = existing,
                None => {
                    debug!(source = %group.source_ref.name, path = %file.path, "new file");
                    status_updated = true;
                }
            }
        }
    }

    let mut deleted_files: Vec<FileStatus> = previous
        .into_values()
        .filter(|(_, files)| !files.is_empty())
        .map(|(source_ref, files)| FileStatus {
            source_ref,
            files: files.into_values().collect(),
        })
        .collect();
    sort_groups(&mut deleted_files, &namespace);
    sort_groups(&mut target, &namespace);

    if let Some(condition) = syncing_condition(&target_status.conditions) {
        target_status.set_condition(condition);
    }
    target_status.files = target;

    DiffOutcome {
        status_updated,
        target_status,
        deleted_files,
    }
}

fn source_key(source: &TypedObjectReference, default_namespace: &str) -> SourceKey {
    (
        source.namespace_or(default_namespace).to_string(),
        source.name.clone(),
    )
}

fn sort_groups(groups: &mut [FileStatus], default_namespace: &str) {
    groups.sort_by(|a, b| {
        a.source_ref.name.cmp(&b.source_ref.name).then_with(|| {
            a.source_ref
                .namespace_or(default_namespace)
                .cmp(b.source_ref.namespace_or(default_namespace))
        })
    });
}

/// `spec.fileGroups`, one group per `(namespace, name)`, paths deduplicated
fn declared_groups(instance: &VersionedDataset, namespace: &str) -> Vec<FileStatus> {
    let mut grouped: BTreeMap<SourceKey, BTreeSet<&str>> = BTreeMap::new();
    for group in &instance.spec.file_groups {
        grouped
            .entry(source_key(&group.source, namespace))
            .or_default()
            .extend(group.paths.iter().map(String::as_str));
    }

    grouped
        .into_iter()
        .map(|((source_namespace, name), paths)| FileStatus {
            source_ref: TypedObjectReference::new(
                KIND_DATASOURCE,
                &name,
                Some(source_namespace.as_str()),
            ),
            files: paths
                .into_iter()
                .map(|path| FileDetail::new(path, FileProcessPhase::Processing))
                .collect(),
        })
        .collect()
}

/// Pseudo-source for inherited files. Without a parent the group names the
/// instance's own version and carries no files.
fn lineage_group(
    instance: &VersionedDataset,
    namespace: &str,
    lineage_paths: &[String],
) -> FileStatus {
    let (version, files) = match instance.spec.inherited_from() {
        Some(parent) => {
            let paths: BTreeSet<&str> = lineage_paths.iter().map(String::as_str).collect();
            let files = paths
                .into_iter()
                .map(|path| FileDetail::new(path, FileProcessPhase::Processing))
                .collect();
            (parent, files)
        }
        None => (instance.spec.version.as_str(), Vec::new()),
    };

    FileStatus {
        source_ref: TypedObjectReference::new(
            KIND_VERSIONED_DATASET,
            &lineage_source_name(version),
            Some(namespace),
        ),
        files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::condition::{
        Condition, ConditionStatus, REASON_FILE_SYNCING, REASON_FILE_SYNC_FAILED,
        REASON_FILE_SYNC_SUCCESS,
    };
    use crate::crds::{FileGroup, VersionedDatasetSpec};

    fn instance(groups: &[(&str, &[&str])], inherited_from: Option<&str>) -> VersionedDataset {
        let mut vd = VersionedDataset::new(
            "ds-v2",
            VersionedDatasetSpec {
                dataset: TypedObjectReference::new("Dataset", "ds", None),
                version: "v2".to_string(),
                inherited_from: inherited_from.map(str::to_string),
                file_groups: groups
                    .iter()
                    .map(|(source, paths)| FileGroup {
                        source: TypedObjectReference::new(KIND_DATASOURCE, source, None),
                        paths: paths.iter().map(|p| (*p).to_string()).collect(),
                    })
                    .collect(),
                released: false,
            },
        );
        vd.metadata.namespace = Some("team-a".to_string());
        vd
    }

    fn mark_all(status: &mut VersionedDatasetStatus, phase: FileProcessPhase) {
        for group in &mut status.files {
            for file in &mut group.files {
                file.phase = phase;
            }
        }
    }

    fn paths(group: &FileStatus) -> Vec<&str> {
        group.files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn first_reconcile_marks_everything_processing() {
        let vd = instance(&[("x", &["b.txt", "a.txt", "a.txt"])], None);

        let outcome = reconcile(&vd, &[], false);

        assert!(outcome.status_updated);
        assert!(outcome.deleted_files.is_empty());
        let files = &outcome.target_status.files;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].source_ref.name, "inherited-from-v2");
        assert!(files[0].files.is_empty());
        assert_eq!(files[1].source_ref.name, "x");
        assert_eq!(files[1].source_ref.namespace.as_deref(), Some("team-a"));
        assert_eq!(paths(&files[1]), vec!["a.txt", "b.txt"]);
        assert!(files[1]
            .files
            .iter()
            .all(|f| f.phase == FileProcessPhase::Processing));
    }

    #[test]
    fn first_reconcile_sets_syncing_condition() {
        let vd = instance(&[("x", &["a.txt"])], None);

        let outcome = reconcile(&vd, &[], false);

        let ready = outcome.target_status.ready_condition().unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, REASON_FILE_SYNCING);
        assert_eq!(ready.message, "sync files.");
    }

    #[test]
    fn groups_sharing_a_source_are_merged() {
        let vd = instance(&[("x", &["b.txt"]), ("x", &["a.txt", "b.txt"])], None);

        let outcome = reconcile(&vd, &[], false);

        let x = &outcome.target_status.files[1];
        assert_eq!(paths(x), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn synced_status_is_idempotent() {
        let mut vd = instance(&[("x", &["a.txt", "b.txt"])], None);
        let mut status = reconcile(&vd, &[], false).target_status;
        mark_all(&mut status, FileProcessPhase::Succeeded);
        status.set_condition(Condition::ready(
            ConditionStatus::True,
            REASON_FILE_SYNC_SUCCESS,
            "",
        ));
        vd.status = Some(status.clone());

        let outcome = reconcile(&vd, &[], false);

        assert!(!outcome.status_updated);
        assert!(outcome.deleted_files.is_empty());
        assert_eq!(outcome.target_status, status);
    }

    #[test]
    fn detects_added_and_removed_files() {
        let mut vd = instance(&[("x", &["a.txt", "b.txt"])], None);
        let mut status = reconcile(&vd, &[], false).target_status;
        mark_all(&mut status, FileProcessPhase::Succeeded);
        vd.status = Some(status);
        vd.spec.file_groups[0].paths = vec!["b.txt".to_string(), "c.txt".to_string()];

        let outcome = reconcile(&vd, &[], false);

        assert!(outcome.status_updated);
        let x = &outcome.target_status.files[1];
        assert_eq!(paths(x), vec!["b.txt", "c.txt"]);
        assert_eq!(x.files[0].phase, FileProcessPhase::Succeeded);
        assert_eq!(x.files[1].phase, FileProcessPhase::Processing);

        assert_eq!(outcome.deleted_files.len(), 1);
        assert_eq!(outcome.deleted_files[0].source_ref.name, "x");
        assert_eq!(paths(&outcome.deleted_files[0]), vec!["a.txt"]);
    }

    #[test]
    fn removed_source_is_deleted_without_update() {
        let mut vd = instance(&[("x", &["a.txt"]), ("y", &["b.txt"])], None);
        let mut status = reconcile(&vd, &[], false).target_status;
        mark_all(&mut status, FileProcessPhase::Succeeded);
        vd.status = Some(status);
        vd.spec.file_groups.truncate(1);

        let outcome = reconcile(&vd, &[], false);

        assert!(!outcome.status_updated);
        assert_eq!(outcome.target_status.files.len(), 2);
        assert_eq!(outcome.deleted_files.len(), 1);
        assert_eq!(outcome.deleted_files[0].source_ref.name, "y");
        assert_eq!(
            outcome.deleted_files[0].source_ref.kind,
            KIND_DATASOURCE.to_string()
        );
    }

    #[test]
    fn failed_files_are_carried_forward() {
        let mut vd = instance(&[("x", &["a.txt"])], None);
        let mut status = reconcile(&vd, &[], false).target_status;
        status.files[1].files[0].phase = FileProcessPhase::Failed;
        status.files[1].files[0].err_message = "connection refused".to_string();
        status.set_condition(Condition::ready(
            ConditionStatus::False,
            REASON_FILE_SYNC_FAILED,
            "a.txt sync failed, connection refused",
        ));
        vd.status = Some(status);

        let outcome = reconcile(&vd, &[], false);

        assert!(!outcome.status_updated);
        let file = &outcome.target_status.files[1].files[0];
        assert_eq!(file.phase, FileProcessPhase::Failed);
        assert_eq!(file.err_message, "connection refused");
        let ready = outcome.target_status.ready_condition().unwrap();
        assert_eq!(ready.reason, REASON_FILE_SYNCING);
        assert_eq!(ready.message, "file synchronization failed, try again");
    }

    #[test]
    fn lineage_files_come_from_parent_listing() {
        let vd = instance(&[], Some("v1"));
        let lineage = vec!["b.txt".to_string(), "a.txt".to_string()];

        let outcome = reconcile(&vd, &lineage, false);

        assert!(outcome.status_updated);
        let files = &outcome.target_status.files;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].source_ref.name, "inherited-from-v1");
        assert_eq!(files[0].source_ref.kind, KIND_VERSIONED_DATASET);
        assert_eq!(paths(&files[0]), vec!["a.txt", "b.txt"]);
        assert!(files[0]
            .files
            .iter()
            .all(|f| f.phase == FileProcessPhase::Processing));
    }

    #[test]
    fn self_lineage_is_stable_after_first_reconcile() {
        let mut vd = instance(&[], None);
        let first = reconcile(&vd, &[], false);
        assert!(first.status_updated);
        vd.status = Some(first.target_status);

        let second = reconcile(&vd, &[], false);
        assert!(!second.status_updated);
        assert!(second.deleted_files.is_empty());
        assert_eq!(second.target_status.files[0].source_ref.name, "inherited-from-v2");
    }

    #[test]
    fn deletion_moves_every_group_to_deleted() {
        let mut vd = instance(&[("x", &["a.txt"]), ("y", &["b.txt"])], None);
        vd.status = Some(reconcile(&vd, &[], false).target_status);

        let outcome = reconcile(&vd, &[], true);

        assert!(!outcome.status_updated);
        assert!(outcome.target_status.files.is_empty());
        assert_eq!(outcome.deleted_files.len(), 3);
    }

    #[test]
    fn same_name_in_two_namespaces_stays_apart() {
        let mut vd = instance(&[("x", &["a.txt"])], None);
        vd.spec.file_groups.push(FileGroup {
            source: TypedObjectReference::new(KIND_DATASOURCE, "x", Some("shared")),
            paths: vec!["b.txt".to_string()],
        });

        let outcome = reconcile(&vd, &[], false);

        let files = &outcome.target_status.files;
        assert_eq!(files.len(), 3);
        assert_eq!(files[1].source_ref.namespace.as_deref(), Some("shared"));
        assert_eq!(paths(&files[1]), vec!["b.txt"]);
        assert_eq!(files[2].source_ref.namespace.as_deref(), Some("team-a"));
        assert_eq!(paths(&files[2]), vec!["a.txt"]);
    }
}
