//! End-to-end sync scenarios driven through the reconcile loop with in-memory
//! object and status stores.

use async_trait::async_trait;
use dataset_controller::crds::condition::{
    REASON_FILE_SYNCING, REASON_FILE_SYNC_FAILED, REASON_FILE_SYNC_SUCCESS,
};
use dataset_controller::crds::{
    Condition, FileGroup, FileProcessPhase, FileStatus, TypedObjectReference, VersionedDataset,
    VersionedDatasetSpec, FINALIZER, KIND_DATASOURCE, LABEL_OWNER, LABEL_VERSION,
};
use dataset_controller::scheduler::{Backends, PoolConfig, RunOutcome, Scheduler};
use dataset_controller::status::StatusStore;
use dataset_controller::storage::{ObjectInfo, ObjectStore, Result as StorageResult};
use dataset_controller::tasks::{reconcile_versioned_dataset, Context, ControllerConfig};
use dataset_controller::testing::{
    MemoryObjectStore, MemoryStatusStore, StaticSourceResolver, StorageOp,
};
use dataset_controller::versioneddataset::reconcile;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;

const NAMESPACE: &str = "team-a";

struct Harness {
    objects: MemoryObjectStore,
    statuses: MemoryStatusStore,
    ctx: Arc<Context>,
}

impl Harness {
    fn new(objects: MemoryObjectStore) -> Self {
        let store = Arc::new(objects.clone());
        Self::with_store(objects, store)
    }

    /// `objects` is the state behind `store`, kept for assertions
    fn with_store(objects: MemoryObjectStore, store: Arc<dyn ObjectStore>) -> Self {
        let statuses = MemoryStatusStore::new();
        let backends = Backends {
            object_store: store,
            status_store: Arc::new(statuses.clone()),
            resolver: Arc::new(
                StaticSourceResolver::new()
                    .with_bucket("x", "raw-data")
                    .with_bucket("y", "raw-data"),
            ),
        };
        let mut config = ControllerConfig::default();
        config.storage.endpoint = "http://minio:9000".to_string();

        Self {
            objects,
            statuses,
            ctx: Arc::new(Context::new(backends, Arc::new(config))),
        }
    }

    fn get(&self, name: &str) -> Option<VersionedDataset> {
        self.statuses.document(NAMESPACE, name)
    }

    async fn wait_for_runs(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.ctx.running.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sync runs did not finish");
    }

    /// Reconciles the latest document once without waiting for spawned runs
    async fn reconcile_once(&self, name: &str) {
        let vd = self.get(name).expect("document exists");
        reconcile_versioned_dataset(Arc::new(vd), Arc::clone(&self.ctx))
            .await
            .expect("reconcile failed");
    }

    /// Reconciles the latest document until a round leaves it untouched
    async fn converge(&self, name: &str) {
        for _ in 0..10 {
            let Some(before) = self.get(name) else {
                return;
            };
            reconcile_versioned_dataset(Arc::new(before.clone()), Arc::clone(&self.ctx))
                .await
                .expect("reconcile failed");
            self.wait_for_runs().await;

            let after = self.get(name);
            if after.as_ref().and_then(|d| d.version_token()) == before.version_token() {
                return;
            }
        }
        panic!("{name} did not converge");
    }

    fn copies(&self) -> Vec<String> {
        self.objects
            .operations()
            .into_iter()
            .filter_map(|op| match op {
                StorageOp::Copy { dst_key, .. } => Some(dst_key),
                _ => None,
            })
            .collect()
    }

    fn removals(&self) -> Vec<String> {
        self.objects
            .operations()
            .into_iter()
            .filter_map(|op| match op {
                StorageOp::Remove { key, .. } => Some(key),
                _ => None,
            })
            .collect()
    }
}

/// [`ObjectStore`] whose copies take `delay` before reaching `inner`
struct SlowCopyStore {
    inner: MemoryObjectStore,
    delay: Duration,
}

#[async_trait]
impl ObjectStore for SlowCopyStore {
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        self.inner.bucket_exists(bucket).await
    }

    async fn make_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.inner.make_bucket(bucket).await
    }

    async fn copy_object(
        &self,
        dst_bucket: &str,
        dst_key: &str,
        src_bucket: &str,
        src_key: &str,
    ) -> StorageResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner
            .copy_object(dst_bucket, dst_key, src_bucket, src_key)
            .await
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.inner.remove_object(bucket, key).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> StorageResult<Vec<ObjectInfo>> {
        self.inner.list_objects(bucket, prefix, recursive).await
    }
}

fn versioned_dataset(
    version: &str,
    inherited_from: Option<&str>,
    paths: &[&str],
) -> VersionedDataset {
    if paths.is_empty() {
        versioned_dataset_from(version, inherited_from, &[])
    } else {
        versioned_dataset_from(version, inherited_from, &[("x", paths)])
    }
}

fn versioned_dataset_from(
    version: &str,
    inherited_from: Option<&str>,
    groups: &[(&str, &[&str])],
) -> VersionedDataset {
    let file_groups = groups
        .iter()
        .map(|(source, paths)| FileGroup {
            source: TypedObjectReference::new(KIND_DATASOURCE, source, None),
            paths: paths.iter().map(|p| (*p).to_string()).collect(),
        })
        .collect();
    let mut vd = VersionedDataset::new(
        &format!("ds-{version}"),
        VersionedDatasetSpec {
            dataset: TypedObjectReference::new("Dataset", "ds", None),
            version: version.to_string(),
            inherited_from: inherited_from.map(str::to_string),
            file_groups,
            released: false,
        },
    );
    vd.metadata.namespace = Some(NAMESPACE.to_string());
    vd
}

fn ready(vd: &VersionedDataset) -> Condition {
    vd.status
        .as_ref()
        .and_then(|s| s.ready_condition())
        .cloned()
        .expect("Ready condition")
}

fn group<'a>(vd: &'a VersionedDataset, source: &str) -> &'a FileStatus {
    vd.files()
        .iter()
        .find(|g| g.source_ref.name == source)
        .expect("source group")
}

fn phases(group: &FileStatus) -> Vec<(&str, FileProcessPhase)> {
    group
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.phase))
        .collect()
}

#[tokio::test]
async fn copies_declared_files_and_reports_ready() {
    let harness = Harness::new(
        MemoryObjectStore::new()
            .with_object("raw-data", "a.txt")
            .with_object("raw-data", "b.txt"),
    );
    harness
        .statuses
        .insert(versioned_dataset("v1", None, &["a.txt", "b.txt"]));

    harness.converge("ds-v1").await;

    let vd = harness.get("ds-v1").unwrap();
    assert_eq!(
        harness.objects.objects(NAMESPACE),
        vec!["dataset/ds/v1/a.txt", "dataset/ds/v1/b.txt"]
    );
    let condition = ready(&vd);
    assert!(condition.is_true());
    assert_eq!(condition.reason, REASON_FILE_SYNC_SUCCESS);

    let x = group(&vd, "x");
    assert_eq!(
        phases(x),
        vec![
            ("a.txt", FileProcessPhase::Succeeded),
            ("b.txt", FileProcessPhase::Succeeded)
        ]
    );
    assert!(x.files.iter().all(|f| f.last_update_time.is_some()));

    assert_eq!(vd.labels().get(LABEL_VERSION).map(String::as_str), Some("v1"));
    assert_eq!(vd.labels().get(LABEL_OWNER).map(String::as_str), Some("ds"));
    assert!(vd.finalizers().iter().any(|f| f == FINALIZER));
}

#[tokio::test]
async fn failed_copy_is_reported_with_its_path() {
    let harness = Harness::new(
        MemoryObjectStore::new()
            .with_object("raw-data", "a.txt")
            .with_object("raw-data", "b.txt")
            .fail_key("a.txt", "connection refused"),
    );
    harness
        .statuses
        .insert(versioned_dataset("v1", None, &["a.txt", "b.txt"]));

    harness.converge("ds-v1").await;

    let vd = harness.get("ds-v1").unwrap();
    let condition = ready(&vd);
    assert!(!condition.is_true());
    assert_eq!(condition.reason, REASON_FILE_SYNC_FAILED);
    assert!(condition.message.contains("a.txt"));
    assert!(condition.message.contains("connection refused"));

    let x = group(&vd, "x");
    assert_eq!(x.files[0].phase, FileProcessPhase::Failed);
    assert!(x.files[0].err_message.contains("connection refused"));
    assert_eq!(x.files[1].phase, FileProcessPhase::Succeeded);
    assert_eq!(harness.objects.objects(NAMESPACE), vec!["dataset/ds/v1/b.txt"]);
}

#[tokio::test]
async fn inherits_files_from_parent_version() {
    let harness = Harness::new(
        MemoryObjectStore::new()
            .with_object(NAMESPACE, "dataset/ds/v1/a.txt")
            .with_object(NAMESPACE, "dataset/ds/v1/nested/b.txt"),
    );
    harness
        .statuses
        .insert(versioned_dataset("v2", Some("v1"), &[]));

    harness.converge("ds-v2").await;

    let vd = harness.get("ds-v2").unwrap();
    let inherited = group(&vd, "inherited-from-v1");
    assert_eq!(
        phases(inherited),
        vec![
            ("a.txt", FileProcessPhase::Succeeded),
            ("nested/b.txt", FileProcessPhase::Succeeded)
        ]
    );
    assert!(ready(&vd).is_true());
    let objects = harness.objects.objects(NAMESPACE);
    assert!(objects.contains(&"dataset/ds/v2/a.txt".to_string()));
    assert!(objects.contains(&"dataset/ds/v2/nested/b.txt".to_string()));
}

#[tokio::test]
async fn version_without_parent_copies_nothing() {
    let harness = Harness::new(MemoryObjectStore::new());
    harness.statuses.insert(versioned_dataset("v1", None, &[]));

    harness.converge("ds-v1").await;

    let vd = harness.get("ds-v1").unwrap();
    assert!(harness.copies().is_empty());
    assert!(group(&vd, "inherited-from-v1").files.is_empty());
    assert!(ready(&vd).is_true());
}

#[tokio::test]
async fn directory_paths_are_never_copied() {
    let harness = Harness::new(MemoryObjectStore::new().with_object("raw-data", "a.txt"));
    harness
        .statuses
        .insert(versioned_dataset("v1", None, &["docs/", "a.txt"]));

    harness.converge("ds-v1").await;

    assert_eq!(harness.copies(), vec!["dataset/ds/v1/a.txt"]);
    let vd = harness.get("ds-v1").unwrap();
    let x = group(&vd, "x");
    assert_eq!(
        phases(x),
        vec![
            ("a.txt", FileProcessPhase::Succeeded),
            ("docs/", FileProcessPhase::Processing)
        ]
    );
    assert_eq!(ready(&vd).reason, REASON_FILE_SYNCING);
}

#[tokio::test]
async fn removing_a_declared_file_deletes_its_object() {
    let harness = Harness::new(
        MemoryObjectStore::new()
            .with_object("raw-data", "a.txt")
            .with_object("raw-data", "b.txt"),
    );
    harness
        .statuses
        .insert(versioned_dataset("v1", None, &["a.txt", "b.txt"]));
    harness.converge("ds-v1").await;

    let mut vd = harness.get("ds-v1").unwrap();
    vd.spec.file_groups[0].paths = vec!["b.txt".to_string()];
    harness.statuses.update(&vd).await.unwrap();
    harness.converge("ds-v1").await;

    let vd = harness.get("ds-v1").unwrap();
    assert_eq!(harness.removals(), vec!["dataset/ds/v1/a.txt"]);
    assert_eq!(harness.objects.objects(NAMESPACE), vec!["dataset/ds/v1/b.txt"]);
    assert_eq!(
        phases(group(&vd, "x")),
        vec![("b.txt", FileProcessPhase::Succeeded)]
    );
    assert!(ready(&vd).is_true());
}

#[tokio::test]
async fn deletion_removes_objects_and_clears_finalizer() {
    let harness = Harness::new(
        MemoryObjectStore::new()
            .with_object("raw-data", "a.txt")
            .with_object("raw-data", "b.txt"),
    );
    harness.statuses.insert(versioned_dataset_from(
        "v1",
        None,
        &[("x", &["a.txt"]), ("y", &["b.txt"])],
    ));
    harness.converge("ds-v1").await;

    let synced = harness.get("ds-v1").unwrap();
    assert!(synced.finalizers().iter().any(|f| f == FINALIZER));
    assert_eq!(group(&synced, "x").files[0].phase, FileProcessPhase::Succeeded);
    assert_eq!(group(&synced, "y").files[0].phase, FileProcessPhase::Succeeded);

    harness.statuses.mark_deleted(NAMESPACE, "ds-v1").unwrap();
    harness.converge("ds-v1").await;

    assert!(harness.get("ds-v1").is_none());
    assert!(harness.objects.objects(NAMESPACE).is_empty());
    let mut removals = harness.removals();
    removals.sort();
    assert_eq!(
        removals,
        vec!["dataset/ds/v1/a.txt", "dataset/ds/v1/b.txt"]
    );
}

#[tokio::test]
async fn deletion_waits_for_running_copies() {
    let objects = MemoryObjectStore::new().with_object("raw-data", "a.txt");
    let store = Arc::new(SlowCopyStore {
        inner: objects.clone(),
        delay: Duration::from_millis(200),
    });
    let harness = Harness::with_store(objects, store);
    harness
        .statuses
        .insert(versioned_dataset("v1", None, &["a.txt"]));

    // Labels and finalizer, then status, then the copy run.
    for _ in 0..3 {
        harness.reconcile_once("ds-v1").await;
    }
    assert_eq!(harness.ctx.running.len(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;

    harness.statuses.mark_deleted(NAMESPACE, "ds-v1").unwrap();
    harness.reconcile_once("ds-v1").await;
    harness.wait_for_runs().await;

    assert!(harness.get("ds-v1").is_none());
    assert!(harness.objects.objects(NAMESPACE).is_empty());
}

#[tokio::test]
async fn deletion_purges_untracked_objects() {
    let harness = Harness::new(
        MemoryObjectStore::new()
            .with_object("raw-data", "a.txt")
            .with_object(NAMESPACE, "dataset/ds/v1/stray.txt")
            .with_object(NAMESPACE, "dataset/ds/v10/keep.txt"),
    );
    harness
        .statuses
        .insert(versioned_dataset("v1", None, &["a.txt"]));
    harness.converge("ds-v1").await;

    harness.statuses.mark_deleted(NAMESPACE, "ds-v1").unwrap();
    harness.converge("ds-v1").await;

    assert!(harness.get("ds-v1").is_none());
    assert_eq!(
        harness.objects.objects(NAMESPACE),
        vec!["dataset/ds/v10/keep.txt"]
    );
}

#[tokio::test]
async fn synced_dataset_is_left_alone() {
    let harness = Harness::new(MemoryObjectStore::new().with_object("raw-data", "a.txt"));
    harness
        .statuses
        .insert(versioned_dataset("v1", None, &["a.txt"]));
    harness.converge("ds-v1").await;

    let patches = harness.statuses.patch_count();
    let updates = harness.statuses.update_count();
    let copies = harness.copies().len();
    let before = harness.get("ds-v1").unwrap();

    reconcile_versioned_dataset(Arc::new(before.clone()), Arc::clone(&harness.ctx))
        .await
        .unwrap();
    harness.wait_for_runs().await;

    assert_eq!(harness.statuses.patch_count(), patches);
    assert_eq!(harness.statuses.update_count(), updates);
    assert_eq!(harness.copies().len(), copies);
    assert_eq!(harness.get("ds-v1").unwrap(), before);
}

#[tokio::test]
async fn bucket_failure_leaves_status_untouched() {
    let harness = Harness::new(
        MemoryObjectStore::new()
            .with_object("raw-data", "a.txt")
            .fail_bucket(NAMESPACE, "access denied"),
    );
    harness
        .statuses
        .insert(versioned_dataset("v1", None, &["a.txt"]));

    harness.converge("ds-v1").await;

    let vd = harness.get("ds-v1").unwrap();
    let condition = ready(&vd);
    assert_eq!(condition.reason, REASON_FILE_SYNCING);
    assert_eq!(condition.message, "sync files.");
    assert_eq!(
        phases(group(&vd, "x")),
        vec![("a.txt", FileProcessPhase::Processing)]
    );
    assert_eq!(harness.statuses.patch_count(), 1);
    assert!(harness.copies().is_empty());
}

#[tokio::test]
async fn concurrent_spec_change_discards_run() {
    let harness = Harness::new(MemoryObjectStore::new().with_object("raw-data", "a.txt"));
    let mut vd = versioned_dataset("v1", None, &["a.txt"]);
    vd.status = Some(reconcile(&vd, &[], false).target_status);
    let stored = harness.statuses.insert(vd);

    let scheduler = Scheduler::copy(&harness.ctx.backends, PoolConfig::default(), stored);
    harness.statuses.bump(NAMESPACE, "ds-v1");
    let outcome = scheduler.start().await.unwrap();

    assert_eq!(outcome, RunOutcome::Superseded);
    assert_eq!(harness.statuses.patch_count(), 0);
    let vd = harness.get("ds-v1").unwrap();
    assert_eq!(
        phases(group(&vd, "x")),
        vec![("a.txt", FileProcessPhase::Processing)]
    );
}
