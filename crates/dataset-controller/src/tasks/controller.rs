use crate::crds::{FileStatus, VersionedDataset, FINALIZER, LABEL_OWNER, LABEL_VERSION};
use crate::scheduler::Scheduler;
use crate::status::StoreError;
use crate::storage::{dataset_object_key, dataset_prefix};
use crate::tasks::types::{Context, Error, Result};
use crate::versioneddataset::{list_lineage, reconcile};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

#[instrument(skip_all, fields(name = %vd.name_any(), namespace = ?vd.namespace()))]
pub async fn reconcile_versioned_dataset(
    vd: Arc<VersionedDataset>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let namespace = vd.namespace().ok_or(Error::MissingObjectKey)?;
    let name = vd.name_any();
    let key = format!("{namespace}/{name}");
    debug!(version = %vd.spec.version, "reconciling VersionedDataset");

    if vd.is_deleting() {
        return finalize(&vd, &ctx, &key).await;
    }

    if let Some(updated) = with_labels_and_finalizer(&vd) {
        info!("adding labels and finalizer");
        match ctx.backends.status_store.update(&updated).await {
            // The write (or the one that beat us) triggers the next reconcile.
            Ok(_) | Err(StoreError::Conflict { .. } | StoreError::NotFound { .. }) => {
                return Ok(Action::await_change())
            }
            Err(err) => return Err(err.into()),
        }
    }

    let lineage = list_lineage(ctx.backends.object_store.as_ref(), &vd).await?;
    let outcome = reconcile(&vd, &lineage, false);
    let pool = ctx.config.scheduler.pool_config();

    if outcome.status_updated || !outcome.deleted_files.is_empty() {
        if !outcome.deleted_files.is_empty() {
            info!(
                groups = outcome.deleted_files.len(),
                "removing files that are no longer declared"
            );
            let remover = Scheduler::remove(
                &ctx.backends,
                pool,
                (*vd).clone(),
                outcome.deleted_files.clone(),
            );
            if let Err(err) = remover.start().await {
                warn!(error = %err, "failed to remove files, will retry");
                return Ok(Action::requeue(ctx.config.controller.requeue_after()));
            }
        }

        let token = vd.version_token().ok_or(Error::MissingObjectKey)?;
        match ctx
            .backends
            .status_store
            .patch_status(&namespace, &name, token, &outcome.target_status)
            .await
        {
            Ok(()) => info!("file status updated"),
            Err(StoreError::Conflict { .. }) => {
                info!("VersionedDataset changed before the status patch, waiting for the next event");
            }
            Err(StoreError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        return Ok(Action::await_change());
    }

    let mut instance = (*vd).clone();
    instance.status = Some(outcome.target_status);
    let scheduler = Scheduler::copy(&ctx.backends, pool, instance);
    let handle = ctx.register_run(&key, scheduler.cancellation_token());
    let run_id = handle.id;

    info!(run_id, "starting file sync");
    let span = info_span!("file_sync", key = %key, run_id);
    let run_ctx = Arc::clone(&ctx);
    tokio::spawn(
        async move {
            let _finished = handle.finished.drop_guard();
            match scheduler.start().await {
                Ok(outcome) => info!(?outcome, "file sync finished"),
                Err(err) => error!(error = %err, "file sync failed"),
            }
            run_ctx.finish_run(&key, run_id);
        }
        .instrument(span),
    );

    Ok(Action::await_change())
}

/// Error policy: requeue after the configured delay
pub fn error_policy(vd: Arc<VersionedDataset>, err: &Error, ctx: Arc<Context>) -> Action {
    error!(
        error = ?err,
        name = %vd.name_any(),
        "VersionedDataset reconciliation failed, requeueing"
    );
    Action::requeue(ctx.config.controller.requeue_after())
}

/// Copy of `vd` with the version/owner labels and the finalizer in place,
/// or `None` when nothing is missing
fn with_labels_and_finalizer(vd: &VersionedDataset) -> Option<VersionedDataset> {
    let mut updated = vd.clone();
    let mut changed = false;

    let labels = updated.labels_mut();
    for (label, value) in [
        (LABEL_VERSION, &vd.spec.version),
        (LABEL_OWNER, &vd.spec.dataset.name),
    ] {
        if labels.get(label) != Some(value) {
            labels.insert(label.to_string(), value.clone());
            changed = true;
        }
    }

    let finalizers = updated.finalizers_mut();
    if !finalizers.iter().any(|f| f == FINALIZER) {
        finalizers.push(FINALIZER.to_string());
        changed = true;
    }

    changed.then_some(updated)
}

/// Deletion: removes every object of the version, then the removal run
/// clears the finalizer
async fn finalize(vd: &VersionedDataset, ctx: &Context, key: &str) -> Result<Action> {
    if !vd.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(Action::await_change());
    }

    if let Some(run) = ctx.stop_run(key) {
        // In-flight copies still land in the version prefix.
        info!(run_id = run.id, "waiting for running file sync to stop");
        run.wait().await;
    }
    let outcome = reconcile(vd, &[], true);
    purge_untracked(vd, ctx, &outcome.deleted_files).await?;

    info!(
        groups = outcome.deleted_files.len(),
        "removing files of deleted VersionedDataset"
    );
    let remover = Scheduler::remove(
        &ctx.backends,
        ctx.config.scheduler.pool_config(),
        vd.clone(),
        outcome.deleted_files,
    );
    let run = remover.start().await?;
    info!(?run, "VersionedDataset cleanup finished");
    Ok(Action::await_change())
}

/// Removes objects under the version prefix that status does not track
async fn purge_untracked(
    vd: &VersionedDataset,
    ctx: &Context,
    tracked: &[FileStatus],
) -> Result<()> {
    let store = &ctx.backends.object_store;
    let bucket = vd.dataset_namespace();
    if !store.bucket_exists(&bucket).await? {
        return Ok(());
    }

    let tracked: BTreeSet<String> = tracked
        .iter()
        .flat_map(|group| group.files.iter())
        .map(|file| dataset_object_key(vd.dataset_name(), &vd.spec.version, &file.path))
        .collect();
    let prefix = dataset_prefix(vd.dataset_name(), &vd.spec.version);

    for object in store.list_objects(&bucket, &prefix, true).await? {
        if tracked.contains(&object.key) {
            continue;
        }
        debug!(bucket = %bucket, key = %object.key, "purging untracked object");
        store.remove_object(&bucket, &object.key).await?;
    }
    Ok(())
}
