use crate::crds::VersionedDataset;
use futures::StreamExt;
use kube::runtime::controller::Controller;
use kube::runtime::watcher::Config;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{error, info, instrument, Instrument};

pub mod config;
pub mod controller;
pub mod types;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use controller::{error_policy, reconcile_versioned_dataset};
pub use types::{Context, Error, Result};

/// Main entry point for the VersionedDataset controller
#[instrument(skip_all, fields(namespace = ?context.config.controller.watch_namespace))]
pub async fn run_dataset_controller(client: Client, context: Arc<Context>) -> Result<()> {
    let datasets: Api<VersionedDataset> = match &context.config.controller.watch_namespace {
        Some(namespace) => {
            info!("Starting VersionedDataset controller in namespace: {}", namespace);
            Api::namespaced(client, namespace)
        }
        None => {
            info!("Starting VersionedDataset controller in all namespaces");
            Api::all(client)
        }
    };

    Controller::new(datasets, Config::default().any_semantic())
        .run(reconcile_versioned_dataset, error_policy, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("dataset_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok(resource) => {
                        info!(resource = ?resource, "VersionedDataset reconciliation successful");
                    }
                    Err(reconciliation_err) => {
                        error!(
                            error = ?reconciliation_err,
                            "VersionedDataset reconciliation error"
                        );
                    }
                }
            }
            .instrument(span)
        })
        .await;

    info!("VersionedDataset controller shutting down");
    Ok(())
}
