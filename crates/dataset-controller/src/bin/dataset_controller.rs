/*
 * 5D Labs Agent Platform - Versioned Dataset Controller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Dataset Controller Service - Kubernetes controller for `VersionedDataset` CRDs
//!
//! This service keeps dataset versions in object storage in sync by:
//! - Watching `VersionedDataset` custom resources
//! - Copying declared and inherited files into `dataset/<name>/<version>/`
//! - Removing files that are no longer declared, and all files on deletion
//! - Providing health endpoints

use anyhow::Context as _;
use axum::{response::Json, routing::get, Router};
use dataset_controller::resolver::KubeSourceResolver;
use dataset_controller::scheduler::Backends;
use dataset_controller::status::KubeStatusStore;
use dataset_controller::storage::S3ObjectStore;
use dataset_controller::tasks::config::{ControllerConfig, LogFormat, DEFAULT_CONFIG_PATH};
use dataset_controller::tasks::{run_dataset_controller, Context};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_controller_config();
    init_tracing(config.log_format);

    info!(
        "Starting 5D Labs Dataset Controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    config
        .validate()
        .context("invalid controller configuration")?;
    let config = Arc::new(config);

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let backends = Backends {
        object_store: Arc::new(S3ObjectStore::from_config(&config.storage)),
        status_store: Arc::new(KubeStatusStore::new(client.clone())),
        resolver: Arc::new(KubeSourceResolver::new(client.clone())),
    };
    let context = Arc::new(Context::new(backends, Arc::clone(&config)));

    let controller_handle = tokio::spawn(async move {
        if let Err(e) = run_dataset_controller(client, context).await {
            error!("Controller error: {}", e);
        }
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check));

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Dataset controller HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller_handle.abort();
    info!("Dataset controller stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,dataset_controller=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn load_controller_config() -> ControllerConfig {
    let override_path = std::env::var("CONTROLLER_CONFIG_PATH").ok();
    let config_path = override_path
        .as_deref()
        .filter(|path| Path::new(path).exists())
        .unwrap_or(DEFAULT_CONFIG_PATH);

    // Tracing is not initialised yet; report through stderr.
    match ControllerConfig::from_mounted_file(config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Failed to load configuration from {config_path}: {err}. Using defaults.");
            ControllerConfig::default()
        }
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "dataset-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check() -> Json<Value> {
    Json(json!({
        "status": "ready",
        "service": "dataset-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
