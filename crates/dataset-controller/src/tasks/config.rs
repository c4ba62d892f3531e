//! Dataset Controller Configuration
//!
//! Loaded from the mounted ConfigMap file; every field has a default so a
//! partial file (or no file at all) still yields a usable configuration.

use crate::scheduler::{PoolConfig, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_WORKERS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Path of the mounted configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

/// Main controller configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Worker pool sizing
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Object storage connection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Reconcile loop settings
    #[serde(default)]
    pub controller: ControllerSettings,

    /// Health endpoint settings
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub log_format: LogFormat,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Capacity of the job queue between the generator and the workers
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_workers: self.max_workers,
            buffer_size: self.buffer_size,
        }
    }
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

/// S3/MinIO connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Endpoint URL, e.g. `http://minio.kubeagi-system:9000`
    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// MinIO requires path-style addressing
    #[serde(default = "default_force_path_style")]
    pub force_path_style: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            force_path_style: default_force_path_style(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_force_path_style() -> bool {
    true
}

/// Reconcile loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSettings {
    /// Delay before retrying a failed reconcile
    #[serde(default = "default_requeue_after_seconds")]
    pub requeue_after_seconds: u64,

    /// Restrict the watch to one namespace; all namespaces when unset
    #[serde(default)]
    pub watch_namespace: Option<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            requeue_after_seconds: default_requeue_after_seconds(),
            watch_namespace: None,
        }
    }
}

impl ControllerSettings {
    #[must_use]
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_seconds)
    }
}

fn default_requeue_after_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ControllerConfig {
    /// Validate that configuration has required fields
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.scheduler.max_workers == 0 {
            return Err(anyhow::anyhow!("scheduler.maxWorkers must be at least 1"));
        }
        if self.scheduler.buffer_size == 0 {
            return Err(anyhow::anyhow!("scheduler.bufferSize must be at least 1"));
        }
        if self.storage.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "storage.endpoint is not configured. Provide the S3/MinIO endpoint URL."
            ));
        }
        if self.storage.access_key_id.is_some() != self.storage.secret_access_key.is_some() {
            return Err(anyhow::anyhow!(
                "storage.accessKeyId and storage.secretAccessKey must be set together"
            ));
        }
        Ok(())
    }

    /// Load configuration from mounted ConfigMap file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let config: ControllerConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;

        Ok(config)
    }
}
