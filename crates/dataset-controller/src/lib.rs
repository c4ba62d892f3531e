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

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Versioned dataset synchronization engine
//!
//! This crate keeps the objects of each `VersionedDataset` in an S3/MinIO
//! store in line with its declared file groups: it diffs spec against status,
//! copies or removes objects through a bounded worker pool and reports the
//! outcome through the resource's Ready condition.

pub mod crds;
pub mod resolver;
pub mod scheduler;
pub mod status;
pub mod storage;
pub mod tasks;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod versioneddataset;

// Re-export commonly used types
pub use crds::{
    Datasource, DatasourceSpec, VersionedDataset, VersionedDatasetSpec, VersionedDatasetStatus,
};
pub use scheduler::{Backends, RunOutcome, Scheduler};
pub use tasks::config::ControllerConfig;
