pub mod condition;
pub mod datasource;
pub mod versioneddataset;

pub use condition::*;
pub use datasource::*;
pub use versioneddataset::*;

/// Finalizer guarding object removal when a `VersionedDataset` is deleted
pub const FINALIZER: &str = "arcadia.kubeagi.k8s.com.cn/finalizer";

/// Label carrying `spec.version`
pub const LABEL_VERSION: &str = "arcadia.kubeagi.k8s.com.cn/version";

/// Label carrying the owning dataset name
pub const LABEL_OWNER: &str = "arcadia.kubeagi.k8s.com.cn/owner";
