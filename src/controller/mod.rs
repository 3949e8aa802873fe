//! Snapshot lifecycle controller components
//!
//! Admission checks, scratch volume provisioning, Job rendering and data
//! wiping, plus the status and finalizer helpers a reconciliation loop uses
//! around them.

pub mod catalog;
pub mod conditions;
pub mod database;
pub mod finalizers;
pub mod orchestrator;
pub mod snapshotter_job;
pub mod status;
pub mod storage;
#[cfg(test)]
mod testing;
pub mod validator;
pub mod volume;
pub mod wipe;

pub use catalog::{util_image_tag, ImageCatalog, RegistryImageCatalog};
pub use database::{DatabaseDirectory, KubeDatabaseDirectory};
pub use finalizers::SNAPSHOT_FINALIZER;
pub use orchestrator::SnapshotOrchestrator;
pub use snapshotter_job::{
    find_job, snapshotter_job_name, submit_job, KubeSnapshotterJobBuilder,
    SnapshotterJobBuilder,
};
pub use status::{mark_invalid, patch_snapshot_status};
pub use storage::{KubeStorageValidator, StorageSpecValidator};
pub use validator::SnapshotValidator;
pub use volume::{ClaimStore, KubeClaimStore, VolumeProvisioner};
pub use wipe::{DataWiper, KubeDataWiper};
