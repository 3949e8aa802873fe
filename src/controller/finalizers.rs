//! Finalizer handling for Snapshot cleanup
//!
//! The finalizer keeps a deleted Snapshot around until its data has been
//! wiped:
//! 1. The snapshotter Job and its scratch claim are deleted
//! 2. Uploaded artifacts are removed by a wipe Job
//! 3. The finalizer is dropped and Kubernetes completes the deletion

use kube::{
    api::{Api, Patch, PatchParams},
    Client, ResourceExt,
};
use serde_json::json;
use tracing::info;

use super::status::FIELD_MANAGER;
use crate::crd::Snapshot;
use crate::error::Result;

/// Finalizer name used to protect Snapshot resources
pub const SNAPSHOT_FINALIZER: &str = "snapshot.pgops.io/wipe";

fn finalizer_patch(finalizers: Vec<String>) -> serde_json::Value {
    json!({
        "metadata": {
            "finalizers": finalizers
        }
    })
}

/// Add the finalizer to a Snapshot if not present
pub async fn add_finalizer(client: &Client, snapshot: &Snapshot) -> Result<()> {
    if has_finalizer(snapshot) {
        return Ok(());
    }
    let namespace = snapshot.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Snapshot> = Api::namespaced(client.clone(), &namespace);

    let mut finalizers: Vec<String> = snapshot.finalizers().to_vec();
    finalizers.push(SNAPSHOT_FINALIZER.to_string());

    api.patch(
        &snapshot.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&finalizer_patch(finalizers)),
    )
    .await?;
    info!("Added finalizer to Snapshot: {}", snapshot.name_any());
    Ok(())
}

/// Remove the finalizer once the snapshot's data is gone
pub async fn remove_finalizer(client: &Client, snapshot: &Snapshot) -> Result<()> {
    if !has_finalizer(snapshot) {
        return Ok(());
    }
    let namespace = snapshot.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Snapshot> = Api::namespaced(client.clone(), &namespace);

    let finalizers: Vec<String> = snapshot
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != SNAPSHOT_FINALIZER)
        .cloned()
        .collect();

    api.patch(
        &snapshot.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&finalizer_patch(finalizers)),
    )
    .await?;

    info!("Removed finalizer from Snapshot: {}", snapshot.name_any());
    Ok(())
}

/// A deletion timestamp means deletion was requested and is waiting on finalizers
pub fn is_being_deleted(snapshot: &Snapshot) -> bool {
    snapshot.metadata.deletion_timestamp.is_some()
}

pub fn has_finalizer(snapshot: &Snapshot) -> bool {
    snapshot.finalizers().iter().any(|f| f == SNAPSHOT_FINALIZER)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use super::*;
    use crate::controller::testing::snapshot;
    use crate::crd::SnapshotType;

    #[test]
    fn test_finalizer_name() {
        assert_eq!(SNAPSHOT_FINALIZER, "snapshot.pgops.io/wipe");
    }

    #[test]
    fn test_has_finalizer() {
        let mut snap = snapshot("nightly", "pg1", SnapshotType::DumpAll, None);
        assert!(!has_finalizer(&snap));

        snap.metadata.finalizers = Some(vec![
            "other.io/finalizer".to_string(),
            SNAPSHOT_FINALIZER.to_string(),
        ]);
        assert!(has_finalizer(&snap));
    }

    #[test]
    fn test_is_being_deleted() {
        let mut snap = snapshot("nightly", "pg1", SnapshotType::DumpAll, None);
        assert!(!is_being_deleted(&snap));

        snap.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(is_being_deleted(&snap));
    }

    #[test]
    fn test_finalizer_patch_shape() {
        let patch = finalizer_patch(vec![SNAPSHOT_FINALIZER.to_string()]);
        assert_eq!(patch["metadata"]["finalizers"][0], SNAPSHOT_FINALIZER);
    }
}
