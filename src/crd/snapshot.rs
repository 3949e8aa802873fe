//! Snapshot Custom Resource Definition
//!
//! A Snapshot asks for a backup of one Postgres object: either a logical
//! `pg_dumpall` export or a physical base backup.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, SnapshotStorageSpec};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "pgops.io",
    version = "v1alpha1",
    kind = "Snapshot",
    namespaced,
    status = "SnapshotStatus",
    shortname = "snap",
    printcolumn = r#"{"name":"Database","type":"string","jsonPath":".spec.databaseName"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSpec {
    /// Name of the Postgres object in the same namespace
    #[serde(default)]
    pub database_name: String,

    #[serde(rename = "type")]
    pub snapshot_type: SnapshotType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<SnapshotStorageSpec>,

    /// Scratch storage for the snapshot job; an emptyDir is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub pod_volume_claim_spec: Option<PersistentVolumeClaimSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
}

/// Kind of backup a Snapshot produces
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SnapshotType {
    /// Logical export of every database (`pg_dumpall`)
    #[serde(rename = "dumpall")]
    DumpAll,
    /// Physical file-level copy (`pg_basebackup`)
    #[serde(rename = "basebackup")]
    BaseBackup,
    /// Any type this operator does not know about
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotType::DumpAll => write!(f, "dumpall"),
            SnapshotType::BaseBackup => write!(f, "basebackup"),
            SnapshotType::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStatus {
    #[serde(default)]
    pub phase: SnapshotPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Logical lifecycle of a Snapshot
///
/// `Pending -> Validated -> Provisioning -> Running -> {Succeeded | Failed} -> Wiped`.
/// Validation and provisioning may also fail straight away.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SnapshotPhase {
    #[default]
    Pending,
    Validated,
    Provisioning,
    Running,
    Succeeded,
    Failed,
    Wiped,
}

impl SnapshotPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SnapshotPhase::Succeeded | SnapshotPhase::Failed | SnapshotPhase::Wiped
        )
    }

    /// Whether moving from `self` to `next` is a legal step
    pub fn can_transition_to(&self, next: SnapshotPhase) -> bool {
        use SnapshotPhase::*;
        matches!(
            (*self, next),
            (Pending, Validated)
                | (Pending, Failed)
                | (Validated, Provisioning)
                | (Validated, Failed)
                | (Provisioning, Running)
                | (Provisioning, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Succeeded, Wiped)
                | (Failed, Wiped)
        )
    }
}

impl std::fmt::Display for SnapshotPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
