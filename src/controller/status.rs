//! Snapshot status updates

use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{info, instrument, warn};

use super::conditions::{
    set_condition, CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_TYPE_JOB_CREATED,
    CONDITION_TYPE_VALIDATED,
};
use crate::crd::{Snapshot, SnapshotPhase, SnapshotStatus};
use crate::error::{Error, Result};

pub const FIELD_MANAGER: &str = "pg-snapshot-operator";

/// Compute the status after moving to `phase`.
///
/// Returns `None` when the move is not a legal transition. Re-entering the
/// current phase is allowed and refreshes the reason.
pub fn next_status(
    current: Option<&SnapshotStatus>,
    phase: SnapshotPhase,
    reason: Option<&str>,
) -> Option<SnapshotStatus> {
    let mut status = current.cloned().unwrap_or_default();
    let from = status.phase;
    if from != phase && !from.can_transition_to(phase) {
        return None;
    }

    let now = Utc::now().to_rfc3339();
    let message = reason.unwrap_or_default();
    match phase {
        SnapshotPhase::Validated => set_condition(
            &mut status.conditions,
            CONDITION_TYPE_VALIDATED,
            CONDITION_STATUS_TRUE,
            "Valid",
            message,
        ),
        SnapshotPhase::Running => {
            status.start_time.get_or_insert(now.clone());
            set_condition(
                &mut status.conditions,
                CONDITION_TYPE_JOB_CREATED,
                CONDITION_STATUS_TRUE,
                "JobSubmitted",
                message,
            );
        }
        SnapshotPhase::Succeeded | SnapshotPhase::Failed => {
            status.completion_time.get_or_insert(now);
        }
        _ => {}
    }

    status.phase = phase;
    status.reason = reason.map(str::to_string);
    Some(status)
}

/// Compute the status of a Snapshot that failed admission checks.
///
/// Same as moving to `Failed`, plus a false `Validated` condition carrying
/// `reason`. Other failures leave that condition alone.
pub fn invalid_status(current: Option<&SnapshotStatus>, reason: &str) -> Option<SnapshotStatus> {
    let mut status = next_status(current, SnapshotPhase::Failed, Some(reason))?;
    set_condition(
        &mut status.conditions,
        CONDITION_TYPE_VALIDATED,
        CONDITION_STATUS_FALSE,
        "Invalid",
        reason,
    );
    Some(status)
}

/// Move a Snapshot to `phase` through the status subresource.
///
/// On success the new status is also stored in `snapshot`, so consecutive
/// calls chain. Returns `false` without patching when the transition is not
/// legal.
#[instrument(skip(client, snapshot), fields(name = %snapshot.name_any(), namespace = snapshot.namespace()))]
pub async fn patch_snapshot_status(
    client: &Client,
    snapshot: &mut Snapshot,
    phase: SnapshotPhase,
    reason: Option<&str>,
) -> Result<bool> {
    let status = next_status(snapshot.status.as_ref(), phase, reason);
    store_status(client, snapshot, phase, status).await
}

/// Mark a Snapshot `Failed` because it did not pass validation
#[instrument(skip(client, snapshot), fields(name = %snapshot.name_any(), namespace = snapshot.namespace()))]
pub async fn mark_invalid(client: &Client, snapshot: &mut Snapshot, reason: &str) -> Result<bool> {
    let status = invalid_status(snapshot.status.as_ref(), reason);
    store_status(client, snapshot, SnapshotPhase::Failed, status).await
}

async fn store_status(
    client: &Client,
    snapshot: &mut Snapshot,
    phase: SnapshotPhase,
    status: Option<SnapshotStatus>,
) -> Result<bool> {
    let Some(status) = status else {
        warn!(
            "Ignoring illegal phase transition {} -> {} for {}",
            snapshot.status.as_ref().map(|s| s.phase).unwrap_or_default(),
            phase,
            snapshot.name_any()
        );
        return Ok(false);
    };

    let namespace = snapshot.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Snapshot> = Api::namespaced(client.clone(), &namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &snapshot.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(Error::KubeError)?;

    snapshot.status = Some(status);
    info!("Snapshot {} is now {}", snapshot.name_any(), phase);
    Ok(true)
}
