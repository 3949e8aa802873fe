//! Removal of a snapshot's data
//!
//! Deleting a Snapshot removes, in order:
//! 1. the snapshotter Job (background propagation, so its pods go too)
//! 2. the scratch claim named after that Job
//! 3. the uploaded artifacts, through a one-shot wipe Job
//!
//! Objects that are already gone count as removed.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaim, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{info, instrument, warn};

use crate::controller::snapshotter_job::{
    local_volume, local_volume_mount, snapshotter_job_name, standard_labels,
    storage_secret_env, LABEL_JOB_TYPE,
};
use crate::crd::Snapshot;
use crate::error::{is_conflict, is_not_found, Error, Result};

/// Shell image used to clear `local` destinations
pub const LOCAL_WIPE_IMAGE: &str = "busybox:1.36";

const JOB_TYPE_WIPE: &str = "wipe";

// Wipe Jobs outlive their Snapshot, so they clean themselves up instead.
const WIPE_JOB_TTL_SECONDS: i32 = 600;

#[async_trait]
pub trait DataWiper: Send + Sync {
    /// Remove the snapshot's artifacts and its backing claim.
    ///
    /// Failures are [`Error::WipeFailed`].
    async fn delete_snapshot_data(&self, snapshot: &Snapshot) -> Result<()>;
}

pub fn wipe_job_name(snapshot: &Snapshot) -> String {
    format!("{}-wipe", snapshotter_job_name(snapshot))
}

/// Render the Job that deletes uploaded artifacts.
///
/// Returns `None` when the snapshot has no storage destination, i.e. its data
/// only ever lived on the scratch volume.
pub fn build_wipe_job(snapshot: &Snapshot, wipe_image: &str) -> Option<Job> {
    let storage = snapshot.spec.storage.as_ref()?;
    let backend = storage.backend()?;
    let namespace = snapshot.namespace().unwrap_or_else(|| "default".to_string());
    let location = storage.location(
        &namespace,
        &snapshot.spec.database_name,
        &snapshot.name_any(),
    );

    let (container, volumes) = match &storage.local {
        Some(local) => {
            let path = format!("{}/{}", local.mount_path.trim_end_matches('/'), location);
            let container = Container {
                name: JOB_TYPE_WIPE.to_string(),
                image: Some(LOCAL_WIPE_IMAGE.to_string()),
                command: Some(vec![
                    "rm".to_string(),
                    "-rf".to_string(),
                    "--".to_string(),
                    path,
                ]),
                volume_mounts: Some(vec![local_volume_mount(local)]),
                ..Default::default()
            };
            (container, Some(vec![local_volume(local)]))
        }
        None => {
            let mut args = vec![
                "rm".to_string(),
                "-r".to_string(),
                format!("--provider={backend}"),
                format!("--bucket={}", storage.container().unwrap_or_default()),
            ];
            if let Some(endpoint) = storage.s3.as_ref().and_then(|s3| s3.endpoint.as_ref()) {
                args.push(format!("--endpoint={endpoint}"));
            }
            args.push(location);
            let container = Container {
                name: JOB_TYPE_WIPE.to_string(),
                image: Some(wipe_image.to_string()),
                args: Some(args),
                env_from: storage_secret_env(storage),
                ..Default::default()
            };
            (container, None)
        }
    };

    let mut labels = standard_labels(snapshot);
    labels.insert(LABEL_JOB_TYPE.to_string(), JOB_TYPE_WIPE.to_string());

    Some(Job {
        metadata: ObjectMeta {
            name: Some(wipe_job_name(snapshot)),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(3),
            ttl_seconds_after_finished: Some(WIPE_JOB_TTL_SECONDS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![container],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

/// [`DataWiper`] that deletes cluster objects and launches a wipe Job
pub struct KubeDataWiper {
    client: Client,
    wipe_image: String,
}

impl KubeDataWiper {
    pub fn new(client: Client, wipe_image: impl Into<String>) -> Self {
        Self {
            client,
            wipe_image: wipe_image.into(),
        }
    }

    async fn wipe(&self, snapshot: &Snapshot) -> Result<()> {
        let namespace = snapshot.namespace().unwrap_or_else(|| "default".to_string());
        let job_name = snapshotter_job_name(snapshot);

        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &namespace);
        match jobs.delete(&job_name, &DeleteParams::background()).await {
            Ok(_) => info!("Deleted snapshotter Job {}", job_name),
            Err(e) if is_not_found(&e) => warn!("Job {} not found, already deleted", job_name),
            Err(e) => return Err(Error::KubeError(e)),
        }

        let claims: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &namespace);
        match claims.delete(&job_name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted PVC {}", job_name),
            Err(e) if is_not_found(&e) => warn!("PVC {} not found, already deleted", job_name),
            Err(e) => return Err(Error::KubeError(e)),
        }

        if let Some(wipe_job) = build_wipe_job(snapshot, &self.wipe_image) {
            let wipe_name = wipe_job.metadata.name.clone().unwrap_or_default();
            match jobs.create(&PostParams::default(), &wipe_job).await {
                Ok(_) => info!("Created wipe Job {}", wipe_name),
                Err(e) if is_conflict(&e) => warn!("Wipe Job {} already exists", wipe_name),
                Err(e) => return Err(Error::KubeError(e)),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl DataWiper for KubeDataWiper {
    #[instrument(skip(self, snapshot), fields(name = %snapshot.name_any(), namespace = snapshot.namespace()))]
    async fn delete_snapshot_data(&self, snapshot: &Snapshot) -> Result<()> {
        self.wipe(snapshot)
            .await
            .map_err(|source| Error::WipeFailed {
                snapshot: snapshot.name_any(),
                source: Box::new(source),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::snapshot;
    use crate::crd::{GcsSpec, LocalSpec, SnapshotStorageSpec, SnapshotType};

    #[test]
    fn test_no_storage_means_no_wipe_job() {
        let snap = snapshot("base", "pg1", SnapshotType::BaseBackup, None);
        assert!(build_wipe_job(&snap, "appscode/osm:0.9.1").is_none());
    }

    #[test]
    fn test_remote_wipe_job() {
        let storage = SnapshotStorageSpec {
            storage_secret_name: Some("gcs-creds".to_string()),
            gcs: Some(GcsSpec {
                bucket: "dumps".to_string(),
                prefix: None,
            }),
            ..Default::default()
        };
        let snap = snapshot("nightly", "pg1", SnapshotType::DumpAll, Some(storage));
        let job = build_wipe_job(&snap, "appscode/osm:0.9.1").unwrap();

        assert_eq!(job.metadata.name.as_deref(), Some("pgops-nightly-wipe"));
        assert!(job.metadata.owner_references.is_none());
        let pod = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let c = &pod.containers[0];
        assert_eq!(c.image.as_deref(), Some("appscode/osm:0.9.1"));
        assert_eq!(
            c.args.as_ref().unwrap(),
            &vec![
                "rm".to_string(),
                "-r".to_string(),
                "--provider=gcs".to_string(),
                "--bucket=dumps".to_string(),
                "pgops/default/pg1/nightly".to_string(),
            ]
        );
        assert_eq!(
            c.env_from.as_ref().unwrap()[0].secret_ref.as_ref().unwrap().name.as_deref(),
            Some("gcs-creds")
        );
    }

    #[test]
    fn test_local_wipe_job_mounts_destination() {
        let storage = SnapshotStorageSpec {
            local: Some(LocalSpec {
                mount_path: "/backup/".to_string(),
                host_path: Some("/mnt/backup".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let snap = snapshot("base", "pg1", SnapshotType::BaseBackup, Some(storage));
        let job = build_wipe_job(&snap, "appscode/osm:0.9.1").unwrap();

        let pod = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let c = &pod.containers[0];
        assert_eq!(c.image.as_deref(), Some(LOCAL_WIPE_IMAGE));
        assert_eq!(
            c.command.as_deref().unwrap(),
            ["rm", "-rf", "--", "/backup/pgops/default/pg1/base"]
        );
        assert!(c.args.is_none());
        assert_eq!(
            pod.volumes.as_ref().unwrap()[0]
                .host_path
                .as_ref()
                .unwrap()
                .path,
            "/mnt/backup"
        );
    }

    #[test]
    fn test_local_wipe_path_is_passed_as_one_argument() {
        let storage = SnapshotStorageSpec {
            local: Some(LocalSpec {
                mount_path: "/backup/x'; touch /pwned; echo '".to_string(),
                host_path: Some("/mnt/backup".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let snap = snapshot("base", "pg1", SnapshotType::BaseBackup, Some(storage));
        let job = build_wipe_job(&snap, "appscode/osm:0.9.1").unwrap();

        let pod = job.spec.unwrap().template.spec.unwrap();
        let command = pod.containers[0].command.clone().unwrap();
        assert_eq!(command.len(), 4);
        assert_eq!(&command[..3], ["rm", "-rf", "--"]);
        assert_eq!(
            command[3],
            "/backup/x'; touch /pwned; echo '/pgops/default/pg1/base"
        );
        assert!(!command.iter().any(|arg| arg == "sh" || arg == "-c"));
    }
}
