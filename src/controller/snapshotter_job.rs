//! Snapshotter Job rendering
//!
//! Builds the one-shot batch Job that runs the backup tool against a Postgres.
//!
//! ## Job layout
//! 1. A single `backup` container runs `<repository>:<version>-util`.
//! 2. The scratch volume from [`VolumeProvisioner`] is mounted at `/var/data`.
//!    Its claim, if any, carries the same name as the Job.
//! 3. The database password comes from the Postgres auth Secret; object-store
//!    credentials come from the storage Secret via `envFrom`.
//! 4. `local` destinations are mounted at their `mountPath` on top of that.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvFromSource, EnvVar, EnvVarSource, HostPathVolumeSource,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, SecretEnvSource,
    SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::controller::catalog::util_image_tag;
use crate::controller::database::DatabaseDirectory;
use crate::controller::volume::{VolumeProvisioner, UTIL_VOLUME_NAME};
use crate::crd::{LocalSpec, Postgres, Snapshot, SnapshotStorageSpec};
use crate::error::{is_not_found, Error, Result};

const JOB_NAME_PREFIX: &str = "pgops";

// Leaves room for the "-wipe" suffix within the 63-char name limit.
const MAX_SNAPSHOT_NAME_IN_JOB: usize = 52;

// Hex digits of the name digest kept on truncated names.
const NAME_DIGEST_LEN: usize = 8;

/// Mount path of the scratch volume
pub const DATA_MOUNT_PATH: &str = "/var/data";

pub const LOCAL_VOLUME_NAME: &str = "local-storage";

pub const LABEL_DATABASE: &str = "pgops.io/database";
pub const LABEL_JOB_TYPE: &str = "pgops.io/job-type";
pub const JOB_TYPE_BACKUP: &str = "backup";

const PASSWORD_KEY: &str = "POSTGRES_PASSWORD";

/// Renders the batch Job backing a Snapshot
#[async_trait]
pub trait SnapshotterJobBuilder: Send + Sync {
    /// Render the Job and create whatever it mounts
    async fn build_snapshotter_job(&self, snapshot: &Snapshot) -> Result<Job>;

    /// Render the Job exactly as [`build_snapshotter_job`] would, creating
    /// nothing
    ///
    /// [`build_snapshotter_job`]: SnapshotterJobBuilder::build_snapshotter_job
    async fn preview_snapshotter_job(&self, snapshot: &Snapshot) -> Result<Job>;
}

/// Name shared by a snapshot's Job and its scratch claim.
///
/// Long snapshot names are cut and suffixed with a digest of the full name,
/// so two snapshots never share a Job or a claim.
pub fn snapshotter_job_name(snapshot: &Snapshot) -> String {
    let name = snapshot.name_any();
    if name.len() <= MAX_SNAPSHOT_NAME_IN_JOB {
        return format!("{JOB_NAME_PREFIX}-{name}");
    }

    let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
    let keep = MAX_SNAPSHOT_NAME_IN_JOB - NAME_DIGEST_LEN - 1;
    let head = name[..keep].trim_end_matches('-');
    format!("{JOB_NAME_PREFIX}-{head}-{}", &digest[..NAME_DIGEST_LEN])
}

/// Labels put on every object created for a snapshot
pub fn standard_labels(snapshot: &Snapshot) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        "postgres-snapshot".to_string(),
    );
    labels.insert("app.kubernetes.io/instance".to_string(), snapshot.name_any());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "pg-snapshot-operator".to_string(),
    );
    labels.insert(
        LABEL_DATABASE.to_string(),
        snapshot.spec.database_name.clone(),
    );
    labels
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(snapshot: &Snapshot) -> OwnerReference {
    OwnerReference {
        api_version: Snapshot::api_version(&()).to_string(),
        kind: Snapshot::kind(&()).to_string(),
        name: snapshot.name_any(),
        uid: snapshot.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Volume for a `local` storage destination
pub fn local_volume(local: &LocalSpec) -> Volume {
    Volume {
        name: LOCAL_VOLUME_NAME.to_string(),
        persistent_volume_claim: local.claim_name.as_ref().map(|claim_name| {
            PersistentVolumeClaimVolumeSource {
                claim_name: claim_name.clone(),
                read_only: None,
            }
        }),
        host_path: local.host_path.as_ref().map(|path| HostPathVolumeSource {
            path: path.clone(),
            type_: Some("DirectoryOrCreate".to_string()),
        }),
        ..Default::default()
    }
}

pub fn local_volume_mount(local: &LocalSpec) -> VolumeMount {
    VolumeMount {
        name: LOCAL_VOLUME_NAME.to_string(),
        mount_path: local.mount_path.clone(),
        sub_path: local.sub_path.clone(),
        ..Default::default()
    }
}

/// `envFrom` entry exposing the storage Secret
pub fn storage_secret_env(storage: &SnapshotStorageSpec) -> Option<Vec<EnvFromSource>> {
    storage.storage_secret_name.as_ref().map(|name| {
        vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: Some(name.clone()),
                optional: Some(false),
            }),
            ..Default::default()
        }]
    })
}

/// Tool arguments describing where the artifacts go
fn storage_args(snapshot: &Snapshot, storage: &SnapshotStorageSpec) -> Result<Vec<String>> {
    let Some(backend) = storage.backend() else {
        return Ok(Vec::new());
    };
    let namespace = snapshot.namespace().unwrap_or_else(|| "default".to_string());
    let location = storage.location(
        &namespace,
        &snapshot.spec.database_name,
        &snapshot.name_any(),
    );

    if !backend.is_remote() {
        return Ok(vec![
            format!("--provider={backend}"),
            format!("--folder={location}"),
        ]);
    }

    let bucket = storage
        .container()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::JobBuildFailed(format!("{backend} storage has no bucket")))?;
    let mut args = vec![
        format!("--provider={backend}"),
        format!("--bucket={bucket}"),
        format!("--folder={location}"),
    ];
    if let Some(endpoint) = storage.s3.as_ref().and_then(|s3| s3.endpoint.as_ref()) {
        args.push(format!("--endpoint={endpoint}"));
    }
    Ok(args)
}

/// Render the snapshotter Job around an already provisioned scratch volume.
///
/// # Arguments
/// * `snapshot` – Snapshot resource (labels, owner reference, storage)
/// * `postgres` – the database being backed up
/// * `image_repository` – repository of the `<version>-util` image
/// * `job_name` – name shared with the scratch claim
/// * `util_volume` – volume returned by [`VolumeProvisioner::provision`]
pub fn render_snapshotter_job(
    snapshot: &Snapshot,
    postgres: &Postgres,
    image_repository: &str,
    job_name: &str,
    util_volume: Volume,
) -> Result<Job> {
    let namespace = snapshot.namespace().unwrap_or_else(|| "default".to_string());
    let image = format!(
        "{}:{}",
        image_repository,
        util_image_tag(&postgres.spec.version)
    );

    let mut args = vec![
        JOB_TYPE_BACKUP.to_string(),
        format!("--host={}", postgres.name_any()),
        format!("--snapshot={}", snapshot.name_any()),
        format!("--snapshot-type={}", snapshot.spec.snapshot_type),
        format!("--data-dir={DATA_MOUNT_PATH}"),
    ];

    let mut volume_mounts = vec![VolumeMount {
        name: UTIL_VOLUME_NAME.to_string(),
        mount_path: DATA_MOUNT_PATH.to_string(),
        ..Default::default()
    }];
    let mut volumes = vec![util_volume];
    let mut env_from = None;

    if let Some(storage) = &snapshot.spec.storage {
        args.extend(storage_args(snapshot, storage)?);
        env_from = storage_secret_env(storage);
        if let Some(local) = &storage.local {
            volume_mounts.push(local_volume_mount(local));
            volumes.push(local_volume(local));
        }
    }

    let container = Container {
        name: JOB_TYPE_BACKUP.to_string(),
        image: Some(image),
        args: Some(args),
        env: Some(vec![EnvVar {
            name: "PGPASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: Some(postgres.database_secret_name()),
                    key: PASSWORD_KEY.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        env_from,
        resources: snapshot.spec.resources.clone(),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    };

    let mut labels = standard_labels(snapshot);
    labels.insert(LABEL_JOB_TYPE.to_string(), JOB_TYPE_BACKUP.to_string());

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(snapshot)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(3),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![container],
                    volumes: Some(volumes),
                    node_selector: snapshot.spec.node_selector.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

/// [`SnapshotterJobBuilder`] that resolves the Postgres and provisions the
/// scratch volume before rendering
pub struct KubeSnapshotterJobBuilder {
    databases: Arc<dyn DatabaseDirectory>,
    provisioner: Arc<VolumeProvisioner>,
    image_repository: String,
}

impl KubeSnapshotterJobBuilder {
    pub fn new(
        databases: Arc<dyn DatabaseDirectory>,
        provisioner: Arc<VolumeProvisioner>,
        image_repository: impl Into<String>,
    ) -> Self {
        Self {
            databases,
            provisioner,
            image_repository: image_repository.into(),
        }
    }
}

#[async_trait]
impl SnapshotterJobBuilder for KubeSnapshotterJobBuilder {
    #[instrument(skip(self, snapshot), fields(name = %snapshot.name_any(), namespace = snapshot.namespace()))]
    async fn build_snapshotter_job(&self, snapshot: &Snapshot) -> Result<Job> {
        let namespace = snapshot.namespace().unwrap_or_else(|| "default".to_string());
        let postgres = self
            .databases
            .get_database(&namespace, &snapshot.spec.database_name)
            .await?;

        let job_name = snapshotter_job_name(snapshot);
        let mut claim_spec = snapshot.spec.pod_volume_claim_spec.clone();

        // Template errors must surface while no claim exists yet.
        let planned = VolumeProvisioner::plan(claim_spec.as_mut(), &job_name)?;
        render_snapshotter_job(snapshot, &postgres, &self.image_repository, &job_name, planned)?;

        let util_volume = self
            .provisioner
            .provision(claim_spec.as_mut(), &job_name, &namespace)
            .await?;

        let job = render_snapshotter_job(
            snapshot,
            &postgres,
            &self.image_repository,
            &job_name,
            util_volume,
        )?;
        debug!("Rendered snapshotter Job {}", job_name);
        Ok(job)
    }

    #[instrument(skip(self, snapshot), fields(name = %snapshot.name_any(), namespace = snapshot.namespace()))]
    async fn preview_snapshotter_job(&self, snapshot: &Snapshot) -> Result<Job> {
        let namespace = snapshot.namespace().unwrap_or_else(|| "default".to_string());
        let postgres = self
            .databases
            .get_database(&namespace, &snapshot.spec.database_name)
            .await?;

        let job_name = snapshotter_job_name(snapshot);
        let mut claim_spec = snapshot.spec.pod_volume_claim_spec.clone();
        let planned = VolumeProvisioner::plan(claim_spec.as_mut(), &job_name)?;

        render_snapshotter_job(snapshot, &postgres, &self.image_repository, &job_name, planned)
    }
}

/// Fetch a snapshot's Job if it has already been submitted
pub async fn find_job(client: &Client, namespace: &str, job_name: &str) -> Result<Option<Job>> {
    let api: Api<Job> = Api::namespaced(client.clone(), namespace);
    match api.get(job_name).await {
        Ok(job) => Ok(Some(job)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Idempotently create a rendered Job.
///
/// If a Job with the same name already exists it is left unchanged.
/// Returns the Job name on success.
#[instrument(skip(client, job), fields(name = job.metadata.name.as_deref()))]
pub async fn submit_job(client: &Client, job: &Job) -> Result<String> {
    let namespace = job
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let job_name = job.metadata.name.clone().unwrap_or_default();
    if find_job(client, &namespace, &job_name).await?.is_some() {
        debug!("Job {} already exists, skipping", job_name);
        return Ok(job_name);
    }

    info!("Creating Job {}", job_name);
    let api: Api<Job> = Api::namespaced(client.clone(), &namespace);
    api.create(&PostParams::default(), job)
        .await
        .map_err(|e| Error::JobBuildFailed(format!("creating Job {job_name}: {e}")))?;
    Ok(job_name)
}
