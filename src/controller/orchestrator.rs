//! Snapshot lifecycle orchestration
//!
//! Composes validation, the snapshotter Job builder and the data wiper into
//! the operations a reconciliation loop calls. Each call runs once and returns;
//! there is no locking, so callers must not provision the same Snapshot twice
//! concurrently.

use std::sync::Arc;

use k8s_openapi::api::batch::v1::Job;
use kube::{Client, ResourceExt};
use tracing::{info, instrument};

use crate::config::OperatorConfig;
use crate::controller::catalog::RegistryImageCatalog;
use crate::controller::database::{DatabaseDirectory, KubeDatabaseDirectory};
use crate::controller::snapshotter_job::{KubeSnapshotterJobBuilder, SnapshotterJobBuilder};
use crate::controller::storage::KubeStorageValidator;
use crate::controller::validator::SnapshotValidator;
use crate::controller::volume::{KubeClaimStore, VolumeProvisioner};
use crate::controller::wipe::{DataWiper, KubeDataWiper};
use crate::crd::{Postgres, Snapshot};
use crate::error::Result;

pub struct SnapshotOrchestrator {
    validator: SnapshotValidator,
    databases: Arc<dyn DatabaseDirectory>,
    jobs: Arc<dyn SnapshotterJobBuilder>,
    wiper: Arc<dyn DataWiper>,
}

impl SnapshotOrchestrator {
    pub fn new(
        validator: SnapshotValidator,
        databases: Arc<dyn DatabaseDirectory>,
        jobs: Arc<dyn SnapshotterJobBuilder>,
        wiper: Arc<dyn DataWiper>,
    ) -> Self {
        Self {
            validator,
            databases,
            jobs,
            wiper,
        }
    }

    /// Wire every collaborator to the cluster behind `client`.
    ///
    /// The validator and the Job builder share one database directory, and the
    /// builder hands its Job name to the provisioner, so the scratch claim and
    /// the Job always carry the same name.
    pub fn for_cluster(client: Client, config: &OperatorConfig) -> Result<Self> {
        let databases: Arc<dyn DatabaseDirectory> =
            Arc::new(KubeDatabaseDirectory::new(client.clone()));
        let images = Arc::new(RegistryImageCatalog::new(config.registry_api.clone())?);
        let storage = Arc::new(KubeStorageValidator::new(
            client.clone(),
            config.probe_endpoints,
        )?);
        let provisioner = Arc::new(VolumeProvisioner::new(Arc::new(KubeClaimStore::new(
            client.clone(),
        ))));

        let validator = SnapshotValidator::new(
            databases.clone(),
            images,
            storage,
            config.image_repository.clone(),
        );
        let jobs = Arc::new(KubeSnapshotterJobBuilder::new(
            databases.clone(),
            provisioner,
            config.image_repository.clone(),
        ));
        let wiper = Arc::new(KubeDataWiper::new(client, config.wipe_image.clone()));

        Ok(Self::new(validator, databases, jobs, wiper))
    }

    pub async fn validate(&self, snapshot: &Snapshot) -> Result<()> {
        self.validator.validate(snapshot).await
    }

    /// Fetch the Postgres a snapshot refers to
    pub async fn resolve_database(&self, snapshot: &Snapshot) -> Result<Postgres> {
        let namespace = snapshot.namespace().unwrap_or_else(|| "default".to_string());
        self.databases
            .get_database(&namespace, &snapshot.spec.database_name)
            .await
    }

    /// Build the Job backing `snapshot`. Provisions its scratch claim.
    pub async fn ensure_backing_job(&self, snapshot: &Snapshot) -> Result<Job> {
        self.jobs.build_snapshotter_job(snapshot).await
    }

    /// Validate, then build the backing Job.
    ///
    /// Nothing is provisioned when validation fails.
    #[instrument(skip(self, snapshot), fields(name = %snapshot.name_any(), namespace = snapshot.namespace()))]
    pub async fn prepare_backing_job(&self, snapshot: &Snapshot) -> Result<Job> {
        self.validate(snapshot).await?;
        let job = self.ensure_backing_job(snapshot).await?;
        info!(
            "Prepared Job {} for snapshot {}",
            job.metadata.name.as_deref().unwrap_or_default(),
            snapshot.name_any()
        );
        Ok(job)
    }

    /// Validate, then render the backing Job without provisioning anything.
    ///
    /// A later [`prepare_backing_job`](Self::prepare_backing_job) for the same
    /// snapshot is unaffected.
    pub async fn preview_backing_job(&self, snapshot: &Snapshot) -> Result<Job> {
        self.validate(snapshot).await?;
        self.jobs.preview_snapshotter_job(snapshot).await
    }

    /// Remove the snapshot's artifacts and backing claim
    pub async fn wipe_data(&self, snapshot: &Snapshot) -> Result<()> {
        self.wiper.delete_snapshot_data(snapshot).await
    }
}
