//! Scratch volume provisioning for snapshot jobs
//!
//! A job gets either a PersistentVolumeClaim named after the job or an
//! `emptyDir`, never both.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::{info, instrument};

use crate::error::{Error, Result};

/// Name of the scratch volume inside the job pod
pub const UTIL_VOLUME_NAME: &str = "util-volume";

/// Annotation carrying the storage class on created claims
pub const STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";

pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

/// Creation of PersistentVolumeClaims
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Create `claim`. Failures come back as [`Error::VolumeCreationFailed`]
    /// with the API error untouched, including name conflicts.
    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;
}

/// [`ClaimStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClaimStore {
    client: Client,
}

impl KubeClaimStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClaimStore for KubeClaimStore {
    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let name = claim.metadata.name.clone().unwrap_or_default();
        let namespace = claim
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), claim)
            .await
            .map_err(|source| Error::VolumeCreationFailed { name, source })
    }
}

pub struct VolumeProvisioner {
    claims: Arc<dyn ClaimStore>,
}

impl VolumeProvisioner {
    pub fn new(claims: Arc<dyn ClaimStore>) -> Self {
        Self { claims }
    }

    /// Produce the scratch volume for `job_name`.
    ///
    /// Without a claim spec an `emptyDir` is returned and nothing is called.
    /// With one, empty access modes are set to `ReadWriteOnce` on the passed
    /// spec itself, so callers keep using the normalized value, and a claim
    /// named `job_name` is created in `namespace`. Calling this twice for the
    /// same job fails with the API's naming conflict.
    #[instrument(skip(self, claim_spec))]
    pub async fn provision(
        &self,
        claim_spec: Option<&mut PersistentVolumeClaimSpec>,
        job_name: &str,
        namespace: &str,
    ) -> Result<Volume> {
        let Some(claim_spec) = claim_spec else {
            return Ok(ephemeral_volume());
        };
        let storage_class = prepare_claim_spec(claim_spec, job_name)?;

        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(job_name.to_string()),
                namespace: Some(namespace.to_string()),
                annotations: Some(BTreeMap::from([(
                    STORAGE_CLASS_ANNOTATION.to_string(),
                    storage_class,
                )])),
                ..Default::default()
            },
            spec: Some(claim_spec.clone()),
            status: None,
        };

        let created = self.claims.create_claim(&claim).await?;
        let claim_name = created
            .metadata
            .name
            .unwrap_or_else(|| job_name.to_string());
        info!("Created PVC {}/{} for snapshot job", namespace, claim_name);

        Ok(claim_volume(&claim_name))
    }

    /// The volume [`provision`](Self::provision) would return, without
    /// creating anything.
    ///
    /// The claim spec is normalized and checked the same way, so a plan that
    /// succeeds only fails to provision on the API call itself.
    pub fn plan(
        claim_spec: Option<&mut PersistentVolumeClaimSpec>,
        job_name: &str,
    ) -> Result<Volume> {
        match claim_spec {
            None => Ok(ephemeral_volume()),
            Some(claim_spec) => {
                prepare_claim_spec(claim_spec, job_name)?;
                Ok(claim_volume(job_name))
            }
        }
    }
}

/// Normalize `spec` and return its storage class
fn prepare_claim_spec(spec: &mut PersistentVolumeClaimSpec, job_name: &str) -> Result<String> {
    normalize_access_modes(spec);
    spec.storage_class_name
        .clone()
        .ok_or_else(|| Error::MissingField {
            field: "storageClassName".to_string(),
            context: format!("PersistentVolumeClaimSpec of job {job_name}"),
        })
}

/// Fill in the single-writer access mode when none is set
pub fn normalize_access_modes(spec: &mut PersistentVolumeClaimSpec) {
    if spec.access_modes.as_ref().map_or(true, |modes| modes.is_empty()) {
        spec.access_modes = Some(vec![DEFAULT_ACCESS_MODE.to_string()]);
        info!(
            "Using \"{}\" as AccessModes in {:?}",
            DEFAULT_ACCESS_MODE, spec
        );
    }
}

fn ephemeral_volume() -> Volume {
    Volume {
        name: UTIL_VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn claim_volume(claim_name: &str) -> Volume {
    Volume {
        name: UTIL_VOLUME_NAME.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }
}
