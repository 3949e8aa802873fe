//! In-memory collaborators and fixtures for controller tests

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::error::ErrorResponse;

use crate::controller::catalog::ImageCatalog;
use crate::controller::database::DatabaseDirectory;
use crate::controller::storage::StorageSpecValidator;
use crate::controller::volume::ClaimStore;
use crate::controller::wipe::DataWiper;
use crate::crd::{
    Postgres, PostgresSpec, Snapshot, SnapshotSpec, SnapshotStorageSpec, SnapshotType,
};
use crate::error::{Error, Result};

pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} (test)"),
        reason: reason.to_string(),
        code,
    })
}

pub fn snapshot(
    name: &str,
    database: &str,
    snapshot_type: SnapshotType,
    storage: Option<SnapshotStorageSpec>,
) -> Snapshot {
    let mut snap = Snapshot::new(
        name,
        SnapshotSpec {
            database_name: database.to_string(),
            snapshot_type,
            storage,
            pod_volume_claim_spec: None,
            resources: None,
            node_selector: None,
        },
    );
    snap.metadata.namespace = Some("default".to_string());
    snap.metadata.uid = Some("snapshot-uid-1234".to_string());
    snap
}

pub fn postgres(name: &str, version: &str) -> Postgres {
    Postgres {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: PostgresSpec {
            version: version.to_string(),
            replicas: 1,
            database_secret_name: None,
        },
    }
}

#[derive(Default)]
pub struct FakeDatabases {
    databases: BTreeMap<(String, String), Postgres>,
    pub calls: AtomicUsize,
}

impl FakeDatabases {
    pub fn with(mut self, namespace: &str, db: Postgres) -> Self {
        let name = db.metadata.name.clone().unwrap_or_default();
        self.databases.insert((namespace.to_string(), name), db);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseDirectory for FakeDatabases {
    async fn get_database(&self, namespace: &str, name: &str) -> Result<Postgres> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.databases
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::DatabaseLookupFailed {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source: api_error(404, "NotFound"),
            })
    }
}

#[derive(Default)]
pub struct FakeImages {
    present: HashSet<String>,
    pub calls: AtomicUsize,
}

impl FakeImages {
    pub fn with(mut self, image: &str, tag: &str) -> Self {
        self.present.insert(format!("{image}:{tag}"));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageCatalog for FakeImages {
    async fn check_image_version(&self, image: &str, tag: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.present.contains(&format!("{image}:{tag}")) {
            Ok(())
        } else {
            Err(Error::ImageNotAvailable {
                image: image.to_string(),
                tag: tag.to_string(),
            })
        }
    }
}

/// Storage validator that accepts everything or rejects everything
#[derive(Default)]
pub struct FakeStorage {
    reject: bool,
    pub calls: AtomicUsize,
    pub saw_missing_spec: AtomicUsize,
}

impl FakeStorage {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageSpecValidator for FakeStorage {
    async fn validate_storage_spec(
        &self,
        spec: Option<&SnapshotStorageSpec>,
        _namespace: &str,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if spec.is_none() {
            self.saw_missing_spec.fetch_add(1, Ordering::SeqCst);
            return Err(Error::StorageValidationFailed(
                "no storage destination specified".to_string(),
            ));
        }
        if self.reject {
            Err(Error::StorageValidationFailed("rejected by test".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Claim store that enforces name uniqueness per namespace like the API server
#[derive(Default)]
pub struct FakeClaims {
    pub created: Mutex<Vec<PersistentVolumeClaim>>,
    pub calls: AtomicUsize,
}

impl FakeClaims {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<PersistentVolumeClaim> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClaimStore for FakeClaims {
    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut created = self.created.lock().unwrap();
        let exists = created.iter().any(|c| {
            c.metadata.name == claim.metadata.name
                && c.metadata.namespace == claim.metadata.namespace
        });
        if exists {
            return Err(Error::VolumeCreationFailed {
                name: claim.metadata.name.clone().unwrap_or_default(),
                source: api_error(409, "AlreadyExists"),
            });
        }
        created.push(claim.clone());
        Ok(claim.clone())
    }
}

#[derive(Default)]
pub struct FakeWiper {
    fail: bool,
    pub wiped: Mutex<Vec<String>>,
}

impl FakeWiper {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl DataWiper for FakeWiper {
    async fn delete_snapshot_data(&self, snapshot: &Snapshot) -> Result<()> {
        let name = snapshot.metadata.name.clone().unwrap_or_default();
        if self.fail {
            return Err(Error::WipeFailed {
                snapshot: name,
                source: Box::new(Error::KubeError(api_error(500, "InternalError"))),
            });
        }
        self.wiped.lock().unwrap().push(name);
        Ok(())
    }
}
