//! Admission checks for Snapshot requests
//!
//! Rules run in a fixed order and stop at the first failure:
//! 1. `spec.databaseName` is set
//! 2. the Postgres exists
//! 3. the `<version>-util` backup image exists
//! 4. the storage destination is valid, depending on the snapshot type
//!
//! Nothing here is retried; backoff belongs to the caller.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::controller::catalog::{util_image_tag, ImageCatalog};
use crate::controller::database::DatabaseDirectory;
use crate::controller::storage::StorageSpecValidator;
use crate::crd::{Snapshot, SnapshotType};
use crate::error::{Error, Result};

pub struct SnapshotValidator {
    databases: Arc<dyn DatabaseDirectory>,
    images: Arc<dyn ImageCatalog>,
    storage: Arc<dyn StorageSpecValidator>,
    image_repository: String,
}

impl SnapshotValidator {
    pub fn new(
        databases: Arc<dyn DatabaseDirectory>,
        images: Arc<dyn ImageCatalog>,
        storage: Arc<dyn StorageSpecValidator>,
        image_repository: impl Into<String>,
    ) -> Self {
        Self {
            databases,
            images,
            storage,
            image_repository: image_repository.into(),
        }
    }

    #[instrument(skip(self, snapshot), fields(name = %snapshot.name_any(), namespace = snapshot.namespace()))]
    pub async fn validate(&self, snapshot: &Snapshot) -> Result<()> {
        let spec = &snapshot.spec;
        let namespace = snapshot.namespace().unwrap_or_else(|| "default".to_string());

        if spec.database_name.is_empty() {
            return Err(Error::MissingField {
                field: "DatabaseName".to_string(),
                context: format!("{spec:?}"),
            });
        }

        let postgres = self
            .databases
            .get_database(&namespace, &spec.database_name)
            .await?;

        let tag = util_image_tag(&postgres.spec.version);
        self.images
            .check_image_version(&self.image_repository, &tag)
            .await
            .map_err(|_| Error::ImageNotAvailable {
                image: self.image_repository.clone(),
                tag: tag.clone(),
            })?;

        match spec.snapshot_type {
            SnapshotType::DumpAll => {
                self.storage
                    .validate_storage_spec(spec.storage.as_ref(), &namespace)
                    .await?;
            }
            // A base backup only needs checking when it goes to an object store;
            // other destinations are accepted as they are.
            SnapshotType::BaseBackup => {
                if spec.storage.as_ref().is_some_and(|s| s.s3.is_some()) {
                    self.storage
                        .validate_storage_spec(spec.storage.as_ref(), &namespace)
                        .await?;
                } else {
                    debug!("Skipping storage validation for base backup without S3");
                }
            }
            SnapshotType::Unknown => {
                debug!("No storage rules for snapshot type {}", spec.snapshot_type);
            }
        }

        info!(
            "Snapshot {} is valid for Postgres {} ({})",
            snapshot.name_any(),
            spec.database_name,
            tag
        );
        Ok(())
    }
}
