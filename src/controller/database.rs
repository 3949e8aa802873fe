//! Lookup of the Postgres objects that snapshots point at

use async_trait::async_trait;
use kube::{api::Api, Client};
use tracing::{debug, instrument};

use crate::crd::Postgres;
use crate::error::{Error, Result};

/// Read-only directory of Postgres objects
#[async_trait]
pub trait DatabaseDirectory: Send + Sync {
    /// Fetch the Postgres `name` in `namespace`.
    ///
    /// Any failure, including not-found, is reported as
    /// [`Error::DatabaseLookupFailed`].
    async fn get_database(&self, namespace: &str, name: &str) -> Result<Postgres>;
}

/// [`DatabaseDirectory`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeDatabaseDirectory {
    client: Client,
}

impl KubeDatabaseDirectory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DatabaseDirectory for KubeDatabaseDirectory {
    #[instrument(skip(self))]
    async fn get_database(&self, namespace: &str, name: &str) -> Result<Postgres> {
        let api: Api<Postgres> = Api::namespaced(self.client.clone(), namespace);
        let postgres = api
            .get(name)
            .await
            .map_err(|source| Error::DatabaseLookupFailed {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            })?;
        debug!("Found Postgres {}/{} at version {}", namespace, name, postgres.spec.version);
        Ok(postgres)
    }
}
