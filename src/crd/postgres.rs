//! Postgres Custom Resource Definition
//!
//! Only the fields the snapshot path reads are modelled here; the Postgres
//! controller owns the rest of the object.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "pgops.io",
    version = "v1alpha1",
    kind = "Postgres",
    plural = "postgreses",
    namespaced,
    shortname = "pg",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresSpec {
    /// Engine version, also the tag stem of the backup-tool image (e.g. "10.2")
    pub version: String,

    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Secret with the `POSTGRES_PASSWORD` key; defaults to `<name>-auth`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_secret_name: Option<String>,
}

fn default_replicas() -> i32 {
    1
}

impl Postgres {
    pub fn database_secret_name(&self) -> String {
        self.spec
            .database_secret_name
            .clone()
            .unwrap_or_else(|| format!("{}-auth", self.name_any()))
    }
}
