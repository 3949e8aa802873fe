//! Shared types for the Snapshot and Postgres CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Directory every snapshot lands under inside its bucket
pub const SNAPSHOT_ROOT_DIR: &str = "pgops";

/// Where a snapshot's artifacts are written
///
/// Exactly one backend is expected to be set; the storage validator rejects
/// specs that set none or several.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStorageSpec {
    /// Secret holding the credentials of the remote backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_secret_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Spec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swift: Option<SwiftSpec>,
}

/// Node-local or volume-backed destination
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalSpec {
    /// Absolute path the volume is mounted at inside the job container
    pub mount_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,

    /// Existing PersistentVolumeClaim to write into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,

    /// Host directory to write into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<String>,
}

/// S3 or S3-compatible object store
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Spec {
    /// Custom endpoint (e.g., a MinIO service); AWS is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcsSpec {
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureSpec {
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwiftSpec {
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// The storage backend selected by a [`SnapshotStorageSpec`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
    Gcs,
    Azure,
    Swift,
}

impl StorageBackend {
    /// Provider name understood by the backup and wipe tooling
    pub fn provider(&self) -> &'static str {
        match self {
            StorageBackend::Local => "local",
            StorageBackend::S3 => "s3",
            StorageBackend::Gcs => "gcs",
            StorageBackend::Azure => "azure",
            StorageBackend::Swift => "swift",
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, StorageBackend::Local)
    }

    /// Keys the storage secret must carry for this backend
    pub fn required_secret_keys(&self) -> &'static [&'static str] {
        match self {
            StorageBackend::Local => &[],
            StorageBackend::S3 => &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"],
            StorageBackend::Gcs => &["GOOGLE_PROJECT_ID", "GOOGLE_SERVICE_ACCOUNT_JSON_KEY"],
            StorageBackend::Azure => &["AZURE_ACCOUNT_NAME", "AZURE_ACCOUNT_KEY"],
            StorageBackend::Swift => &["ST_AUTH", "ST_USER", "ST_KEY"],
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.provider())
    }
}

impl SnapshotStorageSpec {
    /// All backends that are set, in declaration order
    pub fn backends(&self) -> Vec<StorageBackend> {
        let mut backends = Vec::new();
        if self.local.is_some() {
            backends.push(StorageBackend::Local);
        }
        if self.s3.is_some() {
            backends.push(StorageBackend::S3);
        }
        if self.gcs.is_some() {
            backends.push(StorageBackend::Gcs);
        }
        if self.azure.is_some() {
            backends.push(StorageBackend::Azure);
        }
        if self.swift.is_some() {
            backends.push(StorageBackend::Swift);
        }
        backends
    }

    /// The first backend that is set
    pub fn backend(&self) -> Option<StorageBackend> {
        self.backends().into_iter().next()
    }

    /// Bucket (S3/GCS) or container (Azure/Swift) of the remote backend
    pub fn container(&self) -> Option<&str> {
        if let Some(s3) = &self.s3 {
            Some(&s3.bucket)
        } else if let Some(gcs) = &self.gcs {
            Some(&gcs.bucket)
        } else if let Some(azure) = &self.azure {
            Some(&azure.container)
        } else {
            self.swift.as_ref().map(|swift| swift.container.as_str())
        }
    }

    /// Key prefix configured on the remote backend
    pub fn prefix(&self) -> Option<&str> {
        let prefix = if let Some(s3) = &self.s3 {
            s3.prefix.as_deref()
        } else if let Some(gcs) = &self.gcs {
            gcs.prefix.as_deref()
        } else if let Some(azure) = &self.azure {
            azure.prefix.as_deref()
        } else {
            self.swift.as_ref().and_then(|swift| swift.prefix.as_deref())
        };
        prefix.filter(|p| !p.is_empty())
    }

    /// Folder holding one snapshot's artifacts:
    /// `<prefix>/pgops/<namespace>/<database>/<snapshot>`
    pub fn location(&self, namespace: &str, database: &str, snapshot: &str) -> String {
        let folder = format!("{SNAPSHOT_ROOT_DIR}/{namespace}/{database}/{snapshot}");
        match self.prefix() {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), folder),
            None => folder,
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Validated", "JobCreated")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
