//! Error types for snapshot lifecycle operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A required spec field was empty or absent
    #[error("object '{field}' is missing in '{context}'")]
    MissingField { field: String, context: String },

    /// The referenced Postgres could not be fetched
    #[error("failed to get Postgres {namespace}/{name}: {source}")]
    DatabaseLookupFailed {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// The backup-tool image is not present in the image catalog
    #[error("image {image}:{tag} not found")]
    ImageNotAvailable { image: String, tag: String },

    #[error("invalid snapshot storage: {0}")]
    StorageValidationFailed(String),

    /// Creating the PersistentVolumeClaim for a snapshot job failed
    #[error("failed to create PersistentVolumeClaim {name}: {source}")]
    VolumeCreationFailed {
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to build snapshotter job: {0}")]
    JobBuildFailed(String),

    /// Removing the data of a snapshot failed
    #[error("failed to wipe data of snapshot {snapshot}: {source}")]
    WipeFailed {
        snapshot: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_yaml::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl Error {
    /// Whether a caller's backoff loop should try the operation again.
    ///
    /// Transient API and network failures are retriable; spec problems are not
    /// going to fix themselves.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::DatabaseLookupFailed { source, .. } => !is_not_found(source),
            Error::VolumeCreationFailed { source, .. } => !is_conflict(source),
            Error::WipeFailed { source, .. } => source.is_retriable(),
            Error::KubeError(e) => !is_not_found(e),
            Error::HttpError(_) => true,
            Error::MissingField { .. }
            | Error::ImageNotAvailable { .. }
            | Error::StorageValidationFailed(_)
            | Error::JobBuildFailed(_)
            | Error::ConfigError(_)
            | Error::SerializationError(_) => false,
        }
    }
}

/// True when the API server answered 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

/// True when the API server answered 409
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409)
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
