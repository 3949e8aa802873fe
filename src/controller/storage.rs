//! Validation of snapshot storage destinations
//!
//! Checks run cheapest first: the shape of the spec, then the credential
//! Secret, then (optionally) reachability of a custom S3 endpoint.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{api::Api, Client};
use tracing::{debug, instrument};

use crate::crd::{SnapshotStorageSpec, StorageBackend};
use crate::error::{is_not_found, Error, Result};

#[async_trait]
pub trait StorageSpecValidator: Send + Sync {
    /// Check a storage destination for a snapshot in `namespace`.
    ///
    /// A missing spec is rejected. Failures are [`Error::StorageValidationFailed`].
    async fn validate_storage_spec(
        &self,
        spec: Option<&SnapshotStorageSpec>,
        namespace: &str,
    ) -> Result<()>;
}

fn invalid(message: impl Into<String>) -> Error {
    Error::StorageValidationFailed(message.into())
}

/// Structural checks that need no cluster access. Returns the selected backend.
pub fn check_storage_spec(spec: Option<&SnapshotStorageSpec>) -> Result<StorageBackend> {
    let spec = spec.ok_or_else(|| invalid("no storage destination specified"))?;

    let backend = match spec.backends().as_slice() {
        [] => return Err(invalid("no storage backend specified")),
        [backend] => *backend,
        many => {
            let names: Vec<&str> = many.iter().map(|b| b.provider()).collect();
            return Err(invalid(format!(
                "exactly one storage backend is allowed, found {}",
                names.join(", ")
            )));
        }
    };

    if let Some(local) = &spec.local {
        if !local.mount_path.starts_with('/') {
            return Err(invalid(format!(
                "local mountPath '{}' must be an absolute path",
                local.mount_path
            )));
        }
        if local.claim_name.is_some() == local.host_path.is_some() {
            return Err(invalid(
                "local storage needs exactly one of claimName or hostPath",
            ));
        }
        if let Some(sub_path) = &local.sub_path {
            check_path_segments("local subPath", sub_path)?;
        }
        return Ok(backend);
    }

    match spec.container() {
        Some(container) if !container.trim().is_empty() => {}
        _ => return Err(invalid(format!("{backend} bucket/container is empty"))),
    }
    if let Some(prefix) = spec.prefix() {
        check_path_segments(&format!("{backend} prefix"), prefix)?;
    }
    if let Some(endpoint) = spec.s3.as_ref().and_then(|s3| s3.endpoint.as_deref()) {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(invalid(format!(
                "s3 endpoint '{endpoint}' must start with http:// or https://"
            )));
        }
    }
    match spec.storage_secret_name.as_deref() {
        Some(name) if !name.is_empty() => {}
        _ => {
            return Err(invalid(format!(
                "storageSecretName is required for {backend} storage"
            )))
        }
    }

    Ok(backend)
}

fn check_path_segments(what: &str, path: &str) -> Result<()> {
    if path.starts_with('/') {
        return Err(invalid(format!("{what} '{path}' must be relative")));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(invalid(format!("{what} '{path}' must not contain '..'")));
    }
    Ok(())
}

/// Check that `secret` carries every credential key `backend` needs
pub fn check_secret_keys(backend: StorageBackend, secret: &Secret) -> Result<()> {
    let has_key = |key: &str| {
        secret.data.as_ref().is_some_and(|d| d.contains_key(key))
            || secret
                .string_data
                .as_ref()
                .is_some_and(|d| d.contains_key(key))
    };

    let missing: Vec<&str> = backend
        .required_secret_keys()
        .iter()
        .copied()
        .filter(|key| !has_key(key))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(invalid(format!(
            "secret {} is missing {} keys: {}",
            secret.metadata.name.as_deref().unwrap_or_default(),
            backend,
            missing.join(", ")
        )))
    }
}

/// Any HTTP answer counts as reachable; only transport failures are rejected.
pub async fn probe_endpoint(http: &reqwest::Client, endpoint: &str) -> Result<()> {
    match http.get(endpoint).send().await {
        Ok(response) => {
            debug!("Endpoint {} answered {}", endpoint, response.status());
            Ok(())
        }
        Err(e) => Err(invalid(format!("endpoint {endpoint} is unreachable: {e}"))),
    }
}

/// [`StorageSpecValidator`] that looks credential Secrets up in the cluster
pub struct KubeStorageValidator {
    client: Client,
    http: reqwest::Client,
    probe_endpoints: bool,
}

impl KubeStorageValidator {
    pub fn new(client: Client, probe_endpoints: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            http,
            probe_endpoints,
        })
    }
}

#[async_trait]
impl StorageSpecValidator for KubeStorageValidator {
    #[instrument(skip(self, spec))]
    async fn validate_storage_spec(
        &self,
        spec: Option<&SnapshotStorageSpec>,
        namespace: &str,
    ) -> Result<()> {
        let backend = check_storage_spec(spec)?;
        if !backend.is_remote() {
            return Ok(());
        }
        // check_storage_spec guarantees a spec with a secret name for remote backends
        let Some(spec) = spec else {
            return Err(invalid("no storage destination specified"));
        };
        let secret_name = spec.storage_secret_name.as_deref().unwrap_or_default();

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match secrets.get(secret_name).await {
            Ok(secret) => secret,
            Err(e) if is_not_found(&e) => {
                return Err(invalid(format!(
                    "secret {namespace}/{secret_name} not found"
                )))
            }
            Err(e) => return Err(Error::KubeError(e)),
        };
        check_secret_keys(backend, &secret)?;

        if self.probe_endpoints {
            if let Some(endpoint) = spec.s3.as_ref().and_then(|s3| s3.endpoint.as_deref()) {
                probe_endpoint(&self.http, endpoint).await?;
            }
        }

        debug!("Storage destination ({}) is valid", backend);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::crd::{GcsSpec, LocalSpec, S3Spec};

    fn s3(bucket: &str) -> SnapshotStorageSpec {
        SnapshotStorageSpec {
            storage_secret_name: Some("s3-creds".to_string()),
            s3: Some(S3Spec {
                endpoint: None,
                bucket: bucket.to_string(),
                prefix: None,
            }),
            ..Default::default()
        }
    }

    fn assert_invalid(result: Result<StorageBackend>, needle: &str) {
        match result {
            Err(Error::StorageValidationFailed(msg)) => {
                assert!(msg.contains(needle), "{msg:?} should mention {needle:?}")
            }
            other => panic!("expected StorageValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_spec_is_rejected() {
        assert_invalid(check_storage_spec(None), "no storage destination");
    }

    #[test]
    fn test_empty_spec_is_rejected() {
        assert_invalid(
            check_storage_spec(Some(&SnapshotStorageSpec::default())),
            "no storage backend",
        );
    }

    #[test]
    fn test_two_backends_are_rejected() {
        let spec = SnapshotStorageSpec {
            gcs: Some(GcsSpec {
                bucket: "b".to_string(),
                prefix: None,
            }),
            ..s3("a")
        };
        assert_invalid(check_storage_spec(Some(&spec)), "s3, gcs");
    }

    #[test]
    fn test_valid_s3_spec() {
        assert_eq!(
            check_storage_spec(Some(&s3("backups"))).unwrap(),
            StorageBackend::S3
        );
    }

    #[test]
    fn test_empty_bucket_is_rejected() {
        assert_invalid(check_storage_spec(Some(&s3(" "))), "bucket/container");
    }

    #[test]
    fn test_remote_backend_requires_secret_name() {
        let spec = SnapshotStorageSpec {
            storage_secret_name: None,
            ..s3("backups")
        };
        assert_invalid(check_storage_spec(Some(&spec)), "storageSecretName");
    }

    #[test]
    fn test_prefix_must_be_well_formed() {
        let mut spec = s3("backups");
        spec.s3.as_mut().unwrap().prefix = Some("/abs".to_string());
        assert_invalid(check_storage_spec(Some(&spec)), "must be relative");

        spec.s3.as_mut().unwrap().prefix = Some("team/../other".to_string());
        assert_invalid(check_storage_spec(Some(&spec)), "'..'");
    }

    #[test]
    fn test_endpoint_scheme_is_checked() {
        let mut spec = s3("backups");
        spec.s3.as_mut().unwrap().endpoint = Some("minio:9000".to_string());
        assert_invalid(check_storage_spec(Some(&spec)), "http://");
    }

    #[test]
    fn test_local_spec_rules() {
        let mut local = LocalSpec {
            mount_path: "/backup".to_string(),
            host_path: Some("/mnt/backup".to_string()),
            ..Default::default()
        };
        let spec = |local: &LocalSpec| SnapshotStorageSpec {
            local: Some(local.clone()),
            ..Default::default()
        };
        assert_eq!(
            check_storage_spec(Some(&spec(&local))).unwrap(),
            StorageBackend::Local
        );

        local.claim_name = Some("claim".to_string());
        assert_invalid(check_storage_spec(Some(&spec(&local))), "exactly one of");

        local.claim_name = None;
        local.mount_path = "backup".to_string();
        assert_invalid(check_storage_spec(Some(&spec(&local))), "absolute path");
    }

    #[test]
    fn test_secret_keys() {
        let mut data = BTreeMap::new();
        data.insert("AWS_ACCESS_KEY_ID".to_string(), ByteString(b"id".to_vec()));
        let mut secret = Secret {
            metadata: ObjectMeta {
                name: Some("s3-creds".to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };

        let err = check_secret_keys(StorageBackend::S3, &secret).unwrap_err();
        assert!(err.to_string().contains("AWS_SECRET_ACCESS_KEY"));

        let mut string_data = BTreeMap::new();
        string_data.insert("AWS_SECRET_ACCESS_KEY".to_string(), "key".to_string());
        secret.string_data = Some(string_data);
        check_secret_keys(StorageBackend::S3, &secret).unwrap();
    }

    #[tokio::test]
    async fn test_probe_accepts_any_http_answer() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        probe_endpoint(&reqwest::Client::new(), &server.uri())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_probe_rejects_unreachable_endpoint() {
        let err = probe_endpoint(&reqwest::Client::new(), "http://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageValidationFailed(_)));
    }
}
