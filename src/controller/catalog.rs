//! Image catalog lookups for the backup-tool image
//!
//! Snapshots run the `<repository>:<version>-util` image of the database's
//! engine version. The catalog only answers whether that tag exists; it never
//! pulls or pushes images.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};

/// Suffix appended to the engine version to get the backup-tool tag
pub const UTIL_TAG_SUFFIX: &str = "-util";

/// Tag of the backup-tool image for a database engine version
pub fn util_image_tag(version: &str) -> String {
    format!("{version}{UTIL_TAG_SUFFIX}")
}

#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// Succeeds when `image:tag` exists, otherwise [`Error::ImageNotAvailable`].
    async fn check_image_version(&self, image: &str, tag: &str) -> Result<()>;
}

/// [`ImageCatalog`] that asks a Docker Hub compatible registry API
///
/// `GET {api}/v2/repositories/{image}/tags/{tag}` answers 200 for a known tag.
pub struct RegistryImageCatalog {
    http: reqwest::Client,
    api_base: String,
}

impl RegistryImageCatalog {
    pub fn new(api_base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn tag_url(&self, image: &str, tag: &str) -> String {
        format!("{}/v2/repositories/{}/tags/{}", self.api_base, image, tag)
    }
}

#[async_trait]
impl ImageCatalog for RegistryImageCatalog {
    #[instrument(skip(self))]
    async fn check_image_version(&self, image: &str, tag: &str) -> Result<()> {
        let not_available = || Error::ImageNotAvailable {
            image: image.to_string(),
            tag: tag.to_string(),
        };

        let response = match self.http.get(self.tag_url(image, tag)).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Image catalog unreachable while checking {}:{}: {}", image, tag, e);
                return Err(not_available());
            }
        };

        match response.status() {
            status if status.is_success() => {
                debug!("Image {}:{} is available", image, tag);
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(not_available()),
            status => {
                warn!(
                    "Image catalog answered {} while checking {}:{}",
                    status, image, tag
                );
                Err(not_available())
            }
        }
    }
}
