//! Operator configuration
//!
//! Every setting can be passed as a flag or through the environment, so the
//! same binary works from a shell and from a Deployment manifest.

use clap::{Args, ValueEnum};

/// Docker repository holding the Postgres images (`<repo>:<version>-util`)
pub const DEFAULT_IMAGE_REPOSITORY: &str = "kubedb/postgres";

/// Registry API used to look up image tags
pub const DEFAULT_REGISTRY_API: &str = "https://hub.docker.com";

/// Image running the object-store removal in wipe Jobs
pub const DEFAULT_WIPE_IMAGE: &str = "appscode/osm:0.9.1";

#[derive(Args, Clone, Debug)]
pub struct OperatorConfig {
    /// Repository of the Postgres images; the backup tool uses the `<version>-util` tag
    #[arg(long, env = "IMAGE_REPOSITORY", default_value = DEFAULT_IMAGE_REPOSITORY)]
    pub image_repository: String,

    /// Base URL of the registry API queried for image tags
    #[arg(long, env = "REGISTRY_API", default_value = DEFAULT_REGISTRY_API)]
    pub registry_api: String,

    /// Image used by the Jobs that delete snapshot artifacts
    #[arg(long, env = "WIPE_IMAGE", default_value = DEFAULT_WIPE_IMAGE)]
    pub wipe_image: String,

    /// Check that custom S3 endpoints answer before accepting a snapshot
    #[arg(long, env = "PROBE_ENDPOINTS")]
    pub probe_endpoints: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            image_repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            registry_api: DEFAULT_REGISTRY_API.to_string(),
            wipe_image: DEFAULT_WIPE_IMAGE.to_string(),
            probe_endpoints: false,
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: OperatorConfig,
    }

    #[test]
    fn test_defaults_match_flag_defaults() {
        let parsed = Cli::parse_from(["snapshot-ctl"]).config;
        let defaults = OperatorConfig::default();
        assert_eq!(parsed.image_repository, defaults.image_repository);
        assert_eq!(parsed.registry_api, defaults.registry_api);
        assert_eq!(parsed.wipe_image, defaults.wipe_image);
        assert_eq!(parsed.probe_endpoints, defaults.probe_endpoints);
        assert_eq!(parsed.log_format, LogFormat::Text);
    }

    #[test]
    fn test_flags_override_defaults() {
        let parsed = Cli::parse_from([
            "snapshot-ctl",
            "--image-repository",
            "registry.local/postgres",
            "--probe-endpoints",
            "--log-format",
            "json",
        ])
        .config;
        assert_eq!(parsed.image_repository, "registry.local/postgres");
        assert!(parsed.probe_endpoints);
        assert_eq!(parsed.log_format, LogFormat::Json);
    }
}
