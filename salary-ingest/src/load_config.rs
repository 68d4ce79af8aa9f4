/// `load_config` module: loads the static YAML config and injects storage secrets from the environment.
///
/// This module is the only place where untrusted YAML is parsed and mapped to typed settings.
///
/// # Responsibilities
/// - Parse the optional YAML file into [`CliConfig`] (`pipeline` and `storage` sections, all fields defaulted)
/// - Inject `S3_ENDPOINT`, `S3_ACCESS_KEY`, `S3_SECRET_KEY` and `S3_BUCKET`; the environment wins over the file
/// - Surface load failures as `anyhow::Error` with the offending path
///
/// Credentials are never required in the file. Their absence is only an error once a storage
/// client is built (see [`crate::s3::S3Store::connect`]).
use anyhow::Result;
use salary_ingest_core::config::PipelineConfig;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info};

pub const ENV_ENDPOINT: &str = "S3_ENDPOINT";
pub const ENV_ACCESS_KEY: &str = "S3_ACCESS_KEY";
pub const ENV_SECRET_KEY: &str = "S3_SECRET_KEY";
pub const ENV_BUCKET: &str = "S3_BUCKET";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Reported in bucket info; certificate checks are not switched off by it.
    pub verify_ssl: bool,
    pub path_style: bool,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_attempts: u32,
    pub max_in_flight: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "de-practice".to_string(),
            region: "ru-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            verify_ssl: false,
            path_style: false,
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            max_attempts: 3,
            max_in_flight: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub pipeline: PipelineConfig,
    pub storage: StorageSettings,
}

impl CliConfig {
    /// Overrides storage fields with any non-empty `S3_*` environment variable.
    fn apply_env(&mut self) {
        let pairs = [
            (ENV_ENDPOINT, &mut self.storage.endpoint),
            (ENV_ACCESS_KEY, &mut self.storage.access_key),
            (ENV_SECRET_KEY, &mut self.storage.secret_key),
            (ENV_BUCKET, &mut self.storage.bucket),
        ];
        for (var, field) in pairs {
            if let Ok(value) = env::var(var) {
                if !value.trim().is_empty() {
                    debug!(var, "Storage setting taken from environment");
                    *field = value;
                }
            }
        }
    }

    pub fn trace_loaded(&self) {
        self.pipeline.trace_loaded();
        info!(
            endpoint = %self.storage.endpoint,
            bucket = %self.storage.bucket,
            region = %self.storage.region,
            verify_ssl = self.storage.verify_ssl,
            credentials_present =
                !self.storage.access_key.is_empty() && !self.storage.secret_key.is_empty(),
            "Loaded storage settings"
        );
    }
}

/// Loads a static YAML config file (no secrets) and injects storage env vars.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    // An empty file deserialises to `null`, which means "all defaults".
    let mut config: CliConfig = if config_content.trim().is_empty() {
        CliConfig::default()
    } else {
        match serde_yaml::from_str(&config_content) {
            Ok(conf) => conf,
            Err(e) => {
                error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
                return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
            }
        }
    };
    config.apply_env();
    info!(config_path = ?path_ref, "Parsed config YAML successfully");
    Ok(config)
}

/// Built-in defaults plus environment, for runs without `--config`.
pub fn default_config() -> CliConfig {
    let mut config = CliConfig::default();
    config.apply_env();
    config
}

/// `load_config` when a path is given, [`default_config`] otherwise.
pub fn resolve_config(path: Option<&Path>) -> Result<CliConfig> {
    let config = match path {
        Some(p) => load_config(p)?,
        None => {
            info!("No config file given, using defaults and environment");
            default_config()
        }
    };
    config.trace_loaded();
    Ok(config)
}
