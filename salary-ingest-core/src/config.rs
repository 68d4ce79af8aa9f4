use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Settings consumed by the pipeline and the directory monitor.
///
/// Every field has a default, so an empty YAML section is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub watch_folder: PathBuf,
    pub temp_folder: PathBuf,
    pub processed_folder: PathBuf,
    pub log_folder: PathBuf,
    /// Rows are kept only when salary is strictly greater than this.
    pub filter_threshold: f64,
    pub max_threshold: f64,
    /// Lower-case extensions with the leading dot.
    pub supported_formats: Vec<String>,
    pub check_interval_secs: u64,
    pub stability_delay_ms: u64,
    pub pause_between_files_ms: u64,
    pub s3_processed_prefix: String,
    pub s3_logs_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watch_folder: PathBuf::from("data/incoming"),
            temp_folder: PathBuf::from("data/temp"),
            processed_folder: PathBuf::from("data/processed"),
            log_folder: PathBuf::from("data/logs"),
            filter_threshold: 55000.0,
            max_threshold: 1_000_000.0,
            supported_formats: [".csv", ".json", ".xlsx", ".xls", ".parquet", ".txt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            check_interval_secs: 5,
            stability_delay_ms: 1000,
            pause_between_files_ms: 1000,
            s3_processed_prefix: "processed".to_string(),
            s3_logs_prefix: "logs".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn stability_delay(&self) -> Duration {
        Duration::from_millis(self.stability_delay_ms)
    }

    pub fn pause_between_files(&self) -> Duration {
        Duration::from_millis(self.pause_between_files_ms)
    }

    pub fn trace_loaded(&self) {
        info!(
            watch_folder = %self.watch_folder.display(),
            filter_threshold = self.filter_threshold,
            formats = ?self.supported_formats,
            check_interval_secs = self.check_interval_secs,
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}
