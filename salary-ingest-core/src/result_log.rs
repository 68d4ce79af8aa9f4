//! Daily JSON result log, mirrored to object storage after every append.

use crate::contract::{ObjectStore, ProcessingResult};
use crate::lifecycle::next_stamp;
use crate::storage::StorageGateway;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ResultLog {
    folder: PathBuf,
    remote_prefix: String,
}

impl ResultLog {
    pub fn new(folder: PathBuf, remote_prefix: impl Into<String>) -> Self {
        Self {
            folder,
            remote_prefix: remote_prefix.into(),
        }
    }

    fn file_name() -> String {
        format!("pipeline_log_{}.json", Local::now().format("%Y-%m-%d"))
    }

    /// Path of today's log file.
    pub fn current_path(&self) -> PathBuf {
        self.folder.join(Self::file_name())
    }

    /// Object key today's log file is mirrored to.
    pub fn current_key(&self) -> String {
        format!(
            "{}/{}",
            self.remote_prefix.trim_end_matches('/'),
            Self::file_name()
        )
    }

    /// Appends `result` to today's log and uploads the file. Never fails.
    pub async fn append<S: ObjectStore>(
        &self,
        result: &ProcessingResult,
        gateway: &StorageGateway<S>,
    ) {
        let path = self.current_path();
        let mut entries = load_entries(&path).await;
        match serde_json::to_value(result) {
            Ok(v) => entries.push(v),
            Err(e) => {
                error!(error = %e, "Could not serialise processing result");
                return;
            }
        }

        let body = match serde_json::to_vec_pretty(&entries) {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "Could not serialise result log");
                return;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(&self.folder).await {
            error!(path = %self.folder.display(), error = %e, "Could not create log folder");
            return;
        }
        if let Err(e) = tokio::fs::write(&path, body).await {
            error!(path = %path.display(), error = %e, "Could not write result log");
            return;
        }

        let key = self.current_key();
        match gateway.upload_with_versioning(&path, &key).await {
            Some(version_id) => {
                info!(log = %path.display(), key = %key, version_id = %version_id, "Result log saved")
            }
            None => warn!(log = %path.display(), key = %key, "Result log saved locally only"),
        }
    }
}

async fn load_entries(path: &Path) -> Vec<serde_json::Value> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Result log unreadable, starting a new one");
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Vec<serde_json::Value>>(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            let aside = corrupt_path(path);
            match tokio::fs::rename(path, &aside).await {
                Ok(()) => warn!(
                    path = %path.display(),
                    kept = %aside.display(),
                    error = %e,
                    "Result log corrupt, kept aside and starting a new one"
                ),
                Err(rename_err) => warn!(
                    path = %path.display(),
                    error = %e,
                    rename_error = %rename_err,
                    "Result log corrupt and could not be kept aside, starting a new one"
                ),
            }
            Vec::new()
        }
    }
}

/// `pipeline_log_<date>.json.corrupt-<stamp>` next to the log.
fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{}", next_stamp()));
    path.with_file_name(name)
}
