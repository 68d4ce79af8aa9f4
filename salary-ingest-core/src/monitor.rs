//! Directory monitor: polls the watch folder and hands stable new files to a
//! [`FileHandler`], one at a time, in name order.
//!
//! A file is dispatched only when its size is non-zero and unchanged across
//! two samples taken `stability_delay` apart. Files that are still growing
//! are skipped for the cycle and picked up again on the next one. Once
//! dispatched, a file is never dispatched again, whatever the outcome.

use crate::config::PipelineConfig;
use crate::contract::FileHandler;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name prefixes of files the monitor never picks up.
pub const RESERVED_PREFIXES: [&str; 4] = [".", "~", "temp_", "salary_filtered_"];

/// Canonical paths of files already dispatched in this process.
#[derive(Debug, Default, Clone)]
pub struct ProcessedFiles {
    seen: HashSet<PathBuf>,
}

impl ProcessedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.seen.contains(&Self::key(path))
    }

    /// Records `path`; false if it was already recorded.
    pub fn insert(&mut self, path: &Path) -> bool {
        self.seen.insert(Self::key(path))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

fn is_candidate(path: &Path, supported_formats: &[String]) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    if RESERVED_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return false;
    }
    let Some(ext) = path.extension().map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
    else {
        return false;
    };
    supported_formats.iter().any(|f| f.to_lowercase() == ext)
}

/// Regular files in `folder` the pipeline would accept, sorted by name.
pub fn list_candidates(folder: &Path, supported_formats: &[String]) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if is_candidate(&path, supported_formats) {
            out.push(path);
        }
    }
    out.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub folder: PathBuf,
    pub supported_formats: Vec<String>,
    pub check_interval: Duration,
    pub stability_delay: Duration,
}

impl From<&PipelineConfig> for MonitorConfig {
    fn from(c: &PipelineConfig) -> Self {
        Self {
            folder: c.watch_folder.clone(),
            supported_formats: c.supported_formats.clone(),
            check_interval: c.check_interval(),
            stability_delay: c.stability_delay(),
        }
    }
}

/// What one polling cycle found and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Candidate files in the folder.
    pub seen: usize,
    /// Candidates not dispatched before.
    pub new: usize,
    pub dispatched: usize,
    /// New files skipped because their size was zero or still changing.
    pub unstable: usize,
}

pub struct DirectoryMonitor<H> {
    handler: H,
    config: MonitorConfig,
    processed: ProcessedFiles,
}

impl<H: FileHandler> DirectoryMonitor<H> {
    pub fn new(handler: H, config: MonitorConfig, processed: ProcessedFiles) -> Self {
        Self {
            handler,
            config,
            processed,
        }
    }

    pub fn processed(&self) -> &ProcessedFiles {
        &self.processed
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Runs one polling cycle to completion.
    pub async fn scan_once(&mut self) -> ScanReport {
        self.scan(&CancellationToken::new()).await
    }

    /// Polls until `cancel` fires. A file being processed always finishes
    /// before this returns.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            folder = %self.config.folder.display(),
            interval_secs = self.config.check_interval.as_secs(),
            "Monitoring started"
        );
        while !cancel.is_cancelled() {
            self.scan(&cancel).await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.check_interval) => {}
            }
        }
        info!(processed = self.processed.len(), "Monitoring stopped");
    }

    async fn scan(&mut self, cancel: &CancellationToken) -> ScanReport {
        let mut report = ScanReport::default();
        let candidates = match list_candidates(&self.config.folder, &self.config.supported_formats)
        {
            Ok(c) => c,
            Err(e) => {
                error!(folder = %self.config.folder.display(), error = %e, "Could not scan watch folder");
                return report;
            }
        };
        let fresh: Vec<PathBuf> = candidates
            .iter()
            .filter(|p| !self.processed.contains(p))
            .cloned()
            .collect();
        report.seen = candidates.len();
        report.new = fresh.len();
        info!(
            time = %chrono::Local::now().format("%H:%M:%S"),
            files = report.seen,
            new = report.new,
            "Scan"
        );

        for path in fresh {
            if cancel.is_cancelled() {
                debug!("Scan interrupted by cancellation");
                break;
            }
            info!(file = %path.display(), "New file detected");
            if !self.is_stable(&path).await {
                report.unstable += 1;
                continue;
            }
            self.processed.insert(&path);
            let result = self.handler.handle(&path).await;
            report.dispatched += 1;
            if result.success {
                info!(
                    file = %result.file_name,
                    total = result.records_processed,
                    filtered_by_salary = result.filtered_by_salary,
                    kept = result.records_filtered,
                    key = ?result.s3_path,
                    version_id = ?result.version_id,
                    "File processed successfully"
                );
            } else {
                error!(file = %result.file_name, error = ?result.error, "File processing failed");
            }
        }
        report
    }

    async fn is_stable(&self, path: &Path) -> bool {
        let first = file_size(path);
        tokio::time::sleep(self.config.stability_delay).await;
        let second = file_size(path);
        match (first, second) {
            (Some(a), Some(b)) if a == b && a > 0 => true,
            _ => {
                warn!(file = %path.display(), first = ?first, second = ?second, "File still being written, skipping");
                false
            }
        }
    }
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}
