//! File Lifecycle Manager: the local side effects around one processed file.
//!
//! - [`FileLifecycle::persist`] writes the filtered table as a temp CSV
//!   artifact with a `#` metadata header.
//! - [`FileLifecycle::archive`] copies the original into a dated archive
//!   folder without ever overwriting, then removes the source.
//! - [`FileLifecycle::discard`] removes a temp artifact.

use crate::contract::ProcessingResult;
use crate::table::Table;
use chrono::{Local, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{info, warn};

pub const ARTIFACT_PREFIX: &str = "salary_filtered_";

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Milliseconds since the epoch, strictly increasing across the process.
pub fn next_stamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    let prev = LAST_STAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(prev + 1)
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write CSV artifact {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("archive copy {path} has {actual} bytes, source had {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LifecycleError + '_ {
    move |source| LifecycleError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct FileLifecycle {
    temp_folder: PathBuf,
    processed_folder: PathBuf,
    threshold: f64,
}

impl FileLifecycle {
    pub fn new(temp_folder: PathBuf, processed_folder: PathBuf, threshold: f64) -> Self {
        Self {
            temp_folder,
            processed_folder,
            threshold,
        }
    }

    pub fn archive_root(&self) -> PathBuf {
        self.processed_folder.join("archive")
    }

    /// Writes `table` to a fresh temp artifact and returns its path.
    ///
    /// Counts in the name and header come from `result`
    /// (`records_processed`, `filtered_by_salary`).
    pub fn persist(
        &self,
        table: &Table,
        original_file: &Path,
        result: &ProcessingResult,
    ) -> Result<PathBuf, LifecycleError> {
        fs::create_dir_all(&self.temp_folder).map_err(io_err(&self.temp_folder))?;

        let total = result.records_processed;
        let filtered = result.filtered_by_salary;
        let name = format!(
            "{ARTIFACT_PREFIX}{}_total{total}_filtered{filtered}_{}.csv",
            stem_of(original_file),
            next_stamp()
        );
        let path = self.temp_folder.join(name);

        let original_name = original_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let header = format!(
            "# Filtered by salary (> {threshold})\n\
             # Source file: {original_name}\n\
             # Processed at: {processed_at}\n\
             # Total records: {total}\n\
             # Filtered by salary: {filtered}\n\
             # Records kept: {kept}\n\
             # Threshold: > {threshold}\n\
             #\n",
            threshold = self.threshold,
            processed_at = Local::now().format("%Y-%m-%d %H:%M:%S"),
            kept = table.num_rows(),
        );
        write_or_remove(&path, |file| write_artifact(file, &path, &header, table))?;

        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        info!(artifact = %path.display(), size, rows = table.num_rows(), "Temp artifact written");
        Ok(path)
    }

    /// Copies `original_file` into `processed/archive/<date>/` and removes
    /// the source once the copy is verified.
    ///
    /// A source that cannot be deleted stays in place; that is logged and
    /// still counts as archived.
    pub fn archive(&self, original_file: &Path) -> Result<PathBuf, LifecycleError> {
        let folder = self
            .archive_root()
            .join(Local::now().format("%Y-%m-%d").to_string());
        fs::create_dir_all(&folder).map_err(io_err(&folder))?;

        let target = free_archive_path(&folder, original_file);
        let expected = fs::metadata(original_file)
            .map_err(io_err(original_file))?
            .len();
        fs::copy(original_file, &target).map_err(io_err(&target))?;
        let actual = fs::metadata(&target).map_err(io_err(&target))?.len();
        if actual != expected {
            return Err(LifecycleError::SizeMismatch {
                path: target,
                expected,
                actual,
            });
        }

        match fs::remove_file(original_file) {
            Ok(()) => info!(
                source = %original_file.display(),
                archived = %target.display(),
                "Original archived and removed"
            ),
            Err(e) => warn!(
                source = %original_file.display(),
                archived = %target.display(),
                error = %e,
                "Original archived but could not be removed"
            ),
        }
        Ok(target)
    }

    /// Removes a temp artifact. Missing files are only logged.
    pub fn discard(&self, artifact: &Path) {
        match fs::remove_file(artifact) {
            Ok(()) => info!(artifact = %artifact.display(), "Temp artifact removed"),
            Err(e) => warn!(artifact = %artifact.display(), error = %e, "Could not remove temp artifact"),
        }
    }
}

/// Creates `path` and hands the file to `write`. A failed write removes the
/// partial file.
fn write_or_remove<F>(path: &Path, write: F) -> Result<(), LifecycleError>
where
    F: FnOnce(fs::File) -> Result<(), LifecycleError>,
{
    let file = fs::File::create(path).map_err(io_err(path))?;
    let outcome = write(file);
    if let Err(e) = &outcome {
        warn!(artifact = %path.display(), error = %e, "Artifact write failed, removing partial file");
        if let Err(rm) = fs::remove_file(path) {
            warn!(artifact = %path.display(), error = %rm, "Could not remove partial artifact");
        }
    }
    outcome
}

/// Metadata header, then the table as CSV. Cells starting with `#` are
/// quoted so they never read back as comments.
fn write_artifact(
    mut file: fs::File,
    path: &Path,
    header: &str,
    table: &Table,
) -> Result<(), LifecycleError> {
    file.write_all(header.as_bytes()).map_err(io_err(path))?;

    let mut writer = csv::WriterBuilder::new()
        .comment(Some(b'#'))
        .from_writer(file);
    let csv_err = |source| LifecycleError::Csv {
        path: path.to_path_buf(),
        source,
    };
    writer.write_record(table.column_names()).map_err(csv_err)?;
    for row in table.rows() {
        writer
            .write_record(row.iter().map(|v| v.to_string()))
            .map_err(csv_err)?;
    }
    writer.flush().map_err(io_err(path))
}

fn free_archive_path(folder: &Path, original_file: &Path) -> PathBuf {
    let file_name = original_file.file_name().unwrap_or_default();
    let direct = folder.join(file_name);
    if !direct.exists() {
        return direct;
    }
    let stem = stem_of(original_file);
    let ext = original_file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let epoch = Utc::now().timestamp();
    let mut candidate = folder.join(format!("{stem}_{epoch}{ext}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = folder.join(format!("{stem}_{epoch}_{n}{ext}"));
        n += 1;
    }
    candidate
}
