//! Pipeline orchestrator: takes one input file from disk to object storage.
//!
//! # Stages
//! existence check → read → salary filter → temp artifact → upload →
//! versioned re-upload (for the version id) → archive original → remove temp
//! artifact.
//!
//! Every stage failure is recorded in the returned [`ProcessingResult`]
//! instead of being raised. The original is archived only after a
//! successful upload, and the temp artifact is removed whenever it was
//! created. A failed archive keeps `success` and fills `error`.
//!
//! Reading, filtering, persisting and archiving run on the blocking pool.
//!
//! # Navigation
//! - [`DataPipeline::process_file`]: one file, no logging of the result
//! - [`DataPipeline::process_existing_files`]: one-shot pass over the watch folder
//! - [`FileHandler`] impl: what the directory monitor calls (process, then log)

use crate::config::PipelineConfig;
use crate::contract::{FileHandler, ObjectStore, ProcessingResult};
use crate::lifecycle::FileLifecycle;
use crate::monitor::{list_candidates, ProcessedFiles};
use crate::reader::read_table;
use crate::result_log::ResultLog;
use crate::salary_filter::{detect_and_filter, FilterSettings};
use crate::storage::StorageGateway;
use async_trait::async_trait;
use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Version id recorded when the upload succeeded but the versioned re-upload did not.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Fifteen employees, five of them above the default threshold.
pub const EXAMPLE_CSV: &str = "id,name,department,position,salary,hire_date,city
1,Иван Иванов,IT,Разработчик,50000,2023-01-15,Москва
2,Петр Петров,Маркетинг,Менеджер,80000,2022-06-20,Санкт-Петербург
3,Мария Сидорова,Финансы,Аналитик,60000,2023-03-10,Москва
4,Анна Кузнецова,HR,Специалист,45000,2023-05-05,Казань
5,Алексей Смирнов,IT,Тимлид,120000,2021-11-30,Москва
6,Елена Попова,Продажи,Менеджер,55000,2022-09-15,Новосибирск
7,Дмитрий Васильев,IT,Тестировщик,40000,2023-07-20,Москва
8,Ольга Новикова,Маркетинг,Дизайнер,48000,2023-02-28,Екатеринбург
9,Сергей Морозов,Финансы,Директор,150000,2020-04-10,Москва
10,Наталья Воробьева,HR,Менеджер,52000,2022-12-01,Краснодар
11,Андрей Павлов,IT,Стажер,80,2023-10-01,Москва
12,Екатерина Лебедева,Продажи,Стажер,90,2023-09-15,Санкт-Петербург
13,Максим Козлов,IT,Разработчик,95000,2022-03-15,Новосибирск
14,Ольга Соколова,Финансы,Бухгалтер,35000,2023-04-20,Казань
15,Денис Орлов,Маркетинг,Копирайтер,30000,2023-06-10,Екатеринбург
";

pub const EXAMPLE_FILE_NAME: &str = "employees_example.csv";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to create folder {path}: {source}")]
    CreateFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to inspect watch folder {path}: {source}")]
    WatchFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct DataPipeline<S> {
    gateway: Arc<StorageGateway<S>>,
    config: PipelineConfig,
    lifecycle: FileLifecycle,
    result_log: ResultLog,
}

impl<S: ObjectStore> DataPipeline<S> {
    /// Builds the pipeline and creates every local folder it writes to.
    pub fn new(
        config: PipelineConfig,
        gateway: Arc<StorageGateway<S>>,
    ) -> Result<Self, PipelineError> {
        for folder in [
            &config.watch_folder,
            &config.temp_folder,
            &config.processed_folder,
            &config.log_folder,
        ] {
            std::fs::create_dir_all(folder).map_err(|source| PipelineError::CreateFolder {
                path: folder.clone(),
                source,
            })?;
        }
        info!(
            watch = %config.watch_folder.display(),
            temp = %config.temp_folder.display(),
            processed = %config.processed_folder.display(),
            logs = %config.log_folder.display(),
            threshold = config.filter_threshold,
            "Pipeline folders ready"
        );

        let lifecycle = FileLifecycle::new(
            config.temp_folder.clone(),
            config.processed_folder.clone(),
            config.filter_threshold,
        );
        let result_log = ResultLog::new(config.log_folder.clone(), config.s3_logs_prefix.clone());
        Ok(Self {
            gateway,
            config,
            lifecycle,
            result_log,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn gateway(&self) -> &StorageGateway<S> {
        &self.gateway
    }

    pub fn result_log(&self) -> &ResultLog {
        &self.result_log
    }

    fn object_key(&self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "{}/{}/salary_filtered_{}_{}.csv",
            self.config.s3_processed_prefix.trim_end_matches('/'),
            Local::now().format("%Y-%m-%d"),
            stem,
            Utc::now().timestamp()
        )
    }

    /// Runs every stage for `path` and returns the outcome. Never panics or
    /// raises; the caller decides whether to log the result.
    pub async fn process_file(&self, path: &Path) -> ProcessingResult {
        let result = ProcessingResult::started(path);
        info!(file = %result.file_name, "[PIPELINE] Processing file");

        let size = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => m.len(),
            _ => {
                let msg = format!("file does not exist: {}", path.display());
                error!(file = %path.display(), "[PIPELINE] File does not exist");
                return result.fail(msg);
            }
        };
        info!(file = %result.file_name, size, "[PIPELINE] File size");

        let settings = FilterSettings {
            threshold: self.config.filter_threshold,
            max_threshold: self.config.max_threshold,
        };
        let staged = {
            let lifecycle = self.lifecycle.clone();
            let source = path.to_path_buf();
            let result = result.clone();
            tokio::task::spawn_blocking(move || {
                stage_artifact(&lifecycle, &source, settings, result)
            })
        };
        let (mut result, artifact) = match staged.await {
            Ok(Ok(staged)) => staged,
            Ok(Err(failed)) => return failed,
            Err(e) => {
                error!(file = %path.display(), error = %e, "[PIPELINE] Staging task failed");
                return result.fail(format!("processing task failed: {e}"));
            }
        };

        self.upload_and_archive(path, &artifact, &mut result).await;
        self.lifecycle.discard(&artifact);

        result.end_time = Some(Local::now());
        result
    }

    async fn upload_and_archive(
        &self,
        path: &Path,
        artifact: &Path,
        result: &mut ProcessingResult,
    ) {
        let key = self.object_key(path);
        info!(key = %key, "[PIPELINE][UPLOAD] Uploading artifact");
        if !self.gateway.upload(artifact, &key).await {
            error!(key = %key, "[PIPELINE][UPLOAD] Upload failed");
            result.error = Some("failed to upload file to object storage".to_string());
            return;
        }

        let version_id = self
            .gateway
            .upload_with_versioning(artifact, &key)
            .await
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        result.version_id = Some(version_id);
        result.s3_path = Some(key.clone());
        result.success = true;
        info!(key = %key, version_id = ?result.version_id, "[PIPELINE][UPLOAD] Uploaded");

        // Archival problems never undo a successful upload.
        let lifecycle = self.lifecycle.clone();
        let source = path.to_path_buf();
        let archived = tokio::task::spawn_blocking(move || lifecycle.archive(&source))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));
        if let Err(e) = archived {
            error!(file = %path.display(), error = %e, "[PIPELINE] Archiving original failed");
            result.error = Some(format!("uploaded, but archiving the original failed: {e}"));
        }
    }

    /// Appends `result` to today's result log and mirrors the log remotely.
    pub async fn log_result(&self, result: &ProcessingResult) {
        self.result_log.append(result, &self.gateway).await;
    }

    /// Processes every eligible file already in the watch folder, recording
    /// each in `processed`. Returns how many files were dispatched.
    pub async fn process_existing_files(
        &self,
        processed: &mut ProcessedFiles,
    ) -> Result<usize, PipelineError> {
        let candidates =
            list_candidates(&self.config.watch_folder, &self.config.supported_formats).map_err(
                |source| PipelineError::WatchFolder {
                    path: self.config.watch_folder.clone(),
                    source,
                },
            )?;
        if candidates.is_empty() {
            info!(folder = %self.config.watch_folder.display(), "No existing files to process");
            return Ok(0);
        }
        info!(count = candidates.len(), "Processing existing files");

        let mut dispatched = 0;
        for path in candidates {
            if !processed.insert(&path) {
                continue;
            }
            if dispatched > 0 {
                tokio::time::sleep(self.config.pause_between_files()).await;
            }
            self.handle(&path).await;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Writes [`EXAMPLE_CSV`] into the watch folder if it holds no files.
    ///
    /// Returns the path written, or `None` when the folder was not empty.
    pub fn write_example_file(&self) -> Result<Option<PathBuf>, PipelineError> {
        let folder = &self.config.watch_folder;
        let watch_err = |source| PipelineError::WatchFolder {
            path: folder.clone(),
            source,
        };
        let has_files = std::fs::read_dir(folder)
            .map_err(watch_err)?
            .filter_map(Result::ok)
            .any(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false));
        if has_files {
            info!(folder = %folder.display(), "Watch folder not empty, no example written");
            return Ok(None);
        }
        let path = folder.join(EXAMPLE_FILE_NAME);
        std::fs::write(&path, EXAMPLE_CSV).map_err(watch_err)?;
        info!(path = %path.display(), "Example file written");
        Ok(Some(path))
    }
}

/// Read, filter and persist: the blocking part of [`DataPipeline::process_file`].
///
/// Returns the updated result and the artifact path, or the failed result.
fn stage_artifact(
    lifecycle: &FileLifecycle,
    path: &Path,
    settings: FilterSettings,
    mut result: ProcessingResult,
) -> Result<(ProcessingResult, PathBuf), ProcessingResult> {
    let table = match read_table(path) {
        Ok(t) => t,
        Err(e) => {
            error!(file = %path.display(), error = %e, "[PIPELINE] Read failed");
            return Err(result.fail(format!("could not read file: {e}")));
        }
    };
    result.records_processed = table.num_rows();
    info!(
        file = %result.file_name,
        rows = table.num_rows(),
        columns = ?table.column_names(),
        "[PIPELINE] Read table"
    );

    let (filtered, stats) = detect_and_filter(table, settings);
    result.records_filtered = filtered.num_rows();
    result.filtered_by_salary = stats.filtered_count;
    result.salary_stats = Some(stats);
    if filtered.is_empty() {
        warn!(file = %result.file_name, "[PIPELINE] No rows left after filtering");
    } else {
        info!(
            file = %result.file_name,
            kept = result.records_filtered,
            filtered_by_salary = result.filtered_by_salary,
            "[PIPELINE] Filtered"
        );
    }

    match lifecycle.persist(&filtered, path, &result) {
        Ok(artifact) => Ok((result, artifact)),
        Err(e) => {
            error!(file = %path.display(), error = %e, "[PIPELINE] Could not write temp artifact");
            Err(result.fail(format!("could not save temp file: {e}")))
        }
    }
}

#[async_trait]
impl<S: ObjectStore> FileHandler for DataPipeline<S> {
    async fn handle(&self, path: &Path) -> ProcessingResult {
        let result = self.process_file(path).await;
        if result.success && result.error.is_some() {
            warn!(
                file = %result.file_name,
                error = ?result.error,
                "[PIPELINE] File processed with warnings"
            );
        } else if result.success {
            info!(file = %result.file_name, "[PIPELINE] File processed");
        } else {
            warn!(file = %result.file_name, error = ?result.error, "[PIPELINE] File failed");
        }
        self.log_result(&result).await;
        result
    }
}
