use salary_ingest_core::config::PipelineConfig;
use salary_ingest_core::contract::{
    FileHandler, MockObjectStore, ObjectStore, PutOutcome, StorageError, StorageErrorKind,
    StoreDescriptor,
};
use salary_ingest_core::memory_store::{ops, MemoryStore};
use salary_ingest_core::monitor::ProcessedFiles;
use salary_ingest_core::pipeline::{DataPipeline, UNKNOWN_VERSION};
use salary_ingest_core::storage::StorageGateway;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn test_config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        watch_folder: root.join("incoming"),
        temp_folder: root.join("temp"),
        processed_folder: root.join("processed"),
        log_folder: root.join("logs"),
        pause_between_files_ms: 0,
        ..PipelineConfig::default()
    }
}

fn memory_pipeline(dir: &TempDir) -> DataPipeline<MemoryStore> {
    let gateway = Arc::new(StorageGateway::new(MemoryStore::new("de-practice")));
    DataPipeline::new(test_config(dir.path()), gateway).unwrap()
}

fn drop_file(pipeline: &DataPipeline<impl ObjectStore>, name: &str, body: &str) -> PathBuf {
    let path = pipeline.config().watch_folder.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn dir_entries(path: &Path) -> usize {
    fs::read_dir(path).map(|d| d.count()).unwrap_or(0)
}

fn archived_files(root: &Path) -> Vec<PathBuf> {
    let archive = root.join("processed").join("archive");
    let mut out = Vec::new();
    for day in fs::read_dir(archive).into_iter().flatten().flatten() {
        for file in fs::read_dir(day.path()).into_iter().flatten().flatten() {
            out.push(file.path());
        }
    }
    out
}

#[tokio::test]
async fn new_creates_every_folder() {
    let dir = tempdir().unwrap();
    let _pipeline = memory_pipeline(&dir);
    for sub in ["incoming", "temp", "processed", "logs"] {
        assert!(dir.path().join(sub).is_dir(), "{sub} missing");
    }
}

#[tokio::test]
async fn new_fails_when_a_folder_cannot_be_created() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "not a directory").unwrap();
    let config = PipelineConfig {
        watch_folder: blocker.join("incoming"),
        ..test_config(dir.path())
    };
    let gateway = Arc::new(StorageGateway::new(MemoryStore::new("b")));
    assert!(DataPipeline::new(config, gateway).is_err());
}

#[tokio::test]
async fn filters_uploads_and_archives() {
    let dir = tempdir().unwrap();
    let pipeline = memory_pipeline(&dir);
    let path = drop_file(
        &pipeline,
        "staff.csv",
        "id,name,salary\n1,A,50000\n2,B,80\n3,C,120000\n",
    );

    let result = pipeline.process_file(&path).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.error, None);
    assert_eq!(result.records_processed, 3);
    assert_eq!(result.records_filtered, 1);
    assert_eq!(result.filtered_by_salary, 2);
    let stats = result.salary_stats.clone().unwrap();
    assert_eq!(stats.salary_columns, vec!["salary".to_string()]);
    assert!(result.end_time.is_some());

    let key = result.s3_path.clone().unwrap();
    assert!(key.starts_with("processed/"), "{key}");
    assert!(key.contains("/salary_filtered_staff_"), "{key}");
    assert!(key.ends_with(".csv"));
    assert!(result.version_id.is_some());

    let body = String::from_utf8(pipeline.gateway().store().body(&key).unwrap()).unwrap();
    assert!(body.starts_with("# Filtered by salary (> 55000)\n"));
    assert!(body.ends_with("#\nid,name,salary\n3,C,120000\n"), "{body}");

    assert!(!path.exists());
    assert_eq!(archived_files(dir.path()).len(), 1);
    assert_eq!(dir_entries(&dir.path().join("temp")), 0);
}

#[tokio::test]
async fn header_only_input_uploads_an_empty_artifact() {
    let dir = tempdir().unwrap();
    let pipeline = memory_pipeline(&dir);
    let path = drop_file(&pipeline, "nobody.csv", "id,name,salary\n");

    let result = pipeline.process_file(&path).await;

    assert!(result.success);
    assert_eq!(result.records_processed, 0);
    assert_eq!(result.records_filtered, 0);
    let stats = result.salary_stats.unwrap();
    assert_eq!(stats.filtered_count, 0);
    assert!(stats.salary_columns.is_empty());
    assert_eq!(dir_entries(&dir.path().join("temp")), 0);
}

#[tokio::test]
async fn upload_failure_keeps_original_and_cleans_temp() {
    let dir = tempdir().unwrap();
    let store = MemoryStore::new("de-practice");
    store.fail_on(ops::PUT, StorageErrorKind::Transient);
    let gateway = Arc::new(StorageGateway::new(store));
    let pipeline = DataPipeline::new(test_config(dir.path()), gateway).unwrap();
    let path = drop_file(&pipeline, "staff.csv", "id,salary\n1,90000\n");

    let result = pipeline.process_file(&path).await;

    assert!(!result.success);
    assert!(result.error.is_some());
    assert_eq!(result.s3_path, None);
    assert!(path.exists());
    assert!(archived_files(dir.path()).is_empty());
    assert_eq!(dir_entries(&dir.path().join("temp")), 0);
}

#[tokio::test]
async fn archive_failure_is_recorded_on_a_successful_upload() {
    let dir = tempdir().unwrap();
    let pipeline = memory_pipeline(&dir);
    fs::write(dir.path().join("processed").join("archive"), "not a directory").unwrap();
    let path = drop_file(&pipeline, "staff.csv", "id,salary\n1,90000\n");

    let result = pipeline.handle(&path).await;

    assert!(result.success);
    assert!(result.s3_path.is_some());
    let error = result.error.clone().unwrap();
    assert!(error.contains("archiving the original failed"), "{error}");
    assert!(path.exists());
    assert_eq!(dir_entries(&dir.path().join("temp")), 0);

    let entries: Vec<serde_json::Value> =
        serde_json::from_slice(&fs::read(pipeline.result_log().current_path()).unwrap()).unwrap();
    assert_eq!(entries[0]["success"], true);
    assert!(entries[0]["error"].as_str().unwrap().contains("archiving"));
}

#[tokio::test]
async fn failed_versioned_reupload_records_unknown_version() {
    let dir = tempdir().unwrap();
    let puts = Arc::new(AtomicUsize::new(0));
    let counter = puts.clone();

    let mut store = MockObjectStore::new();
    store.expect_descriptor().returning(|| StoreDescriptor {
        bucket: "de-practice".into(),
        endpoint: "mock://".into(),
        region: "ru-1".into(),
        ssl_verify: false,
    });
    store.expect_put_object().returning(move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(PutOutcome { version_id: None })
        } else {
            Err(StorageError::new(StorageErrorKind::Transient, "connection reset"))
        }
    });
    let gateway = Arc::new(StorageGateway::new(store));
    let pipeline = DataPipeline::new(test_config(dir.path()), gateway).unwrap();
    let path = drop_file(&pipeline, "staff.csv", "id,salary\n1,90000\n");

    let result = pipeline.process_file(&path).await;

    assert!(result.success);
    assert_eq!(result.version_id.as_deref(), Some(UNKNOWN_VERSION));
    assert_eq!(puts.load(Ordering::SeqCst), 2);
    assert!(!path.exists());
}

#[tokio::test]
async fn unreadable_file_is_reported_and_left_alone() {
    let dir = tempdir().unwrap();
    let pipeline = memory_pipeline(&dir);
    let path = drop_file(&pipeline, "broken.json", "[{\"salary\": 1");

    let result = pipeline.process_file(&path).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("could not read file"));
    assert_eq!(result.salary_stats, None);
    assert!(path.exists());
    assert!(pipeline.gateway().store().keys().is_empty());
}

#[tokio::test]
async fn missing_file_is_reported() {
    let dir = tempdir().unwrap();
    let pipeline = memory_pipeline(&dir);
    let result = pipeline
        .process_file(&dir.path().join("incoming").join("ghost.csv"))
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("does not exist"));
    assert_eq!(result.file_name, "ghost.csv");
}

#[tokio::test]
async fn handle_appends_to_result_log_and_mirrors_it() {
    let dir = tempdir().unwrap();
    let pipeline = memory_pipeline(&dir);

    let a = drop_file(&pipeline, "a.csv", "id,salary\n1,90000\n");
    let b = drop_file(&pipeline, "b.csv", "id,salary\n1,10\n");
    assert!(pipeline.handle(&a).await.success);
    assert!(pipeline.handle(&b).await.success);

    let log_path = pipeline.result_log().current_path();
    let entries: Vec<serde_json::Value> =
        serde_json::from_slice(&fs::read(&log_path).unwrap()).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["file_name"], "a.csv");
    assert_eq!(entries[1]["records_filtered"], 0);

    let key = pipeline.result_log().current_key();
    assert!(key.starts_with("logs/pipeline_log_"));
    let mirrored = pipeline.gateway().store().body(&key).unwrap();
    assert_eq!(mirrored, fs::read(&log_path).unwrap());
}

#[tokio::test]
async fn corrupt_result_log_is_kept_aside_and_starts_over() {
    let dir = tempdir().unwrap();
    let pipeline = memory_pipeline(&dir);
    let log_path = pipeline.result_log().current_path();
    fs::write(&log_path, "{ not json").unwrap();

    let path = drop_file(&pipeline, "a.csv", "id,salary\n1,90000\n");
    pipeline.handle(&path).await;

    let entries: Vec<serde_json::Value> =
        serde_json::from_slice(&fs::read(&log_path).unwrap()).unwrap();
    assert_eq!(entries.len(), 1);

    let log_name = log_path.file_name().unwrap().to_string_lossy().into_owned();
    let kept: Vec<PathBuf> = fs::read_dir(&pipeline.config().log_folder)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(&format!("{log_name}.corrupt-"))
        })
        .collect();
    assert_eq!(kept.len(), 1, "{kept:?}");
    assert_eq!(fs::read_to_string(&kept[0]).unwrap(), "{ not json");
}

#[tokio::test]
async fn failed_results_are_logged_too() {
    let dir = tempdir().unwrap();
    let pipeline = memory_pipeline(&dir);
    let path = drop_file(&pipeline, "broken.json", "nope");

    let result = pipeline.handle(&path).await;
    assert!(!result.success);

    let entries: Vec<serde_json::Value> =
        serde_json::from_slice(&fs::read(pipeline.result_log().current_path()).unwrap()).unwrap();
    assert_eq!(entries[0]["success"], false);
    assert!(entries[0]["error"].is_string());
}

#[tokio::test]
async fn example_file_is_processed_by_the_startup_pass() {
    let dir = tempdir().unwrap();
    let pipeline = memory_pipeline(&dir);

    let example = pipeline.write_example_file().unwrap().unwrap();
    assert!(pipeline.write_example_file().unwrap().is_none());
    drop_file(&pipeline, "temp_partial.csv", "id,salary\n1,90000\n");

    let mut processed = ProcessedFiles::new();
    assert_eq!(pipeline.process_existing_files(&mut processed).await.unwrap(), 1);
    assert!(!example.exists());
    assert_eq!(processed.len(), 1);

    let entries: Vec<serde_json::Value> =
        serde_json::from_slice(&fs::read(pipeline.result_log().current_path()).unwrap()).unwrap();
    assert_eq!(entries[0]["records_processed"], 15);
    assert_eq!(entries[0]["records_filtered"], 5);
    assert_eq!(entries[0]["filtered_by_salary"], 10);

    assert_eq!(pipeline.process_existing_files(&mut processed).await.unwrap(), 0);
}

#[tokio::test]
async fn startup_pass_skips_already_processed_files() {
    let dir = tempdir().unwrap();
    let pipeline = memory_pipeline(&dir);
    let path = drop_file(&pipeline, "seen.csv", "id,salary\n1,90000\n");

    let mut processed = ProcessedFiles::new();
    processed.insert(&path);
    assert_eq!(pipeline.process_existing_files(&mut processed).await.unwrap(), 0);
    assert!(path.exists());
}
