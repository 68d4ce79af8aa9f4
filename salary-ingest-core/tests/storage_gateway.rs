use salary_ingest_core::contract::{
    MockObjectStore, ObjectMetadata, PutOutcome, StorageError, StorageErrorKind, StoreDescriptor,
    VersioningStatus,
};
use salary_ingest_core::memory_store::{ops, MemoryStore};
use salary_ingest_core::storage::{BucketExistence, StorageGateway, NULL_VERSION};
use std::fs;
use tempfile::tempdir;

fn descriptor() -> StoreDescriptor {
    StoreDescriptor {
        bucket: "de-practice".to_string(),
        endpoint: "http://localhost:9000".to_string(),
        region: "ru-1".to_string(),
        ssl_verify: false,
    }
}

fn mock_store() -> MockObjectStore {
    let mut store = MockObjectStore::new();
    store.expect_descriptor().returning(descriptor);
    store
}

#[tokio::test]
async fn upload_then_download_round_trips() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("a.csv");
    fs::write(&src, "id,salary\n1,60000\n").unwrap();
    let gateway = StorageGateway::new(MemoryStore::new("bucket"));

    assert!(gateway.upload(&src, "processed/a.csv").await);
    assert!(gateway.file_exists("processed/a.csv").await);

    let dest = dir.path().join("nested/out/a.csv");
    assert!(gateway.download("processed/a.csv", &dest).await);
    assert_eq!(fs::read(&dest).unwrap(), fs::read(&src).unwrap());
}

#[tokio::test]
async fn upload_of_missing_local_file_is_false() {
    let dir = tempdir().unwrap();
    let gateway = StorageGateway::new(MemoryStore::new("bucket"));
    assert!(!gateway.upload(&dir.path().join("absent.csv"), "k").await);
    assert!(gateway.store().keys().is_empty());
}

#[tokio::test]
async fn versions_are_listed_and_downloadable() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("log.json");
    let gateway = StorageGateway::new(MemoryStore::new("bucket"));
    assert!(gateway.enable_versioning().await);

    fs::write(&src, "[1]").unwrap();
    let v1 = gateway.upload_with_versioning(&src, "logs/log.json").await.unwrap();
    fs::write(&src, "[1,2]").unwrap();
    let v2 = gateway.upload_with_versioning(&src, "logs/log.json").await.unwrap();
    assert_ne!(v1, v2);
    assert_ne!(v1, NULL_VERSION);

    let versions = gateway.list_versions(Some("logs/")).await;
    assert_eq!(versions.len(), 2);
    assert_eq!(versions.iter().filter(|v| v.is_latest).count(), 1);

    let old = dir.path().join("old.json");
    assert!(gateway.download_version("logs/log.json", &old, &v1).await);
    assert_eq!(fs::read_to_string(&old).unwrap(), "[1]");

    assert!(!gateway.download_version("logs/log.json", &old, "nope").await);
}

#[tokio::test]
async fn unversioned_bucket_reports_null_version() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("a.csv");
    fs::write(&src, "x").unwrap();
    let gateway = StorageGateway::new(MemoryStore::new("bucket"));

    let version = gateway.upload_with_versioning(&src, "a.csv").await;
    assert_eq!(version.as_deref(), Some(NULL_VERSION));
    assert_eq!(gateway.store().version_count("a.csv"), 1);
}

#[tokio::test]
async fn head_failure_after_upload_still_yields_null_version() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("a.csv");
    fs::write(&src, "x").unwrap();

    let mut store = mock_store();
    store
        .expect_put_object()
        .withf(|key, _| key == "k")
        .times(1)
        .returning(|_, _| Ok(PutOutcome { version_id: None }));
    store
        .expect_head_object()
        .returning(|_| Err(StorageError::new(StorageErrorKind::Transient, "timeout")));
    let gateway = StorageGateway::new(store);

    assert_eq!(
        gateway.upload_with_versioning(&src, "k").await.as_deref(),
        Some(NULL_VERSION)
    );
}

#[tokio::test]
async fn failed_put_yields_none() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("a.csv");
    fs::write(&src, "x").unwrap();
    let store = MemoryStore::new("bucket");
    store.fail_on(ops::PUT, StorageErrorKind::Transient);
    let gateway = StorageGateway::new(store);

    assert!(!gateway.upload(&src, "k").await);
    assert_eq!(gateway.upload_with_versioning(&src, "k").await, None);
}

#[tokio::test]
async fn soft_failures_never_raise() {
    let dir = tempdir().unwrap();
    let store = MemoryStore::new("bucket");
    store.fail_on(ops::LIST, StorageErrorKind::BucketNotFound);
    store.fail_on(ops::LIST_VERSIONS, StorageErrorKind::AccessDenied);
    store.fail_on(ops::HEAD, StorageErrorKind::Transient);
    let gateway = StorageGateway::new(store);

    assert!(gateway.list_files("processed/").await.is_empty());
    assert!(gateway.list_versions(None).await.is_empty());
    assert!(!gateway.file_exists("k").await);
    assert!(!gateway.download("k", &dir.path().join("k")).await);
    assert!(!dir.path().join("k").exists());
}

#[tokio::test]
async fn deleting_an_absent_key_counts_as_deleted() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("a.csv");
    fs::write(&src, "x").unwrap();
    let gateway = StorageGateway::new(MemoryStore::new("bucket"));

    assert!(gateway.upload(&src, "a.csv").await);
    assert!(gateway.delete_file("a.csv").await);
    assert!(!gateway.file_exists("a.csv").await);
    assert!(gateway.delete_file("a.csv").await);
}

#[tokio::test]
async fn delete_reports_access_denied_as_false() {
    let mut store = mock_store();
    store
        .expect_delete_object()
        .returning(|_| Err(StorageError::new(StorageErrorKind::AccessDenied, "denied")));
    let gateway = StorageGateway::new(store);
    assert!(!gateway.delete_file("a.csv").await);
}

#[tokio::test]
async fn enabling_versioning_on_unsupported_store_is_false() {
    let gateway = StorageGateway::new(MemoryStore::without_versioning_support("bucket"));
    assert!(!gateway.enable_versioning().await);
    assert!(!gateway.enable_versioning().await);
}

#[tokio::test]
async fn enabling_versioning_is_idempotent() {
    let gateway = StorageGateway::new(MemoryStore::new("bucket"));
    assert!(gateway.enable_versioning().await);
    assert!(gateway.enable_versioning().await);
    assert_eq!(
        gateway.bucket_info().await.versioning_status,
        VersioningStatus::Enabled
    );
}

#[tokio::test]
async fn list_files_filters_by_prefix_in_key_order() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("a.csv");
    fs::write(&src, "x").unwrap();
    let gateway = StorageGateway::new(MemoryStore::new("bucket"));
    for key in ["processed/b.csv", "logs/l.json", "processed/a.csv"] {
        assert!(gateway.upload(&src, key).await);
    }
    assert_eq!(
        gateway.list_files("processed/").await,
        vec!["processed/a.csv", "processed/b.csv"]
    );
}

#[tokio::test]
async fn bucket_info_probes_fail_independently() {
    let mut store = mock_store();
    store
        .expect_head_bucket()
        .returning(|| Err(StorageError::new(StorageErrorKind::BucketNotFound, "no bucket")));
    store
        .expect_get_bucket_versioning()
        .returning(|| Err(StorageError::new(StorageErrorKind::Transient, "timeout")));
    let gateway = StorageGateway::new(store);

    let info = gateway.bucket_info().await;
    assert_eq!(info.name, "de-practice");
    assert_eq!(info.exists, BucketExistence::Missing);
    assert_eq!(info.versioning_status, VersioningStatus::Unknown);
    assert_eq!(info.endpoint, "http://localhost:9000");
    assert!(!info.ssl_verify);
}

#[tokio::test]
async fn bucket_info_of_healthy_store() {
    let mut store = mock_store();
    store.expect_head_bucket().returning(|| Ok(()));
    store
        .expect_get_bucket_versioning()
        .returning(|| Ok(VersioningStatus::Suspended));
    store.expect_head_object().never();
    let gateway = StorageGateway::new(store);

    let info = gateway.bucket_info().await;
    assert_eq!(info.exists, BucketExistence::Exists);
    assert_eq!(info.versioning_status, VersioningStatus::Suspended);
}

#[tokio::test]
async fn file_exists_uses_head_metadata() {
    let mut store = mock_store();
    store.expect_head_object().returning(|key| {
        if key == "present" {
            Ok(ObjectMetadata {
                key: key.to_string(),
                size_bytes: 3,
                version_id: None,
                last_modified: None,
            })
        } else {
            Err(StorageError::new(StorageErrorKind::NotFound, "missing"))
        }
    });
    let gateway = StorageGateway::new(store);
    assert!(gateway.file_exists("present").await);
    assert!(!gateway.file_exists("absent").await);
}
