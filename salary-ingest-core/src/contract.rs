//! # contract: seams between the pipeline and its collaborators
//!
//! This module defines the traits the pipeline is written against and the
//! plain data types that cross them:
//!
//! - [`ObjectStore`]: raw, typed-error transport over a key-versioned blob
//!   store. Implemented by the S3 client in the binary crate, by
//!   [`crate::memory_store::MemoryStore`] and by the generated
//!   `MockObjectStore`.
//! - [`FileHandler`]: what the directory monitor dispatches a stable file to.
//!   The real implementation is [`crate::pipeline::DataPipeline`].
//!
//! Both traits are annotated for `mockall`, so consumers can build
//! deterministic mocks in tests (enable the `test-export-mocks` feature from
//! other crates).
//!
//! The soft "never raise" behaviour lives one layer up, in
//! [`crate::storage::StorageGateway`]; transports report failures precisely
//! through [`StorageError`] and leave the policy to the gateway.

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Failure categories a transport can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorKind {
    /// The object key does not exist.
    NotFound,
    /// The bucket itself does not exist.
    BucketNotFound,
    /// The key exists but the requested version does not.
    VersionNotFound,
    AccessDenied,
    /// The backend does not implement the operation (e.g. versioning).
    NotSupported,
    /// Network, timeout or throttling failure after the transport's retries.
    Transient,
    Unknown,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageErrorKind::NotFound => "not found",
            StorageErrorKind::BucketNotFound => "bucket not found",
            StorageErrorKind::VersionNotFound => "version not found",
            StorageErrorKind::AccessDenied => "access denied",
            StorageErrorKind::NotSupported => "not supported",
            StorageErrorKind::Transient => "transient",
            StorageErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Returned by a successful put.
#[derive(Debug, Clone, PartialEq)]
pub struct PutOutcome {
    /// Version assigned by the store, `None` when versioning is off.
    pub version_id: Option<String>,
}

/// Object metadata as returned by a head request.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMetadata {
    pub key: String,
    pub size_bytes: i64,
    pub version_id: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One stored version of an object. Never built by the pipeline, only listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub is_latest: bool,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningStatus {
    Enabled,
    Suspended,
    Disabled,
    Unknown,
}

impl fmt::Display for VersioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersioningStatus::Enabled => "Enabled",
            VersioningStatus::Suspended => "Suspended",
            VersioningStatus::Disabled => "Disabled",
            VersioningStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Static facts about where a store points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDescriptor {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub ssl_verify: bool,
}

/// Raw transport over a single bucket of a key-versioned object store.
///
/// Implementations own retries and timeouts; every method reports failure
/// through a typed [`StorageError`] and must not panic.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, creating a new version when versioning is on.
    async fn put_object(&self, key: &str, body: Vec<u8>) -> StorageResult<PutOutcome>;

    /// Read metadata of the latest version of `key`.
    async fn head_object(&self, key: &str) -> StorageResult<ObjectMetadata>;

    /// Read the bytes of `key`, optionally pinned to `version_id`.
    async fn get_object(&self, key: &str, version_id: Option<String>) -> StorageResult<Vec<u8>>;

    /// List keys starting with `prefix`, in key order.
    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// List all versions, restricted to keys starting with `prefix` if given.
    async fn list_object_versions(&self, prefix: Option<String>)
        -> StorageResult<Vec<ObjectVersion>>;

    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// Succeeds iff the bucket exists and is reachable.
    async fn head_bucket(&self) -> StorageResult<()>;

    async fn get_bucket_versioning(&self) -> StorageResult<VersioningStatus>;

    async fn put_bucket_versioning(&self, enabled: bool) -> StorageResult<()>;

    fn descriptor(&self) -> StoreDescriptor;
}

/// Per-pass statistics of the salary filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalaryStats {
    pub filtered_count: usize,
    pub salary_columns: Vec<String>,
    pub original_count: usize,
}

/// Outcome of processing one input file; appended verbatim to the result log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub file_path: String,
    pub file_name: String,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub success: bool,
    pub error: Option<String>,
    pub records_processed: usize,
    pub records_filtered: usize,
    pub filtered_by_salary: usize,
    pub salary_stats: Option<SalaryStats>,
    pub s3_path: Option<String>,
    pub version_id: Option<String>,
}

impl ProcessingResult {
    pub fn started(path: &Path) -> Self {
        Self {
            file_path: path.display().to_string(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            start_time: Local::now(),
            end_time: None,
            success: false,
            error: None,
            records_processed: 0,
            records_filtered: 0,
            filtered_by_salary: 0,
            salary_stats: None,
            s3_path: None,
            version_id: None,
        }
    }

    /// Records a failure and stamps the end time.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.end_time = Some(Local::now());
        self
    }
}

/// Receives files the directory monitor judged stable.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FileHandler: Send + Sync {
    /// Process the file end-to-end and return its recorded outcome.
    async fn handle(&self, path: &Path) -> ProcessingResult;
}
