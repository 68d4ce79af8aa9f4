//! Object Storage Gateway: the "fails softly" contract the pipeline calls.
//!
//! [`StorageGateway`] wraps any [`ObjectStore`] transport. Every operation
//! converts transport errors into a plain result (`bool`, `Option`, empty
//! `Vec`) and a `tracing` diagnostic, so one bad remote call can never take
//! the pipeline down. Calls are bounded by a semaphore so a slow store cannot
//! pile up unbounded in-flight requests.

use crate::contract::{
    ObjectStore, ObjectVersion, StorageError, StorageErrorKind, StoreDescriptor, VersioningStatus,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info, warn};

/// Version id reported when the store did not assign one.
pub const NULL_VERSION: &str = "null";

pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketExistence {
    Exists,
    Missing,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub exists: BucketExistence,
    pub versioning_status: VersioningStatus,
    pub endpoint: String,
    pub region: String,
    pub ssl_verify: bool,
}

pub struct StorageGateway<S> {
    store: S,
    permits: Semaphore,
}

impl<S: ObjectStore> StorageGateway<S> {
    pub fn new(store: S) -> Self {
        Self::with_max_in_flight(store, DEFAULT_MAX_IN_FLIGHT)
    }

    pub fn with_max_in_flight(store: S, max_in_flight: usize) -> Self {
        let d = store.descriptor();
        info!(
            bucket = %d.bucket,
            endpoint = %d.endpoint,
            ssl_verify = d.ssl_verify,
            max_in_flight,
            "Storage gateway initialised"
        );
        Self {
            store,
            permits: Semaphore::new(max_in_flight.max(1)),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bucket(&self) -> String {
        self.store.descriptor().bucket
    }

    async fn permit(&self) -> Option<SemaphorePermit<'_>> {
        match self.permits.acquire().await {
            Ok(p) => Some(p),
            Err(e) => {
                error!(error = %e, "Storage gateway is closed");
                None
            }
        }
    }

    /// Upload a local file. False if the file is missing or the store errors.
    pub async fn upload(&self, local_path: &Path, object_key: &str) -> bool {
        let body = match tokio::fs::read(local_path).await {
            Ok(body) => body,
            Err(e) => {
                error!(path = %local_path.display(), error = %e, "Local file for upload is not readable");
                return false;
            }
        };
        let Some(_permit) = self.permit().await else {
            return false;
        };
        info!(key = object_key, path = %local_path.display(), size = body.len(), "Uploading");
        match self.store.put_object(object_key, body).await {
            Ok(_) => {
                info!(key = object_key, "Uploaded");
                true
            }
            Err(e) => {
                error!(key = object_key, kind = %e.kind, error = %e.message, "Upload failed");
                false
            }
        }
    }

    /// Upload, then read back the version id the store assigned.
    ///
    /// `None` means the upload itself failed. A failed metadata read or a
    /// store without versioning yields `Some("null")`.
    pub async fn upload_with_versioning(
        &self,
        local_path: &Path,
        object_key: &str,
    ) -> Option<String> {
        if !self.upload(local_path, object_key).await {
            return None;
        }
        let _permit = self.permit().await?;
        match self.store.head_object(object_key).await {
            Ok(meta) => {
                let version_id = meta.version_id.unwrap_or_else(|| NULL_VERSION.to_string());
                info!(key = object_key, version_id = %version_id, "Uploaded with versioning");
                Some(version_id)
            }
            Err(e) => {
                warn!(key = object_key, kind = %e.kind, error = %e.message, "Could not read version id after upload");
                Some(NULL_VERSION.to_string())
            }
        }
    }

    /// Download the latest version of `object_key` to `local_path`.
    pub async fn download(&self, object_key: &str, local_path: &Path) -> bool {
        self.fetch(object_key, local_path, None).await
    }

    /// Download a specific version of `object_key` to `local_path`.
    pub async fn download_version(
        &self,
        object_key: &str,
        local_path: &Path,
        version_id: &str,
    ) -> bool {
        self.fetch(object_key, local_path, Some(version_id.to_string()))
            .await
    }

    async fn fetch(&self, object_key: &str, local_path: &Path, version: Option<String>) -> bool {
        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!(path = %parent.display(), error = %e, "Could not create download directory");
                return false;
            }
        }
        let Some(_permit) = self.permit().await else {
            return false;
        };
        info!(key = object_key, version = ?version, dest = %local_path.display(), "Downloading");
        let body = match self.store.get_object(object_key, version.clone()).await {
            Ok(body) => body,
            Err(e) => {
                match e.kind {
                    StorageErrorKind::NotFound => {
                        error!(key = object_key, "Object not found")
                    }
                    StorageErrorKind::VersionNotFound => {
                        error!(key = object_key, version = ?version, "Version does not exist for object")
                    }
                    _ => {
                        error!(key = object_key, kind = %e.kind, error = %e.message, "Download failed")
                    }
                }
                return false;
            }
        };
        match tokio::fs::write(local_path, &body).await {
            Ok(()) => {
                info!(key = object_key, dest = %local_path.display(), size = body.len(), "Downloaded");
                true
            }
            Err(e) => {
                error!(dest = %local_path.display(), error = %e, "Could not write downloaded object");
                false
            }
        }
    }

    /// Keys under `prefix`; empty on any failure.
    pub async fn list_files(&self, prefix: &str) -> Vec<String> {
        let Some(_permit) = self.permit().await else {
            return Vec::new();
        };
        match self.store.list_objects(prefix).await {
            Ok(keys) => {
                if keys.is_empty() {
                    info!(prefix, "No objects found");
                } else {
                    info!(prefix, count = keys.len(), "Listed objects");
                }
                keys
            }
            Err(e) if e.kind == StorageErrorKind::BucketNotFound => {
                error!(bucket = %self.bucket(), "Bucket does not exist");
                Vec::new()
            }
            Err(e) => {
                error!(prefix, kind = %e.kind, error = %e.message, "Listing objects failed");
                Vec::new()
            }
        }
    }

    pub async fn file_exists(&self, object_key: &str) -> bool {
        let Some(_permit) = self.permit().await else {
            return false;
        };
        match self.store.head_object(object_key).await {
            Ok(_) => {
                debug!(key = object_key, "Object exists");
                true
            }
            Err(e) if e.is_not_found() => {
                debug!(key = object_key, "Object does not exist");
                false
            }
            Err(e) => {
                error!(key = object_key, kind = %e.kind, error = %e.message, "Existence check failed");
                false
            }
        }
    }

    /// Turn on bucket versioning. Safe to call repeatedly.
    pub async fn enable_versioning(&self) -> bool {
        let Some(_permit) = self.permit().await else {
            return false;
        };
        let bucket = self.bucket();
        info!(bucket = %bucket, "Enabling bucket versioning");
        match self.store.put_bucket_versioning(true).await {
            Ok(()) => {
                info!(bucket = %bucket, "Bucket versioning enabled");
                true
            }
            Err(StorageError {
                kind: StorageErrorKind::AccessDenied,
                ..
            }) => {
                error!(bucket = %bucket, "No permission to enable versioning");
                false
            }
            Err(StorageError {
                kind: StorageErrorKind::NotSupported,
                ..
            }) => {
                warn!(bucket = %bucket, "Versioning is not supported by the store");
                false
            }
            Err(e) => {
                error!(bucket = %bucket, kind = %e.kind, error = %e.message, "Enabling versioning failed");
                false
            }
        }
    }

    /// All versions, or the versions of keys starting with `object_key`.
    pub async fn list_versions(&self, object_key: Option<&str>) -> Vec<ObjectVersion> {
        let Some(_permit) = self.permit().await else {
            return Vec::new();
        };
        match object_key {
            Some(key) => info!(key, "Listing object versions"),
            None => info!("Listing all versions in bucket"),
        }
        match self
            .store
            .list_object_versions(object_key.map(str::to_string))
            .await
        {
            Ok(versions) => {
                info!(count = versions.len(), "Listed versions");
                versions
            }
            Err(e) if e.kind == StorageErrorKind::AccessDenied => {
                error!("No permission to list versions");
                Vec::new()
            }
            Err(e) => {
                error!(kind = %e.kind, error = %e.message, "Listing versions failed");
                Vec::new()
            }
        }
    }

    /// Delete `object_key`. An already absent key counts as deleted.
    pub async fn delete_file(&self, object_key: &str) -> bool {
        let Some(_permit) = self.permit().await else {
            return false;
        };
        info!(key = object_key, "Deleting object");
        match self.store.delete_object(object_key).await {
            Ok(()) => {
                info!(key = object_key, "Deleted");
                true
            }
            Err(e) if e.is_not_found() => {
                warn!(key = object_key, "Object to delete was already absent");
                true
            }
            Err(e) => {
                error!(key = object_key, kind = %e.kind, error = %e.message, "Delete failed");
                false
            }
        }
    }

    /// Bucket facts. Each probe fails independently into `Unknown`.
    pub async fn bucket_info(&self) -> BucketInfo {
        let StoreDescriptor {
            bucket,
            endpoint,
            region,
            ssl_verify,
        } = self.store.descriptor();

        let exists = match self.permit().await {
            None => BucketExistence::Unknown,
            Some(_permit) => match self.store.head_bucket().await {
                Ok(()) => BucketExistence::Exists,
                Err(e)
                    if matches!(
                        e.kind,
                        StorageErrorKind::BucketNotFound | StorageErrorKind::NotFound
                    ) =>
                {
                    warn!(bucket = %bucket, "Bucket does not exist");
                    BucketExistence::Missing
                }
                Err(e) => {
                    warn!(bucket = %bucket, kind = %e.kind, error = %e.message, "Could not probe bucket");
                    BucketExistence::Unknown
                }
            },
        };

        let versioning_status = match self.permit().await {
            None => VersioningStatus::Unknown,
            Some(_permit) => match self.store.get_bucket_versioning().await {
                Ok(status) => status,
                Err(e) => {
                    warn!(bucket = %bucket, kind = %e.kind, error = %e.message, "Could not read versioning status");
                    VersioningStatus::Unknown
                }
            },
        };

        BucketInfo {
            name: bucket,
            exists,
            versioning_status,
            endpoint,
            region,
            ssl_verify,
        }
    }
}
