//! Versioned in-memory [`ObjectStore`] for tests and local experiments.
//!
//! Keeps every version of every key. Versioning starts disabled, like a
//! fresh bucket: puts then overwrite the single `"null"` version. Individual
//! operations can be made to fail with a chosen [`StorageErrorKind`].

use crate::contract::{
    ObjectMetadata, ObjectStore, ObjectVersion, PutOutcome, StorageError, StorageErrorKind,
    StorageResult, StoreDescriptor, VersioningStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Vec<StoredVersion>>,
    versioning: Option<bool>,
    next_version: u64,
    failures: HashMap<&'static str, StorageErrorKind>,
    versioning_supported: bool,
}

/// Operation names accepted by [`MemoryStore::fail_on`].
pub mod ops {
    pub const PUT: &str = "put_object";
    pub const HEAD: &str = "head_object";
    pub const GET: &str = "get_object";
    pub const LIST: &str = "list_objects";
    pub const LIST_VERSIONS: &str = "list_object_versions";
    pub const DELETE: &str = "delete_object";
    pub const HEAD_BUCKET: &str = "head_bucket";
    pub const GET_VERSIONING: &str = "get_bucket_versioning";
    pub const PUT_VERSIONING: &str = "put_bucket_versioning";
}

#[derive(Debug)]
pub struct MemoryStore {
    bucket: String,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            state: Mutex::new(State {
                versioning_supported: true,
                ..State::default()
            }),
        }
    }

    /// A store whose backend rejects versioning requests.
    pub fn without_versioning_support(bucket: impl Into<String>) -> Self {
        let store = Self::new(bucket);
        store.lock().versioning_supported = false;
        store
    }

    /// Make every later call of `op` fail with `kind`.
    pub fn fail_on(&self, op: &'static str, kind: StorageErrorKind) {
        self.lock().failures.insert(op, kind);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Latest body stored under `key`.
    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .get(key)
            .and_then(|v| v.last())
            .map(|v| v.body.clone())
    }

    pub fn version_count(&self, key: &str) -> usize {
        self.lock().objects.get(key).map(Vec::len).unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-call.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check(state: &State, op: &'static str) -> StorageResult<()> {
        match state.failures.get(op) {
            Some(kind) => Err(StorageError::new(*kind, format!("injected failure in {op}"))),
            None => Ok(()),
        }
    }
}

fn not_found(key: &str) -> StorageError {
    StorageError::new(StorageErrorKind::NotFound, format!("no such key: {key}"))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> StorageResult<PutOutcome> {
        let mut state = self.lock();
        Self::check(&state, ops::PUT)?;
        let versioned = state.versioning == Some(true);
        let version_id = if versioned {
            state.next_version += 1;
            format!("v{:06}", state.next_version)
        } else {
            "null".to_string()
        };
        let entry = StoredVersion {
            version_id: version_id.clone(),
            body,
            last_modified: Utc::now(),
        };
        let versions = state.objects.entry(key.to_string()).or_default();
        if !versioned {
            versions.retain(|v| v.version_id != "null");
        }
        versions.push(entry);
        Ok(PutOutcome {
            version_id: versioned.then_some(version_id),
        })
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectMetadata> {
        let state = self.lock();
        Self::check(&state, ops::HEAD)?;
        let latest = state
            .objects
            .get(key)
            .and_then(|v| v.last())
            .ok_or_else(|| not_found(key))?;
        Ok(ObjectMetadata {
            key: key.to_string(),
            size_bytes: latest.body.len() as i64,
            version_id: Some(latest.version_id.clone()),
            last_modified: Some(latest.last_modified),
        })
    }

    async fn get_object(&self, key: &str, version_id: Option<String>) -> StorageResult<Vec<u8>> {
        let state = self.lock();
        Self::check(&state, ops::GET)?;
        let versions = state.objects.get(key).ok_or_else(|| not_found(key))?;
        let found = match &version_id {
            Some(id) => versions.iter().find(|v| &v.version_id == id).ok_or_else(|| {
                StorageError::new(
                    StorageErrorKind::VersionNotFound,
                    format!("no version {id} of {key}"),
                )
            })?,
            None => versions.last().ok_or_else(|| not_found(key))?,
        };
        Ok(found.body.clone())
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let state = self.lock();
        Self::check(&state, ops::LIST)?;
        Ok(state
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn list_object_versions(
        &self,
        prefix: Option<String>,
    ) -> StorageResult<Vec<ObjectVersion>> {
        let state = self.lock();
        Self::check(&state, ops::LIST_VERSIONS)?;
        let prefix = prefix.unwrap_or_default();
        let mut out = Vec::new();
        for (key, versions) in state.objects.iter().filter(|(k, _)| k.starts_with(&prefix)) {
            let last = versions.len().saturating_sub(1);
            for (i, v) in versions.iter().enumerate().rev() {
                out.push(ObjectVersion {
                    key: key.clone(),
                    version_id: v.version_id.clone(),
                    last_modified: Some(v.last_modified),
                    is_latest: i == last,
                    size_bytes: v.body.len() as i64,
                });
            }
        }
        Ok(out)
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let mut state = self.lock();
        Self::check(&state, ops::DELETE)?;
        state.objects.remove(key).map(|_| ()).ok_or_else(|| not_found(key))
    }

    async fn head_bucket(&self) -> StorageResult<()> {
        let state = self.lock();
        Self::check(&state, ops::HEAD_BUCKET)
    }

    async fn get_bucket_versioning(&self) -> StorageResult<VersioningStatus> {
        let state = self.lock();
        Self::check(&state, ops::GET_VERSIONING)?;
        Ok(match state.versioning {
            Some(true) => VersioningStatus::Enabled,
            Some(false) => VersioningStatus::Suspended,
            None => VersioningStatus::Disabled,
        })
    }

    async fn put_bucket_versioning(&self, enabled: bool) -> StorageResult<()> {
        let mut state = self.lock();
        Self::check(&state, ops::PUT_VERSIONING)?;
        if !state.versioning_supported {
            return Err(StorageError::new(
                StorageErrorKind::NotSupported,
                "versioning is not implemented by this backend",
            ));
        }
        state.versioning = Some(enabled);
        Ok(())
    }

    fn descriptor(&self) -> StoreDescriptor {
        StoreDescriptor {
            bucket: self.bucket.clone(),
            endpoint: "memory://".to_string(),
            region: "local".to_string(),
            ssl_verify: false,
        }
    }
}
