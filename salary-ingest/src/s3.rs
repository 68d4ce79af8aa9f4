//! S3-compatible transport for the storage gateway.
//!
//! [`S3Store`] implements [`ObjectStore`] on top of `aws-sdk-s3`. Retries and
//! timeouts are configured on the SDK client; every SDK error is classified
//! into a [`StorageErrorKind`] so the gateway can report it precisely.

use crate::load_config::StorageSettings;
use anyhow::{bail, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketVersioningStatus, VersioningConfiguration};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use salary_ingest_core::contract::{
    ObjectMetadata, ObjectStore, ObjectVersion, PutOutcome, StorageError, StorageErrorKind,
    StorageResult, StoreDescriptor, VersioningStatus,
};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct S3Store {
    client: Client,
    bucket: String,
    endpoint: String,
    region: String,
    ssl_verify: bool,
}

impl S3Store {
    /// Builds the SDK client. Missing credentials are fatal.
    pub fn connect(settings: &StorageSettings) -> Result<Self> {
        if settings.access_key.trim().is_empty() || settings.secret_key.trim().is_empty() {
            bail!(
                "S3 credentials missing: set S3_ACCESS_KEY and S3_SECRET_KEY (environment or .env)"
            );
        }
        if settings.bucket.trim().is_empty() {
            bail!("S3 bucket name is empty");
        }
        if !settings.verify_ssl {
            warn!(
                endpoint = %settings.endpoint,
                "verify_ssl is false; certificates are still verified by the client"
            );
        }

        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "salary-ingest",
        );
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .read_timeout(Duration::from_secs(settings.read_timeout_secs))
            .build();

        let s3_config = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(settings.region.clone()))
            .force_path_style(settings.path_style)
            .endpoint_url(&settings.endpoint)
            .retry_config(RetryConfig::standard().with_max_attempts(settings.max_attempts.max(1)))
            .timeout_config(timeouts)
            .build();
        let client = Client::from_conf(s3_config);

        info!(
            bucket = %settings.bucket,
            endpoint = %settings.endpoint,
            region = %settings.region,
            max_attempts = settings.max_attempts,
            "S3 client initialised"
        );
        Ok(Self {
            client,
            bucket: settings.bucket.clone(),
            endpoint: settings.endpoint.clone(),
            region: settings.region.clone(),
            ssl_verify: settings.verify_ssl,
        })
    }
}

fn classify<E>(op: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.code().map(str::to_string);
    let status = err.raw_response().map(|r| r.status().as_u16());
    let kind = match (code.as_deref(), status) {
        (Some("NoSuchBucket"), _) => StorageErrorKind::BucketNotFound,
        (Some("NoSuchVersion"), _) => StorageErrorKind::VersionNotFound,
        (Some("NoSuchKey" | "NotFound"), _) | (None, Some(404)) => StorageErrorKind::NotFound,
        (Some("AccessDenied" | "Forbidden"), _) | (_, Some(403)) => StorageErrorKind::AccessDenied,
        (Some("NotImplemented"), _) | (_, Some(501)) => StorageErrorKind::NotSupported,
        (_, Some(s)) if s == 429 || s >= 500 => StorageErrorKind::Transient,
        _ => match &err {
            SdkError::TimeoutError(_)
            | SdkError::DispatchFailure(_)
            | SdkError::ResponseError(_) => StorageErrorKind::Transient,
            _ => StorageErrorKind::Unknown,
        },
    };
    let message = format!("{op}: {}", DisplayErrorContext(&err));
    debug!(op, ?code, ?status, %kind, "S3 call failed");
    StorageError::new(kind, message)
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> StorageResult<PutOutcome> {
        let out = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify("put_object", e))?;
        Ok(PutOutcome {
            version_id: out.version_id().map(str::to_string),
        })
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectMetadata> {
        let out = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("head_object", e))?;
        Ok(ObjectMetadata {
            key: key.to_string(),
            size_bytes: out.content_length().unwrap_or(0),
            version_id: out.version_id().map(str::to_string),
            last_modified: out.last_modified().and_then(to_chrono),
        })
    }

    async fn get_object(&self, key: &str, version_id: Option<String>) -> StorageResult<Vec<u8>> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_version_id(version_id)
            .send()
            .await
            .map_err(|e| classify("get_object", e))?;
        let bytes = out.body.collect().await.map_err(|e| {
            StorageError::new(
                StorageErrorKind::Transient,
                format!("get_object: reading body of {key}: {e}"),
            )
        })?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let out = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| classify("list_objects_v2", e))?;
            keys.extend(out.contents().iter().filter_map(|o| o.key().map(str::to_string)));
            match out.next_continuation_token() {
                Some(next) if out.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn list_object_versions(
        &self,
        prefix: Option<String>,
    ) -> StorageResult<Vec<ObjectVersion>> {
        let mut versions = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;
        loop {
            let out = self
                .client
                .list_object_versions()
                .bucket(&self.bucket)
                .set_prefix(prefix.clone())
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
                .map_err(|e| classify("list_object_versions", e))?;
            versions.extend(out.versions().iter().map(|v| ObjectVersion {
                key: v.key().unwrap_or_default().to_string(),
                version_id: v.version_id().unwrap_or("null").to_string(),
                last_modified: v.last_modified().and_then(to_chrono),
                is_latest: v.is_latest().unwrap_or(false),
                size_bytes: v.size().unwrap_or(0),
            }));
            if !out.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = out.next_key_marker().map(str::to_string);
            version_marker = out.next_version_id_marker().map(str::to_string);
            if key_marker.is_none() && version_marker.is_none() {
                break;
            }
        }
        Ok(versions)
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("delete_object", e))?;
        Ok(())
    }

    async fn head_bucket(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| classify("head_bucket", e))?;
        Ok(())
    }

    async fn get_bucket_versioning(&self) -> StorageResult<VersioningStatus> {
        let out = self
            .client
            .get_bucket_versioning()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| classify("get_bucket_versioning", e))?;
        Ok(match out.status() {
            Some(BucketVersioningStatus::Enabled) => VersioningStatus::Enabled,
            Some(BucketVersioningStatus::Suspended) => VersioningStatus::Suspended,
            None => VersioningStatus::Disabled,
            Some(_) => VersioningStatus::Unknown,
        })
    }

    async fn put_bucket_versioning(&self, enabled: bool) -> StorageResult<()> {
        let status = if enabled {
            BucketVersioningStatus::Enabled
        } else {
            BucketVersioningStatus::Suspended
        };
        self.client
            .put_bucket_versioning()
            .bucket(&self.bucket)
            .versioning_configuration(VersioningConfiguration::builder().status(status).build())
            .send()
            .await
            .map_err(|e| classify("put_bucket_versioning", e))?;
        Ok(())
    }

    fn descriptor(&self) -> StoreDescriptor {
        StoreDescriptor {
            bucket: self.bucket.clone(),
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            ssl_verify: self.ssl_verify,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StorageSettings {
        StorageSettings {
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            ..StorageSettings::default()
        }
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let err = S3Store::connect(&StorageSettings::default()).err().unwrap();
        assert!(err.to_string().contains("credentials"));
    }

    #[test]
    fn descriptor_reflects_settings() {
        let store = S3Store::connect(&settings()).unwrap();
        let d = store.descriptor();
        assert_eq!(d.bucket, "de-practice");
        assert_eq!(d.endpoint, "http://localhost:9000");
        assert_eq!(d.region, "ru-1");
        assert!(!d.ssl_verify);
    }
}
