//! S3 storage provider.
//!
//! Works against AWS and any S3-compatible store (MinIO, Cloudflare R2)
//! via `endpoint` + `force_path_style`. Credentials come from the standard
//! SDK chain (env vars, profile, IMDS) — never from builder config.
//!
//! Retry and timeout policy live in the SDK client: transient failures
//! (timeouts, 5xx) are retried up to `max_attempts` before surfacing as
//! [`StorageError::Transient`]; auth failures surface immediately as
//! [`StorageError::Auth`] and are fatal for the run. One client is shared
//! across all workers, so the SDK's connection pool is the socket bound the
//! orchestrator's concurrency cap must respect.

use super::{matches_formats, normalize_key, StorageError, StorageObject, StorageProvider};
use crate::config::StorageConfig;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;
use tracing::debug;

/// Storage provider over an S3-compatible object store.
pub struct S3Provider {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
    prefix: String,
    endpoint: String,
    public_base_url: String,
    formats: Vec<String>,
}

impl S3Provider {
    /// Build the SDK client from storage config and the ambient credential
    /// chain. Fails only on config-level problems; connectivity issues show
    /// up on the first operation.
    pub async fn connect(
        config: &StorageConfig,
        formats: Vec<String>,
    ) -> Result<Self, StorageError> {
        let retry = aws_config::retry::RetryConfig::standard()
            .with_max_attempts(config.max_attempts.max(1));
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .operation_timeout(Duration::from_secs(config.operation_timeout_secs))
            .build();

        let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .retry_config(retry)
            .timeout_config(timeouts)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&base);
        if !config.endpoint.is_empty() {
            builder = builder.endpoint_url(config.endpoint.clone());
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            prefix: config.prefix.clone(),
            endpoint: config.endpoint.clone(),
            public_base_url: config.public_base_url.clone(),
            formats,
        })
    }

    /// Re-attach the configured prefix to a normalized key.
    fn full_key(&self, key: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}/{key}")
        }
    }

    async fn list(&self) -> Result<Vec<StorageObject>, StorageError> {
        let mut objects = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(if self.prefix.is_empty() {
                None
            } else {
                Some(self.prefix.clone())
            })
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| classify("list_objects_v2", e))?;
            for obj in page.contents() {
                let raw_key = match obj.key() {
                    Some(k) => k,
                    None => continue,
                };
                let key = normalize_key(raw_key, &self.prefix);
                if key.is_empty() || key.ends_with('/') {
                    continue;
                }
                objects.push(StorageObject {
                    key,
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj
                        .last_modified()
                        .map(smithy_to_chrono)
                        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()),
                    etag: obj.e_tag().unwrap_or("").trim_matches('"').to_string(),
                });
            }
        }
        // S3 pages arrive lexicographically, but the invariant is ours to keep.
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(target: "storage", bucket = %self.bucket, objects = objects.len(), "listed bucket");
        Ok(objects)
    }
}

fn smithy_to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    Utc.timestamp_opt(dt.secs(), dt.subsec_nanos())
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

/// Sort an SDK error into the run-level taxonomy.
///
/// Auth codes are fatal; 5xx and transport-level failures are transient
/// (already retried by the SDK by the time they reach here).
fn classify<E>(op: &str, err: SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            StorageError::Transient(format!("{op}: {err:?}"))
        }
        SdkError::ServiceError(se) => {
            let code = se.err().code().unwrap_or("");
            if matches!(
                code,
                "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken"
            ) {
                StorageError::Auth(format!("{op}: {code}"))
            } else if se.raw().status().as_u16() >= 500 {
                StorageError::Transient(format!("{op}: {code}"))
            } else {
                StorageError::Backend(format!("{op}: {err:?}"))
            }
        }
        _ => StorageError::Backend(format!("{op}: {err:?}")),
    }
}

#[async_trait::async_trait]
impl StorageProvider for S3Provider {
    async fn list_images(&self) -> Result<Vec<StorageObject>, StorageError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|o| matches_formats(&o.key, &self.formats))
            .collect())
    }

    async fn list_all_files(&self) -> Result<Vec<StorageObject>, StorageError> {
        self.list().await
    }

    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await;
        match resp {
            Ok(out) => {
                let collected = out
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Transient(format!("get_object body: {e}")))?;
                Ok(Some(collected.into_bytes().to_vec()))
            }
            Err(SdkError::ServiceError(se)) if se.err().is_no_such_key() => Ok(None),
            Err(e) => Err(classify("get_object", e)),
        }
    }

    async fn upload_file(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StorageObject, StorageError> {
        let size = bytes.len() as u64;
        let out = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| classify("put_object", e))?;

        Ok(StorageObject {
            key: key.to_string(),
            size,
            last_modified: Utc::now(),
            etag: out.e_tag().unwrap_or("").trim_matches('"').to_string(),
        })
    }

    async fn delete_file(&self, key: &str) -> Result<(), StorageError> {
        // DeleteObject is a no-op for missing keys on S3 itself.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| classify("delete_object", e))?;
        Ok(())
    }

    fn generate_public_url(&self, key: &str) -> String {
        public_url(
            &self.public_base_url,
            &self.endpoint,
            &self.bucket,
            &self.region,
            &self.full_key(key),
        )
    }
}

/// Derive the public URL for a full (prefixed) key.
///
/// Preference order: configured base URL (CDN/custom domain), then the
/// custom endpoint in path style, then the AWS virtual-hosted form.
fn public_url(base: &str, endpoint: &str, bucket: &str, region: &str, full_key: &str) -> String {
    if !base.is_empty() {
        format!("{}/{}", base.trim_end_matches('/'), full_key)
    } else if !endpoint.is_empty() {
        format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, full_key)
    } else {
        format!("https://{bucket}.s3.{region}.amazonaws.com/{full_key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_prefers_custom_domain() {
        assert_eq!(
            public_url(
                "https://cdn.example.com/",
                "http://minio:9000",
                "photos",
                "us-east-1",
                "gallery/a.jpg"
            ),
            "https://cdn.example.com/gallery/a.jpg"
        );
    }

    #[test]
    fn public_url_uses_endpoint_path_style() {
        assert_eq!(
            public_url("", "http://minio:9000", "photos", "us-east-1", "a.jpg"),
            "http://minio:9000/photos/a.jpg"
        );
    }

    #[test]
    fn public_url_falls_back_to_aws_virtual_hosted() {
        assert_eq!(
            public_url("", "", "photos", "eu-west-1", "a.jpg"),
            "https://photos.s3.eu-west-1.amazonaws.com/a.jpg"
        );
    }
}
