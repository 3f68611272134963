//! Cloud object-storage driver backed by Apache OpenDAL (S3-compatible:
//! AWS S3, Cloudflare R2, MinIO, DigitalOcean Spaces).
//!
//! Provider-specific authentication and signing are delegated to OpenDAL
//! and treated as opaque. Transient failures are retried a bounded number
//! of times with backoff via OpenDAL's retry layer before surfacing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use opendal::layers::RetryLayer;
use opendal::{Operator, services};
use tracing::debug;
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::{
    ByteStream, ListParams, ListResult, ObjectInfo, Provider, SignedUpload, StorageDriver,
    StorageStats, UploadOptions, UploadResult, compute_common_prefix, validate_key,
};

/// Prefix for connectivity-probe objects, reclaimed by `cleanup_scratch`.
const PROBE_PREFIX: &str = ".probe/";

/// Bounded retry budget for transient backend failures.
const MAX_RETRIES: usize = 3;

/// Settings for the S3-compatible driver.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// When set, the bucket is publicly readable and `get_url` returns a
    /// permanent URL instead of a presigned one.
    pub public_base_url: Option<String>,
    /// Default expiry for presigned URLs when the caller gives none.
    pub default_url_ttl: Duration,
}

pub struct CloudDriver {
    op: Operator,
    public_base_url: Option<String>,
    default_url_ttl: Duration,
}

impl CloudDriver {
    pub fn new(settings: S3Settings) -> StorageResult<Self> {
        for (field, value) in [
            ("bucket", &settings.bucket),
            ("region", &settings.region),
            ("access_key_id", &settings.access_key_id),
            ("secret_access_key", &settings.secret_access_key),
        ] {
            if value.is_empty() {
                return Err(StorageError::configuration(format!(
                    "s3 setting `{field}` is required"
                )));
            }
        }

        let mut builder = services::S3::default()
            .bucket(&settings.bucket)
            .access_key_id(&settings.access_key_id)
            .secret_access_key(&settings.secret_access_key)
            .region(&settings.region);
        if !settings.endpoint.is_empty() {
            builder = builder.endpoint(&settings.endpoint);
        }

        let op = Operator::new(builder)
            .map_err(|e| StorageError::configuration(e.to_string()))?
            .layer(RetryLayer::new().with_max_times(MAX_RETRIES))
            .finish();

        Ok(Self {
            op,
            public_base_url: settings
                .public_base_url
                .map(|u| u.trim_end_matches('/').to_string()),
            default_url_ttl: settings.default_url_ttl,
        })
    }

    async fn stat_info(&self, key: &str) -> StorageResult<ObjectInfo> {
        let meta = self
            .op
            .stat(key)
            .await
            .map_err(|err| map_not_found(key, err))?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: meta.content_length() as i64,
            content_type: meta.content_type().map(String::from),
            etag: meta.etag().map(|e| e.trim_matches('"').to_string()),
            last_modified: last_modified_utc(&meta),
        })
    }

    /// Collect keys lexicographically after the continuation token. S3
    /// listings arrive sorted, so the scan stops as soon as `limit + 1`
    /// entries are taken (truncation detection) or the first key past the
    /// prefix range appears; it never buffers the whole listing.
    async fn collect_page(
        &self,
        prefix: Option<&str>,
        token: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ObjectInfo>> {
        let list_root = prefix
            .map(|p| match p.rfind('/') {
                Some(pos) => p[..=pos].to_string(),
                None => String::from("/"),
            })
            .unwrap_or_else(|| String::from("/"));

        let mut lister = self
            .op
            .lister_with(&list_root)
            .recursive(true)
            .await
            .map_err(StorageError::from)?;

        let mut page = Vec::new();
        while let Some(entry) = lister.try_next().await.map_err(StorageError::from)? {
            match page_step(entry.path(), prefix, token) {
                PageStep::Skip => continue,
                PageStep::Stop => break,
                PageStep::Take => {}
            }
            let meta = entry.metadata();
            page.push(ObjectInfo {
                size: meta.content_length() as i64,
                content_type: meta.content_type().map(String::from),
                etag: meta.etag().map(|e| e.trim_matches('"').to_string()),
                last_modified: last_modified_utc(meta),
                key: entry.path().to_string(),
            });
            if page.len() > limit {
                break;
            }
        }
        Ok(page)
    }
}

fn last_modified_utc(meta: &opendal::Metadata) -> Option<DateTime<Utc>> {
    meta.last_modified()
        .map(|t| DateTime::<Utc>::from(std::time::SystemTime::from(t)))
}

#[derive(Debug, PartialEq, Eq)]
enum PageStep {
    Take,
    Skip,
    Stop,
}

/// Decide how one sorted listing entry affects the page. Directory
/// markers and keys at or before the continuation token are skipped; a
/// key past the prefix range ends the scan since nothing later matches.
fn page_step(path: &str, prefix: Option<&str>, token: Option<&str>) -> PageStep {
    if path.ends_with('/') {
        return PageStep::Skip;
    }
    if let Some(p) = prefix {
        if !path.starts_with(p) {
            return if path > p { PageStep::Stop } else { PageStep::Skip };
        }
    }
    if let Some(t) = token {
        if path <= t {
            return PageStep::Skip;
        }
    }
    PageStep::Take
}

fn map_not_found(key: &str, err: opendal::Error) -> StorageError {
    if err.kind() == opendal::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        err.into()
    }
}

#[async_trait]
impl StorageDriver for CloudDriver {
    fn provider(&self) -> Provider {
        Provider::S3
    }

    async fn initialize(&self) -> StorageResult<()> {
        // Credentials are validated lazily by the backend; a cheap check
        // here keeps construction side-effect free and idempotent.
        self.op
            .check()
            .await
            .map_err(|e| StorageError::configuration(e.to_string()))
    }

    async fn upload(
        &self,
        key: &str,
        bytes: Bytes,
        opts: &UploadOptions,
    ) -> StorageResult<UploadResult> {
        validate_key(key)?;
        let size = bytes.len() as i64;
        let mut write = self.op.write_with(key, bytes);
        if let Some(ct) = &opts.content_type {
            write = write.content_type(ct);
        }
        write.await.map_err(|err| {
            StorageError::upload(key, err)
        })?;

        let info = self.stat_info(key).await?;
        Ok(UploadResult {
            key: key.to_string(),
            url: self.get_url(key, None).await?,
            size,
            content_type: opts.content_type.clone().or(info.content_type),
            etag: info.etag,
        })
    }

    async fn upload_stream(
        &self,
        key: &str,
        mut stream: ByteStream,
        opts: &UploadOptions,
    ) -> StorageResult<UploadResult> {
        validate_key(key)?;
        let mut writer_builder = self.op.writer_with(key);
        if let Some(ct) = &opts.content_type {
            writer_builder = writer_builder.content_type(ct);
        }
        let mut writer = writer_builder
            .await
            .map_err(|err| StorageError::upload(key, err))?;

        let mut size: i64 = 0;
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    // Abort discards staged parts so no visible key is left.
                    let _ = writer.abort().await;
                    return Err(StorageError::upload(key, err));
                }
            };
            size += chunk.len() as i64;
            if let Err(err) = writer.write(chunk).await {
                let _ = writer.abort().await;
                return Err(StorageError::upload(key, err));
            }
        }
        writer
            .close()
            .await
            .map_err(|err| StorageError::upload(key, err))?;

        let info = self.stat_info(key).await?;
        Ok(UploadResult {
            key: key.to_string(),
            url: self.get_url(key, None).await?,
            size,
            content_type: opts.content_type.clone().or(info.content_type),
            etag: info.etag,
        })
    }

    async fn download(&self, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        let buffer = self
            .op
            .read(key)
            .await
            .map_err(|err| map_not_found(key, err))?;
        Ok(buffer.to_bytes())
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        validate_key(key)?;
        let meta = self
            .op
            .stat(key)
            .await
            .map_err(|err| map_not_found(key, err))?;
        let reader = self
            .op
            .reader(key)
            .await
            .map_err(|err| map_not_found(key, err))?;
        let stream = reader
            .into_bytes_stream(0..meta.content_length())
            .await
            .map_err(|err| StorageError::download(key, err))?;
        Ok(Box::pin(stream))
    }

    async fn get_info(&self, key: &str) -> StorageResult<ObjectInfo> {
        validate_key(key)?;
        self.stat_info(key).await
    }

    async fn get_url(&self, key: &str, expires_in: Option<Duration>) -> StorageResult<String> {
        validate_key(key)?;
        if let Some(base) = &self.public_base_url {
            // Publicly readable bucket; expiry is advisory.
            return Ok(format!("{base}/{key}"));
        }
        let ttl = expires_in.unwrap_or(self.default_url_ttl);
        let presigned = self
            .op
            .presign_read(key, ttl)
            .await
            .map_err(StorageError::from)?;
        Ok(presigned.uri().to_string())
    }

    async fn get_signed_upload_url(
        &self,
        key: &str,
        expires_in: Duration,
        opts: &UploadOptions,
    ) -> StorageResult<SignedUpload> {
        validate_key(key)?;
        let presigned = self
            .op
            .presign_write(key, expires_in)
            .await
            .map_err(StorageError::from)?;

        let mut headers = HashMap::new();
        for (name, value) in presigned.header() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }
        if let Some(ct) = &opts.content_type {
            headers.insert("Content-Type".to_string(), ct.clone());
        }

        Ok(SignedUpload {
            url: presigned.uri().to_string(),
            method: presigned.method().to_string(),
            headers,
            expires_at: Utc::now()
                + chrono::Duration::seconds(i64::try_from(expires_in.as_secs()).unwrap_or(i64::MAX)),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        // Backend deletes are idempotent; probe first to honor the
        // "false when absent" contract.
        if !self.exists(key).await? {
            return Ok(false);
        }
        self.op.delete(key).await.map_err(StorageError::from)?;
        Ok(true)
    }

    async fn copy(&self, source_key: &str, target_key: &str) -> StorageResult<()> {
        validate_key(source_key)?;
        validate_key(target_key)?;
        self.op
            .copy(source_key, target_key)
            .await
            .map_err(|err| map_not_found(source_key, err))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        match self.op.stat(key).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == opendal::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, params: ListParams) -> StorageResult<ListResult> {
        let max_keys = params.max_keys.clamp(1, 1000);
        let mut page = self
            .collect_page(
                params.prefix.as_deref(),
                params.continuation_token.as_deref(),
                max_keys,
            )
            .await?;

        let mut is_truncated = false;
        let mut next_continuation_token = None;
        if page.len() > max_keys {
            page.truncate(max_keys);
            is_truncated = true;
            next_continuation_token = page.last().map(|o| o.key.clone());
        }

        let mut objects = Vec::new();
        let mut common_prefixes = std::collections::BTreeSet::new();
        for obj in page {
            if let Some(delim) = &params.delimiter {
                if let Some(prefix) =
                    compute_common_prefix(&obj.key, params.prefix.as_deref(), delim)
                {
                    common_prefixes.insert(prefix);
                    continue;
                }
            }
            objects.push(obj);
        }

        Ok(ListResult {
            objects,
            common_prefixes: common_prefixes.into_iter().collect(),
            is_truncated,
            next_continuation_token,
        })
    }

    async fn get_stats(&self) -> StorageResult<StorageStats> {
        let mut stats = StorageStats::default();
        let mut lister = self
            .op
            .lister_with("/")
            .recursive(true)
            .await
            .map_err(StorageError::from)?;
        while let Some(entry) = lister.try_next().await.map_err(StorageError::from)? {
            if entry.path().ends_with('/') {
                continue;
            }
            stats.object_count += 1;
            stats.total_bytes += entry.metadata().content_length();
        }
        Ok(stats)
    }

    async fn test_connection(&self) -> StorageResult<bool> {
        let probe = format!("{PROBE_PREFIX}{}", Uuid::new_v4());
        self.op
            .write(&probe, Bytes::from_static(b"probe"))
            .await
            .map_err(StorageError::from)?;
        let meta = self.op.stat(&probe).await.map_err(StorageError::from)?;
        let _ = self.op.delete(&probe).await;
        Ok(meta.content_length() == 5)
    }

    async fn cleanup_scratch(&self, older_than: DateTime<Utc>) -> StorageResult<u64> {
        let mut removed = 0;
        let mut lister = match self.op.lister_with(PROBE_PREFIX).recursive(true).await {
            Ok(lister) => lister,
            Err(err) if err.kind() == opendal::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = lister.try_next().await.map_err(StorageError::from)? {
            if entry.path().ends_with('/') {
                continue;
            }
            let modified = last_modified_utc(entry.metadata());
            if modified.is_none_or(|m| m < older_than) {
                match self.op.delete(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(err) => debug!("failed to remove scratch object {}: {}", entry.path(), err),
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> S3Settings {
        S3Settings {
            endpoint: "http://localhost:9000".into(),
            bucket: "media".into(),
            region: "us-east-1".into(),
            access_key_id: "minio".into(),
            secret_access_key: "minio123".into(),
            public_base_url: None,
            default_url_ttl: Duration::from_secs(3600),
        }
    }

    #[test]
    fn missing_bucket_is_a_configuration_error() {
        let mut s = settings();
        s.bucket = String::new();
        assert!(matches!(
            CloudDriver::new(s),
            Err(StorageError::Configuration(_))
        ));
    }

    #[test]
    fn page_step_walks_a_sorted_listing() {
        assert_eq!(page_step("img/a.png", Some("img/"), None), PageStep::Take);
        // Directory markers are never objects.
        assert_eq!(page_step("img/2026/", Some("img/"), None), PageStep::Skip);
        // Keys before the prefix range are skipped, keys past it end the
        // scan: the listing is sorted, nothing later can match.
        assert_eq!(page_step("aaa", Some("img/"), None), PageStep::Skip);
        assert_eq!(page_step("zzz", Some("img/"), None), PageStep::Stop);
        // Continuation token is exclusive.
        assert_eq!(
            page_step("img/b.png", Some("img/"), Some("img/b.png")),
            PageStep::Skip
        );
        assert_eq!(
            page_step("img/c.png", Some("img/"), Some("img/b.png")),
            PageStep::Take
        );
    }

    #[tokio::test]
    async fn public_base_url_yields_permanent_urls() {
        let mut s = settings();
        s.public_base_url = Some("https://cdn.example.com/".into());
        let d = CloudDriver::new(s).unwrap();
        let url = d.get_url("img/a.png", None).await.unwrap();
        assert_eq!(url, "https://cdn.example.com/img/a.png");
    }

    #[test]
    fn provider_tag_is_s3() {
        let d = CloudDriver::new(settings()).unwrap();
        assert_eq!(d.provider(), Provider::S3);
    }
}
