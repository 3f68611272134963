//! Local filesystem driver.
//!
//! Keys map directly to paths under a configured root directory; `get_url`
//! returns a path meant to be served by a static file handler. Uploads are
//! streamed to a temporary file, fsynced, then atomically renamed into
//! place so an interrupted upload never leaves a visible key. Failures
//! (disk full, permission denied) are not retried and surface immediately.

use std::collections::BTreeSet;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use md5::Context;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::{
    ByteStream, ListParams, ListResult, ObjectInfo, Provider, SignedUpload, StorageDriver,
    StorageStats, UploadOptions, UploadResult, compute_common_prefix, validate_key,
};

/// Prefix of in-flight upload temp files, skipped by reads and listings.
const TMP_PREFIX: &str = ".tmp-";

/// Settings for the local filesystem driver.
#[derive(Clone, Debug)]
pub struct LocalSettings {
    /// Root directory for object payloads.
    pub root: PathBuf,
    /// Base URL under which a static file handler exposes the root.
    pub public_base_url: String,
}

pub struct LocalDriver {
    root: PathBuf,
    public_base_url: String,
}

impl LocalDriver {
    pub fn new(settings: LocalSettings) -> StorageResult<Self> {
        if settings.root.as_os_str().is_empty() {
            return Err(StorageError::configuration(
                "local storage root is not set",
            ));
        }
        Ok(Self {
            root: settings.root,
            public_base_url: settings.public_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Relative key for a path under the root, with `/` separators.
    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn not_found(key: &str, err: io::Error) -> StorageError {
        if err.kind() == ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(err)
        }
    }

    /// Stream chunks into `.tmp-{uuid}` next to the final path, computing
    /// size and md5 etag along the way, then atomically rename into place.
    /// The temp file is removed on any failure.
    async fn write_via_temp(
        &self,
        key: &str,
        mut stream: ByteStream,
    ) -> StorageResult<(i64, String)> {
        let file_path = self.object_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::Io(io::Error::other("object path missing parent")))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::upload(key, err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    /// Recursively remove empty directories up to (but not including) the
    /// storage root after a delete.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    /// Depth-first walk of the root collecting regular files.
    async fn walk_files(&self) -> StorageResult<Vec<(PathBuf, std::fs::Metadata)>> {
        let mut files = Vec::new();
        let mut dirs = vec![self.root.clone()];
        while let Some(dir) = dirs.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    dirs.push(entry.path());
                } else if meta.is_file() {
                    files.push((entry.path(), meta));
                }
            }
        }
        Ok(files)
    }

    fn is_tmp_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(TMP_PREFIX))
    }
}

#[async_trait]
impl StorageDriver for LocalDriver {
    fn provider(&self) -> Provider {
        Provider::Local
    }

    async fn initialize(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn upload(
        &self,
        key: &str,
        bytes: Bytes,
        opts: &UploadOptions,
    ) -> StorageResult<UploadResult> {
        let single = stream::once(async move { Ok::<_, io::Error>(bytes) });
        self.upload_stream(key, Box::pin(single), opts).await
    }

    async fn upload_stream(
        &self,
        key: &str,
        stream: ByteStream,
        opts: &UploadOptions,
    ) -> StorageResult<UploadResult> {
        validate_key(key)?;
        let (size, etag) = self.write_via_temp(key, stream).await?;
        Ok(UploadResult {
            key: key.to_string(),
            url: self.get_url(key, None).await?,
            size,
            content_type: opts
                .content_type
                .clone()
                .or_else(|| guess_content_type(key)),
            etag: Some(etag),
        })
    }

    async fn download(&self, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        let bytes = fs::read(self.object_path(key))
            .await
            .map_err(|err| Self::not_found(key, err))?;
        Ok(Bytes::from(bytes))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        validate_key(key)?;
        let file = File::open(self.object_path(key))
            .await
            .map_err(|err| Self::not_found(key, err))?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn get_info(&self, key: &str) -> StorageResult<ObjectInfo> {
        validate_key(key)?;
        let meta = fs::metadata(self.object_path(key))
            .await
            .map_err(|err| Self::not_found(key, err))?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: meta.len() as i64,
            content_type: guess_content_type(key),
            etag: None,
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    async fn get_url(&self, key: &str, _expires_in: Option<Duration>) -> StorageResult<String> {
        // Local objects are served by a static file handler; expiry is
        // advisory and ignored.
        validate_key(key)?;
        Ok(format!("{}/{}", self.public_base_url, key))
    }

    async fn get_signed_upload_url(
        &self,
        _key: &str,
        _expires_in: Duration,
        _opts: &UploadOptions,
    ) -> StorageResult<SignedUpload> {
        Err(StorageError::Unsupported("signed upload"))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => {
                debug!("removed {}", file_path.display());
                if let Some(parent) = file_path.parent() {
                    self.prune_empty_dirs(parent).await;
                }
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn copy(&self, source_key: &str, target_key: &str) -> StorageResult<()> {
        validate_key(source_key)?;
        validate_key(target_key)?;
        let target = self.object_path(target_key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(self.object_path(source_key), target)
            .await
            .map_err(|err| Self::not_found(source_key, err))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        match fs::metadata(self.object_path(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn list(&self, params: ListParams) -> StorageResult<ListResult> {
        let max_keys = params.max_keys.clamp(1, 1000);

        let mut keys: Vec<(String, i64, Option<DateTime<Utc>>)> = Vec::new();
        for (path, meta) in self.walk_files().await? {
            if Self::is_tmp_file(&path) {
                continue;
            }
            let Some(key) = self.key_for(&path) else {
                continue;
            };
            if let Some(prefix) = &params.prefix {
                if !key.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            if let Some(token) = &params.continuation_token {
                if key.as_str() <= token.as_str() {
                    continue;
                }
            }
            keys.push((
                key,
                meta.len() as i64,
                meta.modified().ok().map(DateTime::<Utc>::from),
            ));
        }
        keys.sort_by(|a, b| a.0.cmp(&b.0));

        let mut is_truncated = false;
        let mut next_continuation_token = None;
        if keys.len() > max_keys {
            keys.truncate(max_keys);
            is_truncated = true;
            next_continuation_token = keys.last().map(|(k, _, _)| k.clone());
        }

        let mut objects = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for (key, size, last_modified) in keys {
            if let Some(delim) = &params.delimiter {
                if let Some(prefix) = compute_common_prefix(&key, params.prefix.as_deref(), delim)
                {
                    common_prefixes.insert(prefix);
                    continue;
                }
            }
            objects.push(ObjectInfo {
                content_type: guess_content_type(&key),
                etag: None,
                key,
                size,
                last_modified,
            });
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
        for (path, meta) in self.walk_files().await? {
            if Self::is_tmp_file(&path) {
                continue;
            }
            stats.object_count += 1;
            stats.total_bytes += meta.len();
        }
        Ok(stats)
    }

    async fn test_connection(&self) -> StorageResult<bool> {
        // Best-effort write/read/delete probe under the root.
        fs::create_dir_all(&self.root).await?;
        let probe = self.root.join(format!("{TMP_PREFIX}probe-{}", Uuid::new_v4()));
        fs::write(&probe, b"probe").await?;
        let bytes = fs::read(&probe).await?;
        let _ = fs::remove_file(&probe).await;
        Ok(bytes == b"probe")
    }

    async fn cleanup_scratch(&self, older_than: DateTime<Utc>) -> StorageResult<u64> {
        let mut removed = 0;
        for (path, meta) in self.walk_files().await? {
            if !Self::is_tmp_file(&path) {
                continue;
            }
            let modified = meta.modified().ok().map(DateTime::<Utc>::from);
            if modified.is_none_or(|m| m < older_than) {
                match fs::remove_file(&path).await {
                    Ok(_) => removed += 1,
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => {
                        debug!("failed to remove scratch file {}: {}", path.display(), err)
                    }
                }
            }
        }
        Ok(removed)
    }
}

fn guess_content_type(key: &str) -> Option<String> {
    mime_guess::from_path(key).first().map(|m| m.to_string())
}
