//! Storage service contract.
//!
//! `StorageDriver` is the operation set every backend implements, so
//! callers never branch on backend type. Two concrete drivers ship today:
//! the local filesystem (`local`) and S3-compatible object storage
//! (`cloud`). The factory (`factory`) selects and caches the active one.
//!
//! Shared helpers (key validation, key generation, size formatting) live
//! here because they are backend-agnostic and must behave identically no
//! matter which driver serves the bytes.

pub mod cloud;
pub mod error;
pub mod factory;
pub mod local;

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::{StorageError, StorageResult};

/// Maximum accepted key length, matching common object-store limits.
pub const MAX_KEY_LEN: usize = 1024;

/// Boxed byte stream used for uploads and downloads of unbounded size.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Closed set of storage providers.
///
/// The factory matches on this tag only at construction time; it never
/// appears inside hot-path operations.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Local,
    S3,
    AzureBlob,
    Gcs,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
            Self::AzureBlob => "azure-blob",
            Self::Gcs => "gcs",
        }
    }

    /// Whether a concrete driver exists for this provider.
    pub fn implemented(self) -> bool {
        matches!(self, Self::Local | Self::S3)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Provider {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            "azure-blob" | "azblob" => Ok(Self::AzureBlob),
            "gcs" => Ok(Self::Gcs),
            other => Err(StorageError::configuration(format!(
                "unknown storage provider `{other}`"
            ))),
        }
    }
}

/// Options accepted by upload operations.
#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    /// MIME type to record with the object.
    pub content_type: Option<String>,
    /// Original filename, kept for catalog bookkeeping.
    pub file_name: Option<String>,
}

/// Result of a completed upload.
#[derive(Serialize, Clone, Debug)]
pub struct UploadResult {
    pub key: String,
    pub url: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// Backend-reported metadata for one stored object.
#[derive(Serialize, Clone, Debug)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A pre-authorized client-side upload.
#[derive(Serialize, Clone, Debug)]
pub struct SignedUpload {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

/// Parameters for paginated listing.
#[derive(Clone, Debug)]
pub struct ListParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            prefix: None,
            delimiter: None,
            continuation_token: None,
            max_keys: 1000,
        }
    }
}

/// One page of listing results, lexicographically ordered by key.
///
/// Callers must loop, feeding `next_continuation_token` back in, until
/// `is_truncated` is false to enumerate fully.
#[derive(Serialize, Debug)]
pub struct ListResult {
    pub objects: Vec<ObjectInfo>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// Aggregate backend statistics; may be approximate for backends without
/// cheap aggregation.
#[derive(Serialize, Clone, Copy, Debug, Default)]
pub struct StorageStats {
    pub object_count: u64,
    pub total_bytes: u64,
}

/// Per-key outcome of a batch delete.
#[derive(Serialize, Clone, Debug)]
pub struct BatchDeleteOutcome {
    pub key: String,
    pub deleted: bool,
    pub error: Option<String>,
}

/// Structured result of a best-effort batch delete. Partial failure is a
/// return value, never an error; the caller decides whether it is
/// acceptable.
#[derive(Serialize, Debug, Default)]
pub struct BatchDeleteResult {
    pub outcomes: Vec<BatchDeleteOutcome>,
    pub success_count: usize,
    pub failure_count: usize,
}

/// Result of a move. When the source delete fails after a successful copy
/// the move still reports the copy as done, with `source_deleted = false`
/// as an explicit warning: duplication is preferred over silent data loss.
#[derive(Serialize, Debug)]
pub struct MoveResult {
    pub source_key: String,
    pub target_key: String,
    pub source_deleted: bool,
    pub warning: Option<String>,
}

/// The operation set every backend driver must expose.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Tag of the concrete backend.
    fn provider(&self) -> Provider;

    /// Establish connection/credentials. Must be idempotent; fails with
    /// `Configuration` if required settings are missing.
    async fn initialize(&self) -> StorageResult<()>;

    /// Upload a full in-memory payload. An interrupted upload must not
    /// leave a visible key.
    async fn upload(
        &self,
        key: &str,
        bytes: Bytes,
        opts: &UploadOptions,
    ) -> StorageResult<UploadResult>;

    /// Same contract as `upload` but accepts unbounded input; the backend
    /// must stream rather than buffer fully when the size is unknown.
    async fn upload_stream(
        &self,
        key: &str,
        stream: ByteStream,
        opts: &UploadOptions,
    ) -> StorageResult<UploadResult>;

    /// Read a full object into memory.
    async fn download(&self, key: &str) -> StorageResult<Bytes>;

    /// Open a streaming reader for an object.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Backend-reported metadata for one key.
    async fn get_info(&self, key: &str) -> StorageResult<ObjectInfo>;

    /// Time-bounded or permanent access URL depending on the backend's
    /// visibility model. `expires_in` is advisory for public backends and
    /// enforced for signed backends.
    async fn get_url(&self, key: &str, expires_in: Option<Duration>) -> StorageResult<String>;

    /// Pre-authorize a client-side upload without routing bytes through
    /// this service.
    async fn get_signed_upload_url(
        &self,
        key: &str,
        expires_in: Duration,
        opts: &UploadOptions,
    ) -> StorageResult<SignedUpload>;

    /// Remove one object. Returns `false` (not an error) when the key did
    /// not exist.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Copy an object within the backend.
    async fn copy(&self, source_key: &str, target_key: &str) -> StorageResult<()>;

    /// Existence probe; never errors for absence.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Paginated listing under a prefix.
    async fn list(&self, params: ListParams) -> StorageResult<ListResult>;

    /// Aggregate object count and total size.
    async fn get_stats(&self) -> StorageResult<StorageStats>;

    /// Non-destructive connectivity probe used by configuration validation.
    async fn test_connection(&self) -> StorageResult<bool>;

    /// Remove backend-internal scratch artifacts (interrupted upload
    /// temp files, abandoned staging objects) older than the cutoff.
    /// Distinct from the tracker's orphan cleanup.
    async fn cleanup_scratch(&self, older_than: DateTime<Utc>) -> StorageResult<u64>;

    /// Best-effort batch delete. One key's failure must not abort the
    /// others.
    async fn delete_many(&self, keys: &[String]) -> StorageResult<BatchDeleteResult> {
        let mut result = BatchDeleteResult::default();
        for key in keys {
            match self.delete(key).await {
                Ok(true) => {
                    result.success_count += 1;
                    result.outcomes.push(BatchDeleteOutcome {
                        key: key.clone(),
                        deleted: true,
                        error: None,
                    });
                }
                Ok(false) => {
                    result.failure_count += 1;
                    result.outcomes.push(BatchDeleteOutcome {
                        key: key.clone(),
                        deleted: false,
                        error: Some("object not found".into()),
                    });
                }
                Err(err) => {
                    result.failure_count += 1;
                    result.outcomes.push(BatchDeleteOutcome {
                        key: key.clone(),
                        deleted: false,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        Ok(result)
    }

    /// Copy then delete. A failed source delete after a successful copy is
    /// surfaced as a warning, not an error.
    async fn move_object(&self, source_key: &str, target_key: &str) -> StorageResult<MoveResult> {
        self.copy(source_key, target_key).await?;
        match self.delete(source_key).await {
            Ok(_) => Ok(MoveResult {
                source_key: source_key.to_string(),
                target_key: target_key.to_string(),
                source_deleted: true,
                warning: None,
            }),
            Err(err) => Ok(MoveResult {
                source_key: source_key.to_string(),
                target_key: target_key.to_string(),
                source_deleted: false,
                warning: Some(format!(
                    "copy succeeded but source delete failed, object is duplicated: {err}"
                )),
            }),
        }
    }
}

/// Run a driver operation under a deadline. An elapsed timeout is treated
/// as failure (never as "unknown state"); callers must not assume partial
/// completion.
pub async fn with_deadline<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(timeout)),
    }
}

/// Compute the synthetic "common prefix" a key belongs to when listing
/// with a delimiter. Returns `None` when the key is a direct entry under
/// the requested prefix.
pub(crate) fn compute_common_prefix(
    key: &str,
    requested_prefix: Option<&str>,
    delimiter: &str,
) -> Option<String> {
    let after_prefix = if let Some(prefix) = requested_prefix {
        key.strip_prefix(prefix)?
    } else {
        key
    };

    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::new();
    if let Some(prefix) = requested_prefix {
        combined.push_str(prefix);
    }
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or oversized keys, keys that begin with `/` or contain
/// `..`, and keys with control characters, backslashes, or NUL bytes.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key is empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey(format!(
            "key exceeds {MAX_KEY_LEN} characters"
        )));
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StorageError::InvalidKey(
            "key must be relative and must not contain `..`".into(),
        ));
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidKey(
            "key contains control characters".into(),
        ));
    }
    Ok(())
}

/// Build a collision-free key without central coordination:
/// `{prefix}/{yyyy}/{mm}/{unix_millis}-{uuid_suffix}.{ext}`.
///
/// The original extension is preserved (sanitized); everything else about
/// the original filename is discarded.
pub fn generate_key(prefix: &str, original_filename: &str) -> String {
    let now = Utc::now();
    let suffix = Uuid::new_v4().simple().to_string();
    let ext = original_filename
        .rsplit_once('.')
        .map(|(_, e)| sanitize_filename(e))
        .filter(|e| !e.is_empty() && e.len() <= 16)
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    format!(
        "{}/{:04}/{:02}/{}-{}{}",
        prefix.trim_matches('/'),
        now.year(),
        now.month(),
        now.timestamp_millis(),
        &suffix[..8],
        ext
    )
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Human-readable byte count, e.g. `2.5 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::BTreeSet;

    /// Minimal driver for exercising failure paths in the trait-default
    /// combinators and the cleanup sweep: copies always succeed, deletes
    /// fail for the configured keys, and operations these tests never
    /// reach answer `Unsupported`.
    pub(crate) struct FlakyDriver {
        fail_delete: BTreeSet<String>,
    }

    impl FlakyDriver {
        pub(crate) fn failing_delete<const N: usize>(keys: [&str; N]) -> Self {
            Self {
                fail_delete: keys.iter().map(|k| k.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl StorageDriver for FlakyDriver {
        fn provider(&self) -> Provider {
            Provider::Local
        }

        async fn initialize(&self) -> StorageResult<()> {
            Ok(())
        }

        async fn upload(
            &self,
            _key: &str,
            _bytes: Bytes,
            _opts: &UploadOptions,
        ) -> StorageResult<UploadResult> {
            Err(StorageError::Unsupported("upload"))
        }

        async fn upload_stream(
            &self,
            _key: &str,
            _stream: ByteStream,
            _opts: &UploadOptions,
        ) -> StorageResult<UploadResult> {
            Err(StorageError::Unsupported("upload_stream"))
        }

        async fn download(&self, _key: &str) -> StorageResult<Bytes> {
            Err(StorageError::Unsupported("download"))
        }

        async fn get_stream(&self, _key: &str) -> StorageResult<ByteStream> {
            Err(StorageError::Unsupported("get_stream"))
        }

        async fn get_info(&self, _key: &str) -> StorageResult<ObjectInfo> {
            Err(StorageError::Unsupported("get_info"))
        }

        async fn get_url(
            &self,
            _key: &str,
            _expires_in: Option<Duration>,
        ) -> StorageResult<String> {
            Err(StorageError::Unsupported("get_url"))
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
            if self.fail_delete.contains(key) {
                Err(StorageError::Operation(format!("delete of `{key}` failed")))
            } else {
                Ok(true)
            }
        }

        async fn copy(&self, _source_key: &str, _target_key: &str) -> StorageResult<()> {
            Ok(())
        }

        async fn exists(&self, _key: &str) -> StorageResult<bool> {
            Ok(true)
        }

        async fn list(&self, _params: ListParams) -> StorageResult<ListResult> {
            Err(StorageError::Unsupported("list"))
        }

        async fn get_stats(&self) -> StorageResult<StorageStats> {
            Ok(StorageStats::default())
        }

        async fn test_connection(&self) -> StorageResult<bool> {
            Ok(true)
        }

        async fn cleanup_scratch(&self, _older_than: DateTime<Utc>) -> StorageResult<u64> {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_keys_pass() {
        assert!(validate_key("img/2026/08/a.png").is_ok());
        assert!(validate_key("a").is_ok());
    }

    #[test]
    fn traversal_and_control_keys_rejected() {
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a\\b").is_err());
        assert!(validate_key("a\x07b").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn generated_keys_are_valid_and_keep_extension() {
        let key = generate_key("img", "photo of car.JPG");
        assert!(validate_key(&key).is_ok());
        assert!(key.starts_with("img/"));
        assert!(key.ends_with(".jpg"));

        let no_ext = generate_key("docs", "README");
        assert!(validate_key(&no_ext).is_ok());
        assert!(!no_ext.contains('.'));
    }

    #[test]
    fn generated_keys_do_not_collide() {
        let a = generate_key("img", "a.png");
        let b = generate_key("img", "a.png");
        assert_ne!(a, b);
    }

    #[test]
    fn sanitize_replaces_unsafe_chars() {
        assert_eq!(sanitize_filename("invoice.pdf"), "invoice.pdf");
        assert_eq!(sanitize_filename("my file (1).pdf"), "my_file__1_.pdf");
    }

    #[test]
    fn format_size_picks_unit() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn move_reports_failed_source_delete_as_warning() {
        let d = testing::FlakyDriver::failing_delete(["old/key.txt"]);
        let result = d.move_object("old/key.txt", "new/key.txt").await.unwrap();
        assert_eq!(result.target_key, "new/key.txt");
        assert!(!result.source_deleted);
        assert!(result.warning.is_some());
    }

    #[tokio::test]
    async fn batch_delete_survives_erroring_keys() {
        let d = testing::FlakyDriver::failing_delete(["a", "c"]);
        let result = d
            .delete_many(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(result.outcomes.len(), 3);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 2);
    }

    #[tokio::test]
    async fn with_deadline_times_out_slow_operations() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        };
        let err = with_deadline(Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Timeout(_)));

        let quick = async { Ok(7) };
        assert_eq!(with_deadline(Duration::from_secs(1), quick).await.unwrap(), 7);
    }
}
