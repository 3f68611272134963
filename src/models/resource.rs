//! Represents one tracked stored object and its lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle state of a tracked resource.
///
/// `active` resources have (or recently had) live references. A resource
/// becomes `orphaned` the moment its last reference is removed, and may
/// return to `active` if a reference is re-added. `deleted` is terminal.
/// `temp` marks staged uploads (e.g. signed client-side uploads) that have
/// not been confirmed yet.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Active,
    Orphaned,
    Deleted,
    Temp,
}

/// One catalog row per distinct stored object.
///
/// The row is keyed by the storage `key` and survives provider switches:
/// it records what the object is and who uses it, not where the bytes live.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Resource {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Storage key (path-like identifier), unique across the catalog.
    pub key: String,

    /// Original filename of the uploaded file.
    pub file_name: String,

    /// Size in bytes as reported by the backend (0 for placeholder rows).
    pub file_size: i64,

    /// Content type (MIME type), if known.
    pub mime_type: Option<String>,

    /// Lifecycle state.
    pub status: ResourceStatus,

    /// Monotonic counter of upload/reference-add events. Not a live
    /// reference count; the `resource_references` table is authoritative.
    pub usage_count: i64,

    /// When the object was first recorded.
    pub uploaded_at: DateTime<Utc>,

    /// Refreshed on every re-upload of the same key.
    pub last_used: DateTime<Utc>,

    /// Set exactly once per orphan transition, cleared on re-activation.
    pub orphaned_at: Option<DateTime<Utc>>,

    /// Set when the cleanup sweep reclaimed the backing bytes.
    pub deleted_at: Option<DateTime<Utc>>,

    /// Optional image metadata.
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub alt_text: Option<String>,
}
