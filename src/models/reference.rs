//! Represents one usage site of a stored object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A `(document, field)` tuple recording that a document field currently
/// embeds a given storage key.
///
/// Uniqueness is enforced per `(resource, document_id, field_name)` at the
/// schema level, which makes reference adds idempotent and lets concurrent
/// edits of unrelated tuples proceed without clobbering each other.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ResourceReference {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// The tracked resource this tuple belongs to.
    pub resource_id: Uuid,

    /// Identifier of the referencing document.
    pub document_id: String,

    /// Document kind (e.g. "general", "video", "structured").
    pub document_type: String,

    /// Which field of the document embeds the key.
    pub field_name: String,

    /// When the tuple was recorded.
    pub created_at: DateTime<Utc>,
}
