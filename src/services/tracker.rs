//! Resource reference tracker.
//!
//! Maintains the `resources` catalog: one row per distinct stored object,
//! its usage sites, and a lifecycle state, independent of which driver
//! currently serves the bytes. Content-editing collaborators never touch
//! these tables directly; every mutation funnels through the tuple-level
//! operations here, so concurrent edits of unrelated references cannot
//! clobber each other.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::reference::ResourceReference;
use crate::models::resource::{Resource, ResourceStatus};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("resource for key `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

const RESOURCE_COLUMNS: &str = "id, key, file_name, file_size, mime_type, status, usage_count, \
     uploaded_at, last_used, orphaned_at, deleted_at, width, height, alt_text";

/// Metadata recorded alongside an upload.
#[derive(Clone, Debug, Default)]
pub struct UploadRecord {
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    /// Staged upload (e.g. a signed client-side upload that has not been
    /// confirmed); recorded as `temp` and upgraded by the next real upload.
    pub temporary: bool,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub alt_text: Option<String>,
}

/// Outcome of an `add_reference` call.
#[derive(Debug)]
pub struct AddReferenceOutcome {
    pub resource: Resource,
    /// Tuple was actually inserted (false on an idempotent re-add).
    pub added: bool,
    /// The key had no catalog row; a placeholder with zero size was
    /// created. Surfaced as a data-quality warning, never a failure.
    pub placeholder: bool,
}

/// Outcome of a `remove_reference` call.
#[derive(Debug, Default)]
pub struct RemoveReferenceOutcome {
    /// Tuple was actually removed (false on an idempotent re-remove).
    pub removed: bool,
    /// The removal emptied the reference set and orphaned the resource.
    pub orphaned: bool,
}

/// Summary of one `diff_and_update` application.
#[derive(Serialize, Debug, Default)]
pub struct DiffSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub orphaned: Vec<String>,
    /// Keys for which placeholder rows had to be created.
    pub placeholders: Vec<String>,
}

/// Per-status catalog counts, merged into the stats endpoint.
#[derive(Serialize, Debug, Default)]
pub struct TrackerStats {
    pub active: i64,
    pub orphaned: i64,
    pub deleted: i64,
    pub temp: i64,
    /// Total size of non-deleted tracked objects.
    pub tracked_bytes: i64,
}

/// SQLite-backed tracker. Cheap to clone; shares the pool.
#[derive(Clone)]
pub struct ResourceTracker {
    db: Arc<SqlitePool>,
}

impl ResourceTracker {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Upsert a catalog row for an uploaded key.
    ///
    /// An existing key bumps `usage_count`, refreshes `last_used`, and
    /// re-activates the row; it never creates a duplicate. A re-upload of
    /// a reclaimed (`deleted`) key starts a fresh lifecycle for the same
    /// key, clearing `deleted_at`.
    pub async fn record_upload(&self, key: &str, record: &UploadRecord) -> TrackerResult<Resource> {
        let now = Utc::now();
        let status = if record.temporary {
            ResourceStatus::Temp
        } else {
            ResourceStatus::Active
        };

        let sql = format!(
            "INSERT INTO resources (
                id, key, file_name, file_size, mime_type, status, usage_count,
                uploaded_at, last_used, width, height, alt_text
            ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                file_name = excluded.file_name,
                file_size = excluded.file_size,
                mime_type = excluded.mime_type,
                status = CASE
                    WHEN resources.status = 'active' AND excluded.status = 'temp'
                        THEN 'active'
                    ELSE excluded.status
                END,
                usage_count = resources.usage_count + 1,
                last_used = excluded.last_used,
                orphaned_at = NULL,
                deleted_at = NULL,
                width = excluded.width,
                height = excluded.height,
                alt_text = excluded.alt_text
            RETURNING {RESOURCE_COLUMNS}"
        );

        let resource = sqlx::query_as::<_, Resource>(&sql)
            .bind(Uuid::new_v4())
            .bind(key)
            .bind(&record.file_name)
            .bind(record.file_size)
            .bind(&record.mime_type)
            .bind(status)
            .bind(now)
            .bind(now)
            .bind(record.width)
            .bind(record.height)
            .bind(&record.alt_text)
            .fetch_one(&*self.db)
            .await?;
        Ok(resource)
    }

    /// Record that `(document_id, field_name)` embeds `key`. Idempotent:
    /// re-adding an existing tuple is success, not error. An orphaned
    /// resource transitions back to active and its `orphaned_at` is
    /// cleared. A key with no catalog row gets a placeholder row so the
    /// document save it is part of never fails on bookkeeping.
    pub async fn add_reference(
        &self,
        key: &str,
        document_id: &str,
        document_type: &str,
        field_name: &str,
    ) -> TrackerResult<AddReferenceOutcome> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let existing = Self::fetch_by_key(&mut tx, key).await?;
        let (resource_id, placeholder) = match existing {
            Some(resource) => (resource.id, false),
            None => {
                let id = Uuid::new_v4();
                let file_name = key.rsplit('/').next().unwrap_or(key);
                sqlx::query(
                    "INSERT INTO resources (
                        id, key, file_name, file_size, status, usage_count,
                        uploaded_at, last_used
                    ) VALUES (?, ?, ?, 0, 'active', 0, ?, ?)",
                )
                .bind(id)
                .bind(key)
                .bind(file_name)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                debug!(key, document_id, "created placeholder resource row");
                (id, true)
            }
        };

        let inserted = sqlx::query(
            "INSERT INTO resource_references (
                id, resource_id, document_id, document_type, field_name, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_id, document_id, field_name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(resource_id)
        .bind(document_id)
        .bind(document_type)
        .bind(field_name)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            sqlx::query(
                "UPDATE resources SET
                    status = 'active',
                    usage_count = usage_count + 1,
                    last_used = ?,
                    orphaned_at = NULL,
                    deleted_at = NULL
                 WHERE id = ?",
            )
            .bind(now)
            .bind(resource_id)
            .execute(&mut *tx)
            .await?;
        }

        let resource = Self::fetch_by_key(&mut tx, key)
            .await?
            .ok_or_else(|| TrackerError::NotFound(key.to_string()))?;
        tx.commit().await?;

        Ok(AddReferenceOutcome {
            resource,
            added: inserted,
            placeholder,
        })
    }

    /// Remove the `(document_id, field_name)` tuple for `key`. Removing a
    /// reference that does not exist is a no-op, tolerating out-of-order
    /// or retried delete calls. Emptying the reference set transitions the
    /// resource to orphaned and stamps `orphaned_at` exactly once.
    pub async fn remove_reference(
        &self,
        key: &str,
        document_id: &str,
        field_name: &str,
    ) -> TrackerResult<RemoveReferenceOutcome> {
        let mut tx = self.db.begin().await?;

        let Some(resource) = Self::fetch_by_key(&mut tx, key).await? else {
            tx.commit().await?;
            return Ok(RemoveReferenceOutcome::default());
        };

        let removed = sqlx::query(
            "DELETE FROM resource_references
             WHERE resource_id = ? AND document_id = ? AND field_name = ?",
        )
        .bind(resource.id)
        .bind(document_id)
        .bind(field_name)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let orphaned = if removed {
            Self::orphan_if_unreferenced(&mut tx, resource.id).await?
        } else {
            false
        };

        tx.commit().await?;
        Ok(RemoveReferenceOutcome { removed, orphaned })
    }

    /// Apply a document edit: remove references for `old − new`, add for
    /// `new − old`, leave the intersection untouched. This is the single
    /// choke point every document mutation path funnels through.
    pub async fn diff_and_update(
        &self,
        document_id: &str,
        document_type: &str,
        field_name: &str,
        old_keys: &[String],
        new_keys: &[String],
    ) -> TrackerResult<DiffSummary> {
        let old: BTreeSet<&str> = old_keys.iter().map(String::as_str).collect();
        let new: BTreeSet<&str> = new_keys.iter().map(String::as_str).collect();

        let mut summary = DiffSummary::default();
        for key in old.difference(&new) {
            let outcome = self.remove_reference(key, document_id, field_name).await?;
            if outcome.removed {
                summary.removed.push((*key).to_string());
            }
            if outcome.orphaned {
                summary.orphaned.push((*key).to_string());
            }
        }
        for key in new.difference(&old) {
            let outcome = self
                .add_reference(key, document_id, document_type, field_name)
                .await?;
            if outcome.added {
                summary.added.push((*key).to_string());
            }
            if outcome.placeholder {
                summary.placeholders.push((*key).to_string());
            }
        }
        Ok(summary)
    }

    /// Drop every reference a document holds (document delete path) and
    /// orphan resources whose reference set became empty.
    pub async fn remove_document_references(
        &self,
        document_id: &str,
    ) -> TrackerResult<DiffSummary> {
        let mut tx = self.db.begin().await?;

        let resource_ids: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT DISTINCT r.id, r.key FROM resources r
             JOIN resource_references rr ON rr.resource_id = r.id
             WHERE rr.document_id = ?",
        )
        .bind(document_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM resource_references WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        let mut summary = DiffSummary::default();
        for (resource_id, key) in resource_ids {
            summary.removed.push(key.clone());
            if Self::orphan_if_unreferenced(&mut tx, resource_id).await? {
                summary.orphaned.push(key);
            }
        }

        tx.commit().await?;
        Ok(summary)
    }

    /// Resources orphaned before the cutoff, oldest first.
    pub async fn find_orphaned_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> TrackerResult<Vec<Resource>> {
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources
             WHERE status = 'orphaned' AND orphaned_at < ?
             ORDER BY orphaned_at ASC"
        );
        Ok(sqlx::query_as::<_, Resource>(&sql)
            .bind(cutoff)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Staged uploads never confirmed before the cutoff.
    pub async fn find_stale_temp_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> TrackerResult<Vec<Resource>> {
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources
             WHERE status = 'temp' AND last_used < ?
             ORDER BY last_used ASC"
        );
        Ok(sqlx::query_as::<_, Resource>(&sql)
            .bind(cutoff)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Conditionally finalize a reclaimed resource. Returns false when the
    /// row regained a reference since it was scanned; the cleanup sweep
    /// must skip such rows.
    pub async fn mark_deleted(&self, key: &str) -> TrackerResult<bool> {
        let affected = sqlx::query(
            "UPDATE resources SET status = 'deleted', deleted_at = ?
             WHERE key = ? AND status IN ('orphaned', 'temp')",
        )
        .bind(Utc::now())
        .bind(key)
        .execute(&*self.db)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    /// Whether a scanned key is still safe to reclaim. Rechecked by the
    /// cleanup sweep immediately before issuing the backend delete.
    pub async fn is_reclaimable(&self, key: &str) -> TrackerResult<bool> {
        Ok(self
            .get_by_key(key)
            .await?
            .is_some_and(|r| matches!(r.status, ResourceStatus::Orphaned | ResourceStatus::Temp)))
    }

    pub async fn get_by_key(&self, key: &str) -> TrackerResult<Option<Resource>> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE key = ?");
        Ok(sqlx::query_as::<_, Resource>(&sql)
            .bind(key)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// Live references for one key, insertion-ordered.
    pub async fn references_for_key(&self, key: &str) -> TrackerResult<Vec<ResourceReference>> {
        Ok(sqlx::query_as::<_, ResourceReference>(
            "SELECT rr.id, rr.resource_id, rr.document_id, rr.document_type,
                    rr.field_name, rr.created_at
             FROM resource_references rr
             JOIN resources r ON r.id = rr.resource_id
             WHERE r.key = ?
             ORDER BY rr.created_at ASC, rr.id ASC",
        )
        .bind(key)
        .fetch_all(&*self.db)
        .await?)
    }

    /// Live references held by one document.
    pub async fn references_for_document(
        &self,
        document_id: &str,
    ) -> TrackerResult<Vec<ResourceReference>> {
        Ok(sqlx::query_as::<_, ResourceReference>(
            "SELECT id, resource_id, document_id, document_type, field_name, created_at
             FROM resource_references WHERE document_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(document_id)
        .fetch_all(&*self.db)
        .await?)
    }

    /// Per-status counts plus total tracked bytes for non-deleted rows.
    pub async fn stats(&self) -> TrackerResult<TrackerStats> {
        let rows: Vec<(ResourceStatus, i64, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*), COALESCE(SUM(file_size), 0)
             FROM resources GROUP BY status",
        )
        .fetch_all(&*self.db)
        .await?;

        let mut stats = TrackerStats::default();
        for (status, count, bytes) in rows {
            match status {
                ResourceStatus::Active => stats.active = count,
                ResourceStatus::Orphaned => stats.orphaned = count,
                ResourceStatus::Deleted => stats.deleted = count,
                ResourceStatus::Temp => stats.temp = count,
            }
            if status != ResourceStatus::Deleted {
                stats.tracked_bytes += bytes;
            }
        }
        Ok(stats)
    }

    async fn fetch_by_key(
        tx: &mut Transaction<'_, Sqlite>,
        key: &str,
    ) -> TrackerResult<Option<Resource>> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE key = ?");
        Ok(sqlx::query_as::<_, Resource>(&sql)
            .bind(key)
            .fetch_optional(&mut **tx)
            .await?)
    }

    /// Transition a resource to orphaned when its reference set is empty.
    /// `orphaned_at` is stamped only on the actual transition; an already
    /// orphaned or deleted row is left untouched.
    async fn orphan_if_unreferenced(
        tx: &mut Transaction<'_, Sqlite>,
        resource_id: Uuid,
    ) -> TrackerResult<bool> {
        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM resource_references WHERE resource_id = ?")
                .bind(resource_id)
                .fetch_one(&mut **tx)
                .await?;
        if remaining > 0 {
            return Ok(false);
        }

        let affected = sqlx::query(
            "UPDATE resources SET status = 'orphaned', orphaned_at = ?
             WHERE id = ? AND status IN ('active', 'temp')",
        )
        .bind(Utc::now())
        .bind(resource_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }
}

#[cfg(test)]
pub(crate) async fn test_pool() -> Arc<SqlitePool> {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let schema = include_str!("../../migrations/0001_init.sql");
    for stmt in schema.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(stmt).execute(&pool).await.unwrap();
    }
    Arc::new(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, size: i64) -> UploadRecord {
        UploadRecord {
            file_name: name.to_string(),
            file_size: size,
            mime_type: Some("image/png".into()),
            ..Default::default()
        }
    }

    async fn tracker() -> ResourceTracker {
        ResourceTracker::new(test_pool().await)
    }

    #[tokio::test]
    async fn re_upload_upserts_instead_of_duplicating() {
        let t = tracker().await;

        let first = t.record_upload("img/a.png", &record("a.png", 5)).await.unwrap();
        assert_eq!(first.usage_count, 1);
        assert_eq!(first.status, ResourceStatus::Active);

        let second = t.record_upload("img/a.png", &record("a.png", 5)).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.usage_count, 2);
        assert!(second.last_used >= first.last_used);
    }

    #[tokio::test]
    async fn temporary_uploads_are_recorded_as_temp_and_upgraded() {
        let t = tracker().await;

        let staged = t
            .record_upload(
                "img/staged.png",
                &UploadRecord {
                    temporary: true,
                    ..record("staged.png", 0)
                },
            )
            .await
            .unwrap();
        assert_eq!(staged.status, ResourceStatus::Temp);

        let confirmed = t
            .record_upload("img/staged.png", &record("staged.png", 9))
            .await
            .unwrap();
        assert_eq!(confirmed.status, ResourceStatus::Active);
        assert_eq!(confirmed.file_size, 9);
    }

    #[tokio::test]
    async fn add_reference_is_idempotent() {
        let t = tracker().await;
        t.record_upload("img/a.png", &record("a.png", 5)).await.unwrap();

        let first = t
            .add_reference("img/a.png", "doc1", "general", "hero")
            .await
            .unwrap();
        assert!(first.added);
        assert!(!first.placeholder);

        let again = t
            .add_reference("img/a.png", "doc1", "general", "hero")
            .await
            .unwrap();
        assert!(!again.added);

        assert_eq!(t.references_for_key("img/a.png").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn orphan_transition_and_reactivation() {
        let t = tracker().await;
        t.record_upload("img/a.png", &record("a.png", 5)).await.unwrap();
        t.add_reference("img/a.png", "doc1", "general", "hero")
            .await
            .unwrap();

        let outcome = t
            .remove_reference("img/a.png", "doc1", "hero")
            .await
            .unwrap();
        assert!(outcome.removed);
        assert!(outcome.orphaned);

        let resource = t.get_by_key("img/a.png").await.unwrap().unwrap();
        assert_eq!(resource.status, ResourceStatus::Orphaned);
        assert!(resource.orphaned_at.is_some());

        // Re-adding any reference reactivates and clears orphaned_at.
        let back = t
            .add_reference("img/a.png", "doc2", "general", "thumb")
            .await
            .unwrap();
        assert_eq!(back.resource.status, ResourceStatus::Active);
        assert!(back.resource.orphaned_at.is_none());
    }

    #[tokio::test]
    async fn removing_an_absent_reference_is_a_no_op() {
        let t = tracker().await;
        t.record_upload("img/a.png", &record("a.png", 5)).await.unwrap();

        let outcome = t
            .remove_reference("img/a.png", "doc1", "hero")
            .await
            .unwrap();
        assert!(!outcome.removed);
        assert!(!outcome.orphaned);

        // Unknown key is also fine.
        let unknown = t.remove_reference("nope", "doc1", "hero").await.unwrap();
        assert!(!unknown.removed);
    }

    #[tokio::test]
    async fn unknown_key_gets_a_placeholder_row() {
        let t = tracker().await;

        let outcome = t
            .add_reference("img/never-uploaded.png", "doc1", "general", "hero")
            .await
            .unwrap();
        assert!(outcome.added);
        assert!(outcome.placeholder);
        assert_eq!(outcome.resource.file_size, 0);
        assert_eq!(outcome.resource.status, ResourceStatus::Active);
        assert_eq!(outcome.resource.file_name, "never-uploaded.png");
    }

    #[tokio::test]
    async fn diff_and_update_applies_set_differences() {
        let t = tracker().await;
        for key in ["img/a", "img/b", "img/c"] {
            t.record_upload(key, &record(key, 1)).await.unwrap();
        }
        t.diff_and_update(
            "doc1",
            "general",
            "gallery",
            &[],
            &["img/a".into(), "img/b".into()],
        )
        .await
        .unwrap();

        // Edit: drop a, keep b, add c.
        let summary = t
            .diff_and_update(
                "doc1",
                "general",
                "gallery",
                &["img/a".into(), "img/b".into()],
                &["img/b".into(), "img/c".into()],
            )
            .await
            .unwrap();
        assert_eq!(summary.removed, vec!["img/a"]);
        assert_eq!(summary.added, vec!["img/c"]);
        assert_eq!(summary.orphaned, vec!["img/a"]);

        // Reference symmetry: doc1's gallery references are exactly {b, c}.
        let refs = t.references_for_document("doc1").await.unwrap();
        let mut keys = Vec::new();
        for r in &refs {
            assert_eq!(r.field_name, "gallery");
            let resource: Option<Resource> = {
                let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ?");
                sqlx::query_as(&sql)
                    .bind(r.resource_id)
                    .fetch_optional(&*t.db)
                    .await
                    .unwrap()
            };
            keys.push(resource.unwrap().key);
        }
        keys.sort();
        assert_eq!(keys, vec!["img/b", "img/c"]);
    }

    #[tokio::test]
    async fn document_delete_orphans_exclusively_held_resources() {
        let t = tracker().await;
        t.record_upload("img/solo", &record("solo", 1)).await.unwrap();
        t.record_upload("img/shared", &record("shared", 1)).await.unwrap();
        t.add_reference("img/solo", "doc1", "general", "hero").await.unwrap();
        t.add_reference("img/shared", "doc1", "general", "thumb").await.unwrap();
        t.add_reference("img/shared", "doc2", "general", "thumb").await.unwrap();

        let summary = t.remove_document_references("doc1").await.unwrap();
        assert_eq!(summary.orphaned, vec!["img/solo"]);

        let shared = t.get_by_key("img/shared").await.unwrap().unwrap();
        assert_eq!(shared.status, ResourceStatus::Active);
    }

    #[tokio::test]
    async fn orphan_scan_respects_the_cutoff() {
        let t = tracker().await;
        t.record_upload("img/a", &record("a", 1)).await.unwrap();
        t.add_reference("img/a", "doc1", "general", "hero").await.unwrap();
        t.remove_reference("img/a", "doc1", "hero").await.unwrap();

        // Cutoff in the past: freshly orphaned rows are not returned.
        let before = t
            .find_orphaned_before(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(before.is_empty());

        let after = t
            .find_orphaned_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].key, "img/a");
    }

    #[tokio::test]
    async fn mark_deleted_is_conditional_on_reclaimable_status() {
        let t = tracker().await;
        t.record_upload("img/a", &record("a", 1)).await.unwrap();
        t.add_reference("img/a", "doc1", "general", "hero").await.unwrap();

        // Active rows are never finalized.
        assert!(!t.mark_deleted("img/a").await.unwrap());

        t.remove_reference("img/a", "doc1", "hero").await.unwrap();
        assert!(t.is_reclaimable("img/a").await.unwrap());
        assert!(t.mark_deleted("img/a").await.unwrap());

        let resource = t.get_by_key("img/a").await.unwrap().unwrap();
        assert_eq!(resource.status, ResourceStatus::Deleted);
        assert!(resource.deleted_at.is_some());

        // Terminal: a second finalize is a no-op.
        assert!(!t.mark_deleted("img/a").await.unwrap());
    }

    #[tokio::test]
    async fn stats_count_per_status() {
        let t = tracker().await;
        t.record_upload("a", &record("a", 10)).await.unwrap();
        t.record_upload("b", &record("b", 20)).await.unwrap();
        t.add_reference("b", "doc1", "general", "hero").await.unwrap();
        t.remove_reference("b", "doc1", "hero").await.unwrap();

        let stats = t.stats().await.unwrap();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.orphaned, 1);
        assert_eq!(stats.tracked_bytes, 30);
    }
}
