//! Route table for the media store API.
//!
//! ## Structure
//! - **Object endpoints**
//!   - `GET    /objects` list objects (supports prefix, delimiter, max-keys)
//!   - `PUT    /objects/{*key}` upload object
//!   - `GET    /objects/{*key}` download object
//!   - `HEAD   /objects/{*key}` metadata only
//!   - `DELETE /objects/{*key}` delete object
//!   - `POST   /batch/delete` best-effort batch delete
//!   - `POST   /operations/copy`, `POST /operations/move`
//!   - `POST   /uploads/sign` pre-authorized client-side upload
//!   - `GET    /urls/{*key}` access URL
//!
//! - **Tracker endpoints**
//!   - `GET    /resources/{*key}` catalog row plus live references
//!   - `POST   /references/diff` apply a document edit
//!   - `POST   /references/remove` drop one reference tuple
//!   - `DELETE /references/{document_id}` document delete path
//!   - `GET    /documents/{document_id}/references`
//!
//! - **Admin & ops**
//!   - `GET    /stats`, `POST /admin/storage/test`,
//!     `GET /admin/storage/providers`, `POST /admin/cleanup/run`
//!
//! The wildcard `*key` allows nested keys like `img/2025/photo.jpg`.

use crate::handlers::{
    AppState,
    admin_handlers::{list_providers, run_cleanup, test_storage_config},
    health_handlers::{healthz, readyz},
    object_handlers::{
        batch_delete, copy_object, delete_object, get_object, get_object_url, get_stats,
        head_object, list_objects, move_object, sign_upload, upload_object,
    },
    reference_handlers::{
        diff_references, get_resource, list_document_references, remove_document_references,
        remove_reference,
    },
};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Build the router; shared state is carried to every handler.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // object storage
        .route("/objects", get(list_objects))
        .route(
            "/objects/{*key}",
            put(upload_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
        .route("/batch/delete", post(batch_delete))
        .route("/operations/copy", post(copy_object))
        .route("/operations/move", post(move_object))
        .route("/uploads/sign", post(sign_upload))
        .route("/urls/{*key}", get(get_object_url))
        // resource lifecycle tracker
        .route("/resources/{*key}", get(get_resource))
        .route("/references/diff", post(diff_references))
        .route("/references/remove", post(remove_reference))
        .route("/references/{document_id}", delete(remove_document_references))
        .route(
            "/documents/{document_id}/references",
            get(list_document_references),
        )
        // admin & ops
        .route("/stats", get(get_stats))
        .route("/admin/storage/test", post(test_storage_config))
        .route("/admin/storage/providers", get(list_providers))
        .route("/admin/cleanup/run", post(run_cleanup))
}
