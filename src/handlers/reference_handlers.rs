//! HTTP handlers for the resource reference tracker.

use crate::{
    errors::AppError,
    handlers::AppState,
    services::tracker::DiffSummary,
};
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

/// Body of the diff endpoint: the field's key set before and after a
/// document edit.
#[derive(Debug, Deserialize)]
pub struct DiffReq {
    pub document_id: String,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    pub field_name: String,
    #[serde(default)]
    pub old_keys: Vec<String>,
    #[serde(default)]
    pub new_keys: Vec<String>,
}

fn default_document_type() -> String {
    "general".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RemoveReferenceReq {
    pub key: String,
    pub document_id: String,
    pub field_name: String,
}

/// POST `/references/diff`: apply a document edit as set differences.
pub async fn diff_references(
    State(state): State<AppState>,
    Json(req): Json<DiffReq>,
) -> Result<Json<DiffSummary>, AppError> {
    let summary = state
        .tracker
        .diff_and_update(
            &req.document_id,
            &req.document_type,
            &req.field_name,
            &req.old_keys,
            &req.new_keys,
        )
        .await?;

    for key in &summary.placeholders {
        warn!(
            key = %key,
            document_id = %req.document_id,
            "reference added for a key with no recorded upload"
        );
    }
    Ok(Json(summary))
}

/// POST `/references/remove`: drop a single reference tuple. Removing an
/// absent tuple succeeds.
pub async fn remove_reference(
    State(state): State<AppState>,
    Json(req): Json<RemoveReferenceReq>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .tracker
        .remove_reference(&req.key, &req.document_id, &req.field_name)
        .await?;
    Ok(Json(json!({
        "key": req.key,
        "removed": outcome.removed,
        "orphaned": outcome.orphaned,
    })))
}

/// DELETE `/references/{document_id}`: the document-delete path. Every
/// reference the document held is dropped; resources it held exclusively
/// become orphaned and wait out the retention window.
pub async fn remove_document_references(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<DiffSummary>, AppError> {
    let summary = state.tracker.remove_document_references(&document_id).await?;
    Ok(Json(summary))
}

/// GET `/resources/{*key}`: catalog row plus its live references.
pub async fn get_resource(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let resource = state
        .tracker
        .get_by_key(&key)
        .await?
        .ok_or_else(|| AppError::new(
            axum::http::StatusCode::NOT_FOUND,
            format!("resource for key `{key}` not found"),
        ))?;
    let references = state.tracker.references_for_key(&key).await?;
    Ok(Json(json!({
        "resource": resource,
        "references": references,
    })))
}

/// GET `/documents/{document_id}/references`: what a document embeds.
pub async fn list_document_references(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let references = state.tracker.references_for_document(&document_id).await?;
    Ok(Json(json!({
        "document_id": document_id,
        "references": references,
    })))
}
