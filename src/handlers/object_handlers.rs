//! HTTP handlers for object operations.
//! Streams object bodies to avoid buffering in memory and delegates
//! storage concerns to the active driver; upload bookkeeping goes to the
//! resource tracker in the same request, but a bookkeeping warning never
//! fails the upload that carried it.

use crate::{
    errors::AppError,
    handlers::AppState,
    services::{
        storage::{
            BatchDeleteResult, ListParams, ListResult, MoveResult, SignedUpload, UploadOptions,
            generate_key, with_deadline,
        },
        tracker::UploadRecord,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use tracing::warn;

/// Query params accepted by the list endpoint.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteReq {
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CopyReq {
    pub source_key: String,
    pub target_key: String,
}

#[derive(Debug, Deserialize)]
pub struct SignUploadReq {
    pub file_name: String,
    pub content_type: Option<String>,
    /// Key namespace, e.g. "img" or "attachments". Defaults to "uploads".
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignUploadResp {
    pub key: String,
    pub upload: SignedUpload,
}

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    #[serde(rename = "expires-in")]
    pub expires_in: Option<u64>,
}

/// PUT `/objects/{*key}`: streaming upload, then catalog upsert.
///
/// The transfer itself is deliberately exempt from the per-operation
/// deadline: its duration is set by the client's body pacing, and the
/// size cap below already bounds how much a slow client can hold open.
pub async fn upload_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let limit = state.config.max_file_size;
    if let Some(declared) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        if declared > limit {
            return Err(AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("file size {declared} bytes exceeds maximum allowed {limit} bytes"),
            ));
        }
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    // Enforce the size cap while streaming; an oversized body aborts the
    // upload mid-stream and the driver discards the partial object.
    let mut total: u64 = 0;
    let stream = body.into_data_stream().map(move |chunk| {
        let chunk = chunk.map_err(io::Error::other)?;
        total += chunk.len() as u64;
        if total > limit {
            return Err(io::Error::other(format!(
                "body exceeds maximum allowed {limit} bytes"
            )));
        }
        Ok(chunk)
    });

    let opts = UploadOptions {
        content_type,
        file_name: Some(file_name_of(&key)),
    };
    let driver = state.driver().await?;
    let result = driver.upload_stream(&key, Box::pin(stream), &opts).await?;

    let record = UploadRecord {
        file_name: file_name_of(&key),
        file_size: result.size,
        mime_type: result.content_type.clone(),
        ..Default::default()
    };
    if let Err(err) = state.tracker.record_upload(&key, &record).await {
        // The bytes are stored; catalog bookkeeping must not fail the
        // upload that carried it.
        warn!(key = %key, "upload stored but catalog upsert failed: {err}");
    }

    Ok(Json(result))
}

/// GET `/objects/{*key}`: streaming download.
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let driver = state.driver().await?;
    let info = with_deadline(state.config.operation_timeout, driver.get_info(&key)).await?;
    // The deadline covers opening the stream; the body transfer after it
    // is paced by the client.
    let stream = with_deadline(state.config.operation_timeout, driver.get_stream(&key)).await?;

    let mut response = Response::new(Body::from_stream(stream));
    set_object_headers(response.headers_mut(), &info);
    Ok(response)
}

/// HEAD `/objects/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let driver = state.driver().await?;
    let info = with_deadline(state.config.operation_timeout, driver.get_info(&key)).await?;

    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &info);
    Ok(response)
}

/// DELETE `/objects/{*key}`: remove bytes; absence is not an error.
pub async fn delete_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let driver = state.driver().await?;
    let deleted = with_deadline(state.config.operation_timeout, driver.delete(&key)).await?;
    Ok(Json(json!({ "key": key, "deleted": deleted })))
}

/// GET `/objects?prefix=&delimiter=&max-keys=&continuation-token=`
pub async fn list_objects(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListPage>, AppError> {
    let params = ListParams {
        prefix: q.prefix,
        delimiter: q.delimiter,
        continuation_token: q.continuation_token.as_deref().map(decode_continuation_token),
        max_keys: q.max_keys.unwrap_or(1000).clamp(1, 1000),
    };

    let driver = state.driver().await?;
    let result = with_deadline(state.config.operation_timeout, driver.list(params)).await?;
    Ok(Json(ListPage::from(result)))
}

/// JSON page with the continuation token base64-wrapped so clients treat
/// it as opaque.
#[derive(Debug, Serialize)]
pub struct ListPage {
    pub objects: Vec<crate::services::storage::ObjectInfo>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

impl From<ListResult> for ListPage {
    fn from(result: ListResult) -> Self {
        Self {
            objects: result.objects,
            common_prefixes: result.common_prefixes,
            is_truncated: result.is_truncated,
            next_continuation_token: result
                .next_continuation_token
                .as_deref()
                .map(encode_continuation_token),
        }
    }
}

/// POST `/batch/delete`: best-effort batch, partial failure is data.
pub async fn batch_delete(
    State(state): State<AppState>,
    Json(req): Json<BatchDeleteReq>,
) -> Result<Json<BatchDeleteResult>, AppError> {
    let driver = state.driver().await?;
    let result = driver.delete_many(&req.keys).await?;
    Ok(Json(result))
}

/// POST `/operations/copy`
pub async fn copy_object(
    State(state): State<AppState>,
    Json(req): Json<CopyReq>,
) -> Result<impl IntoResponse, AppError> {
    let driver = state.driver().await?;
    with_deadline(
        state.config.operation_timeout,
        driver.copy(&req.source_key, &req.target_key),
    )
    .await?;
    Ok(Json(json!({
        "source_key": req.source_key,
        "target_key": req.target_key,
    })))
}

/// POST `/operations/move`: surfaces the copied-but-not-deleted warning.
pub async fn move_object(
    State(state): State<AppState>,
    Json(req): Json<CopyReq>,
) -> Result<Json<MoveResult>, AppError> {
    let driver = state.driver().await?;
    let result = driver.move_object(&req.source_key, &req.target_key).await?;
    if let Some(warning) = &result.warning {
        warn!(source = %req.source_key, "{warning}");
    }
    Ok(Json(result))
}

/// GET `/urls/{*key}?expires-in=`: access URL per backend visibility.
pub async fn get_object_url(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<UrlQuery>,
) -> Result<impl IntoResponse, AppError> {
    let driver = state.driver().await?;
    let expires_in = q.expires_in.map(std::time::Duration::from_secs);
    let url = with_deadline(
        state.config.operation_timeout,
        driver.get_url(&key, expires_in),
    )
    .await?;
    Ok(Json(json!({ "key": key, "url": url })))
}

/// POST `/uploads/sign`: pre-authorize a client-side upload and stage a
/// `temp` catalog row; the row is upgraded when the upload is confirmed
/// by a later `record_upload`, or reclaimed by the cleanup sweep.
pub async fn sign_upload(
    State(state): State<AppState>,
    Json(req): Json<SignUploadReq>,
) -> Result<Json<SignUploadResp>, AppError> {
    let key = generate_key(req.prefix.as_deref().unwrap_or("uploads"), &req.file_name);
    let opts = UploadOptions {
        content_type: req.content_type.clone(),
        file_name: Some(req.file_name.clone()),
    };

    let driver = state.driver().await?;
    let upload = driver
        .get_signed_upload_url(&key, state.config.upload_sign_ttl, &opts)
        .await?;

    state
        .tracker
        .record_upload(
            &key,
            &UploadRecord {
                file_name: req.file_name,
                mime_type: req.content_type,
                temporary: true,
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(SignUploadResp { key, upload }))
}

/// GET `/stats`: backend aggregates merged with tracker-side counts.
pub async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let driver = state.driver().await?;
    let backend = with_deadline(state.config.operation_timeout, driver.get_stats()).await?;
    let tracker = state.tracker.stats().await?;
    Ok(Json(json!({
        "provider": driver.provider(),
        "backend": backend,
        "tracker": tracker,
    })))
}

fn file_name_of(key: &str) -> String {
    key.rsplit('/').next().unwrap_or(key).to_string()
}

fn set_object_headers(headers: &mut HeaderMap, info: &crate::services::storage::ObjectInfo) {
    let content_type = info
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&info.size.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Some(etag) = info.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Some(modified) = info.last_modified {
        if let Ok(value) = HeaderValue::from_str(&modified.to_rfc2822()) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD.encode(token)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}
