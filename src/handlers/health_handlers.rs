//! Liveness and readiness endpoints.

use crate::{errors::AppError, handlers::AppState};
use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;

/// GET `/healthz`: process is up.
pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET `/readyz`: database reachable and the active storage backend
/// answers a write/read/delete probe.
pub async fn readyz(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    sqlx::query("SELECT 1")
        .execute(&*state.db)
        .await
        .map_err(|err| AppError::internal(format!("database not ready: {err}")))?;

    let driver = state.driver().await?;
    if !driver.test_connection().await? {
        return Err(AppError::internal("storage probe returned unexpected data"));
    }

    Ok(Json(json!({ "status": "ready" })))
}
