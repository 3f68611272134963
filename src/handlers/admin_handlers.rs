//! Administrative endpoints: configuration probing, provider capability
//! listing, and on-demand cleanup runs.

use crate::{
    errors::AppError,
    handlers::AppState,
    services::{
        cleanup::SweepReport,
        storage::{Provider, factory::StorageFactory},
    },
};
use axum::{Json, extract::State, response::IntoResponse};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct TestConfigReq {
    /// Provider to probe. Defaults to the active one.
    pub provider: Option<String>,
}

/// POST `/admin/storage/test`: validate a provider configuration by
/// constructing a throwaway driver and probing connectivity. The active
/// driver is never touched, and the response carries no credentials.
pub async fn test_storage_config(
    State(state): State<AppState>,
    Json(req): Json<TestConfigReq>,
) -> Result<impl IntoResponse, AppError> {
    let provider = match req.provider {
        Some(raw) => Provider::from_str(&raw)
            .map_err(|err| AppError::bad_request(err.to_string()))?,
        None => state.config.storage.provider,
    };

    let info = StorageFactory::test_config(provider, &state.config.storage).await?;
    Ok(Json(json!({ "ok": true, "provider": info })))
}

/// GET `/admin/storage/providers`: capability list for UI pickers.
pub async fn list_providers() -> impl IntoResponse {
    Json(StorageFactory::list_supported_providers())
}

/// POST `/admin/cleanup/run`: trigger one sweep outside the schedule.
pub async fn run_cleanup(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    info!("manual cleanup sweep requested");
    let report = state.scheduler.sweep(None).await?;
    Ok(Json(report))
}
