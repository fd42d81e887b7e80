//! System/health API handlers.
//!
//! # Purpose and responsibility
//! Provides lightweight endpoints for service metadata and health checks.
//!
//! # Key invariants and assumptions
//! - Health checks must be fast and side-effect free.
//! - System info is derived from in-memory configuration.
//!
//! # Security considerations
//! - These endpoints need no caller identity but reveal deployment metadata.
use crate::api::error::{ApiError, api_internal};
use crate::api::types::{ErrorResponse, HealthStatus, SystemInfo};
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/v1/system/info",
    tag = "system",
    responses(
        (status = 200, description = "Backends and registered group types", body = SystemInfo)
    )
)]
/// Return control-plane identity and backends.
///
/// # Errors
/// - Does not return errors.
pub(crate) async fn system_info(State(state): State<AppState>) -> Json<SystemInfo> {
    Json(SystemInfo {
        api_version: state.api_version.clone(),
        storage_backend: state.store.backend_name().to_string(),
        cache_backend: state.cache.backend_name().to_string(),
        durable_storage: state.store.is_durable(),
        group_types: state
            .store
            .config()
            .group_types
            .names()
            .map(str::to_string)
            .collect(),
    })
}

#[utoipa::path(
    get,
    path = "/v1/system/health",
    tag = "system",
    responses(
        (status = 200, description = "Control plane health", body = HealthStatus),
        (status = 500, description = "Storage unavailable", body = ErrorResponse)
    )
)]
/// Return control-plane health status.
///
/// # What it does
/// Runs the store's health check and returns `ok` when it passes. The cache
/// is not consulted; it is disposable and its failures are misses.
///
/// # Errors
/// - Returns 500 if storage health check fails.
pub(crate) async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, ApiError> {
    // Check backing store health to surface dependency availability.
    if let Err(err) = state.store.health_check().await {
        return Err(api_internal("storage unavailable", &err));
    }
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
    }))
}
