//! Domain API handlers.
//!
//! # Purpose
//! Opens new domains and reads existing ones. A domain is the tenancy
//! boundary; every other resource route is nested under one.
use crate::api::error::{ApiError, api_from_error};
use crate::api::types::{DomainCreateRequest, ErrorResponse};
use crate::api::{session_from_headers, subject_from_headers};
use crate::app::AppState;
use crate::model::Domain;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};

#[utoipa::path(
    post,
    path = "/v1/domains",
    tag = "domains",
    request_body = DomainCreateRequest,
    responses(
        (status = 201, description = "Domain created; the caller becomes its administrator", body = Domain),
        (status = 400, description = "Invalid name", body = ErrorResponse),
        (status = 401, description = "Missing subject", body = ErrorResponse)
    )
)]
pub(crate) async fn create_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DomainCreateRequest>,
) -> Result<(StatusCode, Json<Domain>), ApiError> {
    let subject = subject_from_headers(&headers)?;
    let domain = state
        .entities
        .create_domain(&subject, &body.name)
        .await
        .map_err(api_from_error)?;
    Ok((StatusCode::CREATED, Json(domain)))
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}",
    tag = "domains",
    params(("domain_id" = String, Path, description = "Domain identifier")),
    responses(
        (status = 200, description = "Domain", body = Domain),
        (status = 403, description = "Caller may not read the domain", body = ErrorResponse),
        (status = 404, description = "Domain not found", body = ErrorResponse)
    )
)]
pub(crate) async fn get_domain(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Domain>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .entities
        .view_domain(&session)
        .await
        .map(Json)
        .map_err(api_from_error)
}
