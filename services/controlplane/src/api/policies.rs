//! Policy API handlers.
//!
//! # Purpose and responsibility
//! Direct grants of actions on one object to one subject, and the evaluation
//! endpoint that answers access questions without performing them.
//!
//! # Key invariants and assumptions
//! - At most one policy exists per (subject, object); adding a second is a
//!   409, updating replaces the action set.
//! - Only subjects allowed to manage roles on the object may grant on it.
use crate::api::error::{ApiError, api_from_error};
use crate::api::session_from_headers;
use crate::api::types::{ErrorResponse, EvaluateResponse, PolicyListParams, PolicyRequest};
use crate::app::AppState;
use crate::errors::ErrorKind;
use crate::model::{Policy, PolicyFilter, PolicyPage};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};

fn policy_from_request(body: PolicyRequest) -> Policy {
    Policy::request(&body.subject, &body.object, body.actions)
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/policies",
    tag = "policies",
    params(("domain_id" = String, Path, description = "Domain identifier")),
    request_body = PolicyRequest,
    responses(
        (status = 201, description = "Policy added", body = Policy),
        (status = 400, description = "Missing subject/object or invalid action", body = ErrorResponse),
        (status = 403, description = "Caller may not grant on the object", body = ErrorResponse),
        (status = 409, description = "A policy already exists for the pair", body = ErrorResponse)
    )
)]
pub(crate) async fn add_policy(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PolicyRequest>,
) -> Result<(StatusCode, Json<Policy>), ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let policy = state
        .policies
        .add_policy(&session, policy_from_request(body))
        .await
        .map_err(api_from_error)?;
    Ok((StatusCode::CREATED, Json(policy)))
}

#[utoipa::path(
    put,
    path = "/v1/domains/{domain_id}/policies",
    tag = "policies",
    params(("domain_id" = String, Path, description = "Domain identifier")),
    request_body = PolicyRequest,
    responses(
        (status = 200, description = "Policy actions replaced", body = Policy),
        (status = 404, description = "No policy for the pair", body = ErrorResponse)
    )
)]
pub(crate) async fn update_policy(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PolicyRequest>,
) -> Result<Json<Policy>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .policies
        .update_policy(&session, policy_from_request(body))
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/policies",
    tag = "policies",
    params(("domain_id" = String, Path, description = "Domain identifier"), PolicyListParams),
    responses((status = 200, description = "Policies of the domain", body = PolicyPage))
)]
pub(crate) async fn list_policies(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PolicyListParams>,
) -> Result<Json<PolicyPage>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let filter = PolicyFilter {
        subject: params.subject,
        object: params.object,
        action: params.action,
        domain_id: None,
    };
    state
        .policies
        .list_policies(&session, filter, params.offset, params.limit)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/policies/{subject}/{object}",
    tag = "policies",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("subject" = String, Path, description = "Policy subject"),
        ("object" = String, Path, description = "Policy object")
    ),
    responses(
        (status = 200, description = "Policy", body = Policy),
        (status = 404, description = "No policy for the pair", body = ErrorResponse)
    )
)]
pub(crate) async fn get_policy(
    Path((domain_id, subject, object)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Policy>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .policies
        .retrieve_policy(&session, &subject, &object)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    delete,
    path = "/v1/domains/{domain_id}/policies/{subject}/{object}",
    tag = "policies",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("subject" = String, Path, description = "Policy subject"),
        ("object" = String, Path, description = "Policy object")
    ),
    responses(
        (status = 204, description = "Policy deleted"),
        (status = 404, description = "No policy for the pair", body = ErrorResponse)
    )
)]
pub(crate) async fn delete_policy(
    Path((domain_id, subject, object)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .policies
        .delete_policy(&session, &subject, &object)
        .await
        .map_err(api_from_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/policies/evaluate",
    tag = "policies",
    params(("domain_id" = String, Path, description = "Domain identifier")),
    request_body = PolicyRequest,
    responses(
        (status = 200, description = "Whether the subject holds every action", body = EvaluateResponse),
        (status = 400, description = "Invalid action for the object", body = ErrorResponse)
    )
)]
/// Evaluate an access question.
///
/// # What it does
/// Answers whether `subject` may perform every listed action on `object`.
/// A denial is a normal `allowed: false` answer, not an error.
pub(crate) async fn evaluate(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PolicyRequest>,
) -> Result<Json<EvaluateResponse>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let policy = policy_from_request(body);
    match state.policies.evaluate(&session, &policy).await {
        Ok(()) => Ok(Json(EvaluateResponse { allowed: true })),
        Err(err) if err.kind() == ErrorKind::Authorization => {
            Ok(Json(EvaluateResponse { allowed: false }))
        }
        Err(err) => Err(api_from_error(err)),
    }
}
