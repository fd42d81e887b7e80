//! Change event API handlers.
//!
//! # Purpose
//! Lets consumers poll the change events of one domain from a checkpoint.
//!
//! # Notes
//! The log is bounded; a consumer whose `since` predates the oldest retained
//! event sees a gap and must resynchronize from the resource endpoints.
use crate::api::error::{ApiError, api_from_error};
use crate::api::session_from_headers;
use crate::api::types::{ChangesParams, ErrorResponse};
use crate::app::AppState;
use crate::events::EventPage;
use arbiter_authz::Action;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/events/changes",
    tag = "events",
    params(("domain_id" = String, Path, description = "Domain identifier"), ChangesParams),
    responses(
        (status = 200, description = "Events of the domain with seq >= since", body = EventPage),
        (status = 403, description = "Caller may not read the domain", body = ErrorResponse)
    )
)]
pub(crate) async fn domain_changes(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ChangesParams>,
) -> Result<Json<EventPage>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .evaluator
        .authorize(&domain_id, &session.subject, &domain_id, Action::Read)
        .await
        .map_err(api_from_error)?;
    let mut page = state.events.changes(params.since).await;
    page.items.retain(|event| event.domain_id == domain_id);
    Ok(Json(page))
}
