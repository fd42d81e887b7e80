//! Thing, channel and connection API handlers.
//!
//! # Purpose
//! Registry endpoints for the devices (things) and message channels of a
//! domain, and for the thing-to-channel connections the gateway authorizes
//! against.
//!
//! # Notes
//! Removing, disabling or disconnecting evicts the matching cache entries
//! inside the service call; handlers only translate shapes.
use crate::api::error::{ApiError, api_from_error};
use crate::api::session_from_headers;
use crate::api::types::{
    ChannelCreateRequest, ConnectionsRequest, ConnectionsResponse, ErrorResponse,
    ThingCreateRequest,
};
use crate::app::AppState;
use crate::model::{Channel, Connection, Thing};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/things",
    tag = "things",
    params(("domain_id" = String, Path, description = "Domain identifier")),
    request_body = ThingCreateRequest,
    responses(
        (status = 201, description = "Thing registered", body = Thing),
        (status = 403, description = "Caller may not create things", body = ErrorResponse),
        (status = 409, description = "Key already in use", body = ErrorResponse)
    )
)]
pub(crate) async fn create_thing(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ThingCreateRequest>,
) -> Result<(StatusCode, Json<Thing>), ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let thing = state
        .entities
        .create_thing(&session, &body.name, body.key)
        .await
        .map_err(api_from_error)?;
    Ok((StatusCode::CREATED, Json(thing)))
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/things/{thing_id}",
    tag = "things",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("thing_id" = String, Path, description = "Thing identifier")
    ),
    responses(
        (status = 200, description = "Thing", body = Thing),
        (status = 404, description = "Thing not found", body = ErrorResponse)
    )
)]
pub(crate) async fn get_thing(
    Path((domain_id, thing_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Thing>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .entities
        .view_thing(&session, &thing_id)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    delete,
    path = "/v1/domains/{domain_id}/things/{thing_id}",
    tag = "things",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("thing_id" = String, Path, description = "Thing identifier")
    ),
    responses(
        (status = 204, description = "Thing removed"),
        (status = 404, description = "Thing not found", body = ErrorResponse)
    )
)]
pub(crate) async fn delete_thing(
    Path((domain_id, thing_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .entities
        .remove_thing(&session, &thing_id)
        .await
        .map_err(api_from_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/things/{thing_id}/enable",
    tag = "things",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("thing_id" = String, Path, description = "Thing identifier")
    ),
    responses((status = 200, description = "Thing enabled", body = Thing))
)]
pub(crate) async fn enable_thing(
    Path((domain_id, thing_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Thing>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .entities
        .enable_thing(&session, &thing_id)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/things/{thing_id}/disable",
    tag = "things",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("thing_id" = String, Path, description = "Thing identifier")
    ),
    responses((status = 200, description = "Thing disabled", body = Thing))
)]
pub(crate) async fn disable_thing(
    Path((domain_id, thing_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Thing>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .entities
        .disable_thing(&session, &thing_id)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/channels/{channel_id}/enable",
    tag = "channels",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("channel_id" = String, Path, description = "Channel identifier")
    ),
    responses((status = 200, description = "Channel enabled", body = Channel))
)]
pub(crate) async fn enable_channel(
    Path((domain_id, channel_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Channel>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .entities
        .enable_channel(&session, &channel_id)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/channels/{channel_id}/disable",
    tag = "channels",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("channel_id" = String, Path, description = "Channel identifier")
    ),
    responses((status = 200, description = "Channel disabled", body = Channel))
)]
pub(crate) async fn disable_channel(
    Path((domain_id, channel_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Channel>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .entities
        .disable_channel(&session, &channel_id)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/channels",
    tag = "channels",
    params(("domain_id" = String, Path, description = "Domain identifier")),
    request_body = ChannelCreateRequest,
    responses(
        (status = 201, description = "Channel created", body = Channel),
        (status = 403, description = "Caller may not create channels", body = ErrorResponse)
    )
)]
pub(crate) async fn create_channel(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChannelCreateRequest>,
) -> Result<(StatusCode, Json<Channel>), ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let channel = state
        .entities
        .create_channel(&session, &body.name)
        .await
        .map_err(api_from_error)?;
    Ok((StatusCode::CREATED, Json(channel)))
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/channels/{channel_id}",
    tag = "channels",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("channel_id" = String, Path, description = "Channel identifier")
    ),
    responses(
        (status = 200, description = "Channel", body = Channel),
        (status = 404, description = "Channel not found", body = ErrorResponse)
    )
)]
pub(crate) async fn get_channel(
    Path((domain_id, channel_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Channel>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .entities
        .view_channel(&session, &channel_id)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    delete,
    path = "/v1/domains/{domain_id}/channels/{channel_id}",
    tag = "channels",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("channel_id" = String, Path, description = "Channel identifier")
    ),
    responses((status = 204, description = "Channel removed"))
)]
pub(crate) async fn delete_channel(
    Path((domain_id, channel_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .entities
        .remove_channel(&session, &channel_id)
        .await
        .map_err(api_from_error)?;
    Ok(StatusCode::NO_CONTENT)
}

fn connections(domain_id: &str, body: ConnectionsRequest) -> Vec<Connection> {
    body.connections
        .into_iter()
        .map(|item| Connection {
            thing_id: item.thing_id,
            channel_id: item.channel_id,
            domain_id: domain_id.to_string(),
        })
        .collect()
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/connections",
    tag = "connections",
    params(("domain_id" = String, Path, description = "Domain identifier")),
    request_body = ConnectionsRequest,
    responses(
        (status = 200, description = "Connections created", body = ConnectionsResponse),
        (status = 400, description = "Empty list or cross-domain pair", body = ErrorResponse),
        (status = 403, description = "Caller lacks connect rights on either end", body = ErrorResponse)
    )
)]
pub(crate) async fn connect(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ConnectionsRequest>,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let items = state
        .entities
        .connect(&session, connections(&domain_id, body))
        .await
        .map_err(api_from_error)?;
    Ok(Json(ConnectionsResponse { items }))
}

#[utoipa::path(
    delete,
    path = "/v1/domains/{domain_id}/connections",
    tag = "connections",
    params(("domain_id" = String, Path, description = "Domain identifier")),
    request_body = ConnectionsRequest,
    responses(
        (status = 204, description = "Connections removed"),
        (status = 403, description = "Caller lacks connect rights on either end", body = ErrorResponse)
    )
)]
pub(crate) async fn disconnect(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ConnectionsRequest>,
) -> Result<StatusCode, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .entities
        .disconnect(&session, connections(&domain_id, body))
        .await
        .map_err(api_from_error)?;
    Ok(StatusCode::NO_CONTENT)
}
