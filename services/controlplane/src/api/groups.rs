//! Group hierarchy API handlers.
//!
//! # Purpose and responsibility
//! CRUD over the groups of a domain, hierarchy walks (parents, children) and
//! group membership.
//!
//! # Key invariants and assumptions
//! - `path`, `level` and, for children, `type` are derived by the store;
//!   request bodies cannot set them.
//! - Hierarchy walks exclude the named group and are bounded by `level`.
//! - Deleting a group that (or whose subtree) still has members is a 409 with
//!   code `group_not_empty`.
use crate::api::error::{ApiError, api_from_error};
use crate::api::types::{
    ErrorResponse, GroupCreateRequest, GroupUpdateRequest, HierarchyParams, ListGroupsResponse,
    MemberAssignRequest, PageParams,
};
use crate::api::{hierarchy_query, parse_metadata, session_from_headers};
use crate::app::AppState;
use crate::model::{Group, GroupsPage, MembersPage, Membership};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/groups",
    tag = "groups",
    params(("domain_id" = String, Path, description = "Domain identifier")),
    request_body = GroupCreateRequest,
    responses(
        (status = 201, description = "Group created", body = Group),
        (status = 400, description = "Invalid group, unknown type or too deep", body = ErrorResponse),
        (status = 403, description = "Caller may not create here", body = ErrorResponse),
        (status = 404, description = "Parent not found", body = ErrorResponse),
        (status = 409, description = "Group id already exists", body = ErrorResponse)
    )
)]
pub(crate) async fn create_group(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GroupCreateRequest>,
) -> Result<(StatusCode, Json<Group>), ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let group = Group {
        id: body.id.unwrap_or_default(),
        domain_id: domain_id.clone(),
        parent_id: body.parent_id.filter(|parent| !parent.is_empty()),
        name: body.name,
        description: body.description,
        owner_id: String::new(),
        group_type: body.group_type.unwrap_or_default(),
        path: String::new(),
        level: 0,
        metadata: body.metadata,
        created_at: Utc::now(),
        updated_at: None,
    };
    let group = state
        .groups
        .create_group(&session, group)
        .await
        .map_err(api_from_error)?;
    Ok((StatusCode::CREATED, Json(group)))
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/groups",
    tag = "groups",
    params(("domain_id" = String, Path, description = "Domain identifier"), HierarchyParams),
    responses(
        (status = 200, description = "Groups of the domain down to `level`", body = ListGroupsResponse)
    )
)]
pub(crate) async fn list_groups(
    Path(domain_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HierarchyParams>,
) -> Result<Json<ListGroupsResponse>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let query = hierarchy_query(params.level, params.metadata.as_deref())?;
    let items = state
        .groups
        .list_groups(&session, &query)
        .await
        .map_err(api_from_error)?;
    Ok(Json(ListGroupsResponse { items }))
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/groups/{group_id}",
    tag = "groups",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("group_id" = String, Path, description = "Group identifier")
    ),
    responses(
        (status = 200, description = "Group", body = Group),
        (status = 404, description = "Group not found", body = ErrorResponse)
    )
)]
pub(crate) async fn get_group(
    Path((domain_id, group_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Group>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .groups
        .view_group(&session, &group_id)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    patch,
    path = "/v1/domains/{domain_id}/groups/{group_id}",
    tag = "groups",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("group_id" = String, Path, description = "Group identifier")
    ),
    request_body = GroupUpdateRequest,
    responses(
        (status = 200, description = "Group updated", body = Group),
        (status = 404, description = "Group not found", body = ErrorResponse)
    )
)]
pub(crate) async fn update_group(
    Path((domain_id, group_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GroupUpdateRequest>,
) -> Result<Json<Group>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    // Only name, description and metadata are read by the service.
    let group = Group {
        id: group_id,
        domain_id,
        parent_id: None,
        name: body.name,
        description: body.description,
        owner_id: String::new(),
        group_type: String::new(),
        path: String::new(),
        level: 0,
        metadata: body.metadata,
        created_at: Utc::now(),
        updated_at: None,
    };
    state
        .groups
        .update_group(&session, group)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    delete,
    path = "/v1/domains/{domain_id}/groups/{group_id}",
    tag = "groups",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("group_id" = String, Path, description = "Group identifier")
    ),
    responses(
        (status = 204, description = "Group and its subtree deleted"),
        (status = 404, description = "Group not found", body = ErrorResponse),
        (status = 409, description = "The subtree still has members", body = ErrorResponse)
    )
)]
pub(crate) async fn delete_group(
    Path((domain_id, group_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .groups
        .delete_group(&session, &group_id)
        .await
        .map_err(api_from_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/groups/{group_id}/parents",
    tag = "groups",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("group_id" = String, Path, description = "Group identifier"),
        HierarchyParams
    ),
    responses(
        (status = 200, description = "Ancestors within `level` steps", body = ListGroupsResponse)
    )
)]
pub(crate) async fn list_parents(
    Path((domain_id, group_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HierarchyParams>,
) -> Result<Json<ListGroupsResponse>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let query = hierarchy_query(params.level, params.metadata.as_deref())?;
    let items = state
        .groups
        .list_parents(&session, &group_id, &query)
        .await
        .map_err(api_from_error)?;
    Ok(Json(ListGroupsResponse { items }))
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/groups/{group_id}/children",
    tag = "groups",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("group_id" = String, Path, description = "Group identifier"),
        HierarchyParams
    ),
    responses(
        (status = 200, description = "Descendants within `level` steps", body = ListGroupsResponse)
    )
)]
pub(crate) async fn list_children(
    Path((domain_id, group_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HierarchyParams>,
) -> Result<Json<ListGroupsResponse>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let query = hierarchy_query(params.level, params.metadata.as_deref())?;
    let items = state
        .groups
        .list_children(&session, &group_id, &query)
        .await
        .map_err(api_from_error)?;
    Ok(Json(ListGroupsResponse { items }))
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/groups/{group_id}/members",
    tag = "groups",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("group_id" = String, Path, description = "Group identifier"),
        PageParams
    ),
    responses((status = 200, description = "Members of the group", body = MembersPage))
)]
pub(crate) async fn list_members(
    Path((domain_id, group_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<Json<MembersPage>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let metadata = parse_metadata(params.metadata.as_deref())?;
    state
        .groups
        .members(
            &session,
            &group_id,
            params.offset,
            params.limit,
            metadata.as_ref(),
        )
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/groups/{group_id}/members",
    tag = "groups",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("group_id" = String, Path, description = "Group identifier")
    ),
    request_body = MemberAssignRequest,
    responses(
        (status = 201, description = "Member assigned", body = Membership),
        (status = 409, description = "Member already assigned", body = ErrorResponse)
    )
)]
pub(crate) async fn assign_member(
    Path((domain_id, group_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MemberAssignRequest>,
) -> Result<(StatusCode, Json<Membership>), ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let membership = state
        .groups
        .assign(&session, &group_id, &body.member_id)
        .await
        .map_err(api_from_error)?;
    Ok((StatusCode::CREATED, Json(membership)))
}

#[utoipa::path(
    delete,
    path = "/v1/domains/{domain_id}/groups/{group_id}/members/{member_id}",
    tag = "groups",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("group_id" = String, Path, description = "Group identifier"),
        ("member_id" = String, Path, description = "Member identifier")
    ),
    responses(
        (status = 204, description = "Member unassigned"),
        (status = 404, description = "Membership not found", body = ErrorResponse)
    )
)]
pub(crate) async fn unassign_member(
    Path((domain_id, group_id, member_id)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .groups
        .unassign(&session, &group_id, &member_id)
        .await
        .map_err(api_from_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/members/{member_id}/groups",
    tag = "groups",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("member_id" = String, Path, description = "Member identifier"),
        PageParams
    ),
    responses((status = 200, description = "Groups the member belongs to", body = GroupsPage))
)]
pub(crate) async fn list_memberships(
    Path((domain_id, member_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<Json<GroupsPage>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let metadata = parse_metadata(params.metadata.as_deref())?;
    state
        .groups
        .memberships(
            &session,
            &member_id,
            params.offset,
            params.limit,
            metadata.as_ref(),
        )
        .await
        .map(Json)
        .map_err(api_from_error)
}
