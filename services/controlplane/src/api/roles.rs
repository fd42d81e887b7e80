//! Role manager API handlers.
//!
//! # Purpose and responsibility
//! Manages the named roles of any entity (domain, group, thing, channel):
//! creation, renaming, and the action and member sets that make up each role.
//!
//! # Key invariants and assumptions
//! - Built-in roles cannot be removed or renamed, keep their mandatory actions
//!   and, where required, at least one member.
//! - Removing with an empty list clears the set; this is the only way to
//!   reach the "remove all" operations over HTTP.
use crate::api::error::{ApiError, api_from_error, api_validation_error};
use crate::api::session_from_headers;
use crate::api::types::{
    ActionsResponse, ErrorResponse, ExistsResponse, MembersResponse, PageParams,
    RoleActionsRequest, RoleCreateRequest, RoleMembersRequest, RoleRenameRequest,
};
use crate::app::AppState;
use crate::model::{Role, RoleMembersPage, RolePage};
use crate::service::roles::list_available_actions;
use arbiter_authz::EntityKind;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};

#[utoipa::path(
    get,
    path = "/v1/actions/{kind}",
    tag = "roles",
    params(("kind" = String, Path, description = "domain, group, thing or channel")),
    responses(
        (status = 200, description = "Actions a role on this kind may carry", body = ActionsResponse),
        (status = 400, description = "Unknown entity kind", body = ErrorResponse)
    )
)]
pub(crate) async fn available_actions(
    Path(kind): Path<String>,
) -> Result<Json<ActionsResponse>, ApiError> {
    let kind: EntityKind = kind
        .parse()
        .map_err(|err: arbiter_authz::AuthzError| api_validation_error(&err.to_string()))?;
    Ok(Json(ActionsResponse {
        actions: list_available_actions(kind),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role")
    ),
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 400, description = "Action not valid for the entity kind", body = ErrorResponse),
        (status = 409, description = "Role name taken or reserved", body = ErrorResponse)
    )
)]
pub(crate) async fn create_role(
    Path((domain_id, entity_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleCreateRequest>,
) -> Result<(StatusCode, Json<Role>), ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let role = state
        .roles
        .add_role(&session, &entity_id, &body.name, body.actions, body.members)
        .await
        .map_err(api_from_error)?;
    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the roles"),
        PageParams
    ),
    responses((status = 200, description = "Roles of the entity", body = RolePage))
)]
pub(crate) async fn list_roles(
    Path((domain_id, entity_id)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<Json<RolePage>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .roles
        .retrieve_all_roles(&session, &entity_id, params.offset, params.limit)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles/{name}",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role"),
        ("name" = String, Path, description = "Role name")
    ),
    responses(
        (status = 200, description = "Role", body = Role),
        (status = 404, description = "Role not found", body = ErrorResponse)
    )
)]
pub(crate) async fn get_role(
    Path((domain_id, entity_id, name)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Role>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .roles
        .retrieve_role(&session, &entity_id, &name)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    patch,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles/{name}",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role"),
        ("name" = String, Path, description = "Current role name")
    ),
    request_body = RoleRenameRequest,
    responses(
        (status = 200, description = "Role renamed", body = Role),
        (status = 400, description = "Built-in roles cannot be renamed", body = ErrorResponse),
        (status = 409, description = "Target name taken or reserved", body = ErrorResponse)
    )
)]
pub(crate) async fn rename_role(
    Path((domain_id, entity_id, name)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleRenameRequest>,
) -> Result<Json<Role>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .roles
        .update_role_name(&session, &entity_id, &name, &body.name)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    delete,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles/{name}",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role"),
        ("name" = String, Path, description = "Role name")
    ),
    responses(
        (status = 204, description = "Role removed"),
        (status = 400, description = "Built-in roles cannot be removed", body = ErrorResponse)
    )
)]
pub(crate) async fn delete_role(
    Path((domain_id, entity_id, name)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .roles
        .remove_role(&session, &entity_id, &name)
        .await
        .map_err(api_from_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles/{name}/actions",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role"),
        ("name" = String, Path, description = "Role name")
    ),
    responses((status = 200, description = "Actions of the role", body = ActionsResponse))
)]
pub(crate) async fn list_role_actions(
    Path((domain_id, entity_id, name)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ActionsResponse>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let actions = state
        .roles
        .role_list_actions(&session, &entity_id, &name)
        .await
        .map_err(api_from_error)?;
    Ok(Json(ActionsResponse { actions }))
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles/{name}/actions",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role"),
        ("name" = String, Path, description = "Role name")
    ),
    request_body = RoleActionsRequest,
    responses(
        (status = 200, description = "Actions added", body = ActionsResponse),
        (status = 400, description = "Empty list or invalid action", body = ErrorResponse)
    )
)]
pub(crate) async fn add_role_actions(
    Path((domain_id, entity_id, name)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleActionsRequest>,
) -> Result<Json<ActionsResponse>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let actions = state
        .roles
        .role_add_actions(&session, &entity_id, &name, body.actions)
        .await
        .map_err(api_from_error)?;
    Ok(Json(ActionsResponse { actions }))
}

#[utoipa::path(
    delete,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles/{name}/actions",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role"),
        ("name" = String, Path, description = "Role name")
    ),
    request_body = RoleActionsRequest,
    responses(
        (status = 204, description = "Actions removed"),
        (status = 400, description = "Mandatory actions cannot be removed", body = ErrorResponse)
    )
)]
pub(crate) async fn remove_role_actions(
    Path((domain_id, entity_id, name)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleActionsRequest>,
) -> Result<StatusCode, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let result = if body.actions.is_empty() {
        state
            .roles
            .role_remove_all_actions(&session, &entity_id, &name)
            .await
    } else {
        state
            .roles
            .role_remove_actions(&session, &entity_id, &name, body.actions)
            .await
    };
    result.map_err(api_from_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles/{name}/actions/check",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role"),
        ("name" = String, Path, description = "Role name")
    ),
    request_body = RoleActionsRequest,
    responses((status = 200, description = "Whether the role carries every action", body = ExistsResponse))
)]
pub(crate) async fn check_role_actions(
    Path((domain_id, entity_id, name)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleActionsRequest>,
) -> Result<Json<ExistsResponse>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let exists = state
        .roles
        .role_check_actions_exists(&session, &entity_id, &name, body.actions)
        .await
        .map_err(api_from_error)?;
    Ok(Json(ExistsResponse { exists }))
}

#[utoipa::path(
    get,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles/{name}/members",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role"),
        ("name" = String, Path, description = "Role name"),
        PageParams
    ),
    responses((status = 200, description = "Members of the role", body = RoleMembersPage))
)]
pub(crate) async fn list_role_members(
    Path((domain_id, entity_id, name)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<Json<RoleMembersPage>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    state
        .roles
        .role_list_members(&session, &entity_id, &name, params.offset, params.limit)
        .await
        .map(Json)
        .map_err(api_from_error)
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles/{name}/members",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role"),
        ("name" = String, Path, description = "Role name")
    ),
    request_body = RoleMembersRequest,
    responses((status = 200, description = "Members added", body = MembersResponse))
)]
pub(crate) async fn add_role_members(
    Path((domain_id, entity_id, name)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleMembersRequest>,
) -> Result<Json<MembersResponse>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let members = state
        .roles
        .role_add_members(&session, &entity_id, &name, body.members)
        .await
        .map_err(api_from_error)?;
    Ok(Json(MembersResponse { members }))
}

#[utoipa::path(
    delete,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles/{name}/members",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role"),
        ("name" = String, Path, description = "Role name")
    ),
    request_body = RoleMembersRequest,
    responses(
        (status = 204, description = "Members removed"),
        (status = 400, description = "Would leave a required role without members", body = ErrorResponse)
    )
)]
pub(crate) async fn remove_role_members(
    Path((domain_id, entity_id, name)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleMembersRequest>,
) -> Result<StatusCode, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let result = if body.members.is_empty() {
        state
            .roles
            .role_remove_all_members(&session, &entity_id, &name)
            .await
    } else {
        state
            .roles
            .role_remove_members(&session, &entity_id, &name, body.members)
            .await
    };
    result.map_err(api_from_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain_id}/entities/{entity_id}/roles/{name}/members/check",
    tag = "roles",
    params(
        ("domain_id" = String, Path, description = "Domain identifier"),
        ("entity_id" = String, Path, description = "Entity owning the role"),
        ("name" = String, Path, description = "Role name")
    ),
    request_body = RoleMembersRequest,
    responses((status = 200, description = "Whether every subject is a member", body = ExistsResponse))
)]
pub(crate) async fn check_role_members(
    Path((domain_id, entity_id, name)): Path<(String, String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleMembersRequest>,
) -> Result<Json<ExistsResponse>, ApiError> {
    let session = session_from_headers(&headers, &domain_id)?;
    let exists = state
        .roles
        .role_check_members_exists(&session, &entity_id, &name, body.members)
        .await
        .map_err(api_from_error)?;
    Ok(Json(ExistsResponse { exists }))
}
