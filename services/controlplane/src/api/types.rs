//! HTTP API request/response types.
//!
//! # Purpose
//! Defines shared payload shapes for the control-plane REST API and OpenAPI
//! schema generation. Stored records (groups, roles, policies, entities) are
//! returned as their model types; only inputs and envelopes live here.
use crate::model::{Connection, Group, Metadata};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SystemInfo {
    pub api_version: String,
    pub storage_backend: String,
    pub cache_backend: String,
    pub durable_storage: bool,
    pub group_types: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct DomainCreateRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ThingCreateRequest {
    pub name: String,
    /// Generated when absent or empty.
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ChannelCreateRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ConnectionItem {
    pub thing_id: String,
    pub channel_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ConnectionsRequest {
    pub connections: Vec<ConnectionItem>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionsResponse {
    pub items: Vec<Connection>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct GroupCreateRequest {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Required for root groups; children inherit their parent's type.
    #[serde(rename = "type", default)]
    pub group_type: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct GroupUpdateRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListGroupsResponse {
    pub items: Vec<Group>,
}

/// Depth bound and metadata filter of a hierarchy listing.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HierarchyParams {
    /// Maximum depth or distance; clamped to the configured maximum level.
    pub level: Option<u64>,
    /// JSON object the group metadata must contain.
    pub metadata: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    #[serde(default)]
    pub offset: u64,
    /// Defaults to 10, capped at 1000.
    #[serde(default)]
    pub limit: u64,
    /// JSON object the group metadata must contain.
    pub metadata: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct MemberAssignRequest {
    pub member_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleCreateRequest {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleRenameRequest {
    pub name: String,
}

/// Actions to add, remove or check. An empty list on removal clears the
/// role's actions.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleActionsRequest {
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Members to add, remove or check. An empty list on removal clears the
/// role's members.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleMembersRequest {
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActionsResponse {
    pub actions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MembersResponse {
    pub members: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PolicyRequest {
    pub subject: String,
    pub object: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PolicyListParams {
    pub subject: Option<String>,
    pub object: Option<String>,
    pub action: Option<String>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EvaluateResponse {
    pub allowed: bool,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChangesParams {
    /// First sequence number to return.
    #[serde(default)]
    pub since: u64,
}
