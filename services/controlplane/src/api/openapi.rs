//! OpenAPI schema aggregation for the control-plane API.
//!
//! # Purpose
//! Collects all routes and schema types into a single OpenAPI document for docs
//! and client generation.
use crate::api::{
    domains, entities, events, groups, policies, roles, system,
    types::{
        ActionsResponse, ChannelCreateRequest, ConnectionItem, ConnectionsRequest,
        ConnectionsResponse, DomainCreateRequest, ErrorResponse, EvaluateResponse, ExistsResponse,
        GroupCreateRequest, GroupUpdateRequest, HealthStatus, ListGroupsResponse,
        MemberAssignRequest, MembersResponse, PolicyRequest, RoleActionsRequest,
        RoleCreateRequest, RoleMembersRequest, RoleRenameRequest, SystemInfo, ThingCreateRequest,
    },
};
use crate::events::{Event, EventOperation, EventPage};
use crate::model::{
    Channel, Connection, Domain, EntityStatus, Group, GroupsPage, MembersPage, Membership, Policy,
    PolicyPage, Role, RoleMembersPage, RolePage, Thing,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "arbiter-controlplane",
        version = "v1",
        description = "Arbiter access-control plane HTTP API"
    ),
    paths(
        system::system_info,
        system::system_health,
        domains::create_domain,
        domains::get_domain,
        entities::create_thing,
        entities::get_thing,
        entities::delete_thing,
        entities::enable_thing,
        entities::disable_thing,
        entities::create_channel,
        entities::get_channel,
        entities::delete_channel,
        entities::enable_channel,
        entities::disable_channel,
        entities::connect,
        entities::disconnect,
        groups::create_group,
        groups::list_groups,
        groups::get_group,
        groups::update_group,
        groups::delete_group,
        groups::list_parents,
        groups::list_children,
        groups::list_members,
        groups::assign_member,
        groups::unassign_member,
        groups::list_memberships,
        roles::available_actions,
        roles::create_role,
        roles::list_roles,
        roles::get_role,
        roles::rename_role,
        roles::delete_role,
        roles::list_role_actions,
        roles::add_role_actions,
        roles::remove_role_actions,
        roles::check_role_actions,
        roles::list_role_members,
        roles::add_role_members,
        roles::remove_role_members,
        roles::check_role_members,
        policies::add_policy,
        policies::update_policy,
        policies::list_policies,
        policies::get_policy,
        policies::delete_policy,
        policies::evaluate,
        events::domain_changes
    ),
    components(schemas(
        SystemInfo,
        HealthStatus,
        ErrorResponse,
        Domain,
        DomainCreateRequest,
        EntityStatus,
        Thing,
        ThingCreateRequest,
        Channel,
        ChannelCreateRequest,
        Connection,
        ConnectionItem,
        ConnectionsRequest,
        ConnectionsResponse,
        Group,
        GroupCreateRequest,
        GroupUpdateRequest,
        ListGroupsResponse,
        GroupsPage,
        Membership,
        MembersPage,
        MemberAssignRequest,
        Role,
        RolePage,
        RoleMembersPage,
        RoleCreateRequest,
        RoleRenameRequest,
        RoleActionsRequest,
        RoleMembersRequest,
        ActionsResponse,
        MembersResponse,
        ExistsResponse,
        Policy,
        PolicyPage,
        PolicyRequest,
        EvaluateResponse,
        Event,
        EventOperation,
        EventPage
    )),
    tags(
        (name = "system", description = "System and discovery endpoints"),
        (name = "domains", description = "Tenancy domains"),
        (name = "things", description = "Device registry"),
        (name = "channels", description = "Channel registry"),
        (name = "connections", description = "Thing-to-channel connections"),
        (name = "groups", description = "Group hierarchy and membership"),
        (name = "roles", description = "Entity roles"),
        (name = "policies", description = "Direct grants and access evaluation"),
        (name = "events", description = "Change events")
    )
)]
pub struct ApiDoc;
