//! Control-plane HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! This module centralizes route composition to keep `main` small and testable.
//! The gRPC gateway shares the same store, evaluator and cache through
//! [`AppState::gateway`].
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::authz::Evaluator;
use crate::cache::AuthCache;
use crate::events::EventLog;
use crate::gateway::Gateway;
use crate::observability;
use crate::service::{EntityService, GroupService, PolicyService, RoleManager};
use crate::store::ControlPlaneStore;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub api_version: String,
    pub store: Arc<dyn ControlPlaneStore>,
    pub cache: Arc<dyn AuthCache>,
    pub evaluator: Arc<Evaluator>,
    pub events: Arc<EventLog>,
    pub entities: Arc<EntityService>,
    pub groups: Arc<GroupService>,
    pub policies: Arc<PolicyService>,
    pub roles: Arc<RoleManager>,
}

impl AppState {
    /// Builds the evaluator and every service over one store, cache and
    /// event log.
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        cache: Arc<dyn AuthCache>,
        events: Arc<EventLog>,
        platform_admins: Vec<String>,
    ) -> Self {
        let evaluator = Arc::new(Evaluator::new(store.clone(), platform_admins));
        Self {
            api_version: "v1".to_string(),
            entities: Arc::new(EntityService::new(
                store.clone(),
                evaluator.clone(),
                events.clone(),
                cache.clone(),
            )),
            groups: Arc::new(GroupService::new(
                store.clone(),
                evaluator.clone(),
                events.clone(),
            )),
            policies: Arc::new(PolicyService::new(
                store.clone(),
                evaluator.clone(),
                events.clone(),
            )),
            roles: Arc::new(RoleManager::new(
                store.clone(),
                evaluator.clone(),
                events.clone(),
            )),
            store,
            cache,
            evaluator,
            events,
        }
    }

    /// Authorization gateway over the same store, evaluator and cache.
    pub fn gateway(&self, timeout: Duration) -> Gateway {
        Gateway::new(
            self.store.clone().entity_repository(),
            self.evaluator.clone(),
            self.cache.clone(),
            timeout,
        )
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route(
            "/v1/system/info",
            axum::routing::get(api::system::system_info),
        )
        .route(
            "/v1/system/health",
            axum::routing::get(api::system::system_health),
        )
        .route(
            "/v1/actions/:kind",
            axum::routing::get(api::roles::available_actions),
        )
        .route(
            "/v1/domains",
            axum::routing::post(api::domains::create_domain),
        )
        .route(
            "/v1/domains/:domain_id",
            axum::routing::get(api::domains::get_domain),
        )
        .route(
            "/v1/domains/:domain_id/things",
            axum::routing::post(api::entities::create_thing),
        )
        .route(
            "/v1/domains/:domain_id/things/:thing_id",
            axum::routing::get(api::entities::get_thing).delete(api::entities::delete_thing),
        )
        .route(
            "/v1/domains/:domain_id/things/:thing_id/enable",
            axum::routing::post(api::entities::enable_thing),
        )
        .route(
            "/v1/domains/:domain_id/things/:thing_id/disable",
            axum::routing::post(api::entities::disable_thing),
        )
        .route(
            "/v1/domains/:domain_id/channels",
            axum::routing::post(api::entities::create_channel),
        )
        .route(
            "/v1/domains/:domain_id/channels/:channel_id",
            axum::routing::get(api::entities::get_channel).delete(api::entities::delete_channel),
        )
        .route(
            "/v1/domains/:domain_id/channels/:channel_id/enable",
            axum::routing::post(api::entities::enable_channel),
        )
        .route(
            "/v1/domains/:domain_id/channels/:channel_id/disable",
            axum::routing::post(api::entities::disable_channel),
        )
        .route(
            "/v1/domains/:domain_id/connections",
            axum::routing::post(api::entities::connect).delete(api::entities::disconnect),
        )
        .route(
            "/v1/domains/:domain_id/groups",
            axum::routing::get(api::groups::list_groups).post(api::groups::create_group),
        )
        .route(
            "/v1/domains/:domain_id/groups/:group_id",
            axum::routing::get(api::groups::get_group)
                .patch(api::groups::update_group)
                .delete(api::groups::delete_group),
        )
        .route(
            "/v1/domains/:domain_id/groups/:group_id/parents",
            axum::routing::get(api::groups::list_parents),
        )
        .route(
            "/v1/domains/:domain_id/groups/:group_id/children",
            axum::routing::get(api::groups::list_children),
        )
        .route(
            "/v1/domains/:domain_id/groups/:group_id/members",
            axum::routing::get(api::groups::list_members).post(api::groups::assign_member),
        )
        .route(
            "/v1/domains/:domain_id/groups/:group_id/members/:member_id",
            axum::routing::delete(api::groups::unassign_member),
        )
        .route(
            "/v1/domains/:domain_id/members/:member_id/groups",
            axum::routing::get(api::groups::list_memberships),
        )
        .route(
            "/v1/domains/:domain_id/entities/:entity_id/roles",
            axum::routing::get(api::roles::list_roles).post(api::roles::create_role),
        )
        .route(
            "/v1/domains/:domain_id/entities/:entity_id/roles/:name",
            axum::routing::get(api::roles::get_role)
                .patch(api::roles::rename_role)
                .delete(api::roles::delete_role),
        )
        .route(
            "/v1/domains/:domain_id/entities/:entity_id/roles/:name/actions",
            axum::routing::get(api::roles::list_role_actions)
                .post(api::roles::add_role_actions)
                .delete(api::roles::remove_role_actions),
        )
        .route(
            "/v1/domains/:domain_id/entities/:entity_id/roles/:name/actions/check",
            axum::routing::post(api::roles::check_role_actions),
        )
        .route(
            "/v1/domains/:domain_id/entities/:entity_id/roles/:name/members",
            axum::routing::get(api::roles::list_role_members)
                .post(api::roles::add_role_members)
                .delete(api::roles::remove_role_members),
        )
        .route(
            "/v1/domains/:domain_id/entities/:entity_id/roles/:name/members/check",
            axum::routing::post(api::roles::check_role_members),
        )
        .route(
            "/v1/domains/:domain_id/policies",
            axum::routing::get(api::policies::list_policies)
                .post(api::policies::add_policy)
                .put(api::policies::update_policy),
        )
        .route(
            "/v1/domains/:domain_id/policies/evaluate",
            axum::routing::post(api::policies::evaluate),
        )
        .route(
            "/v1/domains/:domain_id/policies/:subject/:object",
            axum::routing::get(api::policies::get_policy).delete(api::policies::delete_policy),
        )
        .route(
            "/v1/domains/:domain_id/events/changes",
            axum::routing::get(api::events::domain_changes),
        )
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/v1/openapi.json", ApiDoc::openapi()),
        )
        .layer(trace_layer)
        .with_state(state)
}
