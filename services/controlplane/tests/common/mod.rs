#![allow(dead_code)]

use controlplane::app::{AppState, build_router};
use controlplane::cache::InMemoryAuthCache;
use controlplane::events::EventLog;
use controlplane::store::StoreConfig;
use controlplane::store::memory::InMemoryStore;
use std::sync::Arc;

pub type TestApp = axum::routing::RouterIntoService<axum::body::Body, ()>;

pub const PLATFORM_ADMIN: &str = "root";

pub fn test_state() -> AppState {
    AppState::new(
        Arc::new(InMemoryStore::new(StoreConfig::default())),
        Arc::new(InMemoryAuthCache::new(None)),
        Arc::new(EventLog::new(256)),
        vec![PLATFORM_ADMIN.to_string()],
    )
}

pub fn test_app(state: AppState) -> TestApp {
    build_router(state).into_service()
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}
