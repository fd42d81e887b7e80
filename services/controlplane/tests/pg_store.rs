#![cfg(feature = "pg-tests")]
//! Postgres store tests against a live database.
//!
//! Set `ARBITER_TEST_DATABASE_URL` (or `DATABASE_URL`) to run them; without a
//! reachable server every test returns early. Tests truncate all tables and
//! are serialized.

use arbiter_authz::EntityKind;
use chrono::Utc;
use controlplane::config;
use controlplane::errors::ErrorKind;
use controlplane::model::{Domain, EntityStatus, Group, HierarchyQuery, Metadata, Policy};
use controlplane::service::provision_builtin_roles;
use controlplane::store::postgres::PostgresStore;
use controlplane::store::{
    ControlPlaneStore, EntityRepository, GroupRepository, PolicyRepository, RoleRepository,
    StoreConfig,
};
use serde_json::json;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

static PG_STORE: tokio::sync::OnceCell<Arc<PostgresStore>> = tokio::sync::OnceCell::const_new();

async fn reset_postgres(url: &str) -> Result<(), sqlx::Error> {
    let pool = match tokio::time::timeout(
        Duration::from_secs(2),
        PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(2))
            .connect(url),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => return Err(sqlx::Error::PoolTimedOut),
    };
    // The schema may not exist yet on the first run; migrations create it.
    let _ = sqlx::query(
        "TRUNCATE role_members, roles, policies, group_relations, groups, connections, channels, things, domains",
    )
    .execute(&pool)
    .await;
    Ok(())
}

async fn pg_store() -> Option<Arc<PostgresStore>> {
    let url = match std::env::var("ARBITER_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping pg-tests: set ARBITER_TEST_DATABASE_URL or DATABASE_URL");
            return None;
        }
    };
    if let Err(err) = reset_postgres(&url).await {
        eprintln!("skipping pg-tests: cannot connect to postgres: {err}");
        return None;
    }
    let pg_cfg = config::PostgresConfig {
        url: url.clone(),
        max_connections: 5,
        connect_timeout_ms: 5_000,
        acquire_timeout_ms: 5_000,
    };
    let store = match PG_STORE
        .get_or_try_init(|| async {
            PostgresStore::connect(&pg_cfg, StoreConfig::default())
                .await
                .map(Arc::new)
        })
        .await
    {
        Ok(store) => Arc::clone(store),
        Err(err) => {
            eprintln!("skipping pg-tests: connect postgres store failed: {err}");
            return None;
        }
    };
    // Truncate again now that migrations have certainly run.
    let _ = reset_postgres(&url).await;
    Some(store)
}

async fn seed_domain(store: &PostgresStore, id: &str) -> Domain {
    let domain = Domain {
        id: id.to_string(),
        name: format!("domain {id}"),
        owner_id: "alice".to_string(),
        status: EntityStatus::Enabled,
        created_at: Utc::now(),
        updated_at: None,
    };
    let roles = provision_builtin_roles(EntityKind::Domain, id, "alice");
    store.save_domain(domain, roles).await.expect("domain")
}

fn group(id: &str, parent: Option<&str>, group_type: &str, metadata: Metadata) -> Group {
    Group {
        id: id.to_string(),
        domain_id: "d1".to_string(),
        parent_id: parent.map(str::to_string),
        name: id.to_string(),
        description: String::new(),
        owner_id: "alice".to_string(),
        group_type: group_type.to_string(),
        path: String::new(),
        level: 0,
        metadata,
        created_at: Utc::now(),
        updated_at: None,
    }
}

fn metadata(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
#[serial]
async fn pg_hierarchy_paths_and_walks() {
    let Some(store) = pg_store().await else {
        return;
    };
    seed_domain(&store, "d1").await;

    let root = store
        .save_group(group("acme", None, "org", Metadata::new()))
        .await
        .expect("root");
    assert_eq!(root.path, "acme");
    assert_eq!(root.level, 0);

    let plant = store
        .save_group(group(
            "plant",
            Some("acme"),
            "",
            metadata(json!({ "site": "north" })),
        ))
        .await
        .expect("child");
    assert_eq!(plant.path, "acme.plant");
    assert_eq!(plant.group_type, "org");

    store
        .save_group(group("line_1", Some("plant"), "", Metadata::new()))
        .await
        .expect("grandchild");

    let err = store
        .save_group(group("orphan", Some("missing"), "", Metadata::new()))
        .await
        .expect_err("missing parent");
    assert_eq!(err.kind(), ErrorKind::MalformedEntity);

    let err = store
        .save_group(group("acme", None, "org", Metadata::new()))
        .await
        .expect_err("duplicate");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let children = store
        .retrieve_all_children("acme", &HierarchyQuery::new(1))
        .await
        .expect("children");
    let ids: Vec<&str> = children.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids, vec!["plant"]);

    let descendants = store
        .retrieve_all_children("acme", &HierarchyQuery::new(5))
        .await
        .expect("descendants");
    assert_eq!(descendants.len(), 2);

    let parents = store
        .retrieve_all_parents("line_1", &HierarchyQuery::new(5))
        .await
        .expect("parents");
    let ids: Vec<&str> = parents.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids, vec!["acme", "plant"]);

    let filtered = store
        .retrieve_all_groups(
            Some("d1"),
            &HierarchyQuery::new(5).with_metadata(metadata(json!({ "site": "north" }))),
        )
        .await
        .expect("filtered");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, "plant");
}

#[tokio::test]
#[serial]
async fn pg_members_block_subtree_delete() {
    let Some(store) = pg_store().await else {
        return;
    };
    seed_domain(&store, "d1").await;
    store
        .save_group(group("acme", None, "org", Metadata::new()))
        .await
        .expect("root");
    store
        .save_group(group("plant", Some("acme"), "", Metadata::new()))
        .await
        .expect("child");

    let membership = store.assign("sensor_7", "plant").await.expect("assign");
    assert_eq!(membership.group_type, "org");
    let err = store
        .assign("sensor_7", "plant")
        .await
        .expect_err("assigned twice");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let page = store
        .memberships("sensor_7", Some("d1"), 0, 10, None)
        .await
        .expect("memberships");
    assert_eq!(page.total, 1);
    assert_eq!(page.groups[0].id, "plant");

    let err = store.delete_group("acme").await.expect_err("busy subtree");
    assert_eq!(err.kind(), ErrorKind::GroupNotEmpty);

    store.unassign("sensor_7", "plant").await.expect("unassign");
    store.delete_group("acme").await.expect("delete");
    let err = store.retrieve_group("plant").await.expect_err("cascaded");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = store.delete_group("acme").await.expect_err("already deleted");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
#[serial]
async fn pg_policies_and_roles() {
    let Some(store) = pg_store().await else {
        return;
    };
    seed_domain(&store, "d1").await;

    let policy = Policy {
        subject: "bob".to_string(),
        object: "d1".to_string(),
        actions: ["read".to_string()].into_iter().collect(),
        owner_id: "alice".to_string(),
        domain_id: "d1".to_string(),
        created_at: Utc::now(),
        updated_at: None,
    };
    store.save_policy(policy.clone()).await.expect("policy");
    let err = store
        .save_policy(policy.clone())
        .await
        .expect_err("duplicate policy");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let mut widened = policy.clone();
    widened.actions.insert("update".to_string());
    let saved = store.update_policy(widened).await.expect("update");
    assert_eq!(saved.actions.len(), 2);

    let held = store
        .subject_policies("bob", &["d1".to_string(), "other".to_string()])
        .await
        .expect("subject policies");
    assert_eq!(held.len(), 1);

    store.delete_policy("bob", "d1").await.expect("delete");
    let err = store
        .retrieve_policy("bob", "d1")
        .await
        .expect_err("deleted");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let admin = store.retrieve_role("d1", "admin").await.expect("admin");
    assert!(admin.built_in);
    assert!(admin.members.contains("alice"));

    let members = store
        .role_add_members("d1", "admin", &["carol".to_string()])
        .await
        .expect("add member");
    assert_eq!(members.len(), 2);
    let err = store
        .role_remove_members(
            "d1",
            "admin",
            &["alice".to_string(), "carol".to_string()],
            1,
        )
        .await
        .expect_err("keep one admin");
    assert_eq!(err.kind(), ErrorKind::MalformedEntity);
    assert!(
        store
            .role_check_members_exists("d1", "admin", &["alice".to_string(), "carol".to_string()])
            .await
            .expect("check")
    );

    let carol_roles = store
        .member_roles(&["d1".to_string()], "carol")
        .await
        .expect("member roles");
    assert_eq!(carol_roles.len(), 1);

    assert!(store.health_check().await.is_ok());
    assert!(store.is_durable());
}
