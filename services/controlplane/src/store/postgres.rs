//! Postgres-backed implementation of the control-plane store.
//!
//! # What this module is
//! This module implements every repository trait on top of Postgres (via `sqlx`). It is the durable,
//! shared store for the group hierarchy, policies, roles, and the entity registry that access
//! decisions are made from.
//!
//! # Hierarchy representation
//! Group paths are materialized in an `ltree` column (`groups.path`) with a GiST index:
//! - ancestors of `t` are rows with `g.path @> t.path`, descendants rows with `g.path <@ t.path`;
//!   the group itself is excluded by id.
//! - the distance between two groups is `nlevel(a) - nlevel(b)` and a group's level is
//!   `nlevel(path) - 1`.
//! - results are ordered by `path`, which is a pre-order walk of the hierarchy.
//!
//! The path is always computed here from the parent row; caller-supplied paths are ignored.
//!
//! # Key invariants
//! - `group_relations.group_id` references `groups` with `ON DELETE RESTRICT` and
//!   `groups.parent_id` cascades. Deleting a group whose subtree still has members therefore fails
//!   even if the explicit emptiness check below raced with a concurrent `assign`.
//! - Deleting an entity removes the policies and roles that reference it in the same transaction.
//! - `role_members` cascades on role delete and on role rename.
//!
//! # Concurrency model
//! - Creating a child takes `FOR SHARE` on the parent row; assigning a member takes `FOR SHARE`
//!   on the group row.
//! - Deleting a group takes `FOR UPDATE` on every row of its subtree before checking emptiness,
//!   which serializes it against both of the above.
//! - Removing role members locks the role row `FOR UPDATE` so the member floor check and the
//!   delete are atomic.
//!
//! # Operational notes
//! - Migrations are executed at startup via `sqlx::migrate!("./migrations")` so handlers can assume
//!   the schema (including the `ltree` extension) exists.
//! - Connection pooling and timeouts are explicitly configured; hanging forever on DB failures is
//!   unacceptable for an authorization service.
//!
//! # Security notes
//! - Database URLs may contain credentials; avoid logging them.
//! - All SQL is static apart from a fixed column list; every value is a bind parameter.
use super::{
    ControlPlaneStore, EntityRepository, GroupRepository, PolicyRepository, RoleRepository,
    StoreConfig,
};
use crate::config::PostgresConfig;
use crate::errors::{Error, Result};
use crate::model::{
    Channel, Connection, Domain, EntityInfo, EntityStatus, Group, GroupsPage, HierarchyPath,
    HierarchyQuery, MembersPage, Membership, Metadata, Policy, PolicyFilter, PolicyPage, Role,
    RoleMembersPage, RolePage, Thing, metadata_matches,
};
use anyhow::anyhow;
use arbiter_authz::EntityKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Durable control-plane store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use controlplane::config::PostgresConfig;
/// use controlplane::store::{StoreConfig, postgres::PostgresStore};
///
/// async fn open(pg: PostgresConfig, cfg: StoreConfig) {
///     let _ = PostgresStore::connect(&pg, cfg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
    config: StoreConfig,
}

const GROUP_COLUMNS: &str = "g.id, g.domain_id, g.parent_id, g.name, g.description, g.owner_id, \
     g.type AS group_type, g.path::text AS path, g.metadata, g.created_at, g.updated_at";

const ROLE_SELECT: &str = "SELECT r.entity_id, r.name, r.actions, r.built_in, r.created_at, \
     r.updated_at, COALESCE(array_agg(m.member_id ORDER BY m.member_id) \
     FILTER (WHERE m.member_id IS NOT NULL), '{}') AS members \
     FROM roles r LEFT JOIN role_members m ON m.entity_id = r.entity_id AND m.name = r.name";

/// Row shape for the `groups` table.
///
/// `path` is read back as text and re-parsed so level and ordering are derived the same way as in
/// the in-memory backend.
#[derive(Debug, Clone, FromRow)]
struct DbGroup {
    id: String,
    domain_id: String,
    parent_id: Option<String>,
    name: String,
    description: String,
    owner_id: String,
    group_type: i16,
    path: String,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbMembership {
    group_id: String,
    member_id: String,
    group_type: i16,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbPolicy {
    subject: String,
    object: String,
    actions: Vec<String>,
    owner_id: String,
    domain_id: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbRole {
    entity_id: String,
    name: String,
    actions: Vec<String>,
    members: Vec<String>,
    built_in: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbDomain {
    id: String,
    name: String,
    owner_id: String,
    status: i16,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbThing {
    id: String,
    domain_id: String,
    owner_id: String,
    name: String,
    key: String,
    status: i16,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbChannel {
    id: String,
    domain_id: String,
    owner_id: String,
    name: String,
    status: i16,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbEntity {
    id: String,
    kind: String,
    domain_id: String,
    owner_id: String,
    status: i16,
}

impl PostgresStore {
    /// Connect to Postgres, run migrations, and return a store.
    ///
    /// # Errors
    /// - Connection, migration, or pool setup failures.
    ///
    /// # Security notes
    /// - Avoid logging `pg.url` as it may contain credentials.
    pub async fn connect(pg: &PostgresConfig, config: StoreConfig) -> Result<Self> {
        // - `max_connections` caps concurrent DB work and protects the DB from overload.
        // - `acquire_timeout` bounds how long a request waits for a pooled connection.
        // Avoid logging `pg.url` because it may contain credentials.
        let connect_options = PgConnectOptions::from_str(&pg.url).map_err(Error::view)?;
        let connecting = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), connecting)
            .await
            .map_err(|_| Error::view(anyhow!("postgres connect timed out")))?
            .map_err(Error::view)?;

        // Fail startup rather than serve against a partial schema.
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(Error::view)?;

        Ok(Self { pool, config })
    }

    fn group_from_db(&self, row: DbGroup) -> Result<Group> {
        let path = HierarchyPath::parse(&row.path)?;
        Ok(Group {
            group_type: self.type_name(row.group_type),
            level: path.level(),
            id: row.id,
            domain_id: row.domain_id,
            parent_id: row.parent_id,
            name: row.name,
            description: row.description,
            owner_id: row.owner_id,
            path: row.path,
            metadata: metadata_from_db(row.metadata),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn groups_from_db(&self, rows: Vec<DbGroup>) -> Result<Vec<Group>> {
        rows.into_iter().map(|row| self.group_from_db(row)).collect()
    }

    fn membership_from_db(&self, row: DbMembership) -> Membership {
        Membership {
            group_type: self.type_name(row.group_type),
            group_id: row.group_id,
            member_id: row.member_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }

    /// Ids removed from the catalogue are surfaced as their number.
    fn type_name(&self, id: i16) -> String {
        self.config
            .group_types
            .name_of(id)
            .map(str::to_string)
            .unwrap_or_else(|| id.to_string())
    }

    async fn refresh_group_count(&self) {
        if let Ok(count) = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM groups")
            .fetch_one(&self.pool)
            .await
        {
            metrics::gauge!("arbiter_groups_total").set(count as f64);
        }
    }

    async fn fetch_role(&self, entity_id: &str, name: &str) -> Result<Role> {
        let sql = format!("{ROLE_SELECT} WHERE r.entity_id = $1 AND r.name = $2 GROUP BY r.entity_id, r.name");
        sqlx::query_as::<_, DbRole>(&sql)
            .bind(entity_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::view)?
            .map(role_from_db)
            .ok_or_else(|| role_not_found(entity_id, name))
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn metadata_from_db(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

fn metadata_filter(metadata: Option<&Metadata>) -> Option<Value> {
    metadata
        .filter(|filter| !filter.is_empty())
        .map(|filter| Value::Object(filter.clone()))
}

fn status_from_db(value: i16) -> Result<EntityStatus> {
    EntityStatus::from_i16(value).ok_or_else(|| Error::view(anyhow!("invalid status {value}")))
}

fn role_not_found(entity_id: &str, name: &str) -> Error {
    Error::NotFound(format!("role {name} on {entity_id}"))
}

fn policy_from_db(row: DbPolicy) -> Policy {
    Policy {
        subject: row.subject,
        object: row.object,
        actions: row.actions.into_iter().collect(),
        owner_id: row.owner_id,
        domain_id: row.domain_id,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn role_from_db(row: DbRole) -> Role {
    Role {
        entity_id: row.entity_id,
        name: row.name,
        actions: row.actions.into_iter().collect(),
        members: row.members.into_iter().collect(),
        built_in: row.built_in,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn domain_from_db(row: DbDomain) -> Result<Domain> {
    Ok(Domain {
        status: status_from_db(row.status)?,
        id: row.id,
        name: row.name,
        owner_id: row.owner_id,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn thing_from_db(row: DbThing) -> Result<Thing> {
    Ok(Thing {
        status: status_from_db(row.status)?,
        id: row.id,
        domain_id: row.domain_id,
        owner_id: row.owner_id,
        name: row.name,
        key: row.key,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn channel_from_db(row: DbChannel) -> Result<Channel> {
    Ok(Channel {
        status: status_from_db(row.status)?,
        id: row.id,
        domain_id: row.domain_id,
        owner_id: row.owner_id,
        name: row.name,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn entity_from_db(row: DbEntity) -> Result<EntityInfo> {
    Ok(EntityInfo {
        kind: EntityKind::from_str(&row.kind)?,
        status: status_from_db(row.status)?,
        id: row.id,
        domain_id: row.domain_id,
        owner_id: row.owner_id,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23503").unwrap_or(false);
    }
    false
}

/// Inserts roles and their members inside the caller's transaction.
async fn insert_roles(conn: &mut PgConnection, roles: &[Role]) -> Result<()> {
    for role in roles {
        let insert = sqlx::query(
            "INSERT INTO roles (entity_id, name, actions, built_in, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&role.entity_id)
        .bind(&role.name)
        .bind(role.actions.iter().cloned().collect::<Vec<_>>())
        .bind(role.built_in)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&mut *conn)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(Error::Conflict(format!(
                    "role {} already exists on {}",
                    role.name, role.entity_id
                )));
            }
            return Err(Error::create(err));
        }
        for member in &role.members {
            sqlx::query("INSERT INTO role_members (entity_id, name, member_id) VALUES ($1, $2, $3)")
                .bind(&role.entity_id)
                .bind(&role.name)
                .bind(member)
                .execute(&mut *conn)
                .await
                .map_err(Error::create)?;
        }
    }
    Ok(())
}

/// Drops every policy, role, role membership and group membership that references `id`.
async fn purge_references(conn: &mut PgConnection, id: &str) -> Result<()> {
    for statement in [
        "DELETE FROM policies WHERE subject = $1 OR object = $1",
        "DELETE FROM roles WHERE entity_id = $1",
        "DELETE FROM role_members WHERE member_id = $1",
        "DELETE FROM group_relations WHERE member_id = $1",
    ] {
        sqlx::query(statement)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(Error::remove)?;
    }
    Ok(())
}

async fn entity_exists(conn: &mut PgConnection, id: &str) -> Result<bool> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM domains WHERE id = $1) \
             OR EXISTS (SELECT 1 FROM groups WHERE id = $1) \
             OR EXISTS (SELECT 1 FROM things WHERE id = $1) \
             OR EXISTS (SELECT 1 FROM channels WHERE id = $1)",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await
    .map_err(Error::view)
}

#[async_trait]
impl GroupRepository for PostgresStore {
    async fn save_group_with_roles(&self, mut group: Group, roles: Vec<Role>) -> Result<Group> {
        group.validate()?;
        let explicit_type = if group.group_type.is_empty() {
            None
        } else {
            Some(self.config.group_types.resolve(&group.group_type)?)
        };

        let mut tx = self.pool.begin().await.map_err(Error::create)?;
        let (path, type_id) = match group.parent_id.as_deref() {
            None => {
                let type_id = explicit_type.ok_or_else(|| {
                    Error::MalformedEntity("root group requires a type".to_string())
                })?;
                (HierarchyPath::root(&group.id), type_id)
            }
            Some(parent_id) => {
                // FOR SHARE keeps the parent alive until this insert commits.
                let parent = sqlx::query_as::<_, (String, i16, String)>(
                    "SELECT path::text, type, domain_id FROM groups WHERE id = $1 FOR SHARE",
                )
                .bind(parent_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::create)?
                .ok_or_else(|| {
                    Error::MalformedEntity(format!("parent group {parent_id} not found"))
                })?;
                let (parent_path, parent_type, parent_domain) = parent;
                let parent_path = HierarchyPath::parse(&parent_path)?;
                if parent_path.level() + 1 > self.config.max_level {
                    return Err(Error::MalformedEntity(format!(
                        "group hierarchy is limited to {} levels",
                        self.config.max_level
                    )));
                }
                group.domain_id = parent_domain;
                (parent_path.child(&group.id), parent_type)
            }
        };
        group.group_type = self.type_name(type_id);
        group.path = path.to_string();
        group.level = path.level();

        let insert = sqlx::query(
            "INSERT INTO groups (id, domain_id, parent_id, name, description, owner_id, type, path, \
             metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8::ltree, $9, $10, $11)",
        )
        .bind(&group.id)
        .bind(&group.domain_id)
        .bind(group.parent_id.as_deref())
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.owner_id)
        .bind(type_id)
        .bind(&group.path)
        .bind(Value::Object(group.metadata.clone()))
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&mut *tx)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(Error::GroupConflict(group.id));
            }
            return Err(Error::create(err));
        }
        insert_roles(&mut tx, &roles).await?;
        tx.commit().await.map_err(Error::create)?;

        self.refresh_group_count().await;
        metrics::counter!("arbiter_group_changes_total", "op" => "created").increment(1);
        Ok(group)
    }

    async fn update_group(&self, group: Group) -> Result<Group> {
        group.validate()?;
        let sql = format!(
            "UPDATE groups g SET name = $2, description = $3, metadata = $4, updated_at = $5 \
             WHERE g.id = $1 RETURNING {GROUP_COLUMNS}"
        );
        let row = sqlx::query_as::<_, DbGroup>(&sql)
            .bind(&group.id)
            .bind(&group.name)
            .bind(&group.description)
            .bind(Value::Object(group.metadata.clone()))
            .bind(group.updated_at.unwrap_or_else(Utc::now))
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::update)?
            .ok_or_else(|| Error::GroupNotFound(group.id.clone()))?;
        metrics::counter!("arbiter_group_changes_total", "op" => "updated").increment(1);
        self.group_from_db(row)
    }

    async fn delete_group(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::remove)?;
        let subtree = sqlx::query_scalar::<_, String>(
            "SELECT g.id FROM groups g \
             WHERE g.path <@ (SELECT path FROM groups WHERE id = $1) \
             ORDER BY g.path FOR UPDATE",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::remove)?;
        if subtree.is_empty() {
            return Err(Error::GroupNotFound(id.to_string()));
        }

        let occupied = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM group_relations WHERE group_id = ANY($1))",
        )
        .bind(&subtree)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::remove)?;
        if occupied {
            return Err(Error::GroupNotEmpty(id.to_string()));
        }

        for group_id in &subtree {
            purge_references(&mut tx, group_id).await?;
        }
        let deleted = match sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
        {
            Ok(done) => done,
            Err(err) if is_foreign_key_violation(&err) => {
                return Err(Error::GroupNotEmpty(id.to_string()));
            }
            Err(err) => return Err(Error::remove(err)),
        };
        if deleted.rows_affected() != 1 {
            return Err(Error::DeleteGroup(id.to_string()));
        }
        tx.commit().await.map_err(Error::remove)?;

        self.refresh_group_count().await;
        metrics::counter!("arbiter_group_changes_total", "op" => "deleted").increment(1);
        Ok(())
    }

    async fn retrieve_group(&self, id: &str) -> Result<Group> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM groups g WHERE g.id = $1");
        let row = sqlx::query_as::<_, DbGroup>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::view)?
            .ok_or_else(|| Error::GroupNotFound(id.to_string()))?;
        self.group_from_db(row)
    }

    async fn retrieve_all_groups(
        &self,
        domain_id: Option<&str>,
        query: &HierarchyQuery,
    ) -> Result<Vec<Group>> {
        let sql = format!(
            "SELECT {GROUP_COLUMNS} FROM groups g \
             WHERE nlevel(g.path) - 1 <= $1 \
               AND ($2::text IS NULL OR g.domain_id = $2) \
               AND ($3::jsonb IS NULL OR g.metadata @> $3) \
             ORDER BY g.path"
        );
        let rows = sqlx::query_as::<_, DbGroup>(&sql)
            .bind(to_i64(self.config.clamp_level(query.level)))
            .bind(domain_id)
            .bind(metadata_filter(query.metadata.as_ref()))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::view)?;
        self.groups_from_db(rows)
    }

    async fn retrieve_all_parents(&self, id: &str, query: &HierarchyQuery) -> Result<Vec<Group>> {
        self.retrieve_group(id).await?;
        let sql = format!(
            "SELECT {GROUP_COLUMNS} FROM groups g, groups t \
             WHERE t.id = $1 AND g.id <> t.id AND g.path @> t.path \
               AND nlevel(t.path) - nlevel(g.path) <= $2 \
               AND ($3::jsonb IS NULL OR g.metadata @> $3) \
             ORDER BY g.path"
        );
        let rows = sqlx::query_as::<_, DbGroup>(&sql)
            .bind(id)
            .bind(to_i64(self.config.clamp_level(query.level)))
            .bind(metadata_filter(query.metadata.as_ref()))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::view)?;
        self.groups_from_db(rows)
    }

    async fn retrieve_all_children(
        &self,
        id: &str,
        query: &HierarchyQuery,
    ) -> Result<Vec<Group>> {
        self.retrieve_group(id).await?;
        let sql = format!(
            "SELECT {GROUP_COLUMNS} FROM groups g, groups t \
             WHERE t.id = $1 AND g.id <> t.id AND g.path <@ t.path \
               AND nlevel(g.path) - nlevel(t.path) <= $2 \
               AND ($3::jsonb IS NULL OR g.metadata @> $3) \
             ORDER BY g.path"
        );
        let rows = sqlx::query_as::<_, DbGroup>(&sql)
            .bind(id)
            .bind(to_i64(self.config.clamp_level(query.level)))
            .bind(metadata_filter(query.metadata.as_ref()))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::view)?;
        self.groups_from_db(rows)
    }

    async fn members(
        &self,
        group_id: &str,
        offset: u64,
        limit: u64,
        metadata: Option<&Metadata>,
    ) -> Result<MembersPage> {
        let group = self.retrieve_group(group_id).await?;
        if !metadata_matches(&group.metadata, metadata) {
            return Ok(MembersPage {
                total: 0,
                offset,
                limit,
                members: Vec::new(),
            });
        }
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM group_relations WHERE group_id = $1",
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::view)?;
        let rows = sqlx::query_as::<_, DbMembership>(
            "SELECT group_id, member_id, type AS group_type, created_at, updated_at \
             FROM group_relations WHERE group_id = $1 ORDER BY member_id OFFSET $2 LIMIT $3",
        )
        .bind(group_id)
        .bind(to_i64(offset))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::view)?;
        Ok(MembersPage {
            total: total as u64,
            offset,
            limit,
            members: rows
                .into_iter()
                .map(|row| self.membership_from_db(row))
                .collect(),
        })
    }

    async fn memberships(
        &self,
        member_id: &str,
        domain_id: Option<&str>,
        offset: u64,
        limit: u64,
        metadata: Option<&Metadata>,
    ) -> Result<GroupsPage> {
        let filter = "FROM group_relations r JOIN groups g ON g.id = r.group_id \
             WHERE r.member_id = $1 \
               AND ($2::text IS NULL OR g.domain_id = $2) \
               AND ($3::jsonb IS NULL OR g.metadata @> $3)";
        let metadata = metadata_filter(metadata);
        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) {filter}"))
            .bind(member_id)
            .bind(domain_id)
            .bind(metadata.clone())
            .fetch_one(&self.pool)
            .await
            .map_err(Error::view)?;
        let sql = format!("SELECT {GROUP_COLUMNS} {filter} ORDER BY g.path OFFSET $4 LIMIT $5");
        let rows = sqlx::query_as::<_, DbGroup>(&sql)
            .bind(member_id)
            .bind(domain_id)
            .bind(metadata)
            .bind(to_i64(offset))
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::view)?;
        Ok(GroupsPage {
            total: total as u64,
            offset,
            limit,
            groups: self.groups_from_db(rows)?,
        })
    }

    async fn assign(&self, member_id: &str, group_id: &str) -> Result<Membership> {
        if member_id.is_empty() {
            return Err(Error::MalformedEntity("member id is required".to_string()));
        }
        let mut tx = self.pool.begin().await.map_err(Error::create)?;
        let group_type =
            sqlx::query_scalar::<_, i16>("SELECT type FROM groups WHERE id = $1 FOR SHARE")
                .bind(group_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::create)?
                .ok_or_else(|| Error::MalformedEntity(format!("group {group_id} not found")))?;
        let membership = Membership {
            group_id: group_id.to_string(),
            member_id: member_id.to_string(),
            group_type: self.type_name(group_type),
            created_at: Utc::now(),
            updated_at: None,
        };
        let insert = sqlx::query(
            "INSERT INTO group_relations (group_id, member_id, type, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(group_id)
        .bind(member_id)
        .bind(group_type)
        .bind(membership.created_at)
        .execute(&mut *tx)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(Error::MemberAlreadyAssigned {
                    group_id: group_id.to_string(),
                    member_id: member_id.to_string(),
                });
            }
            return Err(Error::create(err));
        }
        tx.commit().await.map_err(Error::create)?;
        Ok(membership)
    }

    async fn unassign(&self, member_id: &str, group_id: &str) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM group_relations WHERE group_id = $1 AND member_id = $2")
                .bind(group_id)
                .bind(member_id)
                .execute(&self.pool)
                .await
                .map_err(Error::remove)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "member {member_id} is not in group {group_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyRepository for PostgresStore {
    async fn save_policy(&self, policy: Policy) -> Result<Policy> {
        let insert = sqlx::query(
            "INSERT INTO policies (subject, object, actions, owner_id, domain_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&policy.subject)
        .bind(&policy.object)
        .bind(policy.actions.iter().cloned().collect::<Vec<_>>())
        .bind(&policy.owner_id)
        .bind(&policy.domain_id)
        .bind(policy.created_at)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(Error::Conflict(format!(
                    "policy for {} on {} already exists",
                    policy.subject, policy.object
                )));
            }
            return Err(Error::create(err));
        }
        Ok(policy)
    }

    async fn update_policy(&self, policy: Policy) -> Result<Policy> {
        let row = sqlx::query_as::<_, DbPolicy>(
            "UPDATE policies SET actions = $3, updated_at = $4 \
             WHERE subject = $1 AND object = $2 \
             RETURNING subject, object, actions, owner_id, domain_id, created_at, updated_at",
        )
        .bind(&policy.subject)
        .bind(&policy.object)
        .bind(policy.actions.iter().cloned().collect::<Vec<_>>())
        .bind(policy.updated_at.unwrap_or_else(Utc::now))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::update)?
        .ok_or_else(|| Error::NotFound("policy".to_string()))?;
        Ok(policy_from_db(row))
    }

    async fn delete_policy(&self, subject: &str, object: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM policies WHERE subject = $1 AND object = $2")
            .bind(subject)
            .bind(object)
            .execute(&self.pool)
            .await
            .map_err(Error::remove)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("policy".to_string()));
        }
        Ok(())
    }

    async fn retrieve_policy(&self, subject: &str, object: &str) -> Result<Policy> {
        sqlx::query_as::<_, DbPolicy>(
            "SELECT subject, object, actions, owner_id, domain_id, created_at, updated_at \
             FROM policies WHERE subject = $1 AND object = $2",
        )
        .bind(subject)
        .bind(object)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::view)?
        .map(policy_from_db)
        .ok_or_else(|| Error::NotFound("policy".to_string()))
    }

    async fn list_policies(
        &self,
        filter: &PolicyFilter,
        offset: u64,
        limit: u64,
    ) -> Result<PolicyPage> {
        let condition = "WHERE ($1::text IS NULL OR subject = $1) \
               AND ($2::text IS NULL OR object = $2) \
               AND ($3::text IS NULL OR $3 = ANY(actions)) \
               AND ($4::text IS NULL OR domain_id = $4)";
        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM policies {condition}"
        ))
        .bind(filter.subject.as_deref())
        .bind(filter.object.as_deref())
        .bind(filter.action.as_deref())
        .bind(filter.domain_id.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::view)?;
        let rows = sqlx::query_as::<_, DbPolicy>(&format!(
            "SELECT subject, object, actions, owner_id, domain_id, created_at, updated_at \
             FROM policies {condition} ORDER BY subject, object OFFSET $5 LIMIT $6"
        ))
        .bind(filter.subject.as_deref())
        .bind(filter.object.as_deref())
        .bind(filter.action.as_deref())
        .bind(filter.domain_id.as_deref())
        .bind(to_i64(offset))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::view)?;
        Ok(PolicyPage {
            total: total as u64,
            offset,
            limit,
            policies: rows.into_iter().map(policy_from_db).collect(),
        })
    }

    async fn subject_policies(&self, subject: &str, objects: &[String]) -> Result<Vec<Policy>> {
        let rows = sqlx::query_as::<_, DbPolicy>(
            "SELECT subject, object, actions, owner_id, domain_id, created_at, updated_at \
             FROM policies WHERE subject = $1 AND object = ANY($2)",
        )
        .bind(subject)
        .bind(objects)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::view)?;
        Ok(rows.into_iter().map(policy_from_db).collect())
    }
}

#[async_trait]
impl RoleRepository for PostgresStore {
    async fn add_roles(&self, roles: Vec<Role>) -> Result<Vec<Role>> {
        let mut tx = self.pool.begin().await.map_err(Error::create)?;
        insert_roles(&mut tx, &roles).await?;
        tx.commit().await.map_err(Error::create)?;
        Ok(roles)
    }

    async fn retrieve_role(&self, entity_id: &str, name: &str) -> Result<Role> {
        self.fetch_role(entity_id, name).await
    }

    async fn retrieve_all_roles(
        &self,
        entity_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<RolePage> {
        let total =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM roles WHERE entity_id = $1")
                .bind(entity_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::view)?;
        let sql = format!(
            "{ROLE_SELECT} WHERE r.entity_id = $1 GROUP BY r.entity_id, r.name \
             ORDER BY r.name OFFSET $2 LIMIT $3"
        );
        let rows = sqlx::query_as::<_, DbRole>(&sql)
            .bind(entity_id)
            .bind(to_i64(offset))
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::view)?;
        Ok(RolePage {
            total: total as u64,
            offset,
            limit,
            roles: rows.into_iter().map(role_from_db).collect(),
        })
    }

    async fn remove_role(&self, entity_id: &str, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM roles WHERE entity_id = $1 AND name = $2")
            .bind(entity_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(Error::remove)?;
        if result.rows_affected() == 0 {
            return Err(role_not_found(entity_id, name));
        }
        Ok(())
    }

    async fn update_role_name(&self, entity_id: &str, name: &str, new_name: &str) -> Result<Role> {
        let result = sqlx::query(
            "UPDATE roles SET name = $3, updated_at = now() WHERE entity_id = $1 AND name = $2",
        )
        .bind(entity_id)
        .bind(name)
        .bind(new_name)
        .execute(&self.pool)
        .await;
        match result {
            Ok(done) if done.rows_affected() == 0 => return Err(role_not_found(entity_id, name)),
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(Error::Conflict(format!(
                    "role {new_name} already exists on {entity_id}"
                )));
            }
            Err(err) => return Err(Error::update(err)),
        }
        self.fetch_role(entity_id, new_name).await
    }

    async fn role_add_actions(
        &self,
        entity_id: &str,
        name: &str,
        actions: &[String],
    ) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, Vec<String>>(
            "UPDATE roles SET actions = ARRAY(SELECT DISTINCT a FROM unnest(actions || $3::text[]) a ORDER BY a), \
             updated_at = now() WHERE entity_id = $1 AND name = $2 RETURNING actions",
        )
        .bind(entity_id)
        .bind(name)
        .bind(actions)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::update)?
        .ok_or_else(|| role_not_found(entity_id, name))
    }

    async fn role_remove_actions(
        &self,
        entity_id: &str,
        name: &str,
        actions: &[String],
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE roles SET actions = ARRAY(SELECT a FROM unnest(actions) a WHERE NOT (a = ANY($3))), \
             updated_at = now() WHERE entity_id = $1 AND name = $2",
        )
        .bind(entity_id)
        .bind(name)
        .bind(actions)
        .execute(&self.pool)
        .await
        .map_err(Error::update)?;
        if result.rows_affected() == 0 {
            return Err(role_not_found(entity_id, name));
        }
        Ok(())
    }

    async fn role_remove_all_actions(&self, entity_id: &str, name: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE roles SET actions = '{}', updated_at = now() WHERE entity_id = $1 AND name = $2",
        )
        .bind(entity_id)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(Error::update)?;
        if result.rows_affected() == 0 {
            return Err(role_not_found(entity_id, name));
        }
        Ok(())
    }

    async fn role_add_members(
        &self,
        entity_id: &str,
        name: &str,
        members: &[String],
    ) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(Error::update)?;
        let locked = sqlx::query_scalar::<_, String>(
            "SELECT name FROM roles WHERE entity_id = $1 AND name = $2 FOR UPDATE",
        )
        .bind(entity_id)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::update)?;
        if locked.is_none() {
            return Err(role_not_found(entity_id, name));
        }
        for member in members {
            sqlx::query(
                "INSERT INTO role_members (entity_id, name, member_id) VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(entity_id)
            .bind(name)
            .bind(member)
            .execute(&mut *tx)
            .await
            .map_err(Error::update)?;
        }
        sqlx::query("UPDATE roles SET updated_at = now() WHERE entity_id = $1 AND name = $2")
            .bind(entity_id)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(Error::update)?;
        let all = sqlx::query_scalar::<_, String>(
            "SELECT member_id FROM role_members WHERE entity_id = $1 AND name = $2 ORDER BY member_id",
        )
        .bind(entity_id)
        .bind(name)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::update)?;
        tx.commit().await.map_err(Error::update)?;
        Ok(all)
    }

    async fn role_remove_members(
        &self,
        entity_id: &str,
        name: &str,
        members: &[String],
        min_remaining: u64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::update)?;
        let locked = sqlx::query_scalar::<_, String>(
            "SELECT name FROM roles WHERE entity_id = $1 AND name = $2 FOR UPDATE",
        )
        .bind(entity_id)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::update)?;
        if locked.is_none() {
            return Err(role_not_found(entity_id, name));
        }
        let remaining = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM role_members \
             WHERE entity_id = $1 AND name = $2 AND NOT (member_id = ANY($3))",
        )
        .bind(entity_id)
        .bind(name)
        .bind(members)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::update)?;
        if (remaining as u64) < min_remaining {
            return Err(Error::MalformedEntity(format!(
                "role {name} must keep at least {min_remaining} member(s)"
            )));
        }
        sqlx::query(
            "DELETE FROM role_members WHERE entity_id = $1 AND name = $2 AND member_id = ANY($3)",
        )
        .bind(entity_id)
        .bind(name)
        .bind(members)
        .execute(&mut *tx)
        .await
        .map_err(Error::update)?;
        sqlx::query("UPDATE roles SET updated_at = now() WHERE entity_id = $1 AND name = $2")
            .bind(entity_id)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(Error::update)?;
        tx.commit().await.map_err(Error::update)?;
        Ok(())
    }

    async fn role_remove_all_members(&self, entity_id: &str, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::update)?;
        let result = sqlx::query(
            "UPDATE roles SET updated_at = now() WHERE entity_id = $1 AND name = $2",
        )
        .bind(entity_id)
        .bind(name)
        .execute(&mut *tx)
        .await
        .map_err(Error::update)?;
        if result.rows_affected() == 0 {
            return Err(role_not_found(entity_id, name));
        }
        sqlx::query("DELETE FROM role_members WHERE entity_id = $1 AND name = $2")
            .bind(entity_id)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(Error::update)?;
        tx.commit().await.map_err(Error::update)?;
        Ok(())
    }

    async fn role_list_actions(&self, entity_id: &str, name: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, Vec<String>>(
            "SELECT actions FROM roles WHERE entity_id = $1 AND name = $2",
        )
        .bind(entity_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::view)?
        .map(|actions| {
            actions
                .into_iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
        .ok_or_else(|| role_not_found(entity_id, name))
    }

    async fn role_list_members(
        &self,
        entity_id: &str,
        name: &str,
        offset: u64,
        limit: u64,
    ) -> Result<RoleMembersPage> {
        self.fetch_role(entity_id, name).await?;
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM role_members WHERE entity_id = $1 AND name = $2",
        )
        .bind(entity_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::view)?;
        let members = sqlx::query_scalar::<_, String>(
            "SELECT member_id FROM role_members WHERE entity_id = $1 AND name = $2 \
             ORDER BY member_id OFFSET $3 LIMIT $4",
        )
        .bind(entity_id)
        .bind(name)
        .bind(to_i64(offset))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::view)?;
        Ok(RoleMembersPage {
            total: total as u64,
            offset,
            limit,
            members,
        })
    }

    async fn role_check_actions_exists(
        &self,
        entity_id: &str,
        name: &str,
        actions: &[String],
    ) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT $3::text[] <@ actions FROM roles WHERE entity_id = $1 AND name = $2",
        )
        .bind(entity_id)
        .bind(name)
        .bind(actions)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::view)?
        .ok_or_else(|| role_not_found(entity_id, name))
    }

    async fn role_check_members_exists(
        &self,
        entity_id: &str,
        name: &str,
        members: &[String],
    ) -> Result<bool> {
        self.fetch_role(entity_id, name).await?;
        let wanted: BTreeSet<&String> = members.iter().collect();
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT member_id) FROM role_members \
             WHERE entity_id = $1 AND name = $2 AND member_id = ANY($3)",
        )
        .bind(entity_id)
        .bind(name)
        .bind(members)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::view)?;
        Ok(found as usize == wanted.len())
    }

    async fn member_roles(&self, entity_ids: &[String], member_id: &str) -> Result<Vec<Role>> {
        let sql = format!(
            "{ROLE_SELECT} WHERE r.entity_id = ANY($1) AND EXISTS (\
                 SELECT 1 FROM role_members x \
                 WHERE x.entity_id = r.entity_id AND x.name = r.name AND x.member_id = $2) \
             GROUP BY r.entity_id, r.name"
        );
        let rows = sqlx::query_as::<_, DbRole>(&sql)
            .bind(entity_ids)
            .bind(member_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::view)?;
        Ok(rows.into_iter().map(role_from_db).collect())
    }
}

#[async_trait]
impl EntityRepository for PostgresStore {
    async fn save_domain(&self, domain: Domain, roles: Vec<Role>) -> Result<Domain> {
        let mut tx = self.pool.begin().await.map_err(Error::create)?;
        if entity_exists(&mut tx, &domain.id).await? {
            return Err(Error::Conflict(format!("entity {} already exists", domain.id)));
        }
        let insert = sqlx::query(
            "INSERT INTO domains (id, name, owner_id, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&domain.id)
        .bind(&domain.name)
        .bind(&domain.owner_id)
        .bind(domain.status.as_i16())
        .bind(domain.created_at)
        .bind(domain.updated_at)
        .execute(&mut *tx)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(Error::Conflict(format!("entity {} already exists", domain.id)));
            }
            return Err(Error::create(err));
        }
        insert_roles(&mut tx, &roles).await?;
        tx.commit().await.map_err(Error::create)?;
        Ok(domain)
    }

    async fn retrieve_domain(&self, id: &str) -> Result<Domain> {
        let row = sqlx::query_as::<_, DbDomain>(
            "SELECT id, name, owner_id, status, created_at, updated_at FROM domains WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::view)?
        .ok_or_else(|| Error::NotFound(format!("domain {id}")))?;
        domain_from_db(row)
    }

    async fn save_thing(&self, thing: Thing, roles: Vec<Role>) -> Result<Thing> {
        let mut tx = self.pool.begin().await.map_err(Error::create)?;
        if entity_exists(&mut tx, &thing.id).await? {
            return Err(Error::Conflict(format!("entity {} already exists", thing.id)));
        }
        let insert = sqlx::query(
            "INSERT INTO things (id, domain_id, owner_id, name, key, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&thing.id)
        .bind(&thing.domain_id)
        .bind(&thing.owner_id)
        .bind(&thing.name)
        .bind(&thing.key)
        .bind(thing.status.as_i16())
        .bind(thing.created_at)
        .bind(thing.updated_at)
        .execute(&mut *tx)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(Error::Conflict("thing id or key already in use".to_string()));
            }
            if is_foreign_key_violation(&err) {
                return Err(Error::NotFound(format!("domain {}", thing.domain_id)));
            }
            return Err(Error::create(err));
        }
        insert_roles(&mut tx, &roles).await?;
        tx.commit().await.map_err(Error::create)?;
        Ok(thing)
    }

    async fn retrieve_thing(&self, id: &str) -> Result<Thing> {
        let row = sqlx::query_as::<_, DbThing>(
            "SELECT id, domain_id, owner_id, name, key, status, created_at, updated_at \
             FROM things WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::view)?
        .ok_or_else(|| Error::NotFound(format!("thing {id}")))?;
        thing_from_db(row)
    }

    async fn retrieve_thing_by_key(&self, key: &str) -> Result<Thing> {
        let row = sqlx::query_as::<_, DbThing>(
            "SELECT id, domain_id, owner_id, name, key, status, created_at, updated_at \
             FROM things WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::view)?
        .ok_or_else(|| Error::NotFound("thing".to_string()))?;
        thing_from_db(row)
    }

    async fn change_thing_status(&self, id: &str, status: EntityStatus) -> Result<Thing> {
        let row = sqlx::query_as::<_, DbThing>(
            "UPDATE things SET status = $2, updated_at = now() WHERE id = $1 \
             RETURNING id, domain_id, owner_id, name, key, status, created_at, updated_at",
        )
        .bind(id)
        .bind(status.as_i16())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::update)?
        .ok_or_else(|| Error::NotFound(format!("thing {id}")))?;
        thing_from_db(row)
    }

    async fn remove_thing(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::remove)?;
        let result = sqlx::query("DELETE FROM things WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::remove)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("thing {id}")));
        }
        purge_references(&mut tx, id).await?;
        tx.commit().await.map_err(Error::remove)?;
        Ok(())
    }

    async fn save_channel(&self, channel: Channel, roles: Vec<Role>) -> Result<Channel> {
        let mut tx = self.pool.begin().await.map_err(Error::create)?;
        if entity_exists(&mut tx, &channel.id).await? {
            return Err(Error::Conflict(format!(
                "entity {} already exists",
                channel.id
            )));
        }
        let insert = sqlx::query(
            "INSERT INTO channels (id, domain_id, owner_id, name, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&channel.id)
        .bind(&channel.domain_id)
        .bind(&channel.owner_id)
        .bind(&channel.name)
        .bind(channel.status.as_i16())
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(&mut *tx)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(Error::Conflict(format!(
                    "entity {} already exists",
                    channel.id
                )));
            }
            if is_foreign_key_violation(&err) {
                return Err(Error::NotFound(format!("domain {}", channel.domain_id)));
            }
            return Err(Error::create(err));
        }
        insert_roles(&mut tx, &roles).await?;
        tx.commit().await.map_err(Error::create)?;
        Ok(channel)
    }

    async fn retrieve_channel(&self, id: &str) -> Result<Channel> {
        let row = sqlx::query_as::<_, DbChannel>(
            "SELECT id, domain_id, owner_id, name, status, created_at, updated_at \
             FROM channels WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::view)?
        .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        channel_from_db(row)
    }

    async fn change_channel_status(&self, id: &str, status: EntityStatus) -> Result<Channel> {
        let row = sqlx::query_as::<_, DbChannel>(
            "UPDATE channels SET status = $2, updated_at = now() WHERE id = $1 \
             RETURNING id, domain_id, owner_id, name, status, created_at, updated_at",
        )
        .bind(id)
        .bind(status.as_i16())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::update)?
        .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        channel_from_db(row)
    }

    async fn remove_channel(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::remove)?;
        let result = sqlx::query("DELETE FROM channels WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::remove)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("channel {id}")));
        }
        purge_references(&mut tx, id).await?;
        tx.commit().await.map_err(Error::remove)?;
        Ok(())
    }

    async fn retrieve_entity(&self, id: &str) -> Result<EntityInfo> {
        self.retrieve_entities(&[id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))
    }

    async fn retrieve_entities(&self, ids: &[String]) -> Result<Vec<EntityInfo>> {
        let rows = sqlx::query_as::<_, DbEntity>(
            "SELECT id, 'domain' AS kind, id AS domain_id, owner_id, status FROM domains WHERE id = ANY($1) \
             UNION ALL SELECT id, 'group', domain_id, owner_id, 0::smallint FROM groups WHERE id = ANY($1) \
             UNION ALL SELECT id, 'thing', domain_id, owner_id, status FROM things WHERE id = ANY($1) \
             UNION ALL SELECT id, 'channel', domain_id, owner_id, status FROM channels WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::view)?;
        let mut by_id = HashMap::with_capacity(rows.len());
        for row in rows {
            let info = entity_from_db(row)?;
            by_id.insert(info.id.clone(), info);
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn add_connections(&self, connections: &[Connection]) -> Result<Vec<Connection>> {
        let mut tx = self.pool.begin().await.map_err(Error::create)?;
        let mut resolved = Vec::with_capacity(connections.len());
        for conn in connections {
            let thing_domain = sqlx::query_scalar::<_, String>(
                "SELECT domain_id FROM things WHERE id = $1 FOR SHARE",
            )
            .bind(&conn.thing_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::create)?
            .ok_or_else(|| Error::NotFound(format!("thing {}", conn.thing_id)))?;
            let channel_domain = sqlx::query_scalar::<_, String>(
                "SELECT domain_id FROM channels WHERE id = $1 FOR SHARE",
            )
            .bind(&conn.channel_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::create)?
            .ok_or_else(|| Error::NotFound(format!("channel {}", conn.channel_id)))?;
            if thing_domain != channel_domain
                || (!conn.domain_id.is_empty() && conn.domain_id != thing_domain)
            {
                return Err(Error::MalformedEntity(format!(
                    "thing {} and channel {} are not in the same domain",
                    conn.thing_id, conn.channel_id
                )));
            }
            sqlx::query(
                "INSERT INTO connections (thing_id, channel_id, domain_id) VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(&conn.thing_id)
            .bind(&conn.channel_id)
            .bind(&thing_domain)
            .execute(&mut *tx)
            .await
            .map_err(Error::create)?;
            resolved.push(Connection {
                thing_id: conn.thing_id.clone(),
                channel_id: conn.channel_id.clone(),
                domain_id: thing_domain,
            });
        }
        tx.commit().await.map_err(Error::create)?;
        Ok(resolved)
    }

    async fn remove_connections(&self, connections: &[Connection]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::remove)?;
        for conn in connections {
            sqlx::query("DELETE FROM connections WHERE thing_id = $1 AND channel_id = $2")
                .bind(&conn.thing_id)
                .bind(&conn.channel_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::remove)?;
        }
        tx.commit().await.map_err(Error::remove)?;
        Ok(())
    }

    async fn has_connection(&self, thing_id: &str, channel_id: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM connections c \
                 JOIN things t ON t.id = c.thing_id \
                 JOIN channels ch ON ch.id = c.channel_id \
                 WHERE c.thing_id = $1 AND c.channel_id = $2 AND t.status = $3 AND ch.status = $3)",
        )
        .bind(thing_id)
        .bind(channel_id)
        .bind(EntityStatus::Enabled.as_i16())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::view)
    }
}

#[async_trait]
impl ControlPlaneStore for PostgresStore {
    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn entity_repository(self: Arc<Self>) -> Arc<dyn EntityRepository> {
        self
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::view)?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_object_metadata_reads_as_empty() {
        assert!(metadata_from_db(Value::Null).is_empty());
        let map = metadata_from_db(serde_json::json!({"a": 1}));
        assert_eq!(map.get("a"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn empty_metadata_filter_is_unbound() {
        assert!(metadata_filter(None).is_none());
        assert!(metadata_filter(Some(&Metadata::new())).is_none());
        let filter = serde_json::json!({"k": "v"})
            .as_object()
            .cloned()
            .expect("object");
        assert!(metadata_filter(Some(&filter)).is_some());
    }

    #[test]
    fn offsets_saturate() {
        assert_eq!(to_i64(7), 7);
        assert_eq!(to_i64(u64::MAX), i64::MAX);
    }

    #[test]
    fn entity_rows_map_kinds_and_status() {
        let info = entity_from_db(DbEntity {
            id: "c1".into(),
            kind: "channel".into(),
            domain_id: "d1".into(),
            owner_id: "u1".into(),
            status: 1,
        })
        .expect("entity");
        assert_eq!(info.kind, EntityKind::Channel);
        assert_eq!(info.status, EntityStatus::Disabled);

        assert!(
            entity_from_db(DbEntity {
                id: "x".into(),
                kind: "planet".into(),
                domain_id: "d1".into(),
                owner_id: "u1".into(),
                status: 0,
            })
            .is_err()
        );
    }
}
