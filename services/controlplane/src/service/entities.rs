//! Domains, things, channels and their connections.
//!
//! # Purpose
//! The minimal registry the gateway resolves identities and connections
//! against. Removing or disabling entities evicts the matching authorization
//! cache entries right after the authoritative change.
//!
//! # Key invariants
//! - Creation seeds the kind's built-in roles in the same unit of work.
//! - Creating an entity in a domain needs `<kind>_create` on the domain;
//!   removal needs `delete`; status changes need `update`.
//! - Connecting needs `connect_to_channel` on the thing and `connect_to_thing`
//!   on the channel; bulk edits are validated before anything is written.
use crate::authz::Evaluator;
use crate::cache::{AuthCache, log_write_failure};
use crate::errors::{Error, Result};
use crate::events::{EventLog, EventOperation};
use crate::model::{Channel, Connection, Domain, EntityStatus, Thing};
use crate::service::{Session, provision_builtin_roles};
use crate::store::ControlPlaneStore;
use arbiter_authz::{Action, EntityKind};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const ENTITY_NAME_MAX: usize = 1024;

#[derive(Clone)]
pub struct EntityService {
    store: Arc<dyn ControlPlaneStore>,
    evaluator: Arc<Evaluator>,
    events: Arc<EventLog>,
    cache: Arc<dyn AuthCache>,
}

impl EntityService {
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        evaluator: Arc<Evaluator>,
        events: Arc<EventLog>,
        cache: Arc<dyn AuthCache>,
    ) -> Self {
        Self {
            store,
            evaluator,
            events,
            cache,
        }
    }

    /// Any authenticated subject may open a domain; it becomes the domain's
    /// first administrator.
    pub async fn create_domain(&self, subject: &str, name: &str) -> Result<Domain> {
        if subject.is_empty() {
            return Err(Error::Authentication("missing subject".to_string()));
        }
        validate_name(name)?;
        let domain = Domain {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner_id: subject.to_string(),
            status: EntityStatus::Enabled,
            created_at: Utc::now(),
            updated_at: None,
        };
        let roles = provision_builtin_roles(EntityKind::Domain, &domain.id, subject);
        let domain = self.store.save_domain(domain, roles).await?;
        self.events
            .publish(
                EventOperation::DomainCreate,
                &domain.id,
                &domain.id,
                json!({ "name": domain.name }),
            )
            .await;
        Ok(domain)
    }

    pub async fn view_domain(&self, session: &Session) -> Result<Domain> {
        self.authorize(session, &session.domain_id, Action::Read)
            .await?;
        self.store.retrieve_domain(&session.domain_id).await
    }

    /// Registers a thing; a missing or empty `key` is generated.
    pub async fn create_thing(
        &self,
        session: &Session,
        name: &str,
        key: Option<String>,
    ) -> Result<Thing> {
        self.authorize(session, &session.domain_id, Action::ThingCreate)
            .await?;
        validate_name(name)?;
        let thing = Thing {
            id: Uuid::new_v4().to_string(),
            domain_id: session.domain_id.clone(),
            owner_id: session.subject.clone(),
            name: name.to_string(),
            key: key
                .filter(|key| !key.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            status: EntityStatus::Enabled,
            created_at: Utc::now(),
            updated_at: None,
        };
        let roles = provision_builtin_roles(EntityKind::Thing, &thing.id, &session.subject);
        let thing = self.store.save_thing(thing, roles).await?;
        self.events
            .publish(
                EventOperation::ThingCreate,
                &thing.id,
                &thing.domain_id,
                json!({ "name": thing.name }),
            )
            .await;
        Ok(thing)
    }

    pub async fn view_thing(&self, session: &Session, id: &str) -> Result<Thing> {
        self.authorize(session, id, Action::Read).await?;
        self.store.retrieve_thing(id).await
    }

    pub async fn create_channel(&self, session: &Session, name: &str) -> Result<Channel> {
        self.authorize(session, &session.domain_id, Action::ChannelCreate)
            .await?;
        validate_name(name)?;
        let channel = Channel {
            id: Uuid::new_v4().to_string(),
            domain_id: session.domain_id.clone(),
            owner_id: session.subject.clone(),
            name: name.to_string(),
            status: EntityStatus::Enabled,
            created_at: Utc::now(),
            updated_at: None,
        };
        let roles = provision_builtin_roles(EntityKind::Channel, &channel.id, &session.subject);
        let channel = self.store.save_channel(channel, roles).await?;
        self.events
            .publish(
                EventOperation::ChannelCreate,
                &channel.id,
                &channel.domain_id,
                json!({ "name": channel.name }),
            )
            .await;
        Ok(channel)
    }

    pub async fn view_channel(&self, session: &Session, id: &str) -> Result<Channel> {
        self.authorize(session, id, Action::Read).await?;
        self.store.retrieve_channel(id).await
    }

    pub async fn remove_thing(&self, session: &Session, id: &str) -> Result<()> {
        self.authorize(session, id, Action::Delete).await?;
        self.store.remove_thing(id).await?;
        log_write_failure("remove_thing", self.cache.remove_thing(id).await);
        self.events
            .publish(
                EventOperation::ThingRemove,
                id,
                &session.domain_id,
                json!({}),
            )
            .await;
        Ok(())
    }

    pub async fn remove_channel(&self, session: &Session, id: &str) -> Result<()> {
        self.authorize(session, id, Action::Delete).await?;
        self.store.remove_channel(id).await?;
        log_write_failure("remove_channel", self.cache.remove_channel(id).await);
        self.events
            .publish(
                EventOperation::ChannelRemove,
                id,
                &session.domain_id,
                json!({}),
            )
            .await;
        Ok(())
    }

    pub async fn enable_thing(&self, session: &Session, id: &str) -> Result<Thing> {
        self.authorize(session, id, Action::Update).await?;
        let thing = self
            .store
            .change_thing_status(id, EntityStatus::Enabled)
            .await?;
        self.events
            .publish(
                EventOperation::ThingEnable,
                id,
                &thing.domain_id,
                json!({}),
            )
            .await;
        Ok(thing)
    }

    /// Disabled things can neither identify nor publish, so their cache
    /// entries go as if the thing had been removed.
    pub async fn disable_thing(&self, session: &Session, id: &str) -> Result<Thing> {
        self.authorize(session, id, Action::Update).await?;
        let thing = self
            .store
            .change_thing_status(id, EntityStatus::Disabled)
            .await?;
        log_write_failure("remove_thing", self.cache.remove_thing(id).await);
        self.events
            .publish(
                EventOperation::ThingDisable,
                id,
                &thing.domain_id,
                json!({}),
            )
            .await;
        Ok(thing)
    }

    pub async fn enable_channel(&self, session: &Session, id: &str) -> Result<Channel> {
        self.authorize(session, id, Action::Update).await?;
        let channel = self
            .store
            .change_channel_status(id, EntityStatus::Enabled)
            .await?;
        self.events
            .publish(
                EventOperation::ChannelEnable,
                id,
                &channel.domain_id,
                json!({}),
            )
            .await;
        Ok(channel)
    }

    /// Connections to a disabled channel stop authorizing, so its whole
    /// channel set is evicted.
    pub async fn disable_channel(&self, session: &Session, id: &str) -> Result<Channel> {
        self.authorize(session, id, Action::Update).await?;
        let channel = self
            .store
            .change_channel_status(id, EntityStatus::Disabled)
            .await?;
        log_write_failure("remove_channel", self.cache.remove_channel(id).await);
        self.events
            .publish(
                EventOperation::ChannelDisable,
                id,
                &channel.domain_id,
                json!({}),
            )
            .await;
        Ok(channel)
    }

    pub async fn connect(
        &self,
        session: &Session,
        connections: Vec<Connection>,
    ) -> Result<Vec<Connection>> {
        self.authorize_connections(session, &connections).await?;
        let connected = self.store.add_connections(&connections).await?;
        for conn in &connected {
            self.events
                .publish(
                    EventOperation::ConnectionsAdd,
                    &conn.channel_id,
                    &conn.domain_id,
                    json!({ "thing_id": conn.thing_id }),
                )
                .await;
        }
        Ok(connected)
    }

    pub async fn disconnect(&self, session: &Session, connections: Vec<Connection>) -> Result<()> {
        self.authorize_connections(session, &connections).await?;
        self.store.remove_connections(&connections).await?;
        for conn in &connections {
            log_write_failure(
                "disconnect",
                self.cache.disconnect(&conn.channel_id, &conn.thing_id).await,
            );
            self.events
                .publish(
                    EventOperation::ConnectionsRemove,
                    &conn.channel_id,
                    &session.domain_id,
                    json!({ "thing_id": conn.thing_id }),
                )
                .await;
        }
        Ok(())
    }

    async fn authorize_connections(
        &self,
        session: &Session,
        connections: &[Connection],
    ) -> Result<()> {
        if connections.is_empty() {
            return Err(Error::MalformedEntity("no connections given".to_string()));
        }
        for conn in connections {
            if conn.thing_id.is_empty() || conn.channel_id.is_empty() {
                return Err(Error::MalformedEntity(
                    "connections need a thing and a channel".to_string(),
                ));
            }
            self.authorize(session, &conn.thing_id, Action::ConnectToChannel)
                .await?;
            self.authorize(session, &conn.channel_id, Action::ConnectToThing)
                .await?;
        }
        Ok(())
    }

    async fn authorize(&self, session: &Session, object: &str, action: Action) -> Result<()> {
        let subject = session.require_subject()?;
        self.evaluator
            .authorize(&session.domain_id, subject, object, action)
            .await
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.len() > ENTITY_NAME_MAX {
        return Err(Error::MalformedEntity(format!(
            "name must be 1..={ENTITY_NAME_MAX} bytes"
        )));
    }
    Ok(())
}
