//! Authorization gateway.
//!
//! # Purpose
//! Answers the two questions protocol adapters ask on every message: "which
//! thing owns this key?" and "may this thing publish to / subscribe from this
//! channel?". Both consult the [`AuthCache`] first and fall back to the
//! authoritative store.
//!
//! # Key invariants
//! - Only positive answers are cached; a denial is recomputed every time, so
//!   a connection made after a denial is honoured on the next request.
//! - A cache failure or cache timeout counts as a miss.
//! - An authoritative timeout fails closed: `Authentication` while
//!   identifying, `Authorization` while authorizing.
//! - A positive connection answer is cached only if no channel-set eviction
//!   happened between the store read and the cache write.
//! - Policy grants on a channel are checked through the evaluator after the
//!   connection test and are never cached.
use crate::authz::Evaluator;
use crate::cache::{AuthCache, CacheResult};
use crate::errors::{Error, ErrorKind, Result};
use crate::model::{Connection, EntityInfo, EntityStatus};
use crate::store::EntityRepository;
use arbiter_authz::{ChannelPermission, EntityKind};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub mod grpc;

/// How the caller names the thing asking for access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThingRef {
    Id(String),
    Key(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub channel_id: String,
    pub thing: ThingRef,
    pub permission: ChannelPermission,
}

#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn EntityRepository>,
    evaluator: Arc<Evaluator>,
    cache: Arc<dyn AuthCache>,
    timeout: Duration,
}

impl Gateway {
    /// `timeout` bounds every cache and store call made for one request.
    pub fn new(
        store: Arc<dyn EntityRepository>,
        evaluator: Arc<Evaluator>,
        cache: Arc<dyn AuthCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            evaluator,
            cache,
            timeout,
        }
    }

    /// Resolves a thing key to the thing id.
    ///
    /// Unknown keys and disabled things fail with `Authentication`.
    pub async fn identify(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(Error::Authentication("missing thing key".to_string()));
        }
        if let Some(Some(id)) = self.cached("thing_id", self.cache.thing_id(key)).await {
            metrics::counter!("arbiter_gateway_cache_hits_total", "op" => "identify").increment(1);
            return Ok(id);
        }
        metrics::counter!("arbiter_gateway_cache_misses_total", "op" => "identify").increment(1);

        let thing = match self
            .bounded(
                "retrieve_thing_by_key",
                self.store.retrieve_thing_by_key(key),
                Error::Authentication,
            )
            .await
        {
            Ok(thing) => thing,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::Authentication("unknown thing key".to_string()));
            }
            Err(err) => return Err(err),
        };
        if thing.status != EntityStatus::Enabled {
            return Err(Error::Authentication(format!("thing {} is disabled", thing.id)));
        }
        self.cached("save_thing", self.cache.save_thing(key, &thing.id))
            .await;
        Ok(thing.id)
    }

    /// Returns the thing id when the thing may use the channel with the
    /// requested permission; fails with `Authorization` otherwise.
    pub async fn authorize(&self, request: &AccessRequest) -> Result<String> {
        if request.channel_id.is_empty() {
            return Err(Error::MalformedEntity("missing channel id".to_string()));
        }
        let thing_id = match &request.thing {
            ThingRef::Key(key) => self.identify(key).await?,
            ThingRef::Id(id) if id.is_empty() => {
                return Err(Error::MalformedEntity("missing thing id".to_string()));
            }
            ThingRef::Id(id) => id.clone(),
        };
        let channel_id = request.channel_id.as_str();

        if let Some(true) = self
            .cached("is_connected", self.cache.is_connected(channel_id, &thing_id))
            .await
        {
            metrics::counter!("arbiter_gateway_cache_hits_total", "op" => "authorize")
                .increment(1);
            record_decision(true);
            return Ok(thing_id);
        }
        metrics::counter!("arbiter_gateway_cache_misses_total", "op" => "authorize").increment(1);

        let epoch = self
            .cached("connection_epoch", self.cache.connection_epoch())
            .await;
        let connected = self
            .bounded(
                "has_connection",
                self.store.has_connection(&thing_id, channel_id),
                Error::Authorization,
            )
            .await?;
        if connected {
            if let Some(epoch) = epoch {
                self.populate_connection(channel_id, &thing_id, epoch).await;
            }
            record_decision(true);
            return Ok(thing_id);
        }

        let granted = self.policy_grant(&thing_id, request).await?;
        record_decision(granted);
        if granted {
            Ok(thing_id)
        } else {
            tracing::debug!(
                thing_id = %thing_id,
                channel_id,
                permission = %request.permission,
                "channel access denied"
            );
            Err(Error::Authorization(format!(
                "thing {thing_id} may not {} on channel {channel_id}",
                request.permission
            )))
        }
    }

    pub async fn retrieve_entity(&self, id: &str) -> Result<EntityInfo> {
        self.bounded("retrieve_entity", self.store.retrieve_entity(id), unavailable)
            .await
    }

    pub async fn retrieve_entities(&self, ids: &[String]) -> Result<Vec<EntityInfo>> {
        self.bounded(
            "retrieve_entities",
            self.store.retrieve_entities(ids),
            unavailable,
        )
        .await
    }

    pub async fn add_connections(&self, connections: &[Connection]) -> Result<Vec<Connection>> {
        self.bounded(
            "add_connections",
            self.store.add_connections(connections),
            unavailable,
        )
        .await
    }

    /// Deletes the connections, then evicts them from the channel sets.
    pub async fn remove_connections(&self, connections: &[Connection]) -> Result<()> {
        self.bounded(
            "remove_connections",
            self.store.remove_connections(connections),
            unavailable,
        )
        .await?;
        for conn in connections {
            self.cached(
                "disconnect",
                self.cache.disconnect(&conn.channel_id, &conn.thing_id),
            )
            .await;
        }
        Ok(())
    }

    /// A policy or role granting the permission on the channel, evaluated in
    /// the channel's domain with the thing as subject.
    async fn policy_grant(&self, thing_id: &str, request: &AccessRequest) -> Result<bool> {
        let entities = self
            .bounded(
                "retrieve_entities",
                self.store
                    .retrieve_entities(&[thing_id.to_string(), request.channel_id.clone()]),
                Error::Authorization,
            )
            .await?;
        let thing = entities
            .iter()
            .find(|e| e.id == thing_id && e.kind == EntityKind::Thing);
        let channel = entities
            .iter()
            .find(|e| e.id == request.channel_id && e.kind == EntityKind::Channel);
        let (Some(thing), Some(channel)) = (thing, channel) else {
            return Ok(false);
        };
        if thing.status != EntityStatus::Enabled || channel.status != EntityStatus::Enabled {
            return Ok(false);
        }
        let decision = self
            .bounded(
                "evaluate",
                self.evaluator.authorize(
                    &channel.domain_id,
                    thing_id,
                    &channel.id,
                    request.permission.action(),
                ),
                Error::Authorization,
            )
            .await;
        match decision {
            Ok(()) => Ok(true),
            Err(Error::Authorization(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Writes a positive connection answer read while the cache stood at
    /// `observed`. If an eviction advanced the epoch meanwhile, the write may
    /// have resurrected a removed connection and is taken back.
    async fn populate_connection(&self, channel_id: &str, thing_id: &str, observed: u64) {
        if self
            .cached("connect", self.cache.connect(channel_id, thing_id))
            .await
            .is_none()
        {
            return;
        }
        let current = self
            .cached("connection_epoch", self.cache.connection_epoch())
            .await;
        if current != Some(observed) {
            tracing::debug!(channel_id, thing_id, "eviction raced population, dropping entry");
            self.cached("disconnect", self.cache.disconnect(channel_id, thing_id))
                .await;
        }
    }

    /// Authoritative call under the gateway timeout. Elapsing is an error
    /// built by `elapsed`, so each caller decides how it fails closed.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
        elapsed: fn(String) -> Error,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!("arbiter_gateway_timeouts_total", "op" => operation)
                    .increment(1);
                tracing::warn!(operation, "authoritative call timed out");
                Err(elapsed(format!("{operation} timed out")))
            }
        }
    }

    /// Cache call under the gateway timeout. `None` means the cache could not
    /// answer and the caller must treat it as a miss.
    async fn cached<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = CacheResult<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                metrics::counter!("arbiter_cache_errors_total", "op" => operation).increment(1);
                tracing::warn!(error = %err, operation, "cache unavailable, falling back");
                None
            }
            Err(_) => {
                metrics::counter!("arbiter_cache_errors_total", "op" => operation).increment(1);
                tracing::warn!(operation, "cache call timed out, falling back");
                None
            }
        }
    }
}

fn unavailable(message: String) -> Error {
    Error::view(anyhow::anyhow!(message))
}

fn record_decision(allowed: bool) {
    let decision = if allowed { "allow" } else { "deny" };
    metrics::counter!("arbiter_gateway_decisions_total", "decision" => decision).increment(1);
}
