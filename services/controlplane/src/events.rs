//! Best-effort change events.
//!
//! # Purpose
//! After an authoritative mutation succeeds, services append an [`Event`] to a
//! bounded, sequence-numbered [`EventLog`] and broadcast it to in-process
//! subscribers. Consumers either poll [`EventLog::changes`] with a checkpoint
//! or hold a [`broadcast::Receiver`].
//!
//! # Key invariants
//! - Sequence numbers are strictly increasing and never reused.
//! - Only the most recent `capacity` events are retained; a consumer that falls
//!   further behind sees a gap and must resynchronize from the store.
//! - Publishing cannot fail. A lagging or absent subscriber never affects the
//!   mutation that produced the event.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use utoipa::ToSchema;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventOperation {
    DomainCreate,
    ThingCreate,
    ThingRemove,
    ThingEnable,
    ThingDisable,
    ChannelCreate,
    ChannelRemove,
    ChannelEnable,
    ChannelDisable,
    ConnectionsAdd,
    ConnectionsRemove,
    GroupCreate,
    GroupUpdate,
    GroupRemove,
    GroupAssign,
    GroupUnassign,
    PolicyAdd,
    PolicyUpdate,
    PolicyDelete,
    RoleAdd,
    RoleRemove,
    RoleRename,
    RoleActionsAdd,
    RoleActionsRemove,
    RoleMembersAdd,
    RoleMembersRemove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Event {
    pub seq: u64,
    pub operation: EventOperation,
    pub entity_id: String,
    pub domain_id: String,
    pub occurred_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub attributes: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EventPage {
    pub items: Vec<Event>,
    /// Next sequence number to request; `since` is inclusive.
    pub next_seq: u64,
}

struct ChangeLog {
    next_seq: u64,
    capacity: usize,
    items: VecDeque<Event>,
}

impl ChangeLog {
    fn record(&mut self, event: impl FnOnce(u64) -> Event) -> Event {
        let seq = self.next_seq;
        self.next_seq += 1;
        let event = event(seq);
        self.items.push_back(event.clone());
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
        event
    }
}

pub struct EventLog {
    log: RwLock<ChangeLog>,
    sender: broadcast::Sender<Event>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            log: RwLock::new(ChangeLog {
                next_seq: 0,
                capacity,
                items: VecDeque::with_capacity(capacity),
            }),
            sender,
        }
    }

    /// Appends an event and returns its sequence number.
    pub async fn publish(
        &self,
        operation: EventOperation,
        entity_id: &str,
        domain_id: &str,
        attributes: Value,
    ) -> u64 {
        let event = self.log.write().await.record(|seq| Event {
            seq,
            operation,
            entity_id: entity_id.to_string(),
            domain_id: domain_id.to_string(),
            occurred_at: Utc::now(),
            attributes,
        });
        let seq = event.seq;
        // No receivers is the common case and not an error.
        let _ = self.sender.send(event);
        metrics::counter!("arbiter_events_published_total").increment(1);
        seq
    }

    /// Retained events with `seq >= since`.
    pub async fn changes(&self, since: u64) -> EventPage {
        let log = self.log.read().await;
        EventPage {
            items: log
                .items
                .iter()
                .filter(|event| event.seq >= since)
                .cloned()
                .collect(),
            next_seq: log.next_seq,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

/// Emits every published event as a structured log line until the log is
/// dropped.
pub fn spawn_event_logger(events: &EventLog) -> JoinHandle<()> {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => tracing::info!(
                    seq = event.seq,
                    operation = ?event.operation,
                    entity_id = %event.entity_id,
                    domain_id = %event.domain_id,
                    "change event"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sequence_numbers_increase_and_since_is_inclusive() {
        let log = EventLog::new(8);
        let first = log
            .publish(EventOperation::GroupCreate, "g1", "d1", json!({}))
            .await;
        let second = log
            .publish(EventOperation::GroupAssign, "g1", "d1", json!({"member_id": "m1"}))
            .await;
        assert_eq!((first, second), (0, 1));

        let page = log.changes(1).await;
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].operation, EventOperation::GroupAssign);
        assert_eq!(page.next_seq, 2);
        assert!(log.changes(page.next_seq).await.items.is_empty());
    }

    #[tokio::test]
    async fn retention_drops_oldest_events() {
        let log = EventLog::new(2);
        for id in ["a", "b", "c"] {
            log.publish(EventOperation::ThingCreate, id, "d1", json!({}))
                .await;
        }
        let page = log.changes(0).await;
        let ids: Vec<_> = page.items.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(page.next_seq, 3);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let log = EventLog::new(4);
        let mut receiver = log.subscribe();
        log.publish(EventOperation::PolicyAdd, "c1", "d1", json!({"subject": "u1"}))
            .await;
        let event = receiver.recv().await.expect("event");
        assert_eq!(event.entity_id, "c1");
        assert_eq!(event.attributes["subject"], "u1");
    }

    #[test]
    fn operations_serialize_in_snake_case() {
        let value = serde_json::to_value(EventOperation::RoleMembersRemove).expect("json");
        assert_eq!(value, json!("role_members_remove"));
    }
}
