//! Shared fixture for service unit tests.
use crate::authz::Evaluator;
use crate::cache::InMemoryAuthCache;
use crate::events::EventLog;
use crate::model::{Channel, Domain, EntityStatus, Thing};
use crate::service::{
    EntityService, GroupService, PolicyService, RoleManager, Session, provision_builtin_roles,
};
use crate::store::memory::InMemoryStore;
use crate::store::{EntityRepository, StoreConfig};
use arbiter_authz::EntityKind;
use chrono::Utc;
use std::sync::Arc;

pub(crate) struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub events: Arc<EventLog>,
    pub cache: Arc<InMemoryAuthCache>,
    pub evaluator: Arc<Evaluator>,
    pub roles: RoleManager,
    pub policies: PolicyService,
    pub groups: GroupService,
    pub entities: EntityService,
}

impl Fixture {
    /// Admin of `d1` and owner of `t1` and `c1`.
    pub const OWNER: &'static str = "owner";

    /// Domains `d1` (owned by [`Fixture::OWNER`]) and `d2` (owned by
    /// `rival`), plus thing `t1` (key `k1`) and channel `c1` in `d1`.
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new(StoreConfig::default()));
        for (id, owner) in [("d1", Self::OWNER), ("d2", "rival")] {
            store
                .save_domain(
                    Domain {
                        id: id.to_string(),
                        name: id.to_string(),
                        owner_id: owner.to_string(),
                        status: EntityStatus::Enabled,
                        created_at: Utc::now(),
                        updated_at: None,
                    },
                    provision_builtin_roles(EntityKind::Domain, id, owner),
                )
                .await
                .expect("domain");
        }
        store
            .save_thing(
                Thing {
                    id: "t1".to_string(),
                    domain_id: "d1".to_string(),
                    owner_id: Self::OWNER.to_string(),
                    name: "sensor".to_string(),
                    key: "k1".to_string(),
                    status: EntityStatus::Enabled,
                    created_at: Utc::now(),
                    updated_at: None,
                },
                provision_builtin_roles(EntityKind::Thing, "t1", Self::OWNER),
            )
            .await
            .expect("thing");
        store
            .save_channel(
                Channel {
                    id: "c1".to_string(),
                    domain_id: "d1".to_string(),
                    owner_id: Self::OWNER.to_string(),
                    name: "telemetry".to_string(),
                    status: EntityStatus::Enabled,
                    created_at: Utc::now(),
                    updated_at: None,
                },
                provision_builtin_roles(EntityKind::Channel, "c1", Self::OWNER),
            )
            .await
            .expect("channel");

        let events = Arc::new(EventLog::new(64));
        let cache = Arc::new(InMemoryAuthCache::new(None));
        let evaluator = Arc::new(Evaluator::new(store.clone(), vec!["platform".to_string()]));
        Self {
            roles: RoleManager::new(store.clone(), evaluator.clone(), events.clone()),
            policies: PolicyService::new(store.clone(), evaluator.clone(), events.clone()),
            groups: GroupService::new(store.clone(), evaluator.clone(), events.clone()),
            entities: EntityService::new(
                store.clone(),
                evaluator.clone(),
                events.clone(),
                cache.clone(),
            ),
            store,
            events,
            cache,
            evaluator,
        }
    }

    pub fn owner(&self) -> Session {
        Session::new(Self::OWNER, "d1")
    }
}
