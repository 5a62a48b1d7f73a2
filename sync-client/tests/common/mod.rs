//! Shared fixtures for the sync-client scenario tests.

#![allow(dead_code)]

use serde_json::json;
use socialsync_client::{
    EngineDeps, ManualClock, MemoryStore, MockRemoteStore, ScriptedProbe, StaticIdentity,
    SyncConfig, SyncEngine,
};
use std::sync::Arc;
use std::time::Duration;
use sync_types::{Document, Item, NetworkEvent, NetworkType, Query};

/// One device: an engine over a shared local store and remote.
pub struct Device {
    pub engine: SyncEngine,
    pub store: MemoryStore,
    pub remote: MockRemoteStore,
    pub clock: ManualClock,
    pub identity: Arc<StaticIdentity>,
}

impl Device {
    pub fn new(
        store: &MemoryStore,
        remote: &MockRemoteStore,
        clock: &ManualClock,
        actor: &str,
    ) -> Self {
        Self::with_config(store, remote, clock, actor, SyncConfig::default())
    }

    pub fn with_config(
        store: &MemoryStore,
        remote: &MockRemoteStore,
        clock: &ManualClock,
        actor: &str,
        config: SyncConfig,
    ) -> Self {
        let identity = Arc::new(StaticIdentity::new(actor));
        let deps = EngineDeps {
            store: Arc::new(store.clone()),
            remote: Arc::new(remote.clone()),
            identity: identity.clone(),
            probe: Arc::new(ScriptedProbe::new(Duration::from_millis(40))),
            clock: Arc::new(clock.clone()),
        };
        Self {
            engine: SyncEngine::new(config, deps),
            store: store.clone(),
            remote: remote.clone(),
            clock: clock.clone(),
            identity,
        }
    }

    pub fn go_online(&self) {
        self.engine.connectivity().handle_event(online());
    }

    pub fn go_offline(&self) {
        self.engine.connectivity().handle_event(offline());
    }

    pub async fn wait_for_empty_queue(&self) {
        let queue = self.engine.queue().unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !queue.is_empty().await {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("queue did not drain");
    }
}

pub fn online() -> NetworkEvent {
    NetworkEvent {
        reachable: true,
        network: NetworkType::Wifi,
    }
}

pub fn offline() -> NetworkEvent {
    NetworkEvent {
        reachable: false,
        network: NetworkType::None,
    }
}

/// Retry delays long enough that nothing is retried during a test.
pub fn slow_retry_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.retry.base_delay_ms = 60_000;
    config.retry.max_delay_ms = 60_000;
    config
}

pub fn post(timestamp: u64, owner: &str) -> Document {
    Document::new(
        format!("post-{timestamp:04}"),
        json!({"ownerId": owner, "timestamp": timestamp, "body": format!("post at {timestamp}")}),
    )
}

/// Remote with `count` posts at timestamps 10, 20, ... alternating owners.
pub fn seeded_remote(count: u64, owners: &[&str]) -> MockRemoteStore {
    let remote = MockRemoteStore::new();
    for i in 1..=count {
        let owner = owners[(i as usize) % owners.len()];
        remote.insert_document("posts", post(i * 10, owner));
    }
    remote
}

pub fn posts() -> Query {
    Query::collection("posts")
}

pub fn ids(items: &[Item]) -> Vec<String> {
    items.iter().map(|i| i.id.as_str().to_string()).collect()
}

pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached");
}
