//! Offline mutation scenarios: durability, ordering, replay and rollback.

mod common;

use common::*;
use serde_json::json;
use socialsync_client::{ManualClock, MemoryStore, MockRemoteStore};
use sync_types::{Mutation, OperationKind, SyncError, UserId};

#[tokio::test]
async fn replay_after_restart_applies_once() {
    let store = MemoryStore::new();
    let remote = MockRemoteStore::new();
    let clock = ManualClock::new(1_000);
    let mallory = UserId::new("mallory");

    let first = Device::with_config(&store, &remote, &clock, "alice", slow_retry_config());
    first.engine.init().await.unwrap();
    first
        .engine
        .relationships()
        .unwrap()
        .block(&mallory, Some("spam".into()))
        .await
        .unwrap();

    // applied remotely, but the ack never arrives
    remote.lose_next_ack();
    first.go_online();
    wait_until(|| remote.write_attempts() == 1).await;
    let s = store.clone();
    wait_until(|| {
        s.raw("connectivity/last")
            .map(|raw| raw.contains("\"reachable\":true"))
            .unwrap_or(false)
    })
    .await;
    assert_eq!(remote.applied_writes().len(), 1);
    assert_eq!(first.engine.queue().unwrap().len().await, 1);
    drop(first);

    let second = Device::with_config(&store, &remote, &clock, "alice", slow_retry_config());
    second.engine.init().await.unwrap();
    second.wait_for_empty_queue().await;

    assert_eq!(remote.write_attempts(), 2);
    assert_eq!(remote.applied_writes().len(), 1);
    assert_eq!(remote.documents("blocks").len(), 1);
    assert!(second.engine.relationships().unwrap().is_blocked(&mallory));
}

#[tokio::test]
async fn queued_writes_flush_in_enqueue_order() {
    let remote = MockRemoteStore::new();
    let device = Device::new(&MemoryStore::new(), &remote, &ManualClock::new(1_000), "alice");
    device.engine.init().await.unwrap();
    let queue = device.engine.queue().unwrap();

    let mut expected = Vec::new();
    for n in 0..4 {
        let id = queue
            .enqueue(
                OperationKind::Write,
                Mutation::Set {
                    collection: "drafts".into(),
                    id: format!("d{n}"),
                    data: json!({"n": n}),
                },
            )
            .await
            .unwrap();
        expected.push(id);
    }
    assert!(remote.applied_writes().is_empty());

    device.go_online();
    device.wait_for_empty_queue().await;
    let applied: Vec<_> = remote.applied_writes().into_iter().map(|(id, _)| id).collect();
    assert_eq!(applied, expected);
}

#[tokio::test]
async fn offline_block_hides_content_and_flushes_on_reconnect() {
    let remote = seeded_remote(6, &["bob", "mallory"]);
    let device = Device::new(&MemoryStore::new(), &remote, &ManualClock::new(1_000), "alice");
    device.go_online();
    device.engine.init().await.unwrap();
    let feed = device.engine.feed().unwrap();
    let page = feed.load(&posts(), 10).await;
    assert_eq!(page.items.len(), 6);

    device.go_offline();
    let mallory = UserId::new("mallory");
    let relations = device.engine.relationships().unwrap();
    relations.block(&mallory, None).await.unwrap();

    // hidden before any remote round-trip
    let visible = feed.items(&posts());
    assert_eq!(visible.len(), 3);
    assert!(visible.iter().all(|i| i.owner_id.as_str() == "bob"));
    assert_eq!(device.engine.queue().unwrap().len().await, 1);
    assert!(remote.applied_writes().is_empty());

    device.go_online();
    device.wait_for_empty_queue().await;
    assert!(remote.document("blocks", "alice_mallory").is_some());
    assert!(relations.is_blocked(&mallory));
    assert_eq!(feed.items(&posts()).len(), 3);
}

#[tokio::test]
async fn rejected_block_rolls_back_and_reports() {
    let remote = seeded_remote(4, &["bob", "mallory"]);
    let device = Device::new(&MemoryStore::new(), &remote, &ManualClock::new(1_000), "alice");
    device.go_online();
    device.engine.init().await.unwrap();
    let mut abandoned = device.engine.take_abandoned().unwrap().unwrap();
    let feed = device.engine.feed().unwrap();
    feed.load(&posts(), 10).await;

    device.go_offline();
    let mallory = UserId::new("mallory");
    let relations = device.engine.relationships().unwrap();
    relations.block(&mallory, None).await.unwrap();
    assert_eq!(feed.items(&posts()).len(), 2);

    remote.fail_writes(Some(SyncError::RemoteRejected("not allowed".into())));
    device.go_online();

    let report = tokio::time::timeout(std::time::Duration::from_secs(5), abandoned.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(report.error, SyncError::RemoteRejected(_)));
    assert_eq!(report.operation.kind, OperationKind::Block { target: mallory.clone() });

    wait_until(|| !relations.is_blocked(&mallory)).await;
    wait_until(|| feed.items(&posts()).len() == 4).await;
}
