mod common;

use common::*;
use rill::persistence::load_snapshot;
use rill::{KvStore, MemoryKv};
use rill_protocol::{MutationKind, ViewSpec};
use rill_sync::{Config, Disconnected, LinkSchema, SyncClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn local_spec(id: &str, sql: &str) -> ViewSpec {
    ViewSpec {
        id: id.to_string(),
        sql: sql.to_string(),
        params: None,
        ttl_ms: 0,
    }
}

/// Without an endpoint the client runs fully locally: mutations apply,
/// views emit, nothing is queued for upload.
#[tokio::test]
async fn local_only_mode_works_without_a_remote() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let client = SyncClient::start(
        Config::default(),
        kv.clone(),
        Disconnected,
        LinkSchema::new(),
    )
    .await
    .expect("client start");

    let mut updates = client.subscribe();

    let initial = client
        .register_view(local_spec("v1", "SELECT * FROM user"))
        .await
        .unwrap();
    assert!(initial.records.is_empty());

    client
        .mutate(MutationKind::Create, "user:1", Some(json!({"name": "alice"})))
        .await
        .unwrap();

    // Both the registration and the mutation reached subscribers.
    let first = updates.recv().await.unwrap();
    assert_eq!(first.view_id, "v1");
    let second = updates.recv().await.unwrap();
    assert_eq!(second.records, arr(&[("user:1", 1)]));

    // Nothing waits for a remote.
    assert!(*client.pending_uploads().watch_empty().borrow());

    client.close().await;

    // The final snapshot on close preserves the registry.
    let restored = load_snapshot(kv.as_ref());
    assert_eq!(restored.view_ids(), vec!["v1".to_string()]);
    assert_eq!(
        restored.view_state("v1").unwrap().1,
        arr(&[("user:1", 1)])
    );
}

/// A restarted client picks up where the snapshot left off.
#[tokio::test]
async fn state_survives_a_restart() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());

    let client = SyncClient::start(
        Config::default(),
        kv.clone(),
        Disconnected,
        LinkSchema::new(),
    )
    .await
    .unwrap();
    client
        .register_view(local_spec("v1", "SELECT * FROM user"))
        .await
        .unwrap();
    client
        .mutate(MutationKind::Create, "user:1", Some(json!({"name": "alice"})))
        .await
        .unwrap();
    let state = client.view_state("v1").unwrap();
    let id_before = client.client_id().to_string();
    client.close().await;

    let client = SyncClient::start(
        Config::default(),
        kv.clone(),
        Disconnected,
        LinkSchema::new(),
    )
    .await
    .unwrap();
    assert_eq!(client.view_state("v1").unwrap(), state);
    assert_eq!(client.client_id(), id_before);
    client.close().await;
}

/// Concurrent ingest and re-registration leave exactly one row per
/// matching record.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reregistration_race_leaves_no_duplicates() {
    let client = Arc::new(
        SyncClient::start(
            Config::default(),
            Arc::new(MemoryKv::new()),
            Disconnected,
            LinkSchema::new(),
        )
        .await
        .unwrap(),
    );
    client
        .register_view(local_spec("v1", "SELECT * FROM user"))
        .await
        .unwrap();

    let writer = {
        let client = client.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                client
                    .mutate(
                        MutationKind::Create,
                        &format!("user:{}", i),
                        Some(json!({"n": i})),
                    )
                    .await
                    .unwrap();
            }
        })
    };
    let registrar = {
        let client = client.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                client
                    .register_view(local_spec("v1", "SELECT * FROM user"))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    writer.await.unwrap();
    registrar.await.unwrap();

    let (_, array) = client.view_state("v1").unwrap();
    assert_eq!(array.len(), 20);
    let mut ids: Vec<&String> = array.iter().map(|(id, _)| id).collect();
    ids.dedup();
    assert_eq!(ids.len(), 20, "duplicate rows after re-registration race");

    wait_until(Duration::from_secs(5), || {
        Arc::strong_count(&client) == 1
    })
    .await;
    match Arc::try_unwrap(client) {
        Ok(client) => client.close().await,
        Err(_) => panic!("client still referenced"),
    }
}

/// Heartbeats keep the TTL fresh; silence expires the view.
#[tokio::test]
async fn ttl_eviction_through_the_client() {
    let client = SyncClient::start(
        Config::default(),
        Arc::new(MemoryKv::new()),
        Disconnected,
        LinkSchema::new(),
    )
    .await
    .unwrap();

    let mut spec = local_spec("v1", "SELECT * FROM user");
    spec.ttl_ms = 500;
    client.register_view(spec).await.unwrap();

    client.heartbeat("v1").await.unwrap();
    assert!(client.evict_expired().is_empty());

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(client.evict_expired(), vec!["v1".to_string()]);
    assert!(client.view_state("v1").is_none());

    client.close().await;
}
