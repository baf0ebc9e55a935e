mod common;

use common::*;
use rill::MemoryKv;
use rill_protocol::{result_hash, MutationKind, ViewSpec};
use rill_sync::{Config, LinkSchema, SyncClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const THREAD_VIEW: &str =
    "SELECT *, (SELECT * FROM author WHERE id = $parent.author)[0] AS ad FROM thread";

fn config() -> Config {
    Config {
        endpoint: Some("mock://test".to_string()),
        snapshot_debounce_ms: 50,
        ..Config::default()
    }
}

async fn start_client(remote: MockRemote, schema: LinkSchema) -> SyncClient<MockRemote> {
    init_tracing();
    SyncClient::start(config(), Arc::new(MemoryKv::new()), remote, schema)
        .await
        .expect("client start")
}

fn view_spec(id: &str, sql: &str) -> ViewSpec {
    ViewSpec {
        id: id.to_string(),
        sql: sql.to_string(),
        params: None,
        ttl_ms: 0,
    }
}

/// Locally diverged nested records converge to the remote's hash in a
/// bounded number of iterations, adopting the remote versions.
#[tokio::test]
async fn nested_records_converge_to_the_remote_hash() {
    let remote = MockRemote::new();
    let remote_array = arr(&[("author:a", 3), ("thread:t", 2)]);
    remote.set_view_state("v2", remote_array.clone());
    // The remote returns the thread relationship-expanded.
    remote.put_record(
        "thread:t",
        json!({"id": "thread:t", "author": {"id": "author:a", "name": "A-remote"}}),
    );
    remote.put_record("author:a", json!({"id": "author:a", "name": "A-remote"}));

    let schema = LinkSchema::new().link("thread", "author");
    let client = start_client(remote.clone(), schema).await;

    // Local state: both records at version 1 with stale content.
    client
        .mutate(MutationKind::Create, "author:a", Some(json!({"name": "A"})))
        .await
        .unwrap();
    client
        .mutate(
            MutationKind::Create,
            "thread:t",
            Some(json!({"author": "author:a"})),
        )
        .await
        .unwrap();
    client
        .register_view(view_spec("v2", THREAD_VIEW))
        .await
        .unwrap();

    let expected = result_hash(&remote_array);
    wait_until(Duration::from_secs(5), || {
        client
            .view_state("v2")
            .map(|(hash, _)| hash == expected)
            .unwrap_or(false)
    })
    .await;

    let (_, array) = client.view_state("v2").unwrap();
    assert_eq!(array, remote_array);

    // The fetched content was cached locally.
    let processor = client.processor();
    {
        let proc = processor.read().unwrap();
        let author = proc.store().record("author:a").unwrap();
        assert_eq!(
            author.get("name").and_then(rill::Datum::as_str),
            Some("A-remote")
        );
    }

    client.close().await;
}

/// A live notification re-runs the convergence loop for the view.
#[tokio::test]
async fn live_updates_drive_reconvergence() {
    let remote = MockRemote::new();
    remote.set_view_state("v1", arr(&[]));

    let client = start_client(remote.clone(), LinkSchema::new()).await;
    client
        .register_view(view_spec("v1", "SELECT * FROM user"))
        .await
        .unwrap();
    wait_until(Duration::from_secs(5), || {
        remote.log().iter().any(|e| e == "register:v1")
    })
    .await;

    remote.put_record("user:9", json!({"id": "user:9", "name": "nine"}));
    let next = arr(&[("user:9", 5)]);
    let expected = result_hash(&next);
    remote.push_live("v1", next).await;

    wait_until(Duration::from_secs(5), || {
        client
            .view_state("v1")
            .map(|(hash, _)| hash == expected)
            .unwrap_or(false)
    })
    .await;

    let (_, array) = client.view_state("v1").unwrap();
    assert_eq!(array, arr(&[("user:9", 5)]));

    // The rest of the lifecycle reaches the remote too.
    client.heartbeat("v1").await.unwrap();
    wait_until(Duration::from_secs(5), || {
        remote.log().iter().any(|e| e == "heartbeat:v1")
    })
    .await;

    client.unregister_view("v1").await.unwrap();
    wait_until(Duration::from_secs(5), || {
        remote.log().iter().any(|e| e == "delete_view:v1")
    })
    .await;
    assert!(client.view_state("v1").is_none());

    client.close().await;
}

/// Records the remote dropped are deleted locally so the arrays can
/// actually meet.
#[tokio::test]
async fn remote_removals_apply_locally() {
    let remote = MockRemote::new();
    remote.set_view_state("v1", arr(&[]));
    let client = start_client(remote.clone(), LinkSchema::new()).await;

    client
        .mutate(MutationKind::Create, "user:1", Some(json!({"name": "a"})))
        .await
        .unwrap();
    client
        .mutate(MutationKind::Create, "user:2", Some(json!({"name": "b"})))
        .await
        .unwrap();
    client
        .register_view(view_spec("v1", "SELECT * FROM user"))
        .await
        .unwrap();

    // The remote only keeps user:2.
    remote.put_record("user:2", json!({"id": "user:2", "name": "b"}));
    let next = arr(&[("user:2", 1)]);
    let expected = result_hash(&next);
    remote.push_live("v1", next).await;

    wait_until(Duration::from_secs(5), || {
        client
            .view_state("v1")
            .map(|(hash, _)| hash == expected)
            .unwrap_or(false)
    })
    .await;

    let processor = client.processor();
    assert!(processor.read().unwrap().store().record("user:1").is_none());
    client.close().await;
}

/// A remote array with duplicate ids aborts convergence and degrades
/// the view instead of corrupting it.
#[tokio::test]
async fn duplicate_remote_ids_degrade_the_view() {
    let remote = MockRemote::new();
    remote.set_view_state("v1", arr(&[]));
    let client = start_client(remote.clone(), LinkSchema::new()).await;

    client
        .register_view(view_spec("v1", "SELECT * FROM user"))
        .await
        .unwrap();
    wait_until(Duration::from_secs(5), || {
        remote.log().iter().any(|e| e == "register:v1")
    })
    .await;

    let before = client.view_state("v1").unwrap();
    remote
        .push_live("v1", arr(&[("user:1", 1), ("user:1", 2)]))
        .await;

    let processor = client.processor();
    wait_until(Duration::from_secs(5), || {
        processor
            .read()
            .unwrap()
            .view("v1")
            .map(|v| v.degraded)
            .unwrap_or(false)
    })
    .await;

    // State untouched by the malformed array.
    assert_eq!(client.view_state("v1").unwrap(), before);
    client.close().await;
}
