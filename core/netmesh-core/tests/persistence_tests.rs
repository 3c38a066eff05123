//! Tests for persisting objects and proxies.

mod common;

use common::{eventually, node_id, open_node, open_node_with_store};
use netmesh_comm::{EndpointState, MemoryNetwork};
use netmesh_core::{ProxyData, ProxyStatus, XprisoMessage};
use netmesh_store::{MemoryStore, SqliteStore, Store};
use netmesh_types::PropertyValue;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn objects_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mesh.db");
    let network = MemoryNetwork::new();

    let (x, y) = {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&path).unwrap());
        let base = open_node_with_store(&network, "mem://alpha", store);
        let mut tx = base.begin_transaction().await;
        let x = tx.create_object().unwrap();
        let y = tx.create_object().unwrap();
        tx.bless(&x, "Note").unwrap();
        tx.set(&x, "title", "persisted").unwrap();
        tx.relate(&x, &y).unwrap();
        tx.commit().unwrap();
        base.close().await.unwrap();
        (x, y)
    };

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&path).unwrap());
    let base = open_node_with_store(&network, "mem://alpha", store);
    assert_eq!(base.object_count(), 3);
    let restored = base.find_locally(&x).unwrap();
    assert!(restored.data.types.contains("Note"));
    assert_eq!(restored.data.property("title"), Some(&PropertyValue::from("persisted")));
    assert!(restored.data.is_related_to(&y));

    // Stamps continue above the restored ones.
    let before = restored.data.property_stamp("title").unwrap().token;
    let mut tx = base.begin_transaction().await;
    tx.set(&x, "title", "again").unwrap();
    tx.commit().unwrap();
    let after = base.find_locally(&x).unwrap().data.property_stamp("title").unwrap().token;
    assert!(after > before);
}

#[tokio::test]
async fn deletions_are_persisted() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let network = MemoryNetwork::new();
    let base = open_node_with_store(&network, "mem://alpha", store.clone());

    let mut tx = base.begin_transaction().await;
    let x = tx.create_object().unwrap();
    tx.commit().unwrap();
    assert_eq!(store.size("object:").unwrap(), 2);

    let mut tx = base.begin_transaction().await;
    tx.delete_object(&x).unwrap();
    tx.commit().unwrap();
    assert_eq!(store.size("object:").unwrap(), 1);
}

#[tokio::test]
async fn proxies_are_restored_with_their_endpoint_state() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let network = MemoryNetwork::new();
    let home = open_node(&network, "mem://alpha");

    let mut tx = home.begin_transaction().await;
    let x = tx.create_object().unwrap();
    tx.commit().unwrap();

    let other = open_node_with_store(&network, "mem://beta", store.clone());
    other.access_locally(&x).await.unwrap();
    other.close().await.unwrap();

    let saved: ProxyData = store.get("proxy:mem://alpha").unwrap().decode_json().unwrap();
    assert_eq!(saved.partner, node_id("mem://alpha"));
    assert_eq!(saved.local, node_id("mem://beta"));
    assert_eq!(saved.status, ProxyStatus::Synchronized);
    assert!(saved.endpoint.last_sent_token.is_some());
    assert!(saved.next_request_id > 1);

    let reopened = open_node_with_store(&network, "mem://beta", store);
    let proxy = reopened.find_proxy(&node_id("mem://alpha")).unwrap();
    assert_eq!(proxy.externalize(), saved);
    assert!(reopened.find_locally(&x).is_some());
}

/// Messages the partner has not confirmed yet, oldest first.
fn unacknowledged(state: &EndpointState<XprisoMessage>) -> Vec<XprisoMessage> {
    let answered = matches!(
        (state.last_sent_token, state.last_received_token),
        (Some(sent), Some(received)) if received == sent + 1
    );
    let mut pending = if answered {
        Vec::new()
    } else {
        state.messages_sent_last.clone()
    };
    pending.extend(state.messages_to_be_sent.iter().cloned());
    pending
}

#[tokio::test]
async fn queued_changes_are_restored_and_delivered() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let network = MemoryNetwork::new();
    let home = open_node(&network, "mem://alpha");

    let mut tx = home.begin_transaction().await;
    let x = tx.create_object().unwrap();
    tx.commit().unwrap();

    let other = open_node_with_store(&network, "mem://beta", store.clone());
    other.try_obtain_lock(&x).await.unwrap();

    network.partition(&node_id("mem://alpha"), &node_id("mem://beta"));
    let mut tx = other.begin_transaction().await;
    tx.set(&x, "title", "written offline").unwrap();
    tx.commit().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    other.close().await.unwrap();

    let saved: ProxyData = store.get("proxy:mem://alpha").unwrap().decode_json().unwrap();
    let pending = unacknowledged(&saved.endpoint);
    assert!(!pending.is_empty());

    let reopened = open_node_with_store(&network, "mem://beta", store);
    let proxy = reopened.find_proxy(&node_id("mem://alpha")).unwrap();
    assert_eq!(unacknowledged(&proxy.externalize().endpoint), pending);

    network.heal(&node_id("mem://alpha"), &node_id("mem://beta"));
    eventually("the queued change to reach home", || {
        home.find_locally(&x)
            .is_some_and(|o| o.data.property("title") == Some(&PropertyValue::from("written offline")))
    })
    .await;
}

#[tokio::test]
async fn killed_proxies_are_not_restored() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let network = MemoryNetwork::new();
    let _home = open_node(&network, "mem://alpha");
    let other = open_node_with_store(&network, "mem://beta", store.clone());

    other.obtain_proxy_for(&node_id("mem://alpha"), None).await.unwrap();
    other.persist_proxies().unwrap();
    assert_eq!(store.size("proxy:").unwrap(), 1);

    other.kill_proxy(&node_id("mem://alpha")).await.unwrap();
    assert_eq!(store.size("proxy:").unwrap(), 0);
}
