//! Tests for write-lock transfer between nodes.

mod common;

use common::{eventually, node_id, open_node};
use netmesh_comm::MemoryNetwork;
use netmesh_core::{MeshError, NetMeshBase};
use netmesh_types::{MeshObjectIdentifier, PropertyValue};
use pretty_assertions::assert_eq;

async fn create_at(base: &NetMeshBase) -> MeshObjectIdentifier {
    let mut tx = base.begin_transaction().await;
    let x = tx.create_object().unwrap();
    tx.set(&x, "v", 0i64).unwrap();
    tx.commit().unwrap();
    x
}

fn holders(bases: &[&NetMeshBase], x: &MeshObjectIdentifier) -> Vec<String> {
    bases
        .iter()
        .filter(|b| b.find_locally(x).is_some_and(|o| o.has_lock))
        .map(|b| b.identifier().to_string())
        .collect()
}

#[tokio::test]
async fn replica_obtains_the_lock_from_home() {
    let network = MemoryNetwork::new();
    let home = open_node(&network, "mem://alpha");
    let other = open_node(&network, "mem://beta");
    let x = create_at(&home).await;
    other.access_locally(&x).await.unwrap();

    other.try_obtain_lock(&x).await.unwrap();

    assert_eq!(holders(&[&home, &other], &x), vec!["mem://beta".to_string()]);
    let at_home = home.find_locally(&x).unwrap();
    assert_eq!(at_home.lock_location, Some(node_id("mem://beta")));

    let mut tx = home.begin_transaction().await;
    assert!(matches!(tx.set(&x, "v", 9i64), Err(MeshError::NotPermitted(_))));
}

#[tokio::test]
async fn obtaining_the_lock_accesses_the_object_first() {
    let network = MemoryNetwork::new();
    let home = open_node(&network, "mem://alpha");
    let other = open_node(&network, "mem://beta");
    let x = create_at(&home).await;

    other.try_obtain_lock(&x).await.unwrap();
    assert!(other.find_locally(&x).unwrap().has_lock);
}

#[tokio::test]
async fn lock_holder_changes_reach_home_and_other_replicas() {
    let network = MemoryNetwork::new();
    let home = open_node(&network, "mem://alpha");
    let writer = open_node(&network, "mem://beta");
    let reader = open_node(&network, "mem://gamma");
    let x = create_at(&home).await;
    writer.access_locally(&x).await.unwrap();
    reader.access_locally(&x).await.unwrap();

    let mut tx = writer.begin_transaction_with_locks(std::slice::from_ref(&x)).await.unwrap();
    tx.set(&x, "v", 42i64).unwrap();
    tx.bless(&x, "Answer").unwrap();
    tx.commit().unwrap();

    for base in [&home, &reader] {
        eventually("the lock holder's change to propagate", || {
            base.find_locally(&x)
                .is_some_and(|o| o.data.property("v") == Some(&PropertyValue::Integer(42)))
        })
        .await;
        assert!(base.find_locally(&x).unwrap().data.types.contains("Answer"));
    }
}

#[tokio::test]
async fn lock_holder_creations_are_conveyed_to_home() {
    let network = MemoryNetwork::new();
    let home = open_node(&network, "mem://alpha");
    let writer = open_node(&network, "mem://beta");
    let x = create_at(&home).await;

    let mut tx = writer.begin_transaction_with_locks(std::slice::from_ref(&x)).await.unwrap();
    let y = tx.create_object().unwrap();
    tx.set(&y, "name", "created elsewhere").unwrap();
    tx.relate(&x, &y).unwrap();
    tx.commit().unwrap();

    eventually("the new neighbor to reach home", || home.find_locally(&y).is_some()).await;
    eventually("the relationship to reach home", || {
        home.find_locally(&x).is_some_and(|o| o.data.is_related_to(&y))
    })
    .await;
    let replica = home.find_locally(&y).unwrap();
    assert_eq!(replica.proxy_towards_home, Some(node_id("mem://beta")));
    assert!(!replica.has_lock);
}

#[tokio::test]
async fn home_recalls_a_granted_lock() {
    let network = MemoryNetwork::new();
    let home = open_node(&network, "mem://alpha");
    let other = open_node(&network, "mem://beta");
    let x = create_at(&home).await;
    other.try_obtain_lock(&x).await.unwrap();

    let mut tx = other.begin_transaction().await;
    tx.set(&x, "v", 7i64).unwrap();
    tx.commit().unwrap();

    home.try_obtain_lock(&x).await.unwrap();

    assert_eq!(holders(&[&home, &other], &x), vec!["mem://alpha".to_string()]);
    let at_home = home.find_locally(&x).unwrap();
    assert_eq!(at_home.lock_location, None);
    assert_eq!(at_home.data.property("v"), Some(&PropertyValue::Integer(7)));
}

#[tokio::test]
async fn lock_moves_between_replicas_through_home() {
    let network = MemoryNetwork::new();
    let home = open_node(&network, "mem://alpha");
    let b = open_node(&network, "mem://beta");
    let c = open_node(&network, "mem://gamma");
    let x = create_at(&home).await;

    b.try_obtain_lock(&x).await.unwrap();
    c.try_obtain_lock(&x).await.unwrap();

    assert_eq!(holders(&[&home, &b, &c], &x), vec!["mem://gamma".to_string()]);
    assert_eq!(
        home.find_locally(&x).unwrap().lock_location,
        Some(node_id("mem://gamma"))
    );
}

#[tokio::test]
async fn concurrent_requests_go_to_the_smaller_identifier() {
    let network = MemoryNetwork::new();
    let home = open_node(&network, "mem://home");
    let small = open_node(&network, "mem://aaa");
    let large = open_node(&network, "mem://bbb");

    for _ in 0..3 {
        let x = create_at(&home).await;
        small.access_locally(&x).await.unwrap();
        large.access_locally(&x).await.unwrap();

        let (large_result, small_result) =
            tokio::join!(large.try_obtain_lock(&x), small.try_obtain_lock(&x));

        assert!(small_result.is_ok());
        assert!(matches!(large_result, Err(MeshError::NotPermitted(_))));
        assert_eq!(holders(&[&home, &small, &large], &x), vec!["mem://aaa".to_string()]);
    }
}

#[tokio::test]
async fn at_most_one_node_holds_the_lock() {
    let network = MemoryNetwork::new();
    let home = open_node(&network, "mem://alpha");
    let b = open_node(&network, "mem://beta");
    let c = open_node(&network, "mem://gamma");
    let x = create_at(&home).await;
    b.access_locally(&x).await.unwrap();
    c.access_locally(&x).await.unwrap();

    for base in [&b, &c, &home, &c, &b] {
        // Losing a contest is fine; holding the lock twice is not.
        let _ = base.try_obtain_lock(&x).await;
        assert!(holders(&[&home, &b, &c], &x).len() <= 1);
    }
    eventually("the lock to settle on one node", || {
        holders(&[&home, &b, &c], &x).len() == 1
    })
    .await;
}
