//! Tests for applying incoming Xpriso messages, driven by a hand-rolled
//! partner that speaks the protocol directly.

mod common;

use common::{fast_config, node_id, open_node};
use netmesh_comm::{
    BidirectionalMessageEndpoint, MemoryNetwork, MessageEndpointListener, PingPongEndpoint,
    ReturnSynchronizerEndpoint, Transport,
};
use netmesh_core::{NeighborChange, NetMeshBase, PropertyChange, TypeChange, XprisoMessage};
use netmesh_types::{
    ChangeStamp, MeshObjectData, MeshObjectIdentifier, NetMeshBaseIdentifier, PropertyValue,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

struct Completer(Weak<ReturnSynchronizerEndpoint<XprisoMessage>>);

impl MessageEndpointListener<XprisoMessage> for Completer {
    fn message_received(&self, message: &XprisoMessage) {
        if let Some(rpc) = self.0.upgrade() {
            rpc.complete_from(message);
        }
    }
}

struct FakePartner {
    id: NetMeshBaseIdentifier,
    base: NetMeshBaseIdentifier,
    rpc: Arc<ReturnSynchronizerEndpoint<XprisoMessage>>,
}

impl FakePartner {
    fn attach(network: &MemoryNetwork, name: &str, base: &NetMeshBase) -> Self {
        let id = node_id(name);
        let transport: Arc<dyn Transport> = Arc::new(network.attach(id.clone()));
        let endpoint = PingPongEndpoint::spawn::<XprisoMessage>(
            format!("{name}->base"),
            fast_config().endpoint,
            transport.clone(),
            base.identifier().clone(),
        );
        let rpc = Arc::new(ReturnSynchronizerEndpoint::new(endpoint.clone()));
        endpoint.add_listener(Arc::new(Completer(Arc::downgrade(&rpc))));
        tokio::spawn(async move {
            while let Some(packet) = transport.recv().await {
                endpoint.deliver(packet);
            }
        });
        Self {
            id,
            base: base.identifier().clone(),
            rpc,
        }
    }

    fn message(&self) -> XprisoMessage {
        XprisoMessage::new(self.id.clone(), self.base.clone())
    }

    fn object(&self, local: &str) -> MeshObjectIdentifier {
        MeshObjectIdentifier::new(self.id.clone(), local).unwrap()
    }

    /// Sends a message as a request and waits until the base answered it,
    /// i.e. until it has been applied.
    async fn call(&self, message: XprisoMessage) -> XprisoMessage {
        let mut tx = self.rpc.begin_transaction();
        let request_id = self.rpc.call(&mut tx, message).unwrap();
        self.rpc.endpoint().start_communicating();
        tx.join(Duration::from_secs(5)).await.unwrap();
        tx.result_for(&request_id).unwrap()
    }

    fn property(&self, object: &MeshObjectIdentifier, name: &str, value: i64, token: u64) -> PropertyChange {
        PropertyChange {
            object: object.clone(),
            property: name.to_string(),
            value: Some(PropertyValue::Integer(value)),
            stamp: ChangeStamp::new(token, self.id.clone()),
        }
    }
}

type Snapshot = Vec<(MeshObjectData, bool, Option<NetMeshBaseIdentifier>, BTreeSet<NetMeshBaseIdentifier>)>;

fn snapshot(base: &NetMeshBase) -> Snapshot {
    base.identifiers()
        .iter()
        .filter_map(|id| base.find_locally(id))
        .map(|o| (o.data, o.has_lock, o.proxy_towards_home, o.proxies))
        .collect()
}

#[tokio::test]
async fn conveyed_objects_become_replicas() {
    let network = MemoryNetwork::new();
    let base = open_node(&network, "mem://base");
    let remote = FakePartner::attach(&network, "mem://remote", &base);

    let x = remote.object("x");
    let mut message = remote.message();
    let mut data = MeshObjectData::new(x.clone(), 1_000);
    data.bless("Thing");
    message.conveyed_objects.push(data);
    remote.call(message).await;

    let replica = base.find_locally(&x).unwrap();
    assert!(replica.data.types.contains("Thing"));
    assert_eq!(replica.proxy_towards_home, Some(remote.id.clone()));
    assert!(!replica.has_lock);
}

#[tokio::test]
async fn newer_stamps_win_regardless_of_arrival_order() {
    let network = MemoryNetwork::new();
    let base = open_node(&network, "mem://base");
    let remote = FakePartner::attach(&network, "mem://remote", &base);

    let x = remote.object("x");
    let mut message = remote.message();
    message.conveyed_objects.push(MeshObjectData::new(x.clone(), 1_000));
    message.deltas.property_changes.push(remote.property(&x, "v", 5, 5));
    remote.call(message).await;

    let mut stale = remote.message();
    stale.deltas.property_changes.push(remote.property(&x, "v", 3, 3));
    remote.call(stale).await;
    assert_eq!(
        base.find_locally(&x).unwrap().data.property("v"),
        Some(&PropertyValue::Integer(5))
    );

    let mut newer = remote.message();
    newer.deltas.property_changes.push(remote.property(&x, "v", 8, 8));
    remote.call(newer).await;
    assert_eq!(
        base.find_locally(&x).unwrap().data.property("v"),
        Some(&PropertyValue::Integer(8))
    );
}

#[tokio::test]
async fn changes_without_permission_are_dropped() {
    let network = MemoryNetwork::new();
    let base = open_node(&network, "mem://base");
    let intruder = FakePartner::attach(&network, "mem://intruder", &base);

    let mut tx = base.begin_transaction().await;
    let x = tx.create_object().unwrap();
    tx.set(&x, "v", 1i64).unwrap();
    tx.commit().unwrap();

    let mut message = intruder.message();
    message.deltas.property_changes.push(intruder.property(&x, "v", 666, 1_000));
    message.deltas.type_additions.push(TypeChange {
        object: x.clone(),
        type_name: "Hacked".into(),
    });
    message.deltas.deletions.push(x.clone());
    intruder.call(message).await;

    let object = base.find_locally(&x).unwrap();
    assert_eq!(object.data.property("v"), Some(&PropertyValue::Integer(1)));
    assert!(object.data.types.is_empty());
}

#[tokio::test]
async fn first_time_requests_are_answered_by_home() {
    let network = MemoryNetwork::new();
    let base = open_node(&network, "mem://base");
    let remote = FakePartner::attach(&network, "mem://remote", &base);

    let mut tx = base.begin_transaction().await;
    let x = tx.create_object().unwrap();
    tx.commit().unwrap();
    let elsewhere = MeshObjectIdentifier::new(node_id("mem://third"), "y").unwrap();

    let mut request = remote.message();
    request.requested_first_time_objects = vec![x.clone(), elsewhere.clone()];
    let response = remote.call(request).await;

    assert_eq!(response.conveyed_objects.len(), 1);
    assert_eq!(response.conveyed_objects[0].identifier, x);
    assert_eq!(response.unknown_objects, vec![elsewhere]);
    assert!(base.find_locally(&x).unwrap().proxies.contains(&remote.id));

    let mut cancel = remote.message();
    cancel.requested_canceled_objects.push(x.clone());
    remote.call(cancel).await;
    assert!(base.find_locally(&x).unwrap().proxies.is_empty());
}

#[tokio::test]
async fn lock_requests_for_unknown_objects_are_denied() {
    let network = MemoryNetwork::new();
    let base = open_node(&network, "mem://base");
    let remote = FakePartner::attach(&network, "mem://remote", &base);

    let mut request = remote.message();
    request
        .requested_lock_objects
        .push(MeshObjectIdentifier::new(node_id("mem://base"), "missing").unwrap());
    let response = remote.call(request).await;
    assert_eq!(response.denied_lock_objects.len(), 1);
    assert!(response.push_lock_objects.is_empty());
}

#[derive(Debug, Clone)]
enum Op {
    Set { obj: usize, name: usize, value: i64, token: u64 },
    Bless { obj: usize, ty: usize },
    Unbless { obj: usize, ty: usize },
    Relate { a: usize, b: usize },
    Unrelate { a: usize, b: usize },
    Delete { obj: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..3usize, 0..2usize, any::<i64>(), 1..20u64)
            .prop_map(|(obj, name, value, token)| Op::Set { obj, name, value, token }),
        2 => (0..3usize, 0..2usize).prop_map(|(obj, ty)| Op::Bless { obj, ty }),
        1 => (0..3usize, 0..2usize).prop_map(|(obj, ty)| Op::Unbless { obj, ty }),
        2 => (0..3usize, 0..3usize).prop_map(|(a, b)| Op::Relate { a, b }),
        1 => (0..3usize, 0..3usize).prop_map(|(a, b)| Op::Unrelate { a, b }),
        1 => (0..3usize).prop_map(|obj| Op::Delete { obj }),
    ]
}

fn build_message(remote: &FakePartner, ops: &[Op]) -> XprisoMessage {
    let ids: Vec<_> = (0..3).map(|i| remote.object(&format!("o{i}"))).collect();
    let mut message = remote.message();
    for id in &ids {
        message.conveyed_objects.push(MeshObjectData::new(id.clone(), 1_000));
    }
    let deltas = &mut message.deltas;
    for op in ops {
        match op {
            Op::Set { obj, name, value, token } => deltas
                .property_changes
                .push(remote.property(&ids[*obj], &format!("p{name}"), *value, *token)),
            Op::Bless { obj, ty } => deltas.type_additions.push(TypeChange {
                object: ids[*obj].clone(),
                type_name: format!("T{ty}"),
            }),
            Op::Unbless { obj, ty } => deltas.type_removals.push(TypeChange {
                object: ids[*obj].clone(),
                type_name: format!("T{ty}"),
            }),
            Op::Relate { a, b } => deltas.neighbor_additions.push(NeighborChange {
                object: ids[*a].clone(),
                neighbor: ids[*b].clone(),
                roles: BTreeSet::new(),
            }),
            Op::Unrelate { a, b } => deltas.neighbor_removals.push(NeighborChange {
                object: ids[*a].clone(),
                neighbor: ids[*b].clone(),
                roles: BTreeSet::new(),
            }),
            Op::Delete { obj } => deltas.deletions.push(ids[*obj].clone()),
        }
    }
    message
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn applying_a_message_twice_equals_applying_it_once(ops in prop::collection::vec(op_strategy(), 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let network = MemoryNetwork::new();
            let base = open_node(&network, "mem://base");
            let remote = FakePartner::attach(&network, "mem://remote", &base);
            let message = build_message(&remote, &ops);

            remote.call(message.clone()).await;
            let once = snapshot(&base);
            remote.call(message).await;
            let twice = snapshot(&base);

            prop_assert_eq!(once, twice);
            Ok(())
        })?;
    }
}
