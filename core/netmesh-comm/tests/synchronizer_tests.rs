//! Tests for the return synchronizer.

use netmesh_comm::{
    BidirectionalMessageEndpoint, CarriesInvocationId, CommError, EndpointConfig, MemoryNetwork,
    PingPongEndpoint, ReturnSynchronizer, ReturnSynchronizerEndpoint, Transport,
};
use netmesh_types::NetMeshBaseIdentifier;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn join_returns_once_all_queries_complete() {
    let sync = Arc::new(ReturnSynchronizer::<u64, String>::new("test"));
    let mut tx = sync.begin_transaction();
    tx.add_open_query(1);
    tx.add_open_query(2);
    assert!(!tx.is_complete());

    let completer = sync.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(completer.query_has_completed(&2, "two".into()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(completer.query_has_completed(&1, "one".into()));
    });

    tx.join(Duration::from_secs(5)).await.unwrap();
    assert_eq!(tx.result_for(&1).unwrap(), "one");
    assert_eq!(tx.result_for(&2).unwrap(), "two");
}

#[tokio::test]
async fn join_times_out() {
    let sync = ReturnSynchronizer::<u64, String>::new("test");
    let mut tx = sync.begin_transaction();
    tx.add_open_query(1);

    let err = tx.join(Duration::from_millis(20)).await.unwrap_err();
    assert!(matches!(err, CommError::Timeout));
    assert!(matches!(tx.result_for(&1), Err(CommError::QueryIncomplete(_))));
}

#[tokio::test]
async fn empty_transaction_joins_immediately() {
    let sync = ReturnSynchronizer::<u64, String>::new("test");
    let tx = sync.begin_transaction();
    tx.join(Duration::from_millis(1)).await.unwrap();
}

#[test]
fn late_results_are_discarded() {
    let sync = ReturnSynchronizer::<u64, String>::new("test");
    {
        let mut tx = sync.begin_transaction();
        tx.add_open_query(9);
        assert!(sync.is_open(&9));
    }
    assert!(!sync.is_open(&9));
    assert!(!sync.query_has_completed(&9, "late".into()));
    assert_eq!(sync.open_query_count(), 0);
}

#[tokio::test]
async fn two_transactions_share_a_query() {
    let sync = ReturnSynchronizer::<u64, String>::new("test");
    let mut first = sync.begin_transaction();
    let mut second = sync.begin_transaction();
    first.add_open_query(5);
    second.add_open_query(5);

    sync.query_has_completed(&5, "shared".into());
    first.join(Duration::from_secs(1)).await.unwrap();
    drop(first);

    // Still open for the second transaction.
    assert!(sync.is_open(&5));
    second.join(Duration::from_secs(1)).await.unwrap();
    assert_eq!(second.result_for(&5).unwrap(), "shared");
}

// ── With an endpoint ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Call {
    request: Option<u64>,
    response: Option<u64>,
    body: String,
}

impl CarriesInvocationId for Call {
    fn request_id(&self) -> Option<u64> {
        self.request
    }
    fn set_request_id(&mut self, id: u64) {
        self.request = Some(id);
    }
    fn response_id(&self) -> Option<u64> {
        self.response
    }
}

fn id(s: &str) -> NetMeshBaseIdentifier {
    NetMeshBaseIdentifier::parse(s).unwrap()
}

#[tokio::test]
async fn call_waits_for_the_matching_response() {
    let config = EndpointConfig {
        delta_respond: Duration::from_millis(5),
        delta_resend: Duration::from_millis(20),
        delta_recover: Duration::from_millis(150),
        random_variation: 0.0,
    };
    let net = MemoryNetwork::new();
    let ta: Arc<dyn Transport> = Arc::new(net.attach(id("mem://client")));
    let tb: Arc<dyn Transport> = Arc::new(net.attach(id("mem://server")));

    let client = Arc::new(ReturnSynchronizerEndpoint::new(PingPongEndpoint::spawn::<Call>(
        "client",
        config.clone(),
        ta.clone(),
        id("mem://server"),
    )));
    let server = PingPongEndpoint::spawn::<Call>("server", config, tb.clone(), id("mem://client"));

    // Server: echo every request in upper case.
    let server_endpoint = server.clone();
    tokio::spawn(async move {
        while let Some(packet) = tb.recv().await {
            for call in packet.decode::<Call>().unwrap_or_default() {
                if let Some(request) = call.request {
                    server_endpoint
                        .enqueue_message_for_send(Call {
                            request: None,
                            response: Some(request),
                            body: call.body.to_uppercase(),
                        })
                        .unwrap();
                }
            }
            server_endpoint.deliver(packet);
        }
    });
    // Client: complete queries from incoming responses.
    let client_side = client.clone();
    tokio::spawn(async move {
        while let Some(packet) = ta.recv().await {
            for call in packet.decode::<Call>().unwrap_or_default() {
                client_side.complete_from(&call);
            }
            client_side.endpoint().deliver(packet);
        }
    });

    let mut tx = client.begin_transaction();
    let first = client
        .call(&mut tx, Call { request: None, response: None, body: "hello".into() })
        .unwrap();
    let second = client
        .call(&mut tx, Call { request: None, response: None, body: "world".into() })
        .unwrap();
    client.endpoint().start_communicating();

    tx.join(Duration::from_secs(5)).await.unwrap();
    assert_eq!(tx.result_for(&first).unwrap().body, "HELLO");
    assert_eq!(tx.result_for(&second).unwrap().body, "WORLD");
    assert_eq!(client.next_request_id(), 3);
}
