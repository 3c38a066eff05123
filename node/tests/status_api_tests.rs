use netmesh_comm::MemoryNetwork;
use netmesh_core::NetMeshBase;
use netmesh_node::{build_router, NodeState};
use netmesh_types::NetMeshBaseIdentifier;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn open_base(network: &MemoryNetwork, name: &str) -> NetMeshBase {
    let id = NetMeshBaseIdentifier::parse(name).unwrap();
    NetMeshBase::builder(Arc::new(network.attach(id)))
        .open()
        .unwrap()
}

/// Spin up the HTTP server on an OS-assigned port, returning the base URL.
async fn spawn_test_server(state: NodeState) -> String {
    let app = build_router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn status_endpoint_reports_the_node() {
    let network = MemoryNetwork::new();
    let base = open_base(&network, "mem://alpha");
    {
        let mut tx = base.begin_transaction().await;
        tx.create_object().unwrap();
        tx.commit().unwrap();
    }

    let url = spawn_test_server(NodeState { base, probes: None }).await;
    let resp = reqwest::get(format!("{}/api/v1/status", url)).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["identifier"], "mem://alpha");
    assert_eq!(body["object_count"], 2);
    assert_eq!(body["proxies"], serde_json::json!([]));
    assert_eq!(body["shadows"], serde_json::json!([]));
}

#[tokio::test]
async fn status_endpoint_lists_proxies() {
    let network = MemoryNetwork::new();
    let alpha = open_base(&network, "mem://alpha");
    let _beta = open_base(&network, "mem://beta");
    let beta_id = NetMeshBaseIdentifier::parse("mem://beta").unwrap();
    alpha.obtain_proxy_for(&beta_id, None).await.unwrap();

    let url = spawn_test_server(NodeState { base: alpha, probes: None }).await;
    let body: serde_json::Value = reqwest::get(format!("{}/api/v1/status", url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["proxies"][0]["partner"], "mem://beta");
    assert_eq!(body["proxies"][0]["status"], "uninitialized");
}

#[tokio::test]
async fn status_content_type_is_json() {
    let network = MemoryNetwork::new();
    let url = spawn_test_server(NodeState {
        base: open_base(&network, "mem://alpha"),
        probes: None,
    })
    .await;
    let resp = reqwest::get(format!("{}/api/v1/status", url)).await.unwrap();

    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.contains("application/json"));
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let network = MemoryNetwork::new();
    let url = spawn_test_server(NodeState {
        base: open_base(&network, "mem://alpha"),
        probes: None,
    })
    .await;
    let resp = reqwest::get(format!("{}/api/v1/nonexistent", url)).await.unwrap();

    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn status_endpoint_lists_shadows() {
    use netmesh_probe::{
        FetchedResource, MemoryFetcher, PassiveProbeManager, ProbeDirectory, ProbeManager,
        ProbeManagerConfig,
    };

    let feed = NetMeshBaseIdentifier::parse("test://feed").unwrap();
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert(
        feed.clone(),
        FetchedResource::new(br#"{ "objects": [] }"#.to_vec(), Some("application/json")),
    );
    let manager = Arc::new(PassiveProbeManager::new(
        ProbeManagerConfig::default(),
        fetcher,
        ProbeDirectory::json(),
    ));
    manager.obtain_for(&feed, None).await.unwrap();

    let network = MemoryNetwork::new();
    let url = spawn_test_server(NodeState {
        base: open_base(&network, "mem://alpha"),
        probes: Some(manager),
    })
    .await;
    let body: serde_json::Value = reqwest::get(format!("{}/api/v1/status", url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["shadows"], serde_json::json!(["test://feed"]));
}
