//! Shared types and HTTP API for the NetMesh node.

use axum::{extract::State, response::Json, routing::get, Router};
use netmesh_core::{NetMeshBase, ProxySummary, PROTOCOL_VERSION};
use netmesh_probe::ProbeManager;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize, Clone, Debug)]
pub struct StatusResponse {
    pub identifier: String,
    pub protocol_version: u32,
    pub object_count: usize,
    pub proxies: Vec<ProxySummary>,
    /// Resources currently shadowed by the node's probe manager.
    pub shadows: Vec<String>,
}

/// What the HTTP API reports on.
#[derive(Clone)]
pub struct NodeState {
    pub base: NetMeshBase,
    pub probes: Option<Arc<dyn ProbeManager>>,
}

impl NodeState {
    #[must_use]
    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            identifier: self.base.identifier().to_string(),
            protocol_version: PROTOCOL_VERSION,
            object_count: self.base.object_count(),
            proxies: self.base.proxy_summaries(),
            shadows: self
                .probes
                .as_ref()
                .map(|m| m.shadow_identifiers().iter().map(ToString::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

async fn status_handler(State(state): State<Arc<NodeState>>) -> Json<StatusResponse> {
    Json(state.status())
}

/// Build the HTTP API router for the given node.
pub fn build_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/api/v1/status", get(status_handler))
        .with_state(state)
}
