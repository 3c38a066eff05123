//! Error types for the mesh base.

use crate::NetMeshObject;
use netmesh_comm::CommError;
use netmesh_store::StorageError;
use netmesh_types::{MeshObjectIdentifier, NetMeshBaseIdentifier};
use thiserror::Error;

/// Result type for mesh base operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors surfaced by a NetMeshBase.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Some objects could not be accessed. `partial` holds those that could.
    #[error("cannot access {} object(s): {}", .missing.len(), join_ids(.missing))]
    Access {
        missing: Vec<MeshObjectIdentifier>,
        partial: Vec<NetMeshObject>,
    },

    /// The write lock for the object is held elsewhere.
    #[error("not permitted to modify {0}")]
    NotPermitted(MeshObjectIdentifier),

    #[error("object already exists: {0}")]
    AlreadyExists(MeshObjectIdentifier),

    #[error("object not found: {0}")]
    NotFound(MeshObjectIdentifier),

    /// Objects can only be created in the namespace of their home base.
    #[error("identifier {0} is not local to {1}")]
    NotLocal(MeshObjectIdentifier, NetMeshBaseIdentifier),

    /// The home object cannot be deleted.
    #[error("cannot delete home object {0}")]
    HomeObject(MeshObjectIdentifier),

    #[error("proxy towards {0} is dead")]
    ProxyDead(NetMeshBaseIdentifier),

    /// The partner could not be prepared, e.g. its Probe failed.
    #[error("partner {0} unavailable: {1}")]
    Unavailable(NetMeshBaseIdentifier, String),

    #[error("operation timed out")]
    Timeout,

    /// An incoming message violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("mesh base is closed")]
    Closed,

    #[error("communication error: {0}")]
    Comm(#[from] CommError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid identifier: {0}")]
    Types(#[from] netmesh_types::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn join_ids(ids: &[MeshObjectIdentifier]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl MeshError {
    /// Objects that were accessible despite the error.
    #[must_use]
    pub fn partial_result(&self) -> &[NetMeshObject] {
        match self {
            Self::Access { partial, .. } => partial,
            _ => &[],
        }
    }
}
