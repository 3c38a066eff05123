//! MeshObjects as held by a NetMeshBase.

use crate::Deltas;
use netmesh_types::{MeshObjectData, MeshObjectIdentifier, NetMeshBaseIdentifier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A replica of a MeshObject together with its replication metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetMeshObject {
    pub data: MeshObjectData,
    /// Whether this node holds the write lock.
    pub has_lock: bool,
    /// The node holding the home replica; `None` if this node is home.
    pub proxy_towards_home: Option<NetMeshBaseIdentifier>,
    /// Nodes holding replicas that receive this replica's changes.
    #[serde(default)]
    pub proxies: BTreeSet<NetMeshBaseIdentifier>,
    /// At the home replica: where the lock is, if it has been granted away.
    #[serde(default)]
    pub lock_location: Option<NetMeshBaseIdentifier>,
    /// Last local read, in milliseconds since the epoch.
    pub time_read: u64,
}

impl NetMeshObject {
    /// A home replica holding the lock.
    #[must_use]
    pub fn new_home(data: MeshObjectData, now: u64) -> Self {
        Self {
            data,
            has_lock: true,
            proxy_towards_home: None,
            proxies: BTreeSet::new(),
            lock_location: None,
            time_read: now,
        }
    }

    /// A replica of an object whose home is elsewhere.
    #[must_use]
    pub fn new_replica(data: MeshObjectData, now: u64) -> Self {
        let home = data.identifier.base().clone();
        Self {
            data,
            has_lock: false,
            proxy_towards_home: Some(home),
            proxies: BTreeSet::new(),
            lock_location: None,
            time_read: now,
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &MeshObjectIdentifier {
        &self.data.identifier
    }

    /// Whether this is the home replica.
    #[must_use]
    pub fn is_home_replica(&self) -> bool {
        self.proxy_towards_home.is_none()
    }
}

/// Receives the committed changes of one MeshObject.
pub trait MeshObjectListener: Send + Sync {
    /// Called after a commit that changed the object. `changes` holds only
    /// the changes of this object.
    fn object_changed(&self, identifier: &MeshObjectIdentifier, changes: &Deltas);
}
