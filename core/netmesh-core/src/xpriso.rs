//! The Xpriso message format.
//!
//! An [`XprisoMessage`] is one batch exchanged between two proxies. It
//! carries the deltas of committed transactions, requests (first-time
//! replicas, resynchronization, cancellation, locks) and the responses to
//! them. Messages travel inside endpoint packets as JSON.

use netmesh_comm::CarriesInvocationId;
use netmesh_types::{
    ChangeStamp, MeshObjectData, MeshObjectIdentifier, NetMeshBaseIdentifier, PropertyValue,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Version of the message format. Messages of other versions are dropped.
pub const PROTOCOL_VERSION: u32 = 1;

/// A type added to or removed from an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeChange {
    pub object: MeshObjectIdentifier,
    pub type_name: String,
}

/// A property set to a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub object: MeshObjectIdentifier,
    pub property: String,
    pub value: Option<PropertyValue>,
    pub stamp: ChangeStamp,
}

/// A neighbor added to or removed from an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborChange {
    pub object: MeshObjectIdentifier,
    pub neighbor: MeshObjectIdentifier,
    /// Roles of the relationship when it was added.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,
}

/// A role added to or removed from an existing relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleChange {
    pub object: MeshObjectIdentifier,
    pub neighbor: MeshObjectIdentifier,
    pub role: String,
}

/// A change of an object's expiration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiryChange {
    pub object: MeshObjectIdentifier,
    pub time_expires: Option<u64>,
}

/// The net changes of one or more committed transactions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deltas {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub creations: Vec<MeshObjectData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_additions: Vec<TypeChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_removals: Vec<TypeChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_changes: Vec<PropertyChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub neighbor_additions: Vec<NeighborChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub neighbor_removals: Vec<NeighborChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role_additions: Vec<RoleChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role_removals: Vec<RoleChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expiry_changes: Vec<ExpiryChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletions: Vec<MeshObjectIdentifier>,
}

impl Deltas {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creations.is_empty()
            && self.type_additions.is_empty()
            && self.type_removals.is_empty()
            && self.property_changes.is_empty()
            && self.neighbor_additions.is_empty()
            && self.neighbor_removals.is_empty()
            && self.role_additions.is_empty()
            && self.role_removals.is_empty()
            && self.expiry_changes.is_empty()
            && self.deletions.is_empty()
    }

    /// Computes the changes that turn `before` into `after`.
    ///
    /// Both sides must describe the same object; either may be absent.
    #[must_use]
    pub fn diff(before: Option<&MeshObjectData>, after: Option<&MeshObjectData>) -> Self {
        let mut deltas = Self::default();
        match (before, after) {
            (None, None) => {}
            (None, Some(created)) => deltas.creations.push(created.clone()),
            (Some(deleted), None) => deltas.deletions.push(deleted.identifier.clone()),
            (Some(before), Some(after)) => deltas.diff_existing(before, after),
        }
        deltas
    }

    fn diff_existing(&mut self, before: &MeshObjectData, after: &MeshObjectData) {
        let id = &after.identifier;

        for added in after.types.difference(&before.types) {
            self.type_additions.push(TypeChange {
                object: id.clone(),
                type_name: added.clone(),
            });
        }
        for removed in before.types.difference(&after.types) {
            self.type_removals.push(TypeChange {
                object: id.clone(),
                type_name: removed.clone(),
            });
        }

        for (name, slot) in &after.properties {
            if before.properties.get(name) != Some(slot) {
                self.property_changes.push(PropertyChange {
                    object: id.clone(),
                    property: name.clone(),
                    value: slot.value.clone(),
                    stamp: slot.stamp.clone(),
                });
            }
        }

        for (neighbor, roles) in &after.neighbors {
            match before.neighbors.get(neighbor) {
                None => self.neighbor_additions.push(NeighborChange {
                    object: id.clone(),
                    neighbor: neighbor.clone(),
                    roles: roles.clone(),
                }),
                Some(old_roles) => {
                    for role in roles.difference(old_roles) {
                        self.role_additions.push(RoleChange {
                            object: id.clone(),
                            neighbor: neighbor.clone(),
                            role: role.clone(),
                        });
                    }
                    for role in old_roles.difference(roles) {
                        self.role_removals.push(RoleChange {
                            object: id.clone(),
                            neighbor: neighbor.clone(),
                            role: role.clone(),
                        });
                    }
                }
            }
        }
        for neighbor in before.neighbors.keys() {
            if !after.neighbors.contains_key(neighbor) {
                self.neighbor_removals.push(NeighborChange {
                    object: id.clone(),
                    neighbor: neighbor.clone(),
                    roles: BTreeSet::new(),
                });
            }
        }

        if before.time_expires != after.time_expires {
            self.expiry_changes.push(ExpiryChange {
                object: id.clone(),
                time_expires: after.time_expires,
            });
        }
    }

    /// Appends all changes of `other`.
    pub fn extend(&mut self, other: Self) {
        self.creations.extend(other.creations);
        self.type_additions.extend(other.type_additions);
        self.type_removals.extend(other.type_removals);
        self.property_changes.extend(other.property_changes);
        self.neighbor_additions.extend(other.neighbor_additions);
        self.neighbor_removals.extend(other.neighbor_removals);
        self.role_additions.extend(other.role_additions);
        self.role_removals.extend(other.role_removals);
        self.expiry_changes.extend(other.expiry_changes);
        self.deletions.extend(other.deletions);
    }

    /// Drops neighbor removals pointing at deleted objects; every node
    /// performs those itself when applying the deletion.
    pub fn drop_neighbor_removals_of(&mut self, deleted: &BTreeSet<MeshObjectIdentifier>) {
        if deleted.is_empty() {
            return;
        }
        self.neighbor_removals
            .retain(|change| !deleted.contains(&change.neighbor));
    }

    /// The changes concerning objects accepted by `keep`.
    #[must_use]
    pub fn filter(&self, keep: impl Fn(&MeshObjectIdentifier) -> bool) -> Self {
        Self {
            creations: self
                .creations
                .iter()
                .filter(|c| keep(&c.identifier))
                .cloned()
                .collect(),
            type_additions: filter_by(&self.type_additions, |c| keep(&c.object)),
            type_removals: filter_by(&self.type_removals, |c| keep(&c.object)),
            property_changes: filter_by(&self.property_changes, |c| keep(&c.object)),
            neighbor_additions: filter_by(&self.neighbor_additions, |c| keep(&c.object)),
            neighbor_removals: filter_by(&self.neighbor_removals, |c| keep(&c.object)),
            role_additions: filter_by(&self.role_additions, |c| keep(&c.object)),
            role_removals: filter_by(&self.role_removals, |c| keep(&c.object)),
            expiry_changes: filter_by(&self.expiry_changes, |c| keep(&c.object)),
            deletions: filter_by(&self.deletions, |id| keep(id)),
        }
    }

    /// Every object mentioned as the subject of a change.
    #[must_use]
    pub fn objects(&self) -> BTreeSet<MeshObjectIdentifier> {
        let mut ids = BTreeSet::new();
        ids.extend(self.creations.iter().map(|c| c.identifier.clone()));
        ids.extend(self.type_additions.iter().map(|c| c.object.clone()));
        ids.extend(self.type_removals.iter().map(|c| c.object.clone()));
        ids.extend(self.property_changes.iter().map(|c| c.object.clone()));
        ids.extend(self.neighbor_additions.iter().map(|c| c.object.clone()));
        ids.extend(self.neighbor_removals.iter().map(|c| c.object.clone()));
        ids.extend(self.role_additions.iter().map(|c| c.object.clone()));
        ids.extend(self.role_removals.iter().map(|c| c.object.clone()));
        ids.extend(self.expiry_changes.iter().map(|c| c.object.clone()));
        ids.extend(self.deletions.iter().cloned());
        ids
    }
}

fn filter_by<T: Clone>(items: &[T], keep: impl Fn(&T) -> bool) -> Vec<T> {
    items.iter().filter(|item| keep(item)).cloned().collect()
}

/// One batch between two proxies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XprisoMessage {
    pub protocol_version: u32,
    pub sender: NetMeshBaseIdentifier,
    pub receiver: NetMeshBaseIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<u64>,

    /// Objects the sender wants replicas of.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_first_time_objects: Vec<MeshObjectIdentifier>,
    /// Replicas the sender no longer holds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_canceled_objects: Vec<MeshObjectIdentifier>,
    /// Replicas the sender wants refreshed in full.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_resynchronize: Vec<MeshObjectIdentifier>,
    /// Full replicas, sent in answer to requests or with relationships.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conveyed_objects: Vec<MeshObjectData>,
    /// Requested objects the sender does not have.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_objects: Vec<MeshObjectIdentifier>,

    #[serde(flatten)]
    pub deltas: Deltas,

    /// Objects whose lock the sender asks for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_lock_objects: Vec<MeshObjectIdentifier>,
    /// Objects whose lock the sender hands to the receiver.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub push_lock_objects: Vec<MeshObjectIdentifier>,
    /// Objects whose lock the sender refuses to hand over.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_lock_objects: Vec<MeshObjectIdentifier>,

    /// The sender is tearing down its proxy.
    #[serde(default)]
    pub cease_communications: bool,
}

impl XprisoMessage {
    /// An empty message.
    #[must_use]
    pub fn new(sender: NetMeshBaseIdentifier, receiver: NetMeshBaseIdentifier) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            sender,
            receiver,
            request_id: None,
            response_id: None,
            requested_first_time_objects: Vec::new(),
            requested_canceled_objects: Vec::new(),
            requested_resynchronize: Vec::new(),
            conveyed_objects: Vec::new(),
            unknown_objects: Vec::new(),
            deltas: Deltas::default(),
            requested_lock_objects: Vec::new(),
            push_lock_objects: Vec::new(),
            denied_lock_objects: Vec::new(),
            cease_communications: false,
        }
    }

    /// An empty message answering `request`.
    #[must_use]
    pub fn response_to(request: &Self) -> Self {
        let mut response = Self::new(request.receiver.clone(), request.sender.clone());
        response.response_id = request.request_id;
        response
    }

    /// Whether the message carries nothing but its header.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requested_first_time_objects.is_empty()
            && self.requested_canceled_objects.is_empty()
            && self.requested_resynchronize.is_empty()
            && self.conveyed_objects.is_empty()
            && self.unknown_objects.is_empty()
            && self.deltas.is_empty()
            && self.requested_lock_objects.is_empty()
            && self.push_lock_objects.is_empty()
            && self.denied_lock_objects.is_empty()
            && !self.cease_communications
    }
}

impl CarriesInvocationId for XprisoMessage {
    fn request_id(&self) -> Option<u64> {
        self.request_id
    }

    fn set_request_id(&mut self, id: u64) {
        self.request_id = Some(id);
    }

    fn response_id(&self) -> Option<u64> {
        self.response_id
    }
}
