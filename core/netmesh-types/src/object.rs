//! The externalized form of a MeshObject.
//!
//! [`MeshObjectData`] is what travels inside Xpriso messages when a replica
//! is conveyed, what a Store persists, and what a Probe produces. Replication
//! metadata (lock, home proxy, propagation proxies) is node-local and lives
//! elsewhere.

use crate::{ChangeStamp, MeshObjectIdentifier, NetMeshBaseIdentifier, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A property value together with the stamp of the write that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySlot {
    /// `None` means the property is set to null.
    pub value: Option<PropertyValue>,
    pub stamp: ChangeStamp,
}

/// Complete state of a single MeshObject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshObjectData {
    pub identifier: MeshObjectIdentifier,
    /// Opaque type names ("blessings").
    #[serde(default)]
    pub types: BTreeSet<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySlot>,
    /// Neighbors, each with the set of role types of the relationship.
    #[serde(default)]
    pub neighbors: BTreeMap<MeshObjectIdentifier, BTreeSet<String>>,
    pub time_created: u64,
    pub time_updated: u64,
    /// When the object expires, if ever.
    #[serde(default)]
    pub time_expires: Option<u64>,
}

impl MeshObjectData {
    /// Creates an empty object.
    #[must_use]
    pub fn new(identifier: MeshObjectIdentifier, now: u64) -> Self {
        Self {
            identifier,
            types: BTreeSet::new(),
            properties: BTreeMap::new(),
            neighbors: BTreeMap::new(),
            time_created: now,
            time_updated: now,
            time_expires: None,
        }
    }

    /// Adds a type; returns true if it was not present before.
    pub fn bless(&mut self, type_name: impl Into<String>) -> bool {
        self.types.insert(type_name.into())
    }

    /// Returns the value of a property, if set.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name).and_then(|slot| slot.value.as_ref())
    }

    /// Sets a property with an explicit stamp, unconditionally.
    pub fn set_property(
        &mut self,
        name: impl Into<String>,
        value: Option<PropertyValue>,
        stamp: ChangeStamp,
    ) {
        self.properties.insert(name.into(), PropertySlot { value, stamp });
    }

    /// Returns the stamp currently attached to a property.
    #[must_use]
    pub fn property_stamp(&self, name: &str) -> Option<&ChangeStamp> {
        self.properties.get(name).map(|slot| &slot.stamp)
    }

    /// Whether the object is related to `neighbor`.
    #[must_use]
    pub fn is_related_to(&self, neighbor: &MeshObjectIdentifier) -> bool {
        self.neighbors.contains_key(neighbor)
    }

    /// Role types of the relationship to `neighbor`.
    #[must_use]
    pub fn roles_with(&self, neighbor: &MeshObjectIdentifier) -> Option<&BTreeSet<String>> {
        self.neighbors.get(neighbor)
    }

    /// Whether the object has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.time_expires.is_some_and(|t| t <= now)
    }

    /// The highest token found in any property stamp from `origin`.
    #[must_use]
    pub fn max_token_from(&self, origin: &NetMeshBaseIdentifier) -> u64 {
        self.properties
            .values()
            .filter(|slot| &slot.stamp.origin == origin)
            .map(|slot| slot.stamp.token)
            .max()
            .unwrap_or(0)
    }
}
