//! Transactions.
//!
//! All mutation of a NetMeshBase happens inside a [`Transaction`]. A
//! transaction holds the base's single-writer lock and works on a private
//! copy of the objects it touches; readers keep seeing the committed state
//! until [`Transaction::commit`] publishes the changes in one step.
//! Dropping a transaction without committing rolls it back.

use crate::meshbase::BaseInner;
use crate::{Deltas, MeshError, MeshResult, NetMeshObject};
use netmesh_types::{
    now_millis, MeshObjectData, MeshObjectIdentifier, NetMeshBaseIdentifier, PropertyValue,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::MutexGuard;
use tracing::debug;

/// Where the changes of a transaction come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Local application code; writes require the lock.
    Local,
    /// An incoming message from this partner.
    Remote(NetMeshBaseIdentifier),
}

/// A set of changes applied atomically to a NetMeshBase.
pub struct Transaction<'a> {
    base: &'a Arc<BaseInner>,
    _writer: MutexGuard<'a, ()>,
    origin: Origin,
    /// Touched objects; `None` marks a deletion.
    working: BTreeMap<MeshObjectIdentifier, Option<NetMeshObject>>,
    /// Replicas dropped locally without telling anybody.
    forgotten: BTreeSet<MeshObjectIdentifier>,
    committed: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(base: &'a Arc<BaseInner>, writer: MutexGuard<'a, ()>, origin: Origin) -> Self {
        Self {
            base,
            _writer: writer,
            origin,
            working: BTreeMap::new(),
            forgotten: BTreeSet::new(),
            committed: false,
        }
    }

    /// The identifier of the base this transaction works on.
    #[must_use]
    pub fn base_identifier(&self) -> &NetMeshBaseIdentifier {
        &self.base.identifier
    }

    /// Returns the object as seen by this transaction.
    pub fn get(&mut self, id: &MeshObjectIdentifier) -> Option<NetMeshObject> {
        self.load(id).cloned()
    }

    /// Whether the object exists as seen by this transaction.
    pub fn contains(&mut self, id: &MeshObjectIdentifier) -> bool {
        self.load(id).is_some()
    }

    /// Creates an object with a fresh identifier.
    pub fn create_object(&mut self) -> MeshResult<MeshObjectIdentifier> {
        let id = MeshObjectIdentifier::random(self.base.identifier.clone());
        self.create_object_with_id(id.clone())?;
        Ok(id)
    }

    /// Creates an object with the given identifier, which must belong to
    /// this base.
    pub fn create_object_with_id(&mut self, id: MeshObjectIdentifier) -> MeshResult<()> {
        if id.base() != &self.base.identifier {
            return Err(MeshError::NotLocal(id, self.base.identifier.clone()));
        }
        if self.contains(&id) {
            return Err(MeshError::AlreadyExists(id));
        }
        let now = now_millis();
        self.forgotten.remove(&id);
        self.working.insert(
            id.clone(),
            Some(NetMeshObject::new_home(MeshObjectData::new(id, now), now)),
        );
        Ok(())
    }

    /// Deletes an object and removes it from its neighbors.
    pub fn delete_object(&mut self, id: &MeshObjectIdentifier) -> MeshResult<()> {
        if id.is_home_object() {
            return Err(MeshError::HomeObject(id.clone()));
        }
        let neighbors: Vec<MeshObjectIdentifier> =
            self.writable(id)?.data.neighbors.keys().cloned().collect();
        self.remove_with_back_references(id, &neighbors);
        Ok(())
    }

    /// Adds a type.
    pub fn bless(&mut self, id: &MeshObjectIdentifier, type_name: impl Into<String>) -> MeshResult<()> {
        self.writable(id)?.data.bless(type_name);
        Ok(())
    }

    /// Removes a type.
    pub fn unbless(&mut self, id: &MeshObjectIdentifier, type_name: &str) -> MeshResult<()> {
        self.writable(id)?.data.types.remove(type_name);
        Ok(())
    }

    /// Sets a property; `None` sets it to null.
    pub fn set_property(
        &mut self,
        id: &MeshObjectIdentifier,
        name: impl Into<String>,
        value: Option<PropertyValue>,
    ) -> MeshResult<()> {
        let stamp = self.base.next_stamp();
        self.writable(id)?.data.set_property(name, value, stamp);
        Ok(())
    }

    /// Sets a property to a non-null value.
    pub fn set(
        &mut self,
        id: &MeshObjectIdentifier,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> MeshResult<()> {
        self.set_property(id, name, Some(value.into()))
    }

    /// Sets when the object expires.
    pub fn set_time_expires(&mut self, id: &MeshObjectIdentifier, time_expires: Option<u64>) -> MeshResult<()> {
        self.writable(id)?.data.time_expires = time_expires;
        Ok(())
    }

    /// Relates two objects. The neighbor side is updated if it is resident.
    pub fn relate(&mut self, a: &MeshObjectIdentifier, b: &MeshObjectIdentifier) -> MeshResult<()> {
        self.writable(a)?;
        let b_resident = self.contains(b);
        if b_resident {
            self.writable(b)?;
        }
        self.writable(a)?.data.neighbors.entry(b.clone()).or_default();
        if b_resident {
            self.writable(b)?.data.neighbors.entry(a.clone()).or_default();
        }
        Ok(())
    }

    /// Removes the relationship between two objects.
    pub fn unrelate(&mut self, a: &MeshObjectIdentifier, b: &MeshObjectIdentifier) -> MeshResult<()> {
        let b_resident = self.contains(b);
        if b_resident {
            self.writable(b)?;
        }
        self.writable(a)?.data.neighbors.remove(b);
        if b_resident {
            self.writable(b)?.data.neighbors.remove(a);
        }
        Ok(())
    }

    /// Adds a role to `a`'s side of its relationship with `b`, relating the
    /// two if necessary.
    pub fn bless_relationship(
        &mut self,
        a: &MeshObjectIdentifier,
        b: &MeshObjectIdentifier,
        role: impl Into<String>,
    ) -> MeshResult<()> {
        self.relate(a, b)?;
        self.writable(a)?
            .data
            .neighbors
            .entry(b.clone())
            .or_default()
            .insert(role.into());
        Ok(())
    }

    /// Removes a role from `a`'s side of its relationship with `b`.
    pub fn unbless_relationship(
        &mut self,
        a: &MeshObjectIdentifier,
        b: &MeshObjectIdentifier,
        role: &str,
    ) -> MeshResult<()> {
        if let Some(roles) = self.writable(a)?.data.neighbors.get_mut(b) {
            roles.remove(role);
        }
        Ok(())
    }

    /// Makes the object look like `target`, creating it if needed. Property
    /// stamps only change where values differ.
    pub fn update_to_match(&mut self, target: &MeshObjectData) -> MeshResult<()> {
        let id = target.identifier.clone();
        if !self.contains(&id) {
            self.create_object_with_id(id.clone())?;
        }
        let changed: Vec<(String, Option<PropertyValue>)> = {
            let current = &self.writable(&id)?.data;
            target
                .properties
                .iter()
                .filter(|(name, slot)| current.properties.get(*name).map(|s| &s.value) != Some(&slot.value))
                .map(|(name, slot)| (name.clone(), slot.value.clone()))
                .collect()
        };
        for (name, value) in changed {
            self.set_property(&id, name, value)?;
        }

        let object = self.writable(&id)?;
        object.data.types = target.types.clone();
        object.data.neighbors = target.neighbors.clone();
        object.data.time_expires = target.time_expires;
        let stale: Vec<String> = object
            .data
            .properties
            .iter()
            .filter(|(name, slot)| slot.value.is_some() && !target.properties.contains_key(*name))
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            self.set_property(&id, name, None)?;
        }
        Ok(())
    }

    /// Publishes the changes. Returns what changed.
    pub fn commit(mut self) -> MeshResult<Deltas> {
        self.committed = true;
        let working = std::mem::take(&mut self.working);
        let forgotten = std::mem::take(&mut self.forgotten);
        self.base.commit(working, forgotten, &self.origin)
    }

    // ── Crate-internal access ───────────────────────────────────

    /// The working copy of an object, loading it on first touch.
    pub(crate) fn load(&mut self, id: &MeshObjectIdentifier) -> Option<&mut NetMeshObject> {
        if !self.working.contains_key(id) {
            let committed = self.base.objects_read().get(id).cloned();
            committed.as_ref()?;
            self.working.insert(id.clone(), committed);
        }
        self.working.get_mut(id).and_then(Option::as_mut)
    }

    /// The working copy of an object this transaction may modify.
    pub(crate) fn writable(&mut self, id: &MeshObjectIdentifier) -> MeshResult<&mut NetMeshObject> {
        let local = self.origin == Origin::Local;
        let object = self
            .load(id)
            .ok_or_else(|| MeshError::NotFound(id.clone()))?;
        if local && !object.has_lock {
            return Err(MeshError::NotPermitted(id.clone()));
        }
        object.data.time_updated = now_millis();
        Ok(object)
    }

    /// Inserts or replaces an object.
    pub(crate) fn put(&mut self, object: NetMeshObject) {
        self.forgotten.remove(object.identifier());
        self.working.insert(object.identifier().clone(), Some(object));
    }

    /// Deletes an object and strips it from the given resident neighbors.
    pub(crate) fn remove_with_back_references(
        &mut self,
        id: &MeshObjectIdentifier,
        neighbors: &[MeshObjectIdentifier],
    ) {
        for neighbor in neighbors {
            if let Some(object) = self.load(neighbor) {
                object.data.neighbors.remove(id);
            }
        }
        if self.load(id).is_some() {
            self.working.insert(id.clone(), None);
        }
    }

    /// Drops a replica without propagating anything.
    pub(crate) fn forget(&mut self, id: &MeshObjectIdentifier) {
        self.working.remove(id);
        self.forgotten.insert(id.clone());
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed && !(self.working.is_empty() && self.forgotten.is_empty()) {
            debug!(
                "Rolled back transaction on {} touching {} object(s)",
                self.base.identifier,
                self.working.len()
            );
        }
    }
}
