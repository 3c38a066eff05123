//! The scratch base a Probe writes into.

use crate::{ProbeError, ProbeResult};
use netmesh_types::{
    now_millis, ChangeStamp, MeshObjectData, MeshObjectIdentifier, NetMeshBaseIdentifier,
    PropertyValue,
};
use std::collections::BTreeMap;

/// Objects produced by one Probe run.
///
/// Nothing here is visible to anybody until the run succeeds and its result
/// is diffed into the shadow base. Every object belongs to the probed
/// resource; the resource's home object always exists.
#[derive(Debug, Clone)]
pub struct StagingMeshBase {
    resource: NetMeshBaseIdentifier,
    objects: BTreeMap<MeshObjectIdentifier, MeshObjectData>,
    started: u64,
}

impl StagingMeshBase {
    #[must_use]
    pub fn new(resource: NetMeshBaseIdentifier) -> Self {
        let started = now_millis();
        let home = MeshObjectIdentifier::home_object(resource.clone());
        let mut objects = BTreeMap::new();
        objects.insert(home.clone(), MeshObjectData::new(home, started));
        Self {
            resource,
            objects,
            started,
        }
    }

    /// The resource being probed.
    #[must_use]
    pub fn resource(&self) -> &NetMeshBaseIdentifier {
        &self.resource
    }

    #[must_use]
    pub fn home_object(&self) -> MeshObjectIdentifier {
        MeshObjectIdentifier::home_object(self.resource.clone())
    }

    /// Resolves a local id to an identifier within the resource; the empty
    /// string names the home object.
    pub fn identifier(&self, local: &str) -> ProbeResult<MeshObjectIdentifier> {
        Ok(MeshObjectIdentifier::new(self.resource.clone(), local)?)
    }

    /// Creates an object, or returns the existing one with that local id.
    pub fn create(&mut self, local: &str) -> ProbeResult<&mut MeshObjectData> {
        let id = self.identifier(local)?;
        let started = self.started;
        Ok(self
            .objects
            .entry(id.clone())
            .or_insert_with(|| MeshObjectData::new(id, started)))
    }

    pub fn get_mut(&mut self, id: &MeshObjectIdentifier) -> Option<&mut MeshObjectData> {
        self.objects.get_mut(id)
    }

    #[must_use]
    pub fn get(&self, id: &MeshObjectIdentifier) -> Option<&MeshObjectData> {
        self.objects.get(id)
    }

    /// Sets a property. Stamps are irrelevant here; the shadow stamps its
    /// own writes when the run is applied.
    pub fn set(
        &mut self,
        id: &MeshObjectIdentifier,
        name: impl Into<String>,
        value: Option<PropertyValue>,
    ) -> ProbeResult<()> {
        let stamp = ChangeStamp::initial(self.resource.clone());
        self.objects
            .get_mut(id)
            .ok_or_else(|| ProbeError::Syntax(format!("no object {id}")))?
            .set_property(name, value, stamp);
        Ok(())
    }

    /// Relates two staged objects with the given roles on `a`'s side.
    pub fn relate(
        &mut self,
        a: &MeshObjectIdentifier,
        b: &MeshObjectIdentifier,
        roles: impl IntoIterator<Item = String>,
    ) -> ProbeResult<()> {
        if !self.objects.contains_key(b) {
            return Err(ProbeError::Syntax(format!("no object {b}")));
        }
        let a_side = self
            .objects
            .get_mut(a)
            .ok_or_else(|| ProbeError::Syntax(format!("no object {a}")))?;
        a_side.neighbors.entry(b.clone()).or_default().extend(roles);
        if let Some(b_side) = self.objects.get_mut(b) {
            b_side.neighbors.entry(a.clone()).or_default();
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn into_objects(self) -> BTreeMap<MeshObjectIdentifier, MeshObjectData> {
        self.objects
    }
}
