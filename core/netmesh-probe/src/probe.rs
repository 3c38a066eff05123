//! Probes turn the content of an external resource into MeshObjects.

use crate::{ProbeError, ProbeResult, StagingMeshBase};
use netmesh_types::{CoherenceSpecification, NetMeshBaseIdentifier, PropertyValue};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Reads the content of a resource into a staging base.
///
/// A run either succeeds completely or fails; partial staging content of a
/// failed run is discarded.
pub trait Probe: Send + Sync {
    fn read(
        &self,
        resource: &NetMeshBaseIdentifier,
        coherence: Option<&CoherenceSpecification>,
        bytes: &[u8],
        content_type: Option<&str>,
        staging: &mut StagingMeshBase,
    ) -> ProbeResult<()>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonDocument {
    #[serde(default)]
    objects: Vec<JsonObject>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonObject {
    /// Local id; empty for the resource's home object.
    #[serde(default)]
    id: String,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    properties: BTreeMap<String, serde_json::Value>,
    /// Local id of the neighbor to its roles.
    #[serde(default)]
    neighbors: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    expires: Option<u64>,
}

/// Reads JSON documents of the form
///
/// ```json
/// { "objects": [
///     { "id": "", "types": ["Feed"], "properties": { "title": "News" },
///       "neighbors": { "item-1": ["contains"] } },
///     { "id": "item-1", "properties": { "title": "First" } }
/// ] }
/// ```
///
/// Property values must be JSON scalars or `null`.
#[derive(Debug, Default, Clone)]
pub struct JsonProbe;

impl Probe for JsonProbe {
    fn read(
        &self,
        resource: &NetMeshBaseIdentifier,
        _coherence: Option<&CoherenceSpecification>,
        bytes: &[u8],
        _content_type: Option<&str>,
        staging: &mut StagingMeshBase,
    ) -> ProbeResult<()> {
        let document: JsonDocument = serde_json::from_slice(bytes)
            .map_err(|e| ProbeError::Syntax(format!("{resource}: {e}")))?;

        for object in &document.objects {
            let id = staging.identifier(&object.id)?;
            let data = staging.create(&object.id)?;
            data.types.extend(object.types.iter().cloned());
            data.time_expires = object.expires;
            for (name, raw) in &object.properties {
                let value = match raw {
                    serde_json::Value::Null => None,
                    other => Some(PropertyValue::from_json(other).ok_or_else(|| {
                        ProbeError::Syntax(format!("{id}: property {name} is not a scalar"))
                    })?),
                };
                staging.set(&id, name.clone(), value)?;
            }
        }

        for object in &document.objects {
            let id = staging.identifier(&object.id)?;
            for (neighbor, roles) in &object.neighbors {
                let neighbor = staging.identifier(neighbor)?;
                staging.relate(&id, &neighbor, roles.iter().cloned())?;
            }
        }
        Ok(())
    }
}

/// Picks the Probe for a content type.
#[derive(Clone, Default)]
pub struct ProbeDirectory {
    by_content_type: HashMap<String, Arc<dyn Probe>>,
    fallback: Option<Arc<dyn Probe>>,
}

impl ProbeDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory that reads JSON, including content of unknown type.
    #[must_use]
    pub fn json() -> Self {
        let json: Arc<dyn Probe> = Arc::new(JsonProbe);
        Self::new()
            .with("application/json", json.clone())
            .with_fallback(json)
    }

    #[must_use]
    pub fn with(mut self, content_type: &str, probe: Arc<dyn Probe>) -> Self {
        self.by_content_type
            .insert(content_type.to_ascii_lowercase(), probe);
        self
    }

    /// Probe for content whose type is unknown or not registered.
    #[must_use]
    pub fn with_fallback(mut self, probe: Arc<dyn Probe>) -> Self {
        self.fallback = Some(probe);
        self
    }

    pub fn probe_for(&self, content_type: Option<&str>) -> ProbeResult<Arc<dyn Probe>> {
        content_type
            .and_then(|ct| self.by_content_type.get(ct))
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| {
                ProbeError::UnsupportedContentType(content_type.unwrap_or("unknown").to_string())
            })
    }
}
