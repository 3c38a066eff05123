//! Persisting objects and proxies in a [`Store`].
//!
//! Objects live under `object:<identifier>`, proxies under
//! `proxy:<partner>`, both as JSON.

use crate::{MeshResult, NetMeshObject, ProxyData};
use netmesh_store::{StorageError, Store, StoreValue};
use netmesh_types::{MeshObjectIdentifier, NetMeshBaseIdentifier};
use tracing::warn;

const OBJECT_PREFIX: &str = "object:";
const PROXY_PREFIX: &str = "proxy:";

fn object_key(id: &MeshObjectIdentifier) -> String {
    format!("{OBJECT_PREFIX}{id}")
}

fn proxy_key(partner: &NetMeshBaseIdentifier) -> String {
    format!("{PROXY_PREFIX}{partner}")
}

pub(crate) fn save_object(store: &dyn Store, object: &NetMeshObject) -> MeshResult<()> {
    let mut value = StoreValue::json(object_key(object.identifier()), object)?;
    value.time_expires = object.data.time_expires;
    store.put_or_update(value)?;
    Ok(())
}

pub(crate) fn delete_object(store: &dyn Store, id: &MeshObjectIdentifier) -> MeshResult<()> {
    match store.delete(&object_key(id)) {
        Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn load_objects(store: &dyn Store) -> MeshResult<Vec<NetMeshObject>> {
    let mut objects = Vec::new();
    for key in store.keys(OBJECT_PREFIX)? {
        let value = match store.get(&key) {
            Ok(value) => value,
            Err(StorageError::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        match value.decode_json::<NetMeshObject>() {
            Ok(object) => objects.push(object),
            Err(e) => warn!("Skipping unreadable object {}: {}", key, e),
        }
    }
    Ok(objects)
}

pub(crate) fn save_proxy(store: &dyn Store, data: &ProxyData) -> MeshResult<()> {
    store.put_or_update(StoreValue::json(proxy_key(&data.partner), data)?)?;
    Ok(())
}

pub(crate) fn delete_proxy(store: &dyn Store, partner: &NetMeshBaseIdentifier) -> MeshResult<()> {
    match store.delete(&proxy_key(partner)) {
        Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn load_proxies(store: &dyn Store) -> MeshResult<Vec<ProxyData>> {
    let mut proxies = Vec::new();
    for key in store.keys(PROXY_PREFIX)? {
        let value = match store.get(&key) {
            Ok(value) => value,
            Err(StorageError::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        match value.decode_json::<ProxyData>() {
            Ok(data) => proxies.push(data),
            Err(e) => warn!("Skipping unreadable proxy {}: {}", key, e),
        }
    }
    Ok(proxies)
}
