//! In-memory [`Store`] backend.

use crate::{Store, StorageError, StorageResult, StoreValue};
use netmesh_types::now_millis;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// A [`Store`] backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, StoreValue>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> StorageResult<std::sync::MutexGuard<'_, BTreeMap<String, StoreValue>>> {
        self.values.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl Store for MemoryStore {
    fn put(&self, value: StoreValue) -> StorageResult<()> {
        let mut values = self.values()?;
        if values.contains_key(&value.key) {
            return Err(StorageError::KeyExists(value.key));
        }
        values.insert(value.key.clone(), value);
        Ok(())
    }

    fn update(&self, mut value: StoreValue) -> StorageResult<()> {
        let mut values = self.values()?;
        match values.get_mut(&value.key) {
            Some(existing) => {
                value.time_created = existing.time_created;
                *existing = value;
                Ok(())
            }
            None => Err(StorageError::NotFound(value.key)),
        }
    }

    fn put_or_update(&self, mut value: StoreValue) -> StorageResult<bool> {
        let mut values = self.values()?;
        let replaced = match values.get(&value.key) {
            Some(existing) => {
                value.time_created = existing.time_created;
                true
            }
            None => false,
        };
        values.insert(value.key.clone(), value);
        Ok(replaced)
    }

    fn get(&self, key: &str) -> StorageResult<StoreValue> {
        let mut values = self.values()?;
        let value = values
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        value.time_read = now_millis();
        Ok(value.clone())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.values()?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn delete_all(&self, prefix: &str) -> StorageResult<usize> {
        let mut values = self.values()?;
        let before = values.len();
        values.retain(|k, _| !k.starts_with(prefix));
        Ok(before - values.len())
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .values()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
