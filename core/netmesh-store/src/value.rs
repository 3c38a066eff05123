//! Values held by a [`Store`](crate::Store).

use netmesh_types::now_millis;
use serde::{de::DeserializeOwned, Serialize};

/// A stored blob plus its bookkeeping timestamps (milliseconds since epoch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreValue {
    pub key: String,
    /// Identifies how `data` is encoded, e.g. `json`.
    pub encoding_id: String,
    pub time_created: u64,
    pub time_updated: u64,
    pub time_read: u64,
    /// When the value expires, if ever.
    pub time_expires: Option<u64>,
    pub data: Vec<u8>,
}

impl StoreValue {
    /// Creates a value stamped with the current time.
    pub fn new(key: impl Into<String>, encoding_id: impl Into<String>, data: Vec<u8>) -> Self {
        let now = now_millis();
        Self {
            key: key.into(),
            encoding_id: encoding_id.into(),
            time_created: now,
            time_updated: now,
            time_read: now,
            time_expires: None,
            data,
        }
    }

    /// Serializes `payload` as JSON into a new value.
    pub fn json<T: Serialize>(key: impl Into<String>, payload: &T) -> crate::StorageResult<Self> {
        Ok(Self::new(key, "json", serde_json::to_vec(payload)?))
    }

    /// Deserializes the JSON payload.
    pub fn decode_json<T: DeserializeOwned>(&self) -> crate::StorageResult<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Sets the expiry time.
    #[must_use]
    pub fn expires_at(mut self, millis: u64) -> Self {
        self.time_expires = Some(millis);
        self
    }
}
