//! The unit a transport moves between nodes.

use crate::CommResult;
use netmesh_types::NetMeshBaseIdentifier;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A token-stamped batch of endpoint messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub sender: NetMeshBaseIdentifier,
    pub receiver: NetMeshBaseIdentifier,
    /// Endpoint token; see the endpoint implementations for its meaning.
    pub token: u64,
    /// JSON array of messages.
    pub content: serde_json::Value,
}

impl Packet {
    /// Encodes a batch of messages into a packet.
    pub fn encode<T: Serialize>(
        sender: NetMeshBaseIdentifier,
        receiver: NetMeshBaseIdentifier,
        token: u64,
        messages: &[T],
    ) -> CommResult<Self> {
        Ok(Self {
            sender,
            receiver,
            token,
            content: serde_json::to_value(messages)?,
        })
    }

    /// Whether the packet carries no messages, i.e. only passes the token.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.content {
            serde_json::Value::Null => true,
            serde_json::Value::Array(messages) => messages.is_empty(),
            _ => false,
        }
    }

    /// Decodes the batch of messages carried by this packet.
    pub fn decode<T: DeserializeOwned>(&self) -> CommResult<Vec<T>> {
        if self.content.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(self.content.clone())?)
    }
}
