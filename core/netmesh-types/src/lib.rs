//! Core type definitions for NetMesh.
//!
//! This crate defines the fundamental, transport-agnostic types shared by
//! every other NetMesh crate:
//! - Node and MeshObject identifiers
//! - Property values and the change stamps used for last-writer-wins
//! - Coherence specifications for Probe-driven replicas
//! - The externalized (serializable) form of a MeshObject
//!
//! Types and role types are opaque schema names; this crate knows nothing
//! about what they mean.

mod clock;
mod coherence;
mod ids;
mod object;
mod stamp;
mod value;

pub use clock::{elapsed_since, now_millis};
pub use coherence::CoherenceSpecification;
pub use ids::{MeshObjectIdentifier, NetMeshBaseIdentifier};
pub use object::{MeshObjectData, PropertySlot};
pub use stamp::ChangeStamp;
pub use value::PropertyValue;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid NetMeshBase identifier: {0}")]
    InvalidNetMeshBaseIdentifier(String),

    #[error("invalid MeshObject identifier: {0}")]
    InvalidMeshObjectIdentifier(String),

    #[error("invalid coherence specification: {0}")]
    InvalidCoherenceSpecification(String),
}
