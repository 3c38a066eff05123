//! Error types for probes.

use netmesh_core::MeshError;
use thiserror::Error;

/// Result type for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors raised while running a Probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The resource could not be fetched.
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    /// No probe understands the content.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// The content could not be parsed.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The identifier is not one this manager can probe.
    #[error("not a probe-managed resource: {0}")]
    NotProbeManaged(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("invalid identifier: {0}")]
    Types(#[from] netmesh_types::Error),
}
