//! Probe-driven replication for NetMesh.
//!
//! External resources (files, HTTP documents, anything a [`Fetcher`] can
//! retrieve) take part in the mesh through shadow bases:
//!
//! - A [`Fetcher`] retrieves the raw content of a resource
//! - A [`Probe`] reads that content into a [`StagingMeshBase`]
//! - A [`ShadowMeshBase`] applies successful runs and serves the result to
//!   partners as if the resource were a node
//! - A [`ProbeManager`] creates, refreshes and retires shadows
//! - A [`LocalNetMeshBase`] reaches the shadows in-process, running a
//!   resource's Probe the first time it is needed
//!
//! # Example
//!
//! ```ignore
//! let manager = ScheduledProbeManager::start(
//!     ProbeManagerConfig::default(),
//!     Arc::new(HttpFetcher::new(Duration::from_secs(30))?),
//!     ProbeDirectory::json(),
//! );
//! let base = LocalNetMeshBase::builder(transport, manager).open().await?;
//! let feed = MeshObjectIdentifier::parse("https://example.com/feed.json")?;
//! let object = base.access_locally(&feed).await?;
//! ```

mod error;
mod fetcher;
mod local;
mod manager;
mod probe;
mod shadow;
mod staging;

pub use error::{ProbeError, ProbeResult};
pub use fetcher::{FetchedResource, Fetcher, FetcherChain, FileFetcher, HttpFetcher, MemoryFetcher};
pub use local::{LocalNetMeshBase, LocalNetMeshBaseBuilder};
pub use manager::{PassiveProbeManager, ProbeManager, ProbeManagerConfig, ScheduledProbeManager};
pub use probe::{JsonProbe, Probe, ProbeDirectory};
pub use shadow::{ShadowMeshBase, ShadowStatus};
pub use staging::StagingMeshBase;
