//! NetMeshBase, proxies and Xpriso replication.
//!
//! A [`NetMeshBase`] holds one node's MeshObjects: home replicas of the
//! objects it created and replicas of objects homed elsewhere. It keeps a
//! [`Proxy`] per partner node; proxies exchange [`XprisoMessage`]s over a
//! message endpoint to fetch replicas, propagate changes and move write
//! locks between nodes.
//!
//! # Example
//!
//! ```ignore
//! let network = MemoryNetwork::new();
//! let a = NetMeshBase::builder(network.attach(id_a)?).open()?;
//! let b = NetMeshBase::builder(network.attach(id_b)?).open()?;
//!
//! let mut tx = a.begin_transaction().await;
//! let obj = tx.create_object()?;
//! tx.set(&obj, "name", "first")?;
//! tx.commit()?;
//!
//! let replica = b.access_locally(&obj).await?;
//! ```

mod config;
mod error;
mod locks;
mod meshbase;
mod object;
mod persistence;
mod proxy;
mod reconcile;
mod sweeper;
mod transaction;
mod xpriso;

pub use config::MeshBaseConfig;
pub use error::{MeshError, MeshResult};
pub use meshbase::{
    NetMeshBase, NetMeshBaseBuilder, ProxyObtainHook, ProxySummary, WeakNetMeshBase,
};
pub use object::{MeshObjectListener, NetMeshObject};
pub use proxy::{Proxy, ProxyData, ProxyStatus};
pub use sweeper::{DefaultSweeper, ScheduledSweeper, SweepPolicy, SweepReport, Sweeper};
pub use transaction::Transaction;
pub use xpriso::{
    Deltas, ExpiryChange, NeighborChange, PropertyChange, RoleChange, TypeChange, XprisoMessage,
    PROTOCOL_VERSION,
};
