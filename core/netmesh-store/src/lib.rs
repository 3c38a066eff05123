//! Key-value Store contract for NetMesh.
//!
//! NetMeshBases persist externalized Proxies and MeshObjects through the
//! [`Store`] trait. Keys are opaque strings; values are opaque byte blobs
//! with created/updated/read/expires timestamps.
//!
//! # Backends
//!
//! - [`MemoryStore`]: a map behind a mutex, for tests and transient bases
//! - [`SqliteStore`]: a single SQLite table, for nodes that survive restarts

mod error;
mod memory;
mod sqlite;
mod value;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use value::StoreValue;

/// A key-value store.
///
/// Implementations must be safe to share between threads; every method is
/// short and blocking.
pub trait Store: Send + Sync {
    /// Inserts a new value. Fails with [`StorageError::KeyExists`] if the key is taken.
    fn put(&self, value: StoreValue) -> StorageResult<()>;

    /// Replaces an existing value. Fails with [`StorageError::NotFound`] if absent.
    fn update(&self, value: StoreValue) -> StorageResult<()>;

    /// Inserts or replaces. Returns true if a value was replaced.
    ///
    /// When replacing, the stored creation time is kept.
    fn put_or_update(&self, value: StoreValue) -> StorageResult<bool>;

    /// Looks up a value. Fails with [`StorageError::NotFound`] if absent.
    fn get(&self, key: &str) -> StorageResult<StoreValue>;

    /// Removes a value. Fails with [`StorageError::NotFound`] if absent.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Removes every value whose key starts with `prefix`. Returns how many were removed.
    fn delete_all(&self, prefix: &str) -> StorageResult<usize>;

    /// All keys starting with `prefix`, in ascending order.
    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Number of values whose key starts with `prefix`.
    fn size(&self, prefix: &str) -> StorageResult<usize> {
        Ok(self.keys(prefix)?.len())
    }
}
