//! The transactional record store the event box is built on.

mod file;
mod memory;
mod staged;

pub use file::{FileStore, FileStoreBuilder, LockMode};
pub use memory::MemoryStore;

use crate::error::{Error, StoreError};
use crate::key::Key;

/// Record-level reads and writes.
///
/// Implemented by stores, where every write commits on its own, and by the
/// transaction handles passed to [`Store::run_in_transaction`], where writes
/// are staged until the transaction commits and reads observe them.
pub trait Access {
    /// Read one record. A missing record is `Ok(None)`.
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError>;

    /// Delete records. Missing keys are ignored.
    fn delete(&self, keys: &[Key]) -> Result<(), StoreError>;

    /// Direct children of `parent` with the given kind, ordered by id.
    fn children(&self, parent: &Key, kind: &str) -> Result<Vec<(Key, Vec<u8>)>, StoreError>;
}

/// A store that can run serializable transactions.
///
/// Isolation is tracked per entity group ([`Key::root`]): a transaction fails
/// with [`StoreError::Contention`] if any group it read was committed to by
/// someone else before it finished. A transaction may write to any number of
/// groups. If `f` fails, nothing it staged is applied.
pub trait Store: Access {
    fn run_in_transaction<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&dyn Access) -> Result<T, Error>;
}
