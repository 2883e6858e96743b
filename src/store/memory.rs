use super::staged::{Commit, Staged};
use super::{Access, Store};
use crate::error::{Error, StoreError};
use crate::key::Key;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// In-process [`Store`] backed by an ordered map.
///
/// Nothing is persisted. Useful for tests and for embedding the event box in
/// a single process.
///
/// # Examples
///
/// ```
/// use eventbox::{Access, Key, MemoryStore, Store};
///
/// let store = MemoryStore::new();
/// let key = Key::new("Counter", "a");
///
/// store
///     .run_in_transaction(|tx| {
///         tx.put(&key, b"1".to_vec())?;
///         Ok(())
///     })
///     .unwrap();
/// assert_eq!(store.get(&key).unwrap(), Some(b"1".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<Key, Vec<u8>>,
    versions: HashMap<Key, u64>,
}

impl Inner {
    fn version(&self, group: &Key) -> u64 {
        self.versions.get(group).copied().unwrap_or(0)
    }

    fn children(&self, parent: &Key, kind: &str) -> Vec<(Key, Vec<u8>)> {
        self.records
            .range(parent.first_child(kind)..)
            .take_while(|(key, _)| key.is_child_of(parent, kind))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn apply(&mut self, commit: Commit) -> Result<(), StoreError> {
        commit.validate(|group| Ok(self.version(group)))?;
        for (group, writes) in commit.into_groups() {
            for (key, value) in writes {
                match value {
                    Some(value) => {
                        self.records.insert(key, value);
                    }
                    None => {
                        self.records.remove(&key);
                    }
                }
            }
            *self.versions.entry(group).or_insert(0) += 1;
        }
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.records.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Access for MemoryStore {
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.records.get(key).cloned())
    }

    fn put(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError> {
        self.lock()?.apply(Commit::blind([(key.clone(), Some(value))]))
    }

    fn delete(&self, keys: &[Key]) -> Result<(), StoreError> {
        self.lock()?.apply(Commit::blind(keys.iter().map(|k| (k.clone(), None))))
    }

    fn children(&self, parent: &Key, kind: &str) -> Result<Vec<(Key, Vec<u8>)>, StoreError> {
        Ok(self.lock()?.children(parent, kind))
    }
}

impl Store for MemoryStore {
    fn run_in_transaction<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&dyn Access) -> Result<T, Error>,
    {
        let tx = MemoryTransaction {
            store: self,
            staged: Staged::default(),
        };
        let out = f(&tx)?;
        self.lock()?.apply(tx.staged.into_commit())?;
        Ok(out)
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    staged: Staged,
}

impl Access for MemoryTransaction<'_> {
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(staged) = self.staged.lookup(key) {
            return Ok(staged);
        }
        let inner = self.store.lock()?;
        self.staged.observe(key.root(), inner.version(key.root()));
        Ok(inner.records.get(key).cloned())
    }

    fn put(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError> {
        self.staged.put(key, value);
        Ok(())
    }

    fn delete(&self, keys: &[Key]) -> Result<(), StoreError> {
        self.staged.delete(keys);
        Ok(())
    }

    fn children(&self, parent: &Key, kind: &str) -> Result<Vec<(Key, Vec<u8>)>, StoreError> {
        let committed = {
            let inner = self.store.lock()?;
            self.staged.observe(parent.root(), inner.version(parent.root()));
            inner.children(parent, kind)
        };
        Ok(self.staged.merge_children(parent, kind, committed))
    }
}
