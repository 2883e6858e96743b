use crate::error::StoreError;
use crate::key::Key;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

/// Bookkeeping of an open optimistic transaction: the version of every
/// entity group it has read, and the writes it will apply on commit
/// (`None` marks a deletion).
#[derive(Debug, Default)]
pub(crate) struct Staged {
    observed: RefCell<HashMap<Key, u64>>,
    writes: RefCell<BTreeMap<Key, Option<Vec<u8>>>>,
}

impl Staged {
    /// Record that `group` was read at `version`. Only the first read of a
    /// group counts, later ones must have seen the same version or the
    /// commit will fail anyway.
    pub(crate) fn observe(&self, group: &Key, version: u64) {
        self.observed
            .borrow_mut()
            .entry(group.clone())
            .or_insert(version);
    }

    /// The staged write for `key`, if any.
    pub(crate) fn lookup(&self, key: &Key) -> Option<Option<Vec<u8>>> {
        self.writes.borrow().get(key).cloned()
    }

    pub(crate) fn put(&self, key: &Key, value: Vec<u8>) {
        self.writes.borrow_mut().insert(key.clone(), Some(value));
    }

    pub(crate) fn delete(&self, keys: &[Key]) {
        let mut writes = self.writes.borrow_mut();
        for key in keys {
            writes.insert(key.clone(), None);
        }
    }

    /// Overlay staged writes on committed children of `parent`.
    pub(crate) fn merge_children(
        &self,
        parent: &Key,
        kind: &str,
        committed: Vec<(Key, Vec<u8>)>,
    ) -> Vec<(Key, Vec<u8>)> {
        let mut merged: BTreeMap<Key, Vec<u8>> = committed.into_iter().collect();
        let writes = self.writes.borrow();
        let staged = writes
            .range(parent.first_child(kind)..)
            .take_while(|(key, _)| key.is_child_of(parent, kind));
        for (key, value) in staged {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }

    pub(crate) fn into_commit(self) -> Commit {
        Commit {
            observed: self.observed.into_inner(),
            writes: self.writes.into_inner(),
        }
    }
}

/// Everything a store needs to validate and apply a transaction.
#[derive(Debug, Default)]
pub(crate) struct Commit {
    pub(crate) observed: HashMap<Key, u64>,
    pub(crate) writes: BTreeMap<Key, Option<Vec<u8>>>,
}

impl Commit {
    /// A commit of blind writes, used for non-transactional puts and deletes.
    pub(crate) fn blind(writes: impl IntoIterator<Item = (Key, Option<Vec<u8>>)>) -> Self {
        Commit {
            observed: HashMap::new(),
            writes: writes.into_iter().collect(),
        }
    }

    /// Fail if any observed group is no longer at the version the
    /// transaction read.
    pub(crate) fn validate(
        &self,
        mut current_version: impl FnMut(&Key) -> Result<u64, StoreError>,
    ) -> Result<(), StoreError> {
        for (group, &seen) in &self.observed {
            let now = current_version(group)?;
            if now != seen {
                log::warn!("{group}: read at version {seen}, now at {now}; aborting commit");
                return Err(StoreError::Contention {
                    group: group.clone(),
                });
            }
        }
        Ok(())
    }

    /// Staged writes split by entity group.
    pub(crate) fn into_groups(self) -> BTreeMap<Key, Vec<(Key, Option<Vec<u8>>)>> {
        let mut groups: BTreeMap<Key, Vec<(Key, Option<Vec<u8>>)>> = BTreeMap::new();
        for (key, value) in self.writes {
            groups
                .entry(key.root().clone())
                .or_default()
                .push((key, value));
        }
        groups
    }
}
