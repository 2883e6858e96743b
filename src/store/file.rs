use super::staged::{Commit, Staged};
use super::{Access, Store};
use crate::error::{Error, StoreError};
use crate::key::Key;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Cross-process locking used by [`FileStore`] commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockMode {
    /// Take an exclusive `flock` on `store.lock` for every commit. Several
    /// processes may share one store directory.
    #[default]
    Exclusive,
    /// Only serialize commits within this process.
    None,
}

/// Builder for a [`FileStore`].
///
/// # Examples
///
/// ```no_run
/// use eventbox::{FileStore, LockMode};
///
/// let store = FileStore::builder("/var/lib/cv")
///     .lock_mode(LockMode::Exclusive)
///     .sync(true)
///     .open()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileStoreBuilder {
    dir: PathBuf,
    lock_mode: LockMode,
    sync: bool,
}

impl FileStoreBuilder {
    pub fn lock_mode(mut self, lock_mode: LockMode) -> Self {
        self.lock_mode = lock_mode;
        self
    }

    /// Whether to `fsync` group files before renaming them into place.
    /// Defaults to `true`.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Create the directory layout if needed, finish any commit interrupted
    /// by a crash, and open the store.
    pub fn open(self) -> Result<FileStore, StoreError> {
        let groups_dir = self.dir.join("groups");
        fs::create_dir_all(&groups_dir)?;

        let lock_path = self.dir.join("store.lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        let store = FileStore {
            journal_path: self.dir.join("commit.json"),
            dir: self.dir,
            groups_dir,
            lock_mode: self.lock_mode,
            sync: self.sync,
            commit_lock: Mutex::new(lock_file),
        };
        store.recover()?;
        Ok(store)
    }
}

/// Durable [`Store`] keeping one JSON file per entity group.
///
/// Layout of the store directory:
///
/// ```text
/// store.lock               taken exclusively while committing
/// commit.json              present only while a multi-group commit is applied
/// groups/<xxh64>.json      {root, version, records, hash} of one entity group
/// ```
///
/// Group files are replaced atomically (`.tmp` + rename). A commit touching
/// more than one group first writes all new group files to `commit.json`, so
/// a crash mid-commit is rolled forward the next time the store is opened.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    groups_dir: PathBuf,
    journal_path: PathBuf,
    lock_mode: LockMode,
    sync: bool,
    commit_lock: Mutex<File>,
}

/// On-disk form of one entity group.
#[derive(Debug, Serialize, Deserialize)]
struct GroupFile {
    root: Key,
    version: u64,
    records: Vec<StoredRecord>,
    /// Hex xxh64 of the serialized `records`.
    hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key: Key,
    value: Vec<u8>,
}

#[derive(Debug, Default)]
struct Group {
    version: u64,
    records: BTreeMap<Key, Vec<u8>>,
}

impl Group {
    fn children(&self, parent: &Key, kind: &str) -> Vec<(Key, Vec<u8>)> {
        self.records
            .range(parent.first_child(kind)..)
            .take_while(|(key, _)| key.is_child_of(parent, kind))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn into_file(self, root: Key) -> Result<GroupFile, StoreError> {
        let records: Vec<StoredRecord> = self
            .records
            .into_iter()
            .map(|(key, value)| StoredRecord { key, value })
            .collect();
        let hash = content_hash(&serde_json::to_vec(&records)?);
        Ok(GroupFile {
            root,
            version: self.version,
            records,
            hash,
        })
    }
}

/// Hex-encoded xxh64 of `bytes`.
fn content_hash(bytes: &[u8]) -> String {
    format!("{:016x}", xxhash_rust::xxh64::xxh64(bytes, 0))
}

/// Exclusive `flock` released on drop.
struct FileLockGuard<'a>(&'a File);

impl<'a> FileLockGuard<'a> {
    fn acquire(file: &'a File) -> io::Result<Self> {
        file.lock_exclusive()?;
        Ok(FileLockGuard(file))
    }
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.0) {
            log::warn!("failed to release store lock: {e}");
        }
    }
}

impl FileStore {
    /// Open a store in `dir` with default settings.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::builder(dir).open()
    }

    pub fn builder(dir: impl AsRef<Path>) -> FileStoreBuilder {
        FileStoreBuilder {
            dir: dir.as_ref().to_path_buf(),
            lock_mode: LockMode::default(),
            sync: true,
        }
    }

    /// Returns the path to the store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the file holding the entity group of `key`.
    pub fn group_path(&self, key: &Key) -> PathBuf {
        let root = key.root();
        // Length prefixes keep `Project:x`/`y` apart from `Project`/`x:y`.
        let name = format!(
            "{}:{}{}:{}",
            root.kind().len(),
            root.kind(),
            root.id().len(),
            root.id()
        );
        self.groups_dir.join(format!("{}.json", content_hash(name.as_bytes())))
    }

    fn read_group(&self, root: &Key) -> Result<Group, StoreError> {
        let path = self.group_path(root);
        let contents = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Group::default()),
            Err(e) => return Err(e.into()),
        };

        let file: GroupFile = serde_json::from_slice(&contents)?;
        if &file.root != root || content_hash(&serde_json::to_vec(&file.records)?) != file.hash {
            return Err(StoreError::Corrupt { path });
        }
        Ok(Group {
            version: file.version,
            records: file
                .records
                .into_iter()
                .map(|r| (r.key, r.value))
                .collect(),
        })
    }

    fn write_atomically(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp_path = path.with_extension("json.tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        if self.sync {
            file.sync_data()?;
        }
        drop(file);
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn write_group(&self, file: &GroupFile) -> Result<(), StoreError> {
        let path = self.group_path(&file.root);
        self.write_atomically(&path, &serde_json::to_vec(file)?)
    }

    fn commit(&self, commit: Commit) -> Result<(), StoreError> {
        let lock_file = self.commit_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let _flock = match self.lock_mode {
            LockMode::Exclusive => Some(FileLockGuard::acquire(&lock_file)?),
            LockMode::None => None,
        };

        self.roll_forward()?;
        commit.validate(|group| Ok(self.read_group(group)?.version))?;

        let mut files = Vec::new();
        for (root, writes) in commit.into_groups() {
            let mut group = self.read_group(&root)?;
            for (key, value) in writes {
                match value {
                    Some(value) => {
                        group.records.insert(key, value);
                    }
                    None => {
                        group.records.remove(&key);
                    }
                }
            }
            group.version += 1;
            files.push(group.into_file(root)?);
        }

        if files.len() > 1 {
            self.write_atomically(&self.journal_path, &serde_json::to_vec(&files)?)?;
        }
        for file in &files {
            self.write_group(file)?;
        }
        if files.len() > 1 {
            fs::remove_file(&self.journal_path)?;
        }
        Ok(())
    }

    /// Finish a multi-group commit interrupted by a crash.
    fn recover(&self) -> Result<(), StoreError> {
        let lock_file = self.commit_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let _flock = match self.lock_mode {
            LockMode::Exclusive => Some(FileLockGuard::acquire(&lock_file)?),
            LockMode::None => None,
        };
        self.roll_forward()
    }

    /// Apply a leftover `commit.json`, if any. Callers hold the commit lock.
    fn roll_forward(&self) -> Result<(), StoreError> {
        let contents = match fs::read(&self.journal_path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let files: Vec<GroupFile> = serde_json::from_slice(&contents)?;
        log::warn!(
            "{}: finishing interrupted commit of {} entity groups",
            self.dir.display(),
            files.len()
        );
        for file in &files {
            self.write_group(file)?;
        }
        fs::remove_file(&self.journal_path)?;
        Ok(())
    }
}

impl Access for FileStore {
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read_group(key.root())?.records.remove(key))
    }

    fn put(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError> {
        self.commit(Commit::blind([(key.clone(), Some(value))]))
    }

    fn delete(&self, keys: &[Key]) -> Result<(), StoreError> {
        self.commit(Commit::blind(keys.iter().map(|k| (k.clone(), None))))
    }

    fn children(&self, parent: &Key, kind: &str) -> Result<Vec<(Key, Vec<u8>)>, StoreError> {
        Ok(self.read_group(parent.root())?.children(parent, kind))
    }
}

impl Store for FileStore {
    fn run_in_transaction<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&dyn Access) -> Result<T, Error>,
    {
        let tx = FileTransaction {
            store: self,
            staged: Staged::default(),
            groups: RefCell::new(HashMap::new()),
        };
        let out = f(&tx)?;
        self.commit(tx.staged.into_commit())?;
        Ok(out)
    }
}

/// Transaction handle of a [`FileStore`]. Each entity group is read from
/// disk at most once, so all reads of a group see the same snapshot.
struct FileTransaction<'a> {
    store: &'a FileStore,
    staged: Staged,
    groups: RefCell<HashMap<Key, Group>>,
}

impl FileTransaction<'_> {
    fn with_group<T>(&self, root: &Key, f: impl FnOnce(&Group) -> T) -> Result<T, StoreError> {
        let mut groups = self.groups.borrow_mut();
        let group = match groups.entry(root.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let group = self.store.read_group(root)?;
                self.staged.observe(root, group.version);
                entry.insert(group)
            }
        };
        Ok(f(group))
    }
}

impl Access for FileTransaction<'_> {
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(staged) = self.staged.lookup(key) {
            return Ok(staged);
        }
        self.with_group(key.root(), |group| group.records.get(key).cloned())
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
        let committed = self.with_group(parent.root(), |group| group.children(parent, kind))?;
        Ok(self.staged.merge_children(parent, kind, committed))
    }
}
