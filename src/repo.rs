// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The repository facade (`spec.md` §2, §4.8): ties the time partitioner,
//! file-group store, write cache, memtables, insert path, and commit
//! worker into the public, `&self`-method API a caller actually drives.
//!
//! Grounded on `original_source/tsdbMain.c`'s `tsdb_repo_t` free-function
//! API (`tsdbCreateRepo`/`tsdbOpenRepo`/`tsdbCloseRepo`/`tsdbInsertData`/
//! `tsdbAsyncCommit`), reshaped from an opaque `void*` handle traded
//! through free functions into an idiomatic struct with methods
//! (`spec.md` §9 "Dynamic dispatch / opaque handles").

use crate::cache::Cache;
use crate::coding::{Decode, Encode};
use crate::commit::{self, ImemSnapshot};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fgroup::Store;
use crate::fs::{FileSystem, StdFileSystem};
use crate::insert;
use crate::memtable::Memtable;
use crate::meta::TableCatalog;
use crate::meta::TableId;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const CONFIG_FILE_NAME: &str = "CONFIG";
const DATA_DIR_NAME: &str = "data";

/// A repository's lifecycle state (`spec.md` §4.8).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RepoState {
    /// Being initialized; not yet open for inserts.
    Configuring,
    /// Open for inserts and commits.
    Active,
    /// Closed: inserts are rejected, but a commit already in flight is
    /// allowed to finish.
    Closed,
}

/// The repository's mutable state, shared between the writer (via
/// [`Repository`]'s methods) and the commit worker thread.
///
/// Protects exactly what `spec.md` §5 names: `state`, `commit_pending`,
/// every table's active memtable, the cache's active generation, the
/// file-group array, and the frozen `imem` snapshot. Held only across
/// pointer swaps and small metadata updates, never across file I/O.
pub(crate) struct Inner<FS: FileSystem> {
    pub(crate) state: RepoState,
    pub(crate) commit_pending: bool,
    pub(crate) mem_tables: HashMap<TableId, Memtable>,
    pub(crate) cache: Cache,
    pub(crate) store: Store<FS>,
    pub(crate) imem: Option<ImemSnapshot>,
}

/// A self-contained time-series storage repository: a config record, a
/// shared write cache, per-table memtables, and the file groups they
/// flush into (`spec.md` §2).
pub struct Repository<FS: FileSystem = StdFileSystem> {
    dir: PathBuf,
    config: Config,
    catalog: Arc<dyn TableCatalog>,
    inner: Arc<Mutex<Inner<FS>>>,
    commit_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl<FS: FileSystem + 'static> Repository<FS> {
    fn new(dir: PathBuf, config: Config, catalog: Arc<dyn TableCatalog>, store: Store<FS>) -> Arc<Self> {
        Arc::new(Self {
            dir,
            config,
            catalog,
            inner: Arc::new(Mutex::new(Inner {
                state: RepoState::Active,
                commit_pending: false,
                mem_tables: HashMap::new(),
                cache: Cache::new(config.max_cache_size),
                store,
                imem: None,
            })),
            commit_handle: Mutex::new(None),
        })
    }

    /// The resolved configuration this repository was created or opened
    /// with.
    #[must_use]
    pub fn config(&self) -> Config {
        self.config
    }

    /// The repository's root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The repository's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RepoState {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.inner.lock().expect("lock poisoned").state
    }

    /// Buffers a decoded submit message into the right tables' memtables
    /// (`spec.md` §4.6).
    ///
    /// Rejected once the repository is [`RepoState::Closed`]
    /// (`spec.md` §4.8).
    pub fn insert(&self, msg: &[u8]) -> Result<()> {
        #[expect(clippy::expect_used, reason = "lock poisoned")]
        let mut guard = self.inner.lock().expect("lock poisoned");
        if guard.state != RepoState::Active {
            return Err(Error::StateViolation("insert on a repository that is not active"));
        }
        let Inner { mem_tables, cache, .. } = &mut *guard;
        insert::insert_submit_message(mem_tables, cache, self.catalog.as_ref(), msg)
    }

    /// Triggers an asynchronous commit: freezes the active memtables and
    /// cache generation, then hands them to a background commit worker
    /// thread (`spec.md` §2, §4.7, §4.8).
    ///
    /// A no-op if there is nothing buffered (`spec.md` §8 property 8,
    /// "idempotent empty commit"). Fails with [`Error::StateViolation`] if
    /// the repository is not [`RepoState::Active`] or a commit is already
    /// pending.
    pub fn trigger_commit(self: &Arc<Self>) -> Result<()> {
        let snapshot = {
            #[expect(clippy::expect_used, reason = "lock poisoned")]
            let mut guard = self.inner.lock().expect("lock poisoned");

            if guard.state != RepoState::Active {
                return Err(Error::StateViolation("commit triggered on a repository that is not active"));
            }
            if guard.commit_pending {
                return Err(Error::StateViolation("a commit is already pending"));
            }

            let snapshot = match guard.imem.take() {
                // A previous attempt failed; retry over the same snapshot.
                Some(pending) => pending,
                None => {
                    if guard.mem_tables.is_empty() {
                        return Ok(());
                    }
                    let tables = std::mem::take(&mut guard.mem_tables);
                    let cache = guard.cache.freeze();
                    ImemSnapshot { tables, cache }
                }
            };

            guard.commit_pending = true;
            snapshot
        };

        let inner = Arc::clone(&self.inner);
        let config = self.config;
        let handle = std::thread::Builder::new()
            .name("tsdb-commit".into())
            .spawn(move || commit::commit_worker(inner, config, snapshot))
            .map_err(Error::Io)?;

        #[expect(clippy::expect_used, reason = "lock poisoned")]
        let mut commit_handle = self.commit_handle.lock().expect("lock poisoned");
        *commit_handle = Some(handle);
        Ok(())
    }

    /// Blocks until any in-flight commit has finished.
    pub fn wait_for_commit(&self) {
        #[expect(clippy::expect_used, reason = "lock poisoned")]
        let mut handle_guard = self.commit_handle.lock().expect("lock poisoned");
        if let Some(handle) = handle_guard.take() {
            let _ = handle.join();
        }
    }

    /// Closes the repository: further inserts are rejected, but a commit
    /// already running is allowed to finish before this call returns
    /// (`spec.md` §4.8, §5).
    pub fn close(&self) {
        {
            #[expect(clippy::expect_used, reason = "lock poisoned")]
            let mut guard = self.inner.lock().expect("lock poisoned");
            guard.state = RepoState::Closed;
        }
        #[expect(clippy::expect_used, reason = "lock poisoned")]
        let mut handle_guard = self.commit_handle.lock().expect("lock poisoned");
        if let Some(handle) = handle_guard.take() {
            let _ = handle.join();
        }
    }
}

/// Initializes a new repository at `root` on the real filesystem: writes
/// the `CONFIG` record and creates the `data/` directory, then transitions
/// straight to [`RepoState::Active`] (`spec.md` §4.8 "create_repo sets
/// ACTIVE after successful env setup").
///
/// Fails with [`Error::ConfigInvalid`] if `config` doesn't validate, or
/// [`Error::StateViolation`] if `root` already holds a `CONFIG` file.
pub fn create_repo(
    root: &Path,
    config: Config,
    catalog: Arc<dyn TableCatalog>,
) -> Result<Arc<Repository<StdFileSystem>>> {
    create_repo_with_fs::<StdFileSystem>(root, config, catalog)
}

/// Opens an existing repository at `root` on the real filesystem: reads
/// back the `CONFIG` record and rebuilds the file-group array from
/// whatever `f<fid>.{head,data,last}` triples already exist under `data/`
/// (`spec.md` §9, resolving the original `tsdbOpenRepo`'s omission).
pub fn open_repo(root: &Path, catalog: Arc<dyn TableCatalog>) -> Result<Arc<Repository<StdFileSystem>>> {
    open_repo_with_fs::<StdFileSystem>(root, catalog)
}

/// Like [`create_repo`], generic over the [`FileSystem`] implementation —
/// the hook a caller plugs a different storage backend in through.
pub fn create_repo_with_fs<FS: FileSystem + 'static>(
    root: &Path,
    config: Config,
    catalog: Arc<dyn TableCatalog>,
) -> Result<Arc<Repository<FS>>> {
    config.validate()?;

    FS::create_dir_all(root).map_err(|_| Error::PathInaccessible(root.to_path_buf()))?;
    let data_dir = root.join(DATA_DIR_NAME);
    FS::create_dir_all(&data_dir).map_err(|_| Error::PathInaccessible(data_dir.clone()))?;

    let config_path = root.join(CONFIG_FILE_NAME);
    if FS::exists(&config_path)? {
        return Err(Error::StateViolation("repository already initialized at this path"));
    }
    let mut file = FS::create_new(&config_path)?;
    file.write_all(&config.encode_into_vec())?;
    file.sync_all()?;

    let store = Store::empty(data_dir, config.max_tables, config.max_fgroups());
    Ok(Repository::new(root.to_path_buf(), config, catalog, store))
}

/// Like [`open_repo`], generic over the [`FileSystem`] implementation.
pub fn open_repo_with_fs<FS: FileSystem + 'static>(
    root: &Path,
    catalog: Arc<dyn TableCatalog>,
) -> Result<Arc<Repository<FS>>> {
    let config_path = root.join(CONFIG_FILE_NAME);
    let bytes = FS::read(&config_path).map_err(|_| Error::PathInaccessible(root.to_path_buf()))?;
    let config = Config::decode_from(&mut std::io::Cursor::new(bytes))?;
    config.validate()?;

    let data_dir = root.join(DATA_DIR_NAME);
    let store = Store::<FS>::init(data_dir, config.max_tables, config.max_fgroups())?;
    Ok(Repository::new(root.to_path_buf(), config, catalog, store))
}
