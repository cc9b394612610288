use bytes::Bytes;
use heed::types::{Bytes as RawBytes, DecodeIgnore};
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error as ThisError;
use tracing::{debug, info};

use crate::config::StoreConfig;

mod pattern;
mod scan;
mod transaction;

pub use pattern::Pattern;
pub use scan::{ScanCursor, ScanPage};
pub use transaction::{Operation, TransactionState};

use scan::CursorRegistry;

const DATA_FILE: &str = "data.mdb";
const LOCK_FILE: &str = "lock.mdb";

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("ERR storage error: {0}")]
    Engine(#[from] heed::Error),
    #[error("ERR storage error: {0}")]
    Io(#[from] io::Error),
    #[error("ERR storage engine is closed")]
    Closed,
    #[error("ERR a transaction is already open for client {0}")]
    TransactionExists(u64),
    #[error("ERR no transaction is open for client {0}")]
    NoTransaction(u64),
}

/// The Store persists key-value pairs in an LMDB environment and keeps a write-through cache of
/// the values it has seen. It also owns the state that must outlive a single command: open
/// transactions (keyed by client id) and suspended SCAN cursors.
///
/// All of it sits behind one mutex, and every operation runs to completion while holding it, so
/// the cache and the engine never disagree and LMDB never sees two concurrent write
/// transactions. The store is cloned cheaply through reference counting.
#[derive(Clone)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn open(config: &StoreConfig) -> Result<Store, StoreError> {
        let engine = Engine::open(config)?;
        info!(
            path = %config.path.display(),
            map_size = config.map_size,
            "Opened storage engine"
        );

        let state = State {
            engine: Some(engine),
            cache: HashMap::new(),
            transactions: HashMap::new(),
            cursors: CursorRegistry::default(),
            #[cfg(test)]
            fail_sync: false,
        };

        let inner = Arc::new(InnerStore {
            state: Mutex::new(state),
            config: config.clone(),
        });

        Ok(Self { inner })
    }
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub struct InnerStore {
    state: Mutex<State>,
    config: StoreConfig,
}

impl InnerStore {
    pub fn lock(&self) -> InnerStoreLocked<'_> {
        self.lock_as(None)
    }

    /// Locks the store on behalf of a client. Writes go to the client's open transaction, when it
    /// has one, and reads observe those pending writes.
    pub fn lock_for(&self, client: u64) -> InnerStoreLocked<'_> {
        self.lock_as(Some(client))
    }

    fn lock_as(&self, client: Option<u64>) -> InnerStoreLocked<'_> {
        // A panic while holding the lock can't leave the engine half written, LMDB aborts the
        // write transaction when it is dropped.
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        InnerStoreLocked {
            state,
            config: &self.config,
            client,
        }
    }

    /// Wipes every key, transaction and cursor, leaving an empty database behind.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.lock().reset()
    }

    pub fn close(&self) {
        self.lock().close()
    }
}

pub struct InnerStoreLocked<'a> {
    state: MutexGuard<'a, State>,
    config: &'a StoreConfig,
    client: Option<u64>,
}

impl<'a> InnerStoreLocked<'a> {
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>, StoreError> {
        let key = key.as_ref();
        if let Some(pending) = self.pending(key) {
            return Ok(pending);
        }

        if let Some(value) = self.state.cache.get(key) {
            return Ok(Some(value.clone()));
        }

        let value = {
            let engine = self.engine()?;
            let rtxn = engine.env.read_txn()?;
            let value = engine.db.get(&rtxn, key)?.map(Bytes::copy_from_slice);
            value
        };

        if let Some(value) = &value {
            self.state
                .cache
                .insert(Bytes::copy_from_slice(key), value.clone());
        }

        Ok(value)
    }

    pub fn set(&mut self, key: impl Into<Bytes>, value: Bytes) -> Result<(), StoreError> {
        let key = key.into();
        if let Some(transaction) = self.transaction_mut() {
            transaction.operations.push(Operation::Put { key, value });
            return Ok(());
        }

        self.write(|engine, wtxn| engine.db.put(wtxn, &key, &value))?;
        self.state.cache.insert(key, value);

        self.sync()
    }

    /// Removes `key`, returning whether it existed.
    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> Result<bool, StoreError> {
        let key = key.as_ref();
        if self.transaction_mut().is_some() {
            let existed = self.get(key)?.is_some();
            if let Some(transaction) = self.transaction_mut() {
                transaction.operations.push(Operation::Remove {
                    key: Bytes::copy_from_slice(key),
                });
            }
            return Ok(existed);
        }

        let removed = self.write(|engine, wtxn| engine.db.delete(wtxn, key))?;
        self.state.cache.remove(key);
        self.sync()?;

        Ok(removed)
    }

    pub fn exists(&mut self, key: impl AsRef<[u8]>) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Returns every key matching `pattern`. This walks the whole keyspace.
    pub fn keys(&self, pattern: &Pattern) -> Result<Vec<Bytes>, StoreError> {
        let keys = self
            .snapshot()?
            .into_iter()
            .filter(|key| pattern.matches(key))
            .collect();

        Ok(keys)
    }

    pub fn size(&self) -> Result<u64, StoreError> {
        let engine = self.engine()?;
        let rtxn = engine.env.read_txn()?;
        Ok(engine.db.len(&rtxn)?)
    }

    pub fn reset(&mut self) -> Result<(), StoreError> {
        if let Some(engine) = self.state.engine.take() {
            engine.close();
        }

        self.state.cache.clear();
        self.state.transactions.clear();
        self.state.cursors.clear();

        for file in [DATA_FILE, LOCK_FILE] {
            match fs::remove_file(self.config.path.join(file)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        self.state.engine = Some(Engine::open(self.config)?);
        info!(path = %self.config.path.display(), "Storage reset");

        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(engine) = self.state.engine.take() {
            engine.close();
            info!(path = %self.config.path.display(), "Closed storage engine");
        }
    }

    /// All keys currently persisted, in the engine's (lexicographic) order.
    fn snapshot(&self) -> Result<Vec<Bytes>, StoreError> {
        let engine = self.engine()?;
        let rtxn = engine.env.read_txn()?;

        let mut keys = Vec::new();
        for entry in engine.db.remap_data_type::<DecodeIgnore>().iter(&rtxn)? {
            let (key, ()) = entry?;
            keys.push(Bytes::copy_from_slice(key));
        }

        Ok(keys)
    }

    /// Runs `f` inside one LMDB write transaction and commits it. When `f` fails the
    /// transaction is dropped, which aborts it.
    ///
    /// Once this returns Ok the write is visible to readers, so callers bring the cache up to
    /// date before calling [`Self::sync`].
    fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Engine, &mut RwTxn) -> heed::Result<T>,
    {
        let engine = self.engine()?;
        let mut wtxn = engine.env.write_txn()?;
        let out = f(engine, &mut wtxn)?;
        wtxn.commit()?;
        Ok(out)
    }

    /// Flushes committed writes to disk.
    fn sync(&self) -> Result<(), StoreError> {
        #[cfg(test)]
        if self.state.fail_sync {
            return Err(io::Error::other("sync failed").into());
        }

        self.engine()?.env.force_sync()?;
        Ok(())
    }

    fn engine(&self) -> Result<&Engine, StoreError> {
        self.state.engine.as_ref().ok_or(StoreError::Closed)
    }
}

struct State {
    engine: Option<Engine>,
    cache: HashMap<Bytes, Bytes>,
    transactions: HashMap<u64, TransactionState>,
    cursors: CursorRegistry,
    #[cfg(test)]
    fail_sync: bool,
}

struct Engine {
    env: Env,
    db: Database<RawBytes, RawBytes>,
}

impl Engine {
    fn open(config: &StoreConfig) -> Result<Engine, StoreError> {
        fs::create_dir_all(&config.path)?;

        // SAFETY: an environment is opened at most once per directory by this process, and it is
        // closed before its files are removed on reset.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size)
                .open(&config.path)?
        };

        let mut wtxn = env.write_txn()?;
        let db = env.create_database(&mut wtxn, None)?;
        wtxn.commit()?;

        debug!(path = %config.path.display(), "Opened LMDB environment");
        Ok(Engine { env, db })
    }

    /// Blocks until LMDB has released the memory map.
    fn close(self) {
        let Engine { env, .. } = self;
        env.prepare_for_closing().wait();
    }
}
