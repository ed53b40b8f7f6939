//! In-process Connection Handle.
//!
//! Backs `--backend memory` dry runs and the test suite. Every accessor
//! shares one map; a closed handle fails every later call with
//! [`StoreError::Connection`].
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use super::{CommandFlags, ConnectOptions, Connection, Database, Transaction};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Shared {
    // one map per logical database
    data: Mutex<HashMap<i64, HashMap<String, String>>>,
    closed: AtomicBool,
}

impl Shared {
    /// Every call yields once, like a network round-trip would, so a pool of
    /// workers on this backend still interleaves.
    async fn enter(&self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.ensure_open()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Connection("connection is closed".into()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    options: ConnectOptions,
}

impl MemoryConnection {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            options,
        }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }
}

impl Connection for MemoryConnection {
    type Database = MemoryDatabase;

    async fn open(address: &str, options: ConnectOptions) -> Result<Self, StoreError> {
        tracing::debug!("Opening in-memory store (address {address} ignored)");
        Ok(Self::new(options))
    }

    fn database(&self, index: i64) -> Result<MemoryDatabase, StoreError> {
        self.shared.ensure_open()?;
        Ok(MemoryDatabase {
            shared: self.shared.clone(),
            index,
        })
    }

    async fn close(self) -> Result<(), StoreError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Connection("connection already closed".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
    index: i64,
}

impl MemoryDatabase {
    pub fn index(&self) -> i64 {
        self.index
    }
}

impl Database for MemoryDatabase {
    async fn set(
        &self,
        key: &str,
        value: &str,
        _flags: CommandFlags,
    ) -> Result<Option<String>, StoreError> {
        self.shared.enter().await?;
        let mut data = self.shared.data.lock();
        let db = data.entry(self.index).or_default();
        Ok(db.insert(key.to_owned(), value.to_owned()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.shared.enter().await?;
        let data = self.shared.data.lock();
        Ok(data.get(&self.index).and_then(|db| db.get(key).cloned()))
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StoreError> {
        self.shared.enter().await?;
        let data = self.shared.data.lock();
        Ok(data
            .get(&self.index)
            .is_some_and(|db| db.contains_key(key)))
    }

    async fn execute(&self, tx: Transaction) -> Result<bool, StoreError> {
        self.shared.enter().await?;
        // conditions and writes under one lock so the commit is atomic
        let mut data = self.shared.data.lock();
        let db = data.entry(self.index).or_default();
        let holds = tx
            .conditions()
            .iter()
            .all(|c| c.holds(db.contains_key(c.key())));
        if !holds {
            return Ok(false);
        }
        for w in tx.writes() {
            db.insert(w.key.clone(), w.value.clone());
        }
        Ok(true)
    }
}
