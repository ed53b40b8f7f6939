#![allow(dead_code)]

use std::sync::Arc;

use kvsoak::{
    config::SoakConfig,
    store::{
        memory::{MemoryConnection, MemoryDatabase},
        CommandFlags, ConnectOptions, Connection, Database, StagedSet, Transaction,
    },
    Reporter, SoakReport, StoreError,
};
use parking_lot::Mutex;

/// One call that reached the store, in global order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Set { key: String, flags: CommandFlags },
    Get { key: String },
    KeyExists { key: String },
    Execute { writes: Vec<StagedSet>, guards: usize },
    Close,
}

/// Log of every call plus an optional injected fault.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    // (1-based call number, error to return instead of running it)
    fault: Mutex<Option<(usize, StoreError)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the `nth` data call (1-based) with `err`.
    pub fn fail_call(&self, nth: usize, err: StoreError) {
        *self.fault.lock() = Some((nth, err));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn record(&self, call: Call) -> Result<(), StoreError> {
        let mut calls = self.calls.lock();
        calls.push(call);
        let n = calls.len();
        match &*self.fault.lock() {
            Some((nth, err)) if *nth == n => Err(err.clone()),
            _ => Ok(()),
        }
    }
}

pub struct RecordingConnection {
    inner: MemoryConnection,
    recorder: Arc<Recorder>,
}

impl RecordingConnection {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            inner: MemoryConnection::new(ConnectOptions::default()),
            recorder,
        }
    }
}

impl Connection for RecordingConnection {
    type Database = RecordingDatabase;

    async fn open(_address: &str, _options: ConnectOptions) -> Result<Self, StoreError> {
        Ok(Self::new(Recorder::new()))
    }

    fn database(&self, index: i64) -> Result<RecordingDatabase, StoreError> {
        Ok(RecordingDatabase {
            inner: self.inner.database(index)?,
            recorder: self.recorder.clone(),
        })
    }

    async fn close(self) -> Result<(), StoreError> {
        self.recorder.calls.lock().push(Call::Close);
        self.inner.close().await
    }
}

pub struct RecordingDatabase {
    pub inner: MemoryDatabase,
    recorder: Arc<Recorder>,
}

impl Database for RecordingDatabase {
    async fn set(
        &self,
        key: &str,
        value: &str,
        flags: CommandFlags,
    ) -> Result<Option<String>, StoreError> {
        self.recorder.record(Call::Set {
            key: key.to_owned(),
            flags,
        })?;
        self.inner.set(key, value, flags).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.recorder.record(Call::Get {
            key: key.to_owned(),
        })?;
        self.inner.get(key).await
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StoreError> {
        self.recorder.record(Call::KeyExists {
            key: key.to_owned(),
        })?;
        self.inner.key_exists(key).await
    }

    async fn execute(&self, tx: Transaction) -> Result<bool, StoreError> {
        self.recorder.record(Call::Execute {
            writes: tx.writes().to_vec(),
            guards: tx.conditions().len(),
        })?;
        self.inner.execute(tx).await
    }
}

/// Keeps every report it is handed.
#[derive(Default)]
pub struct CapturingReporter {
    reports: Mutex<Vec<SoakReport>>,
}

impl CapturingReporter {
    pub fn last(&self) -> Option<SoakReport> {
        self.reports.lock().last().cloned()
    }
}

impl Reporter for CapturingReporter {
    async fn report(&self, report: &SoakReport) -> std::io::Result<()> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

/// A quiet config: no operator wait, no scheduler pressure, fixed seed.
pub fn quiet_config(workers: usize, max_iterations: u64) -> SoakConfig {
    SoakConfig::builder()
        .workers(workers)
        .max_iterations(max_iterations)
        .pressure_units(0)
        .wait_for_ack(false)
        .seed(7)
        .build()
}
