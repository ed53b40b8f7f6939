//! The Connection Handle the harness drives.
//!
//! The harness never implements a store or a wire protocol. It talks to one
//! long-lived [`Connection`], asks it for a [`Database`] accessor, and shares
//! that accessor by reference with every worker.
//!
//! # Thread-safety contract
//! A [`Database`] must tolerate unsynchronized concurrent calls from every
//! worker at once. The harness adds no lock, queue or semaphore of its own in
//! front of it; that internal concurrency is exactly what a soak run exercises.
//!
//! # Lifecycle
//! 1. [`Connection::open`] once per run.
//! 2. [`Connection::database`] to get the accessor the workers share.
//! 3. Drop every accessor clone, then [`Connection::close`] exactly once.
pub mod memory;
pub mod redis;

use std::{future::Future, time::Duration};

use bitflags::bitflags;

use crate::error::StoreError;

bitflags! {
    /// Per-command dispatch flags.
    ///
    /// The empty set is the default flag. `HIGH_PRIORITY` and
    /// `FIRE_AND_FORGET` compose independently.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandFlags: u8 {
        /// Ask the client to dispatch this command ahead of queued work.
        const HIGH_PRIORITY = 0x01;
        /// Do not wait for this command's individual reply.
        const FIRE_AND_FORGET = 0x02;
    }
}

impl CommandFlags {
    pub const DEFAULT: CommandFlags = CommandFlags::empty();
}

/// Settings fixed for the lifetime of a Connection Handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Upper bound on every blocking call.
    pub sync_timeout: Duration,
    /// Logical namespace the handle selects on connect.
    pub database: i64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_millis(crate::config::DEFAULT_SYNC_TIMEOUT_MS),
            database: 0,
        }
    }
}

/// A transaction precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    KeyExists(String),
    KeyNotExists(String),
}

impl Condition {
    pub fn key_not_exists(key: impl Into<String>) -> Self {
        Condition::KeyNotExists(key.into())
    }

    pub fn key(&self) -> &str {
        match self {
            Condition::KeyExists(k) | Condition::KeyNotExists(k) => k,
        }
    }

    /// Whether the condition holds given the key's existence state.
    pub fn holds(&self, exists: bool) -> bool {
        match self {
            Condition::KeyExists(_) => exists,
            Condition::KeyNotExists(_) => !exists,
        }
    }
}

/// A set staged inside a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSet {
    pub key: String,
    pub value: String,
    pub flags: CommandFlags,
}

/// Transaction builder: conditions first, then staged sets, then [`Transaction::execute`].
///
/// ```rust
/// use kvsoak::store::{CommandFlags, Condition, Transaction};
///
/// let mut tx = Transaction::new();
/// tx.add_condition(Condition::key_not_exists("guard"))
///     .set("shared", "payload", CommandFlags::FIRE_AND_FORGET);
/// assert_eq!(tx.conditions().len(), 1);
/// assert_eq!(tx.writes().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    conditions: Vec<Condition>,
    writes: Vec<StagedSet>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_condition(&mut self, condition: Condition) -> &mut Self {
        self.conditions.push(condition);
        self
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        flags: CommandFlags,
    ) -> &mut Self {
        self.writes.push(StagedSet {
            key: key.into(),
            value: value.into(),
            flags,
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn writes(&self) -> &[StagedSet] {
        &self.writes
    }

    /// Commit against `db`. `Ok(false)` means a condition did not hold and
    /// nothing was written.
    pub async fn execute<D: Database>(self, db: &D) -> Result<bool, StoreError> {
        db.execute(self).await
    }
}

/// Database-scoped accessor. Shared by every worker, see the module docs.
pub trait Database: Send + Sync + 'static {
    /// Blocking set-and-return-previous-value.
    fn set(
        &self,
        key: &str,
        value: &str,
        flags: CommandFlags,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn key_exists(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Commit a transaction atomically. Returns whether it committed.
    fn execute(&self, tx: Transaction) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// A long-lived handle to the remote store.
pub trait Connection: Send + Sync + Sized + 'static {
    type Database: Database;

    fn open(
        address: &str,
        options: ConnectOptions,
    ) -> impl Future<Output = Result<Self, StoreError>> + Send;

    /// Accessor for logical database `index`.
    fn database(&self, index: i64) -> Result<Self::Database, StoreError>;

    /// Release every resource held by the handle.
    fn close(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flag_is_empty() {
        assert!(CommandFlags::DEFAULT.is_empty());
        let f = CommandFlags::HIGH_PRIORITY | CommandFlags::FIRE_AND_FORGET;
        assert!(f.contains(CommandFlags::HIGH_PRIORITY));
        assert!(f.contains(CommandFlags::FIRE_AND_FORGET));
        assert!(!CommandFlags::DEFAULT.contains(CommandFlags::FIRE_AND_FORGET));
    }

    #[test]
    fn conditions_evaluate_against_existence() {
        let c = Condition::key_not_exists("guard");
        assert_eq!(c.key(), "guard");
        assert!(c.holds(false));
        assert!(!c.holds(true));
        assert!(Condition::KeyExists("k".into()).holds(true));
    }

    #[test]
    fn builder_keeps_staging_order() {
        let mut tx = Transaction::new();
        tx.set("a", "1", CommandFlags::DEFAULT)
            .set("b", "2", CommandFlags::HIGH_PRIORITY);
        let keys: Vec<_> = tx.writes().iter().map(|w| w.key.as_str()).collect();
        assert_eq!(keys, ["a", "b"]);
    }
}
