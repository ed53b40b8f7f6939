//! Connection Handle backed by one redis multiplexed connection.
//!
//! Every worker shares the same multiplexed pipe; clones of
//! [`MultiplexedConnection`] are cheap handles onto it, not new sockets.
//!
//! Transactions run as a single server-side script: the script evaluates every
//! condition and applies the staged sets only when all of them hold. `WATCH`
//! cannot be used here because watch state belongs to the physical connection,
//! which all workers share.
//!
//! The redis protocol has no notion of client-side priority, so
//! [`CommandFlags::HIGH_PRIORITY`] is accepted and traced but does not change
//! dispatch order.
use std::{future::Future, sync::Arc, time::Duration};

use ::redis::{aio::MultiplexedConnection, Client, Script, Value};

use super::{CommandFlags, Condition, ConnectOptions, Connection, Database, Transaction};
use crate::error::StoreError;

pub struct RedisConnection {
    // keeps the client alive for the lifetime of the multiplexed pipe
    _client: Client,
    conn: MultiplexedConnection,
    options: ConnectOptions,
}

/// `host:port` becomes `redis://host:port/<db>`; full URLs pass through.
pub fn connection_url(address: &str, database: i64) -> String {
    if address.contains("://") {
        address.to_owned()
    } else {
        format!("redis://{address}/{database}")
    }
}

impl Connection for RedisConnection {
    type Database = RedisDatabase;

    async fn open(address: &str, options: ConnectOptions) -> Result<Self, StoreError> {
        let url = connection_url(address, options.database);
        tracing::info!("Connecting to {url} (sync timeout {:?})", options.sync_timeout);
        let client = Client::open(url.as_str())
            .map_err(|e| StoreError::Connection(format!("invalid address {url}: {e}")))?;
        let conn = bounded(
            options.sync_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|e| match e {
            StoreError::Operation(msg) => StoreError::Connection(msg),
            other => other,
        })?;
        Ok(Self {
            _client: client,
            conn,
            options,
        })
    }

    fn database(&self, index: i64) -> Result<RedisDatabase, StoreError> {
        // the database is selected once at connect; a multiplexed pipe cannot
        // switch namespaces under other callers
        if index != self.options.database {
            return Err(StoreError::Connection(format!(
                "database {index} requested but connection selected database {}",
                self.options.database
            )));
        }
        Ok(RedisDatabase {
            conn: self.conn.clone(),
            sync_timeout: self.options.sync_timeout,
            script: Arc::new(Script::new(TRANSACTION_SCRIPT)),
        })
    }

    async fn close(self) -> Result<(), StoreError> {
        tracing::info!("Closing redis connection");
        drop(self.conn);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisDatabase {
    conn: MultiplexedConnection,
    sync_timeout: Duration,
    script: Arc<Script>,
}

/// Bound a client call by the sync timeout.
async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = ::redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Lua body for a guarded transaction.
///
/// KEYS holds the condition keys followed by the write keys. ARGV[1] is the
/// number of conditions, followed by one mode per condition (`1` = must exist,
/// `0` = must not exist), followed by the write values.
const TRANSACTION_SCRIPT: &str = r#"
local n = tonumber(ARGV[1])
for i = 1, n do
    local exists = redis.call('EXISTS', KEYS[i]) == 1
    if (ARGV[i + 1] == '1') ~= exists then
        return 0
    end
end
for i = n + 1, #KEYS do
    redis.call('SET', KEYS[i], ARGV[i + 1])
end
return 1
"#;

fn transaction_invocation(tx: &Transaction) -> (Vec<String>, Vec<String>) {
    let mut keys = Vec::with_capacity(tx.conditions().len() + tx.writes().len());
    let mut args = Vec::with_capacity(keys.capacity() + 1);
    args.push(tx.conditions().len().to_string());
    for c in tx.conditions() {
        keys.push(c.key().to_owned());
        args.push(match c {
            Condition::KeyExists(_) => "1".to_owned(),
            Condition::KeyNotExists(_) => "0".to_owned(),
        });
    }
    for w in tx.writes() {
        keys.push(w.key.clone());
        args.push(w.value.clone());
    }
    (keys, args)
}

impl Database for RedisDatabase {
    async fn set(
        &self,
        key: &str,
        value: &str,
        flags: CommandFlags,
    ) -> Result<Option<String>, StoreError> {
        if flags.contains(CommandFlags::HIGH_PRIORITY) {
            tracing::trace!("high-priority SET {key}");
        }
        let mut conn = self.conn.clone();
        if flags.contains(CommandFlags::FIRE_AND_FORGET) {
            let mut pipe = ::redis::pipe();
            pipe.cmd("SET").arg(key).arg(value).ignore();
            let _: () = bounded(self.sync_timeout, pipe.query_async(&mut conn)).await?;
            return Ok(None);
        }
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value).arg("GET");
        let previous: Option<String> =
            bounded(self.sync_timeout, cmd.query_async(&mut conn)).await?;
        Ok(previous)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = ::redis::cmd("GET");
        cmd.arg(key);
        let value: Option<String> =
            bounded(self.sync_timeout, cmd.query_async(&mut conn)).await?;
        Ok(value)
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = ::redis::cmd("EXISTS");
        cmd.arg(key);
        let exists: bool = bounded(self.sync_timeout, cmd.query_async(&mut conn)).await?;
        Ok(exists)
    }

    async fn execute(&self, tx: Transaction) -> Result<bool, StoreError> {
        if tx
            .writes()
            .iter()
            .any(|w| w.flags.contains(CommandFlags::HIGH_PRIORITY))
        {
            tracing::trace!("high-priority transaction");
        }
        let (keys, args) = transaction_invocation(&tx);
        let mut invocation = self.script.prepare_invoke();
        for k in &keys {
            invocation.key(k);
        }
        for a in &args {
            invocation.arg(a);
        }
        let mut conn = self.conn.clone();
        let reply: Value =
            bounded(self.sync_timeout, invocation.invoke_async(&mut conn)).await?;
        match reply {
            Value::Int(1) => Ok(true),
            Value::Int(0) => Ok(false),
            other => Err(StoreError::Operation(format!(
                "unexpected transaction reply: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_address_gets_scheme_and_database() {
        assert_eq!(connection_url("localhost:6379", 0), "redis://localhost:6379/0");
        assert_eq!(connection_url("10.0.0.5:7000", 3), "redis://10.0.0.5:7000/3");
    }

    #[test]
    fn full_url_is_untouched() {
        assert_eq!(
            connection_url("rediss://user:pw@cache:6380/2", 0),
            "rediss://user:pw@cache:6380/2"
        );
    }

    #[test]
    fn script_arguments_line_up_with_keys() {
        let mut tx = Transaction::new();
        tx.add_condition(Condition::key_not_exists("guard"))
            .add_condition(Condition::KeyExists("other".into()))
            .set("shared", "payload", CommandFlags::FIRE_AND_FORGET);
        let (keys, args) = transaction_invocation(&tx);

        assert_eq!(keys, ["guard", "other", "shared"]);
        assert_eq!(args, ["2", "0", "1", "payload"]);
    }

    #[tokio::test]
    async fn timeout_is_reported_with_its_limit() {
        let limit = Duration::from_millis(10);
        let never = std::future::pending::<::redis::RedisResult<()>>();
        let err = bounded(limit, never).await.unwrap_err();
        assert_eq!(err, StoreError::Timeout(limit));
    }
}
