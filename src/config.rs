//! Run configuration: defaults, the typed config, and the command line.
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::store::ConnectOptions;

pub const DEFAULT_ADDRESS: &str = "localhost:6379";
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_DATABASE: i64 = 0;
pub const DEFAULT_WORKERS: usize = 1000;
/// Exclusive upper bound of each worker's iteration counter.
pub const DEFAULT_MAX_ITERATIONS: u64 = 5_000_000;
pub const DEFAULT_THROTTLE_INTERVAL: u64 = 10_000;
pub const DEFAULT_THROTTLE_PAUSE: Duration = Duration::from_secs(5);
/// One draw in this many selects the high-priority flag.
pub const DEFAULT_HIGH_PRIORITY_ODDS: u32 = 10;

pub const SHARED_KEY: &str = "kvsoak:shared";
/// Only ever read as a transaction guard; the harness never writes it.
pub const GUARD_KEY: &str = "kvsoak:guard";
pub const SENTINEL_KEY: &str = "kvsoak:sentinel";

pub const PAYLOAD: &str = "The quick brown fox jumps over the lazy dog while the \
multiplexer juggles a thousand callers on a single socket; every reply must find \
its way back to the caller that asked for it, no matter how the scheduler shuffles \
the tasks, how long the server stalls, or how many high-priority commands try to \
cut the line. This value is deliberately long so that every write spends real time \
on the wire and in the client's outbound buffer.";

/// What the pool does once a worker fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
pub enum FailurePolicy {
    /// Cancel every other worker on the first failure.
    #[default]
    Abort,
    /// Let the remaining workers run to their bound.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Backend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Everything a run needs besides the Connection Handle itself.
#[derive(Debug, Clone, TypedBuilder)]
pub struct SoakConfig {
    #[builder(default = DEFAULT_WORKERS)]
    pub workers: usize,
    #[builder(default = DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: u64,
    #[builder(default = DEFAULT_THROTTLE_INTERVAL)]
    pub throttle_interval: u64,
    #[builder(default = DEFAULT_THROTTLE_PAUSE)]
    pub throttle_pause: Duration,
    #[builder(default = DEFAULT_HIGH_PRIORITY_ODDS)]
    pub high_priority_odds: u32,
    #[builder(default = DEFAULT_DATABASE)]
    pub database: i64,
    #[builder(default = SHARED_KEY.to_owned(), setter(into))]
    pub shared_key: String,
    #[builder(default = GUARD_KEY.to_owned(), setter(into))]
    pub guard_key: String,
    #[builder(default = SENTINEL_KEY.to_owned(), setter(into))]
    pub sentinel_key: String,
    #[builder(default = PAYLOAD.to_owned(), setter(into))]
    pub payload: String,
    /// Base seed for reproducible per-worker draws. `None` seeds from entropy.
    #[builder(default, setter(strip_option))]
    pub seed: Option<u64>,
    /// Scheduler-pressure chains; `0` disables the generator.
    #[builder(default = num_cpus::get())]
    pub pressure_units: usize,
    #[builder(default)]
    pub failure_policy: FailurePolicy,
    /// Treat an aborted guarded transaction as a worker failure.
    #[builder(default = false)]
    pub strict_guard: bool,
    /// Stop every worker once this much time has passed.
    #[builder(default, setter(strip_option))]
    pub deadline: Option<Duration>,
    /// Block for an operator keypress before releasing the connection.
    #[builder(default = true)]
    pub wait_for_ack: bool,
}

impl Default for SoakConfig {
    fn default() -> Self {
        SoakConfig::builder().build()
    }
}

/// Soak a single multiplexed key-value connection with concurrent workers.
#[derive(Debug, Clone, Parser)]
#[command(name = "kvsoak", version, about)]
pub struct Args {
    #[arg(long, default_value = DEFAULT_ADDRESS, help = "Store address (host:port or URL)")]
    pub address: String,

    #[arg(long, value_enum, default_value_t = Backend::Redis)]
    pub backend: Backend,

    #[arg(long, default_value_t = DEFAULT_SYNC_TIMEOUT_MS, help = "Per-call timeout in milliseconds")]
    pub sync_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_DATABASE)]
    pub database: i64,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS, help = "Exclusive iteration bound per worker")]
    pub iterations: u64,

    #[arg(long, default_value_t = DEFAULT_THROTTLE_INTERVAL)]
    pub throttle_interval: u64,

    #[arg(long, default_value_t = DEFAULT_THROTTLE_PAUSE.as_millis() as u64)]
    pub throttle_pause_ms: u64,

    #[arg(long, default_value_t = DEFAULT_HIGH_PRIORITY_ODDS, help = "One in N operations is high priority")]
    pub high_priority_odds: u32,

    #[arg(long, help = "Base seed for per-worker random draws")]
    pub seed: Option<u64>,

    #[arg(long, help = "Scheduler-pressure chains (default: available CPUs)")]
    pub pressure_units: Option<usize>,

    #[arg(long, help = "Disable the scheduler-pressure generator")]
    pub no_pressure: bool,

    #[arg(long, value_enum, default_value_t = FailurePolicy::Abort)]
    pub failure_policy: FailurePolicy,

    #[arg(long, help = "Fail a worker when its guarded transaction aborts")]
    pub strict_guard: bool,

    #[arg(long, help = "Stop all workers after this many seconds")]
    pub duration: Option<u64>,

    #[arg(long, help = "Exit without waiting for the operator")]
    pub no_wait: bool,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub report: ReportFormat,

    #[arg(long, help = "Runtime worker threads (default: tokio's choice)")]
    pub worker_threads: Option<usize>,
}

impl Args {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            sync_timeout: Duration::from_millis(self.sync_timeout_ms),
            database: self.database,
        }
    }

    pub fn soak_config(&self) -> SoakConfig {
        let pressure_units = if self.no_pressure {
            0
        } else {
            self.pressure_units.unwrap_or_else(num_cpus::get)
        };
        SoakConfig {
            workers: self.workers,
            max_iterations: self.iterations,
            throttle_interval: self.throttle_interval,
            throttle_pause: Duration::from_millis(self.throttle_pause_ms),
            high_priority_odds: self.high_priority_odds,
            database: self.database,
            seed: self.seed,
            pressure_units,
            failure_policy: self.failure_policy,
            strict_guard: self.strict_guard,
            deadline: self.duration.map(Duration::from_secs),
            wait_for_ack: !self.no_wait,
            ..SoakConfig::default()
        }
    }
}
