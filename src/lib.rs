//! kvsoak: a soak harness for multiplexed key-value clients.
//!
//! kvsoak drives one shared client connection with a large pool of concurrent
//! workers while a second set of tasks keeps the runtime's scheduler saturated.
//! The goal is to surface race conditions, timeout handling bugs and scheduler
//! contention inside the client's connection-multiplexing layer. It is a load
//! generator, not a correctness suite: it does not check values, it only cares
//! that every call completes or fails loudly.
//!
//! # Architecture
//!
//! - [`store`]: the Connection Handle contract ([`Connection`], [`Database`],
//!   [`store::Transaction`]) plus a redis-backed and an in-memory implementation.
//! - [`executor`]: the concurrent core. [`executor::WorkerPool`] runs the
//!   workers, [`executor::PressureGenerator`] runs the scheduler-pressure chains,
//!   and [`executor::ExecutionContext`] coordinates start and shutdown.
//! - [`Metric`] / [`Aggregate`]: each iteration produces an
//!   [`metric::OpSample`], folded into a worker-local [`aggregate::WorkerTally`].
//!   Tallies are merged once every worker has joined.
//! - [`Reporter`]: turns the merged [`SoakReport`] into output.
//! - [`Runner`]: the Run Controller that sequences the whole lifecycle.
//!
//! # Worker behavior
//!
//! Every worker runs iterations `1..max_iterations`. Even iterations execute a
//! transaction guarded by "guard key does not exist" that stages a
//! fire-and-forget set of the shared key; odd iterations execute a blocking
//! set of the same key. One draw in ten selects the high-priority flag. Every
//! `throttle_interval` iterations the worker, and only that worker, sleeps for
//! `throttle_pause`.
//!
//! # Example
//!
//! A short dry run against the in-memory backend:
//!
//! ```rust
//! use kvsoak::{
//!     config::SoakConfig,
//!     report::StdoutReporter,
//!     store::{memory::MemoryConnection, ConnectOptions},
//!     Runner,
//! };
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() {
//! let config = SoakConfig::builder()
//!     .workers(8)
//!     .max_iterations(100)
//!     .pressure_units(2)
//!     .wait_for_ack(false)
//!     .build();
//!
//! let report = Runner::new(config)
//!     .run::<MemoryConnection, _>("memory", ConnectOptions::default(), &StdoutReporter)
//!     .await
//!     .unwrap();
//! assert_eq!(report.iterations, 8 * 99);
//! # }
//! ```

/// Per-worker counters and the `Aggregate` trait
pub mod aggregate;
/// Defaults, typed run configuration and command-line arguments
pub mod config;
/// Store, worker and harness errors
pub mod error;
/// Worker pool, scheduler pressure and their coordination
pub mod executor;
/// Single observations
pub mod metric;
/// Reports and Reporters
pub mod report;
/// The Run Controller
pub mod runner;
/// The Connection Handle contract and its backends
pub mod store;

pub use aggregate::Aggregate;
pub use error::{HarnessError, StoreError, WorkerError};
pub use metric::Metric;
pub use report::{Reporter, SoakReport};
pub use runner::Runner;
pub use store::{Connection, Database};
