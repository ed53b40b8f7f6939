//! The concurrent half of a soak run.
//!
//! Two kinds of tasks share the runtime during a run:
//!
//! - the [`pool::WorkerPool`]: a fixed population of long-running workers,
//!   each alternating guarded transactions and direct sets against one shared
//!   key through the shared Connection Handle;
//! - the [`pressure::PressureGenerator`]: one self-resubmitting chain of tiny
//!   tasks per processing unit, keeping the scheduler saturated so that every
//!   worker call sees realistic queuing delay.
//!
//! # Start & shutdown coordination
//! Both sides hold a clone of an [`ExecutionContext`]. Workers park until the
//! start signal fires so the whole pool hits the connection at once. Shutdown
//! is a single `watch` flag: workers check it at the top of every iteration and
//! while throttled, pressure chains check it before every resubmission. Once
//! set it is never cleared.
//!
//! # Notes about correctness
//! - Workers share nothing but the database accessor and the key names. Each
//!   worker owns its RNG, counter and tally.
//! - A worker never cancels another directly. With
//!   [`crate::config::FailurePolicy::Abort`] the pool raises the shared
//!   shutdown flag after the first failure and every other worker stops at its
//!   next iteration.
pub mod pool;
pub mod pressure;
pub mod worker;

pub use pool::WorkerPool;
pub use pressure::PressureGenerator;
pub use worker::{Worker, WorkerPlan, WorkerReport};

use std::sync::Arc;

use tokio::sync::watch::{channel, Receiver, Sender};

/// Shared execution state for the pool and the pressure generator.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    /// Flips to `true` once, releasing every parked worker.
    start: Receiver<bool>,
    /// Flips to `true` once, asking every task to stop.
    shutdown: Receiver<bool>,
}

/// The sending half of an [`ExecutionContext`], kept by the Run Controller.
#[derive(Debug)]
pub struct Lifecycle {
    start: Sender<bool>,
    shutdown: ShutdownHandle,
}

/// Cloneable trigger for cooperative shutdown.
#[derive(Clone, Debug)]
pub struct ShutdownHandle(Arc<Sender<bool>>);

impl ExecutionContext {
    pub fn new() -> (Self, Lifecycle) {
        let (start_tx, start_rx) = channel(false);
        let (shutdown_tx, shutdown_rx) = channel(false);
        (
            Self {
                start: start_rx,
                shutdown: shutdown_rx,
            },
            Lifecycle {
                start: start_tx,
                shutdown: ShutdownHandle(Arc::new(shutdown_tx)),
            },
        )
    }

    /// Wait for the start signal. Returns `false` if shutdown came first.
    pub async fn started(&mut self) -> bool {
        if self.is_shutdown() {
            return false;
        }
        let mut shutdown = self.shutdown.clone();
        let start = &mut self.start;
        let released = tokio::select! {
            res = start.wait_for(|s| *s) => res.is_ok(),
            _ = shutdown.wait_for(|s| *s) => false,
        };
        released && !self.is_shutdown()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once shutdown is requested. Never resolves if the handle is gone.
    pub async fn cancelled(&mut self) {
        if self.shutdown.wait_for(|s| *s).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Lifecycle {
    /// Release every worker waiting on [`ExecutionContext::started`].
    pub fn start(&self) {
        self.start.send_replace(true);
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}

impl ShutdownHandle {
    pub fn cancel(&self) {
        if !self.0.send_replace(true) {
            tracing::debug!("Shutdown requested.");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}
