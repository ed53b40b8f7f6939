//! The Scheduler-Pressure Generator.
//!
//! One resubmission chain per processing unit. Each link of a chain is a tiny
//! tokio task: spin briefly, yield, then spawn the next link onto the same
//! runtime. The runtime's run queues therefore always hold a burst of short
//! runnable tasks competing with the worker pool.
//!
//! Chains check the shared shutdown flag right before resubmitting and stop
//! there, so the generator retires deterministically instead of relying on
//! process exit. Each live chain holds a clone of an `mpsc` sender; once the
//! last one is dropped [`PressureGenerator::join`] returns.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use super::ExecutionContext;

/// Spin iterations per link before yielding.
const SPIN_ITERATIONS: u32 = 64;

pub struct PressureGenerator {
    executions: Arc<[AtomicU64]>,
    done: mpsc::Receiver<()>,
}

impl PressureGenerator {
    /// Start `units` independent chains.
    pub fn start(units: usize, ctx: ExecutionContext) -> Self {
        tracing::info!("Starting {units} scheduler-pressure chains...");
        let executions: Arc<[AtomicU64]> = (0..units).map(|_| AtomicU64::new(0)).collect();
        let (alive, done) = mpsc::channel(1);
        for chain in 0..units {
            submit(chain, ctx.clone(), executions.clone(), alive.clone());
        }
        Self { executions, done }
    }

    pub fn chains(&self) -> usize {
        self.executions.len()
    }

    /// Links run so far, per chain.
    pub fn executions(&self) -> Vec<u64> {
        self.executions
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    /// Wait until every chain has observed shutdown. Returns the total number
    /// of links executed.
    pub async fn join(mut self) -> u64 {
        while self.done.recv().await.is_some() {}
        let total = self.executions().iter().sum();
        tracing::info!("Scheduler-pressure chains retired after {total} links.");
        total
    }
}

async fn spin_step() {
    for _ in 0..SPIN_ITERATIONS {
        std::hint::spin_loop();
    }
    tokio::task::yield_now().await;
}

fn submit(
    chain: usize,
    ctx: ExecutionContext,
    executions: Arc<[AtomicU64]>,
    alive: mpsc::Sender<()>,
) {
    tokio::spawn(async move {
        spin_step().await;
        executions[chain].fetch_add(1, Ordering::Relaxed);
        if ctx.is_shutdown() {
            tracing::debug!("Pressure chain {chain} stopping.");
            return;
        }
        submit(chain, ctx, executions, alive);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_chain_runs_and_all_retire_on_shutdown() {
        let (ctx, lifecycle) = ExecutionContext::new();
        let generator = PressureGenerator::start(4, ctx);
        assert_eq!(generator.chains(), 4);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while generator.executions().iter().any(|&n| n == 0) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "a chain never ran: {:?}",
                generator.executions()
            );
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        lifecycle.shutdown_handle().cancel();
        let total = tokio::time::timeout(Duration::from_secs(5), generator.join())
            .await
            .expect("chains did not retire");
        assert!(total >= 4);
    }

    #[tokio::test]
    async fn zero_units_joins_immediately() {
        let (ctx, _lifecycle) = ExecutionContext::new();
        let generator = PressureGenerator::start(0, ctx);
        assert_eq!(generator.join().await, 0);
    }
}
