//! The Run Controller.
//!
//! Sequence of a run:
//! 1. open the Connection Handle (or take one already opened),
//! 2. start the scheduler-pressure chains,
//! 3. launch the worker pool and release it,
//! 4. join every worker,
//! 5. retire the pressure chains,
//! 6. check the sentinel key and report,
//! 7. wait for the operator, close the handle,
//! 8. escalate if any worker failed.
//!
//! Steps 6 and later never start before step 4 has finished for every worker.
use std::sync::Arc;

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::Instant,
};

use crate::{
    config::SoakConfig,
    error::HarnessError,
    executor::{
        ExecutionContext, Lifecycle, PressureGenerator, ShutdownHandle, WorkerPlan, WorkerPool,
    },
    report::{Reporter, RunOutcome, SoakReport},
    store::{ConnectOptions, Connection, Database},
};

pub struct Runner {
    config: SoakConfig,
    ctx: ExecutionContext,
    lifecycle: Lifecycle,
}

impl Runner {
    pub fn new(config: SoakConfig) -> Self {
        let (ctx, lifecycle) = ExecutionContext::new();
        Self {
            config,
            ctx,
            lifecycle,
        }
    }

    pub fn config(&self) -> &SoakConfig {
        &self.config
    }

    /// Trigger for stopping the run early (Ctrl-C, external deadline).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.lifecycle.shutdown_handle()
    }

    /// Open a connection of type `C` to `address`, then [`Runner::drive`] it.
    pub async fn run<C, R>(
        self,
        address: &str,
        options: ConnectOptions,
        reporter: &R,
    ) -> Result<SoakReport, HarnessError>
    where
        C: Connection,
        R: Reporter,
    {
        let conn = C::open(address, options).await?;
        self.drive(conn, reporter).await
    }

    /// Run the whole lifecycle against an already opened connection.
    pub async fn drive<C, R>(self, conn: C, reporter: &R) -> Result<SoakReport, HarnessError>
    where
        C: Connection,
        R: Reporter,
    {
        let config = self.config;
        let shutdown = self.lifecycle.shutdown_handle();
        let began = Instant::now();
        let db = Arc::new(conn.database(config.database)?);

        let pressure = PressureGenerator::start(config.pressure_units, self.ctx.clone());

        let deadline = config.deadline.map(|limit| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                tracing::warn!("Run deadline of {limit:?} reached, stopping workers.");
                shutdown.cancel();
            })
        });

        let pool = WorkerPool::builder()
            .workers(config.workers)
            .failure_policy(config.failure_policy)
            .build();
        let handle = pool.launch(
            self.ctx.clone(),
            shutdown.clone(),
            Arc::new(WorkerPlan::from(&config)),
            db.clone(),
        );

        tracing::info!(
            "Running {} workers for {} iterations each",
            config.workers,
            config.max_iterations.saturating_sub(1)
        );
        self.lifecycle.start();
        let workers = handle.join().await;
        if let Some(deadline) = deadline {
            deadline.abort();
        }
        tracing::info!("All workers joined.");

        let pressure_chains = pressure.chains();
        shutdown.cancel();
        let pressure_executions = pressure.join().await;

        let sentinel = db.key_exists(&config.sentinel_key).await;
        match &sentinel {
            Ok(exists) => println!("Sentinel key '{}' exists: {exists}", config.sentinel_key),
            Err(e) => tracing::error!("Sentinel check on '{}' failed: {e}", config.sentinel_key),
        }

        let failures: Vec<_> = workers.iter().filter_map(|w| w.failure.clone()).collect();
        let report = SoakReport::from(RunOutcome {
            workers,
            elapsed: began.elapsed(),
            pressure_chains,
            pressure_executions,
            sentinel_key: config.sentinel_key.clone(),
            sentinel_exists: sentinel.as_ref().ok().copied(),
        });
        reporter.report(&report).await?;

        if config.wait_for_ack && failures.is_empty() {
            acknowledge().await?;
        }

        drop(db);
        conn.close().await?;
        tracing::info!("Connection released.");

        if let Some(first) = failures.first() {
            return Err(HarnessError::WorkersFailed {
                failed: failures.len(),
                first: first.clone(),
            });
        }
        sentinel?;
        Ok(report)
    }
}

/// Block until the operator presses Enter (or stdin closes).
async fn acknowledge() -> std::io::Result<()> {
    println!("Soak run finished. Press Enter to exit...");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(())
}
