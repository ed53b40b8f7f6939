//! The Worker Pool: bulk launch, bulk join, per-worker outcome capture.
//!
//! # High-level flow
//! 1. [`WorkerPool::launch`] spawns `workers` tokio tasks. Each builds its own
//!    [`Worker`] (private RNG and counter) around the shared plan and accessor,
//!    then parks on the start signal.
//! 2. The Run Controller fires the start signal; every worker starts hammering
//!    the shared key at once.
//! 3. Each task returns a [`WorkerReport`]. A panic inside a worker is caught
//!    in the task and turned into [`WorkerError::Panicked`], so a single bad
//!    worker never takes the process down on its own.
//! 4. [`PoolHandle::join`] waits for every task and hands back all reports in
//!    worker order. Whether a failure is fatal is the Run Controller's call.
//!
//! # Failure policy
//! With [`FailurePolicy::Abort`] the task that observes a failure raises the
//! shared shutdown flag before returning, so the rest of the pool stops at its
//! next iteration. With [`FailurePolicy::Continue`] other workers are not
//! affected and run to their bound.
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures::{future::join_all, FutureExt};
use tokio::task::JoinHandle;
use typed_builder::TypedBuilder;

use super::{ExecutionContext, ShutdownHandle, Worker, WorkerPlan, WorkerReport};
use crate::{
    aggregate::{Aggregate, WorkerTally},
    config::{FailurePolicy, DEFAULT_WORKERS},
    error::WorkerError,
    store::Database,
};

#[derive(Debug, Clone, TypedBuilder)]
pub struct WorkerPool {
    /// Number of concurrent worker tasks.
    #[builder(default = DEFAULT_WORKERS)]
    pub workers: usize,
    #[builder(default)]
    pub failure_policy: FailurePolicy,
}

/// Join side of a launched pool.
pub struct PoolHandle {
    handles: Vec<JoinHandle<WorkerReport>>,
}

impl WorkerPool {
    /// Spawn every worker. Workers do nothing until the start signal fires.
    pub fn launch<D: Database>(
        &self,
        ctx: ExecutionContext,
        shutdown: ShutdownHandle,
        plan: Arc<WorkerPlan>,
        db: Arc<D>,
    ) -> PoolHandle {
        tracing::info!("Spawning {} workers...", self.workers);
        let handles = spawn_workers(
            ctx,
            shutdown,
            self.workers,
            self.failure_policy,
            plan,
            db,
        );
        PoolHandle { handles }
    }
}

impl PoolHandle {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker and collect their reports in worker order.
    pub async fn join(self) -> Vec<WorkerReport> {
        tracing::info!("Waiting for {} workers to finish...", self.handles.len());
        join_all(self.handles)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, res)| match res {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!("Worker {index} task failed to join: {e}");
                    WorkerReport {
                        index,
                        tally: WorkerTally::new(),
                        cancelled: false,
                        failure: Some(WorkerError::Panicked {
                            worker: index,
                            message: e.to_string(),
                        }),
                    }
                }
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Spawns `workers` tokio tasks, one [`Worker`] each.
pub fn spawn_workers<D: Database>(
    ctx: ExecutionContext,
    shutdown: ShutdownHandle,
    workers: usize,
    policy: FailurePolicy,
    plan: Arc<WorkerPlan>,
    db: Arc<D>,
) -> Vec<JoinHandle<WorkerReport>> {
    (0..workers)
        .map(|index| {
            let worker = Worker::new(index, plan.clone(), db.clone(), ctx.clone());
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let report = match AssertUnwindSafe(worker.run()).catch_unwind().await {
                    Ok(report) => report,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!("Worker {index} panicked: {message}");
                        WorkerReport {
                            index,
                            tally: WorkerTally::new(),
                            cancelled: false,
                            failure: Some(WorkerError::Panicked {
                                worker: index,
                                message,
                            }),
                        }
                    }
                };

                if report.failure.is_some() && policy == FailurePolicy::Abort {
                    tracing::warn!("Worker {index} failed; aborting the pool.");
                    shutdown.cancel();
                }
                tracing::debug!("Worker {index} finished.");
                report
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SoakConfig,
        store::{memory::MemoryConnection, ConnectOptions, Connection},
    };

    fn plan(iterations: u64) -> Arc<WorkerPlan> {
        let config = SoakConfig::builder()
            .max_iterations(iterations)
            .seed(1)
            .build();
        Arc::new(WorkerPlan::from(&config))
    }

    #[tokio::test]
    async fn spawn_expected_number_of_workers() {
        let n = 10;
        let (ctx, lifecycle) = ExecutionContext::new();
        let db = Arc::new(
            MemoryConnection::new(ConnectOptions::default())
                .database(0)
                .unwrap(),
        );
        let pool = WorkerPool::builder().workers(n).build();
        let handle = pool.launch(ctx, lifecycle.shutdown_handle(), plan(5), db);
        assert_eq!(handle.len(), n);

        lifecycle.start();
        let reports = handle.join().await;
        assert_eq!(reports.len(), n);
        for (i, r) in reports.iter().enumerate() {
            assert_eq!(r.index, i);
            assert!(r.succeeded());
            assert_eq!(r.tally.iterations, 4);
        }
    }

    #[tokio::test]
    async fn shutdown_before_start_cancels_everyone() {
        let (ctx, lifecycle) = ExecutionContext::new();
        let db = Arc::new(
            MemoryConnection::new(ConnectOptions::default())
                .database(0)
                .unwrap(),
        );
        let handle = WorkerPool::builder().workers(3).build().launch(
            ctx,
            lifecycle.shutdown_handle(),
            plan(100),
            db,
        );
        lifecycle.shutdown_handle().cancel();
        let reports = handle.join().await;
        assert!(reports.iter().all(|r| r.cancelled && r.tally.iterations == 0));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
