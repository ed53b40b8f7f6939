//! A single soak worker: the Operation Selector, the Throttle and the loop
//! that ties them to the shared database accessor.
use std::{sync::Arc, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::Instant;

use super::ExecutionContext;
use crate::{
    aggregate::{Aggregate, WorkerTally},
    config::SoakConfig,
    error::{StoreError, WorkerError},
    metric::{OpKind, OpSample},
    store::{CommandFlags, Condition, Database, Transaction},
};

/// Immutable per-run parameters shared by every worker.
#[derive(Debug, Clone)]
pub struct WorkerPlan {
    pub shared_key: String,
    pub guard_key: String,
    pub payload: String,
    /// Exclusive bound: iterations `1..max_iterations` run.
    pub max_iterations: u64,
    pub throttle_interval: u64,
    pub throttle_pause: Duration,
    pub high_priority_odds: u32,
    pub strict_guard: bool,
    pub seed: Option<u64>,
}

impl From<&SoakConfig> for WorkerPlan {
    fn from(c: &SoakConfig) -> Self {
        Self {
            shared_key: c.shared_key.clone(),
            guard_key: c.guard_key.clone(),
            payload: c.payload.clone(),
            max_iterations: c.max_iterations,
            throttle_interval: c.throttle_interval,
            throttle_pause: c.throttle_pause,
            high_priority_odds: c.high_priority_odds,
            strict_guard: c.strict_guard,
            seed: c.seed,
        }
    }
}

/// Even iterations run the guarded transaction, odd ones the direct set.
pub fn select_kind(iteration: u64) -> OpKind {
    if iteration % 2 == 0 {
        OpKind::Transactional
    } else {
        OpKind::Direct
    }
}

/// A zero draw selects the high-priority flag.
pub fn select_flags(draw: u32) -> CommandFlags {
    if draw == 0 {
        CommandFlags::HIGH_PRIORITY
    } else {
        CommandFlags::DEFAULT
    }
}

/// Whether the worker pauses after `iteration`. Never at iteration 0.
pub fn should_throttle(iteration: u64, interval: u64) -> bool {
    interval != 0 && iteration != 0 && iteration % interval == 0
}

/// Private generator for worker `index`.
///
/// With a base seed the sequence is reproducible per worker; without one it is
/// seeded from OS entropy and differs across workers and runs.
pub fn worker_rng(index: usize, seed: Option<u64>) -> StdRng {
    match seed {
        Some(base) => StdRng::seed_from_u64(base ^ index as u64),
        None => StdRng::from_entropy(),
    }
}

/// What one worker did before it stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub index: usize,
    pub tally: WorkerTally,
    /// Stopped early by the shared shutdown flag.
    pub cancelled: bool,
    pub failure: Option<WorkerError>,
}

impl WorkerReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }
}

pub struct Worker<D> {
    index: usize,
    rng: StdRng,
    plan: Arc<WorkerPlan>,
    db: Arc<D>,
    ctx: ExecutionContext,
}

impl<D: Database> Worker<D> {
    pub fn new(index: usize, plan: Arc<WorkerPlan>, db: Arc<D>, ctx: ExecutionContext) -> Self {
        Self {
            index,
            rng: worker_rng(index, plan.seed),
            plan,
            db,
            ctx,
        }
    }

    async fn transactional(&self, flags: CommandFlags) -> Result<bool, StoreError> {
        let mut tx = Transaction::new();
        tx.add_condition(Condition::key_not_exists(self.plan.guard_key.as_str()))
            .set(
                self.plan.shared_key.as_str(),
                self.plan.payload.as_str(),
                flags | CommandFlags::FIRE_AND_FORGET,
            );
        tx.execute(self.db.as_ref()).await
    }

    async fn direct(&self, flags: CommandFlags) -> Result<(), StoreError> {
        self.db
            .set(&self.plan.shared_key, &self.plan.payload, flags)
            .await
            .map(|_previous| ())
    }

    /// Run until the iteration bound, the first failure, or shutdown.
    pub async fn run(mut self) -> WorkerReport {
        let mut tally = WorkerTally::new();
        let mut cancelled = false;
        let mut failure = None;
        let odds = self.plan.high_priority_odds.max(1);

        if !self.ctx.started().await {
            tracing::debug!("Worker {} shut down before start.", self.index);
            return self.report(tally, true, None);
        }
        tracing::debug!("Worker {} started.", self.index);

        for iteration in 1..self.plan.max_iterations {
            if self.ctx.is_shutdown() {
                cancelled = true;
                break;
            }

            let flags = select_flags(self.rng.gen_range(0..odds));
            let kind = select_kind(iteration);
            let began = Instant::now();
            let outcome = match kind {
                OpKind::Transactional => self.transactional(flags).await.map(Some),
                OpKind::Direct => self.direct(flags).await.map(|()| None),
            };

            match outcome {
                Ok(committed) => {
                    tally.consume(&OpSample {
                        iteration,
                        kind,
                        high_priority: flags.contains(CommandFlags::HIGH_PRIORITY),
                        latency: began.elapsed(),
                        committed,
                    });
                    if committed == Some(false) {
                        tracing::warn!(
                            "Worker {}: guarded transaction aborted on iteration {iteration}",
                            self.index
                        );
                        if self.plan.strict_guard {
                            failure = Some(WorkerError::PreconditionFailed {
                                worker: self.index,
                                iteration,
                            });
                            break;
                        }
                    }
                }
                Err(source) => {
                    let err = WorkerError::Store {
                        worker: self.index,
                        iteration,
                        kind,
                        source,
                    };
                    tracing::error!("{err}");
                    failure = Some(err);
                    break;
                }
            }

            if should_throttle(iteration, self.plan.throttle_interval) {
                tally.record_pause();
                tracing::debug!(
                    "Worker {} throttling for {:?} after iteration {iteration}",
                    self.index,
                    self.plan.throttle_pause
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.plan.throttle_pause) => {}
                    _ = self.ctx.cancelled() => {
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        if cancelled {
            tracing::debug!(
                "Worker {} cancelled after {} iterations.",
                self.index,
                tally.iterations
            );
        }
        self.report(tally, cancelled, failure)
    }

    fn report(
        &self,
        tally: WorkerTally,
        cancelled: bool,
        failure: Option<WorkerError>,
    ) -> WorkerReport {
        WorkerReport {
            index: self.index,
            tally,
            cancelled,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parity_alternates_kinds() {
        let kinds: Vec<_> = (1..7).map(select_kind).collect();
        assert_eq!(
            kinds,
            [
                OpKind::Direct,
                OpKind::Transactional,
                OpKind::Direct,
                OpKind::Transactional,
                OpKind::Direct,
                OpKind::Transactional,
            ]
        );
    }

    #[test]
    fn only_zero_draw_is_high_priority() {
        assert_eq!(select_flags(0), CommandFlags::HIGH_PRIORITY);
        for draw in 1..10 {
            assert_eq!(select_flags(draw), CommandFlags::DEFAULT);
        }
    }

    #[test]
    fn throttle_hits_exact_multiples_only() {
        assert!(!should_throttle(0, 10_000));
        assert!(!should_throttle(9_999, 10_000));
        assert!(should_throttle(10_000, 10_000));
        assert!(!should_throttle(10_001, 10_000));
        assert!(should_throttle(20_000, 10_000));
        assert!(!should_throttle(5, 0));
    }

    #[test]
    fn high_priority_ratio_converges_to_one_in_ten() {
        let mut rng = worker_rng(0, Some(7));
        let draws = 200_000;
        let hits = (0..draws)
            .filter(|_| select_flags(rng.gen_range(0..10)) == CommandFlags::HIGH_PRIORITY)
            .count();
        let ratio = hits as f64 / draws as f64;
        assert!((ratio - 0.1).abs() < 0.005, "ratio was {ratio}");
    }

    #[test]
    fn seeded_workers_get_distinct_reproducible_streams() {
        let mut r1 = worker_rng(1, Some(42));
        let mut r1_again = worker_rng(1, Some(42));
        let mut r2 = worker_rng(2, Some(42));
        let s1: Vec<u32> = (0..16).map(|_| r1.gen()).collect();
        let s1_again: Vec<u32> = (0..16).map(|_| r1_again.gen()).collect();
        let s2: Vec<u32> = (0..16).map(|_| r2.gen()).collect();
        assert_eq!(s1, s1_again);
        assert_ne!(s1, s2);
    }

    proptest! {
        #[test]
        fn kind_depends_only_on_parity(i in 1u64..u64::MAX) {
            prop_assert_eq!(select_kind(i), select_kind(i.wrapping_add(2)));
            prop_assert_ne!(select_kind(i), select_kind(i.wrapping_add(1)));
        }

        #[test]
        fn pauses_per_run_equal_completed_multiples(bound in 1u64..50_000, interval in 1u64..20_000) {
            let pauses = (1..bound).filter(|&i| should_throttle(i, interval)).count() as u64;
            prop_assert_eq!(pauses, (bound - 1) / interval);
        }
    }
}
