use serde::Serialize;
use std::{future::Future, io::Write, time::Duration};

use crate::{
    aggregate::{Aggregate, WorkerTally},
    executor::WorkerReport,
};

/// Raw facts the Run Controller gathered; the input of a [`SoakReport`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub workers: Vec<WorkerReport>,
    pub elapsed: Duration,
    pub pressure_chains: usize,
    pub pressure_executions: u64,
    pub sentinel_key: String,
    /// `None` when the sentinel check itself failed.
    pub sentinel_exists: Option<bool>,
}

/// The processed form of a [`RunOutcome`].
///
/// A report is pure data: derived figures only, no I/O. A [`Reporter`]
/// decides where it goes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoakReport {
    pub workers: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub iterations: u64,
    pub transactional: u64,
    pub direct: u64,
    pub high_priority: u64,
    pub high_priority_ratio: f64,
    pub aborted_transactions: u64,
    pub throttle_pauses: u64,
    pub average_latency: Duration,
    pub max_latency: Duration,
    pub elapsed: Duration,
    pub pressure_chains: usize,
    pub pressure_executions: u64,
    pub sentinel_key: String,
    pub sentinel_exists: Option<bool>,
    pub failures: Vec<String>,
}

impl From<RunOutcome> for SoakReport {
    fn from(value: RunOutcome) -> Self {
        let mut tally = WorkerTally::new();
        let mut completed = 0;
        let mut cancelled = 0;
        let mut failures = Vec::new();
        let workers = value.workers.len();
        for w in value.workers {
            if let Some(f) = &w.failure {
                failures.push(f.to_string());
            } else if w.cancelled {
                cancelled += 1;
            } else {
                completed += 1;
            }
            tally.merge(w.tally);
        }

        let average_latency = if tally.iterations == 0 {
            Duration::ZERO
        } else {
            let nanos = tally.total_latency.as_nanos() / u128::from(tally.iterations);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        };
        let high_priority_ratio = if tally.iterations == 0 {
            0.0
        } else {
            tally.high_priority as f64 / tally.iterations as f64
        };

        Self {
            workers,
            completed,
            cancelled,
            failed: failures.len(),
            iterations: tally.iterations,
            transactional: tally.transactional,
            direct: tally.direct,
            high_priority: tally.high_priority,
            high_priority_ratio,
            aborted_transactions: tally.aborted_transactions,
            throttle_pauses: tally.throttle_pauses,
            average_latency,
            max_latency: tally.max_latency,
            elapsed: value.elapsed,
            pressure_chains: value.pressure_chains,
            pressure_executions: value.pressure_executions,
            sentinel_key: value.sentinel_key,
            sentinel_exists: value.sentinel_exists,
            failures,
        }
    }
}

/// Consumes a [`SoakReport`] and performs the side effect: print it, ship it,
/// store it.
///
/// # Example
/// ```rust
/// use kvsoak::{Reporter, SoakReport};
///
/// struct Quiet;
/// impl Reporter for Quiet {
///     async fn report(&self, _report: &SoakReport) -> std::io::Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter {
    fn report(&self, report: &SoakReport) -> impl Future<Output = std::io::Result<()>>;
}

/// Pretty debug output on stdout.
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    async fn report(&self, report: &SoakReport) -> std::io::Result<()> {
        println!("{report:#?}");
        Ok(())
    }
}

/// One JSON document on stdout.
pub struct JsonReporter;

impl Reporter for JsonReporter {
    async fn report(&self, report: &SoakReport) -> std::io::Result<()> {
        let mut out = std::io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, report)?;
        writeln!(out)
    }
}
