use std::{fmt::Debug, time::Duration};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::metric::{Metric, OpKind, OpSample};

/// Collects [`Metric`]s into a compact, mergeable representation.
///
/// Aggregates hold raw counters only. Derived figures such as averages or
/// ratios belong to the [`crate::SoakReport`] built from them.
///
/// `merge` must be associative and commutative: worker-local aggregates are
/// merged in whatever order the pool happens to join them.
pub trait Aggregate
where
    Self: Serialize + DeserializeOwned + PartialEq + Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Incorporate a batch of metrics.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric.
    fn consume(&mut self, metric: &Self::Metric);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

/// Per-worker counters, merged into one run-wide tally after the pool joins.
///
/// `throttle_pauses` is bumped by the worker loop itself since a pause is not
/// an operation and produces no [`OpSample`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTally {
    pub iterations: u64,
    pub transactional: u64,
    pub direct: u64,
    pub high_priority: u64,
    pub aborted_transactions: u64,
    pub throttle_pauses: u64,
    pub total_latency: Duration,
    pub max_latency: Duration,
}

impl WorkerTally {
    pub fn record_pause(&mut self) {
        self.throttle_pauses += 1;
    }
}

impl Aggregate for WorkerTally {
    type Metric = OpSample;

    fn new() -> Self {
        WorkerTally::default()
    }

    fn consume(&mut self, metric: &Self::Metric) {
        self.iterations += 1;
        match metric.kind {
            OpKind::Transactional => self.transactional += 1,
            OpKind::Direct => self.direct += 1,
        }
        if metric.high_priority {
            self.high_priority += 1;
        }
        if metric.committed == Some(false) {
            self.aborted_transactions += 1;
        }
        self.total_latency += metric.latency;
        self.max_latency = self.max_latency.max(metric.latency);
    }

    fn merge(&mut self, other: Self) {
        self.iterations += other.iterations;
        self.transactional += other.transactional;
        self.direct += other.direct;
        self.high_priority += other.high_priority;
        self.aborted_transactions += other.aborted_transactions;
        self.throttle_pauses += other.throttle_pauses;
        self.total_latency += other.total_latency;
        self.max_latency = self.max_latency.max(other.max_latency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(iteration: u64, high_priority: bool, millis: u64) -> OpSample {
        let kind = if iteration % 2 == 0 {
            OpKind::Transactional
        } else {
            OpKind::Direct
        };
        OpSample {
            iteration,
            kind,
            high_priority,
            latency: Duration::from_millis(millis),
            committed: (kind == OpKind::Transactional).then_some(true),
        }
    }

    #[test]
    fn consume_counts_by_kind_and_flag() {
        let mut agg = WorkerTally::new();
        agg.aggregate(&[sample(1, false, 2), sample(2, true, 5), sample(3, false, 1)]);

        assert_eq!(agg.iterations, 3);
        assert_eq!(agg.direct, 2);
        assert_eq!(agg.transactional, 1);
        assert_eq!(agg.high_priority, 1);
        assert_eq!(agg.total_latency, Duration::from_millis(8));
        assert_eq!(agg.max_latency, Duration::from_millis(5));
    }

    #[test]
    fn aborted_transactions_are_counted() {
        let mut agg = WorkerTally::new();
        let mut s = sample(2, false, 1);
        s.committed = Some(false);
        agg.consume(&s);
        assert_eq!(agg.aborted_transactions, 1);
    }

    #[test]
    fn merge_is_order_independent() {
        let mut a = WorkerTally::new();
        a.aggregate(&[sample(1, true, 3), sample(2, false, 9)]);
        a.record_pause();
        let mut b = WorkerTally::new();
        b.aggregate(&[sample(1, false, 4)]);

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);

        assert_eq!(ab, ba);
        assert_eq!(ab.iterations, 3);
        assert_eq!(ab.throttle_pauses, 1);
        assert_eq!(ab.max_latency, Duration::from_millis(9));
    }
}
