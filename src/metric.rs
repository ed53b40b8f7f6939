use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A `Metric` is a single observation produced by one worker iteration.
///
/// Metrics are consumed into a worker-local [`crate::Aggregate`], merged across
/// the pool once every worker has joined, and finally turned into a
/// [`crate::Report`].
///
/// ## Example
/// ```rust
/// use kvsoak::Metric;
///
/// #[derive(Clone, PartialEq, PartialOrd)]
/// struct Pause(u64);
/// impl Metric for Pause {}
/// ```
pub trait Metric
where
    Self: PartialOrd + PartialEq + Send + Sync + Clone,
{
}

/// Which code path an iteration drove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Guarded transaction with a fire-and-forget set inside.
    Transactional,
    /// Blocking set-and-return-previous.
    Direct,
}

/// The Operation Record for one completed iteration.
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct OpSample {
    pub iteration: u64,
    pub kind: OpKind,
    pub high_priority: bool,
    pub latency: Duration,
    /// `Some(committed)` for transactions, `None` for direct sets.
    pub committed: Option<bool>,
}

impl Metric for OpSample {}
