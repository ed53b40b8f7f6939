use std::time::Duration;

use thiserror::Error;

use crate::metric::OpKind;

/// Failures raised by a Connection Handle or its database accessor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The handle could not be opened, was lost mid-run, or was already closed.
    #[error("connection error: {0}")]
    Connection(String),
    /// A command reached the store and failed.
    #[error("operation failed: {0}")]
    Operation(String),
    /// The call did not complete within the configured sync timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return StoreError::Operation(format!("timeout reported by client: {err}"));
        }
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Operation(err.to_string())
        }
    }
}

/// The first error a single worker hit. Ends that worker's loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker {worker} failed on iteration {iteration} ({kind:?}): {source}")]
    Store {
        worker: usize,
        iteration: u64,
        kind: OpKind,
        #[source]
        source: StoreError,
    },
    #[error("worker {worker}: transaction aborted by its guard on iteration {iteration}")]
    PreconditionFailed { worker: usize, iteration: u64 },
    #[error("worker {worker} panicked: {message}")]
    Panicked { worker: usize, message: String },
}

impl WorkerError {
    pub fn worker(&self) -> usize {
        match self {
            WorkerError::Store { worker, .. }
            | WorkerError::PreconditionFailed { worker, .. }
            | WorkerError::Panicked { worker, .. } => *worker,
        }
    }
}

/// Errors surfaced by the Run Controller.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{failed} worker(s) failed; first failure: {first}")]
    WorkersFailed { failed: usize, first: WorkerError },
    #[error("operator acknowledgment failed: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_index_is_reported_for_every_variant() {
        let errs = [
            WorkerError::Store {
                worker: 3,
                iteration: 2,
                kind: OpKind::Transactional,
                source: StoreError::Connection("reset".into()),
            },
            WorkerError::PreconditionFailed {
                worker: 3,
                iteration: 8,
            },
            WorkerError::Panicked {
                worker: 3,
                message: "boom".into(),
            },
        ];
        for e in errs {
            assert_eq!(e.worker(), 3);
        }
    }

    #[test]
    fn store_failure_message_carries_context() {
        let e = WorkerError::Store {
            worker: 7,
            iteration: 42,
            kind: OpKind::Direct,
            source: StoreError::Timeout(Duration::from_millis(5000)),
        };
        let msg = e.to_string();
        assert!(msg.contains("worker 7"));
        assert!(msg.contains("iteration 42"));
        assert!(msg.contains("Direct"));
        assert!(msg.contains("timed out"));
    }
}
