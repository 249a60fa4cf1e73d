//! Reconciliation primitives.
//!
//! This library provides helpers for reconcilers that drive a remote provider
//! toward declared desired state. Key concepts:
//!
//! - **Desired state**: What the request declares (never read back from the provider).
//! - **Actual state**: What the provider currently reports.
//! - **Convergence**: The minimal sequence of remote operations making actual match desired.
//!
//! # Invariants
//!
//! - Plans are deterministic given the same inputs
//! - A plan never re-applies a binding that is already in place
//! - Waiting on an operation never retries it; failure is terminal

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

/// Default interval between operation status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default upper bound on a single remote operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30 * 60); // 30 minutes

/// Errors returned while waiting on a remote operation.
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The deadline elapsed before the operation finished.
    #[error("timeout after {elapsed:?} waiting for {resource}")]
    Timeout {
        resource: String,
        elapsed: Duration,
    },

    /// The provider reported the operation as failed.
    #[error("operation on {resource} failed: {reason}")]
    Failed { resource: String, reason: String },

    /// Polling the operation status failed.
    #[error("polling {resource}: {source}")]
    Poll {
        resource: String,
        #[source]
        source: E,
    },
}

/// Status of an asynchronous provider operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Still running.
    InProgress,

    /// Finished successfully.
    Succeeded,

    /// Finished unsuccessfully.
    Failed(String),
}

impl OperationStatus {
    /// Returns true once the operation will not change status again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Polling policy for asynchronous operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between status polls.
    pub interval: Duration,

    /// Give up after this long. `None` waits indefinitely.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: Some(DEFAULT_OPERATION_TIMEOUT),
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, deadline: Option<Duration>) -> Self {
        Self { interval, deadline }
    }
}

/// Block until an asynchronous operation reaches a terminal status.
///
/// `poll` is invoked once immediately and then every `policy.interval`.
pub async fn wait_for_operation<F, Fut, E>(
    resource: &str,
    policy: &PollPolicy,
    mut poll: F,
) -> Result<(), WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<OperationStatus, E>>,
{
    let started = Instant::now();

    loop {
        let status = poll().await.map_err(|source| WaitError::Poll {
            resource: resource.to_string(),
            source,
        })?;

        match status {
            OperationStatus::Succeeded => return Ok(()),
            OperationStatus::Failed(reason) => {
                return Err(WaitError::Failed {
                    resource: resource.to_string(),
                    reason,
                })
            }
            OperationStatus::InProgress => {}
        }

        let elapsed = started.elapsed();
        if let Some(deadline) = policy.deadline {
            if elapsed + policy.interval > deadline {
                return Err(WaitError::Timeout {
                    resource: resource.to_string(),
                    elapsed,
                });
            }
        }

        debug!(resource, elapsed_ms = elapsed.as_millis() as u64, "Operation in progress");
        tokio::time::sleep(policy.interval).await;
    }
}

/// The remote mutations needed to move one binding from actual to desired.
///
/// A subject (e.g. a subnet) can hold at most one binding at a time, so
/// convergence is a compare-and-swap: detach the old binding if it differs,
/// attach the new one if it is not already in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingPlan {
    /// Binding to remove first.
    pub detach: Option<String>,

    /// Binding to add afterwards.
    pub attach: Option<String>,
}

impl BindingPlan {
    /// Returns true if no remote mutation is required.
    pub fn is_noop(&self) -> bool {
        self.detach.is_none() && self.attach.is_none()
    }
}

/// Plan the mutations for a single binding.
///
/// Empty strings are treated the same as `None`.
pub fn plan_binding(actual: Option<&str>, desired: Option<&str>) -> BindingPlan {
    let actual = actual.filter(|s| !s.is_empty());
    let desired = desired.filter(|s| !s.is_empty());

    if actual == desired {
        return BindingPlan::default();
    }

    BindingPlan {
        detach: actual.map(str::to_string),
        attach: desired.map(str::to_string),
    }
}

/// Convergence status for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Actual already matched desired; nothing was changed.
    Converged,

    /// Remote mutations were applied to reach desired.
    Changed,
}
