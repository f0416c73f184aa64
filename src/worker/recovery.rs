//! Recovery history and pluggable recovery policies.
//!
//! Each time a supervised function ends abnormally while a policy is
//! attached, the worker appends a [`Recovering`] (timestamp + reason) to its
//! history and hands the full history to the [`RecoveryPolicy`]. The policy
//! answers one of two ways:
//!
//! ```text
//! Ok(trimmed history)  → the loop resumes; the trimmed history is retained
//! Err(fatal)           → the worker terminates with that error
//! ```
//!
//! [`FrequencyPolicy`] is the stock implementation: it trips when the most
//! recent `limit` recoveries all happened within `window`, and otherwise
//! trims the history so memory stays bounded. The same predicate and trim
//! are reused by cells for their per-behavior circuit breaker.

use std::time::{Duration, Instant};

use crate::error::WorkerError;

/// One recorded abnormal termination.
#[derive(Debug, Clone)]
pub struct Recovering {
    /// When the abnormal termination was observed.
    pub at: Instant,
    /// Human-readable reason (error message or panic payload).
    pub reason: String,
}

impl Recovering {
    /// Records a recovering with the current timestamp.
    pub fn now(reason: impl Into<String>) -> Self {
        Self {
            at: Instant::now(),
            reason: reason.into(),
        }
    }
}

/// Decides whether a worker resumes after an abnormal termination.
///
/// The policy receives the full history (oldest first, the newest entry
/// being the termination under decision) and returns either the history to
/// retain, or the fatal error that terminates the worker.
pub trait RecoveryPolicy: Send + Sync + 'static {
    /// Consults the policy for one abnormal termination.
    fn recover(&self, history: Vec<Recovering>) -> Result<Vec<Recovering>, WorkerError>;
}

/// Frequency-bounded recovery: resume until faults come too fast.
///
/// Trips when `limit` recoveries fall within `window`; otherwise resumes
/// and trims the history to at most `limit` entries inside the window.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use hive::{FrequencyPolicy, Recovering, RecoveryPolicy};
///
/// let policy = FrequencyPolicy::new(3, Duration::from_secs(10));
/// let history = vec![Recovering::now("boom")];
/// assert!(policy.recover(history).is_ok());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct FrequencyPolicy {
    /// Number of recoveries within the window that is fatal.
    pub limit: usize,
    /// Window over which recoveries are counted.
    pub window: Duration,
}

impl FrequencyPolicy {
    /// Creates a frequency policy; a limit of 0 is raised to 1.
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
        }
    }
}

impl RecoveryPolicy for FrequencyPolicy {
    fn recover(&self, history: Vec<Recovering>) -> Result<Vec<Recovering>, WorkerError> {
        if exceeds_frequency(&history, self.limit, self.window) {
            Err(WorkerError::RecoveryFrequencyExceeded {
                count: self.limit,
                window: self.window,
            })
        } else {
            Ok(trim(history, self.limit, self.window))
        }
    }
}

/// Returns `true` when the most recent `limit` recoverings all fall within
/// `window` of each other.
///
/// The history must be ordered oldest-first, which is how workers and cells
/// append it.
pub fn exceeds_frequency(history: &[Recovering], limit: usize, window: Duration) -> bool {
    let limit = limit.max(1);
    if history.len() < limit {
        return false;
    }
    let newest = match history.last() {
        Some(r) => r.at,
        None => return false,
    };
    let oldest_considered = history[history.len() - limit].at;
    newest.duration_since(oldest_considered) <= window
}

/// Trims a history to at most `limit` entries, all within `window` of the
/// newest entry.
pub fn trim(history: Vec<Recovering>, limit: usize, window: Duration) -> Vec<Recovering> {
    let newest = match history.last() {
        Some(r) => r.at,
        None => return history,
    };
    let mut kept: Vec<Recovering> = history
        .into_iter()
        .filter(|r| newest.duration_since(r.at) <= window)
        .collect();
    if kept.len() > limit {
        kept.drain(..kept.len() - limit);
    }
    kept
}
