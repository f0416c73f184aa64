//! Error types used by the worker primitive and the cell network.
//!
//! This module defines two main error enums:
//!
//! - [`WorkerError`] — terminal errors of a supervised [`Worker`](crate::Worker)
//!   or [`Sentinel`](crate::Sentinel).
//! - [`CellError`] — errors surfaced by the cell network: structural registry
//!   errors, delivery errors, request errors, and behavior errors.
//!
//! Both types are `Clone` (string payloads) so the same stored error can be
//! returned to every `wait()`/`stop()` caller, and both provide `as_label()`
//! for stable snake_case labels in logs.
//!
//! ## Taxonomy
//! ```text
//! structural   DuplicateId / UnknownId / SelfSubscription / EmptyTopic
//!              → returned synchronously from registry calls, never fatal
//! delivery     MailboxTimeout / Inactive
//!              → returned synchronously to the sender, target unaffected
//! behavior     CellError::{Failed, Faulted}
//!              → routed through Behavior::recover first
//! fatal worker WorkerError::{Failed, Faulted, Killed, Recovery*}
//!              → terminate the worker, notify the parent sentinel
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::worker::WorkerStatus;

/// Terminal errors of a supervised worker.
///
/// A worker retains at most one of these (first error wins); `wait()`,
/// `stop()` and `kill()` all surface the same stored value.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Operation is not legal in the worker's current status.
    #[error("worker is {actual}, operation requires {required}")]
    InvalidState {
        /// Status the operation requires.
        required: WorkerStatus,
        /// Status the worker actually had.
        actual: WorkerStatus,
    },

    /// Worker was killed with a caller-supplied reason.
    #[error("worker killed: {reason}")]
    Killed {
        /// The reason passed to `kill()`.
        reason: String,
    },

    /// Worker function returned an error.
    #[error("work failed: {reason}")]
    Failed {
        /// The underlying error message.
        reason: String,
    },

    /// Worker function panicked; the payload was intercepted.
    #[error("work panicked: {reason}")]
    Faulted {
        /// The downcast panic payload.
        reason: String,
    },

    /// Recovery policy declined to resume the worker.
    #[error("recovery declined: {reason}")]
    RecoveryDeclined {
        /// The declining policy's message.
        reason: String,
    },

    /// Too many recoveries within the configured window.
    #[error("{count} recoveries within {window:?} exceeded the limit")]
    RecoveryFrequencyExceeded {
        /// Number of recoveries counted in the window.
        count: usize,
        /// The configured window.
        window: Duration,
    },
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use hive::WorkerError;
    ///
    /// let err = WorkerError::Killed { reason: "boom".into() };
    /// assert_eq!(err.as_label(), "worker_killed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::InvalidState { .. } => "worker_invalid_state",
            WorkerError::Killed { .. } => "worker_killed",
            WorkerError::Failed { .. } => "worker_failed",
            WorkerError::Faulted { .. } => "worker_faulted",
            WorkerError::RecoveryDeclined { .. } => "worker_recovery_declined",
            WorkerError::RecoveryFrequencyExceeded { .. } => "worker_recovery_frequency",
        }
    }

    /// Shorthand for [`WorkerError::Failed`] from any displayable reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        WorkerError::Failed {
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the cell network.
///
/// Structural errors come back synchronously from registry operations,
/// delivery errors from mailbox sends, request errors from
/// [`Environment::request`](crate::Environment::request), and behavior
/// errors from application [`Behavior`](crate::Behavior) code.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CellError {
    /// A cell with this id already exists in the environment.
    #[error("cell id {id:?} already exists")]
    DuplicateId {
        /// The offending id.
        id: String,
    },

    /// No cell with this id exists in the environment.
    #[error("no cell with id {id:?}")]
    UnknownId {
        /// The missing id.
        id: String,
    },

    /// A cell may not subscribe to itself.
    #[error("cell {id:?} cannot subscribe to itself")]
    SelfSubscription {
        /// The id that tried to self-subscribe.
        id: String,
    },

    /// Events require a non-empty topic.
    #[error("event topic must not be empty")]
    EmptyTopic,

    /// The target cell's mailbox stayed full past its emit timeout.
    #[error("mailbox of cell {id:?} still full after {timeout:?}")]
    MailboxTimeout {
        /// Target cell id.
        id: String,
        /// The emit timeout that was exceeded.
        timeout: Duration,
    },

    /// The target cell's worker is not running.
    #[error("cell {id:?} is inactive")]
    Inactive {
        /// Target cell id.
        id: String,
    },

    /// No reply arrived within the request timeout.
    #[error("request to cell {id:?} timed out after {timeout:?}")]
    RequestTimeout {
        /// Target cell id.
        id: String,
        /// The request timeout that elapsed.
        timeout: Duration,
    },

    /// The reply slot was dropped or already used.
    #[error("no reply from cell {id:?}")]
    NoReply {
        /// Target cell id.
        id: String,
    },

    /// A behavior reported an error while processing an event.
    #[error("behavior failed: {reason}")]
    Failed {
        /// The behavior's error message.
        reason: String,
    },

    /// A behavior panicked while processing an event.
    #[error("behavior panicked: {reason}")]
    Faulted {
        /// The downcast panic payload.
        reason: String,
    },

    /// A fatal worker error surfaced through the cell network.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl CellError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use hive::CellError;
    ///
    /// let err = CellError::UnknownId { id: "foo".into() };
    /// assert_eq!(err.as_label(), "cell_unknown_id");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            CellError::DuplicateId { .. } => "cell_duplicate_id",
            CellError::UnknownId { .. } => "cell_unknown_id",
            CellError::SelfSubscription { .. } => "cell_self_subscription",
            CellError::EmptyTopic => "cell_empty_topic",
            CellError::MailboxTimeout { .. } => "cell_mailbox_timeout",
            CellError::Inactive { .. } => "cell_inactive",
            CellError::RequestTimeout { .. } => "cell_request_timeout",
            CellError::NoReply { .. } => "cell_no_reply",
            CellError::Failed { .. } => "behavior_failed",
            CellError::Faulted { .. } => "behavior_faulted",
            CellError::Worker(err) => err.as_label(),
        }
    }

    /// Shorthand for [`CellError::Failed`] from any displayable reason.
    ///
    /// This is the uniform way application behaviors report errors.
    pub fn failed(reason: impl Into<String>) -> Self {
        CellError::Failed {
            reason: reason.into(),
        }
    }

    /// Indicates whether this is a delivery error (the target cell itself
    /// is unaffected and the send may be retried).
    pub fn is_delivery(&self) -> bool {
        matches!(
            self,
            CellError::MailboxTimeout { .. } | CellError::Inactive { .. }
        )
    }
}

/// A cell loop that dies abnormally terminates its worker with the
/// stringified cell error as the worker's terminal error.
impl From<CellError> for WorkerError {
    fn from(err: CellError) -> Self {
        match err {
            CellError::Worker(inner) => inner,
            other => WorkerError::Failed {
                reason: other.to_string(),
            },
        }
    }
}
