//! Clamp bounds and per-cell options.
//!
//! All tunable limits of the cell network live here as compile-time
//! constants, together with [`BehaviorOptions`], the explicit configuration
//! struct a [`Behavior`](crate::Behavior) returns from its `options()` hook.
//!
//! Out-of-range values are never rejected: [`BehaviorOptions::clamped`]
//! silently raises too-small values to the minimum and caps too-large values
//! at the maximum, so a misconfigured behavior degrades to safe defaults
//! instead of failing at start.

use std::time::Duration;

/// Smallest allowed cell mailbox capacity.
pub const MIN_MAILBOX_CAPACITY: usize = 16;

/// Largest allowed cell mailbox capacity.
pub const MAX_MAILBOX_CAPACITY: usize = 65_536;

/// Mailbox capacity used when a behavior does not override it.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Lower bound for a cell's emit timeout.
pub const MIN_EMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound for a cell's emit timeout.
pub const MAX_EMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Emit timeout used when a behavior does not override it.
pub const DEFAULT_EMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cadence at which a sender retries a full mailbox while the emit
/// timeout has not yet elapsed.
pub const MAILBOX_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Smallest allowed recovery limit (recoveries per window).
pub const MIN_RECOVERY_LIMIT: usize = 1;

/// Recovery limit used when a behavior does not override it.
pub const DEFAULT_RECOVERY_LIMIT: usize = 5;

/// Lower bound for the recovery window.
pub const MIN_RECOVERY_WINDOW: Duration = Duration::from_secs(1);

/// Upper bound for the recovery window.
pub const MAX_RECOVERY_WINDOW: Duration = Duration::from_secs(300);

/// Recovery window used when a behavior does not override it.
pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_secs(10);

/// Capacity of the control slot carrying subscriber snapshots to a cell.
///
/// Distinct from the event mailbox: graph changes cannot be blocked by a
/// full mailbox, and vice versa.
pub(crate) const CONTROL_SLOT_CAPACITY: usize = 16;

/// Upper bound on a registry push of a subscriber snapshot.
pub(crate) const SNAPSHOT_PUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Capacity of a sentinel's member fault-note channel.
pub(crate) const FAULT_NOTE_CAPACITY: usize = 64;

/// Capacity of a sentinel's membership control channel.
pub(crate) const SENTINEL_CTRL_CAPACITY: usize = 16;

/// Per-cell configuration a behavior hands to the runtime.
///
/// Every field has a documented default; a behavior overrides only what it
/// cares about:
///
/// ```
/// use std::time::Duration;
/// use hive::BehaviorOptions;
///
/// let opts = BehaviorOptions {
///     emit_timeout: Duration::from_secs(2),
///     ..BehaviorOptions::default()
/// };
/// assert_eq!(opts.clamped().emit_timeout, Duration::from_secs(2));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BehaviorOptions {
    /// Bounded capacity of the cell's inbound event mailbox.
    ///
    /// Clamped to [`MIN_MAILBOX_CAPACITY`]..=[`MAX_MAILBOX_CAPACITY`].
    pub mailbox_capacity: usize,

    /// Upper bound on delivery into this cell's mailbox.
    ///
    /// Senders retry a full mailbox once per [`MAILBOX_RETRY_INTERVAL`]
    /// until this much time has accumulated, then fail with a timeout.
    /// Clamped to [`MIN_EMIT_TIMEOUT`]..=[`MAX_EMIT_TIMEOUT`].
    pub emit_timeout: Duration,

    /// Number of recoveries within [`BehaviorOptions::recovery_window`]
    /// that trips the cell's circuit breaker. Raised to at least
    /// [`MIN_RECOVERY_LIMIT`].
    pub recovery_limit: usize,

    /// Window over which recoveries are counted.
    ///
    /// Clamped to [`MIN_RECOVERY_WINDOW`]..=[`MAX_RECOVERY_WINDOW`].
    pub recovery_window: Duration,
}

impl Default for BehaviorOptions {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            emit_timeout: DEFAULT_EMIT_TIMEOUT,
            recovery_limit: DEFAULT_RECOVERY_LIMIT,
            recovery_window: DEFAULT_RECOVERY_WINDOW,
        }
    }
}

impl BehaviorOptions {
    /// Returns a copy with every field forced into its documented bounds.
    ///
    /// Called by the runtime before a cell is constructed; user code never
    /// observes an out-of-range value taking effect.
    pub fn clamped(&self) -> Self {
        Self {
            mailbox_capacity: self
                .mailbox_capacity
                .clamp(MIN_MAILBOX_CAPACITY, MAX_MAILBOX_CAPACITY),
            emit_timeout: self.emit_timeout.clamp(MIN_EMIT_TIMEOUT, MAX_EMIT_TIMEOUT),
            recovery_limit: self.recovery_limit.max(MIN_RECOVERY_LIMIT),
            recovery_window: self
                .recovery_window
                .clamp(MIN_RECOVERY_WINDOW, MAX_RECOVERY_WINDOW),
        }
    }
}
