//! Supervised background tasks and the supervision tree built on them.
//!
//! The [`Worker`] primitive runs a caller-supplied [`Work`] function as an
//! independently scheduled task with stop/kill/wait/restart semantics and an
//! optional pluggable [`RecoveryPolicy`]. A [`Sentinel`] is a worker that
//! additionally supervises a set of other workers or sentinels, reacting to
//! their faults and cascading failures up its own supervision chain.

mod outcome;
mod recovery;
mod sentinel;
mod task;
#[allow(clippy::module_inception)]
mod worker;

pub use outcome::{run_guarded, Outcome};
pub use recovery::{exceeds_frequency, trim, FrequencyPolicy, Recovering, RecoveryPolicy};
pub use sentinel::{FaultHandler, FaultNote, FaultScope, Observable, ObservableRef, Sentinel};
pub use task::{Work, WorkFn, WorkRef};
pub use worker::{Worker, WorkerStatus};
