//! Guarded execution of supervised steps.
//!
//! Runtime faults (panics) inside a worker function or a behavior step are
//! not allowed to unwind through the supervision layer. [`run_guarded`]
//! wraps one step in a catch-unwind boundary and tags the result as an
//! explicit [`Outcome`], which the supervision code pattern-matches on:
//!
//! ```text
//! run_guarded(step) ──► Outcome::Ok          step returned Ok(())
//!                   ──► Outcome::Error(e)    step returned Err(e)
//!                   ──► Outcome::Fault(why)  step panicked; payload downcast
//! ```
//!
//! `AssertUnwindSafe` is used, which can leave shared state inconsistent if
//! the step panics while holding a lock; supervised steps own their state.

use std::any::Any;

use futures::FutureExt;
use std::future::Future;

/// The tagged result of one guarded supervised step.
#[derive(Debug)]
pub enum Outcome<E> {
    /// The step completed normally.
    Ok,
    /// The step returned an error.
    Error(E),
    /// The step panicked; the payload was downcast to a message.
    Fault(String),
}

impl<E> Outcome<E> {
    /// Returns `true` for [`Outcome::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }
}

/// Runs one step inside a catch-unwind boundary.
///
/// The future's error type is preserved; a panic is reduced to its string
/// payload (or `"unknown panic"` when the payload is neither `&str` nor
/// `String`).
pub async fn run_guarded<E, F>(fut: F) -> Outcome<E>
where
    F: Future<Output = Result<(), E>>,
{
    match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => Outcome::Ok,
        Ok(Err(err)) => Outcome::Error(err),
        Err(payload) => Outcome::Fault(fault_reason(payload.as_ref())),
    }
}

/// Downcasts a panic payload to a printable reason.
fn fault_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
