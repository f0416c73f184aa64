//! The behavior contract and the context handed to it.
//!
//! A [`Behavior`] is the user-supplied event-processing logic plugged into
//! one cell. The contract is four explicit methods, no hidden inheritance:
//!
//! ```text
//! init(ctx)           once per start of the cell's worker
//! process_event(e,ctx) per dequeued event, in mailbox-arrival order
//! recover(reason)     after a returned error or intercepted panic
//! terminate()         on clean shutdown paths only, never after a fatal
//! ```
//!
//! Per-cell tuning goes through [`BehaviorOptions`], returned from the
//! defaulted [`Behavior::options`] hook and clamped by the runtime.
//!
//! ## Example
//! ```no_run
//! use async_trait::async_trait;
//! use hive::{Behavior, CellError, Context, Event};
//!
//! /// Counts events and answers nothing.
//! #[derive(Default)]
//! struct Counter {
//!     seen: u64,
//! }
//!
//! #[async_trait]
//! impl Behavior for Counter {
//!     async fn init(&mut self, _ctx: &Context<'_>) -> Result<(), CellError> {
//!         Ok(())
//!     }
//!
//!     async fn terminate(&mut self) -> Result<(), CellError> {
//!         Ok(())
//!     }
//!
//!     async fn process_event(
//!         &mut self,
//!         event: Event,
//!         ctx: &Context<'_>,
//!     ) -> Result<(), CellError> {
//!         self.seen += 1;
//!         // Fan the event out to whoever subscribed to this cell.
//!         ctx.emit(event).await
//!     }
//!
//!     async fn recover(&mut self, _reason: &CellError) -> Result<(), CellError> {
//!         self.seen = 0;
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::cells::cell::CellHandle;
use crate::cells::event::{Event, Payload};
use crate::config::BehaviorOptions;
use crate::error::CellError;

/// User-supplied event-processing logic for one cell.
///
/// A behavior is exclusively owned by its cell; the runtime serializes all
/// calls, so `&mut self` state needs no synchronization.
#[async_trait]
pub trait Behavior: Send + 'static {
    /// Per-cell configuration; the runtime clamps every field to its
    /// documented bounds.
    fn options(&self) -> BehaviorOptions {
        BehaviorOptions::default()
    }

    /// Called once each time the cell's worker starts.
    ///
    /// An error here is fatal to the cell.
    async fn init(&mut self, ctx: &Context<'_>) -> Result<(), CellError>;

    /// Called on clean shutdown paths only, never after a fatal fault
    /// exit, so a broken behavior does not run cleanup in an inconsistent
    /// state.
    async fn terminate(&mut self) -> Result<(), CellError>;

    /// Processes one dequeued event.
    ///
    /// Events arrive strictly in mailbox order. A returned error or a
    /// panic is routed to [`Behavior::recover`].
    async fn process_event(&mut self, event: Event, ctx: &Context<'_>) -> Result<(), CellError>;

    /// Reacts to an abnormal processing outcome.
    ///
    /// Returning `Ok(())` resumes the event loop. Returning an error, or
    /// faulting more often than the configured recovery frequency, kills
    /// the cell's worker fatally.
    async fn recover(&mut self, reason: &CellError) -> Result<(), CellError>;
}

/// Capabilities a behavior gets while the cell processes an event.
///
/// The subscriber slice is the cell's current snapshot; the registry
/// refreshes it asynchronously on subscribe/unsubscribe, so a behavior
/// never observes a half-updated graph.
pub struct Context<'a> {
    cell_id: &'a str,
    environment_id: &'a str,
    subscribers: &'a [CellHandle],
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        cell_id: &'a str,
        environment_id: &'a str,
        subscribers: &'a [CellHandle],
    ) -> Context<'a> {
        Context {
            cell_id,
            environment_id,
            subscribers,
        }
    }

    /// Id of the cell this behavior runs in.
    pub fn cell_id(&self) -> &str {
        self.cell_id
    }

    /// Id of the owning environment.
    pub fn environment_id(&self) -> &str {
        self.environment_id
    }

    /// The cell's current subscribers, in id order.
    pub fn subscribers(&self) -> &[CellHandle] {
        self.subscribers
    }

    /// Emits an event to every current subscriber.
    ///
    /// Delivery is sequential in id order; the first failing subscriber
    /// aborts the fan-out and its error is returned.
    pub async fn emit(&self, event: Event) -> Result<(), CellError> {
        for subscriber in self.subscribers {
            subscriber.emit(event.clone()).await?;
        }
        Ok(())
    }

    /// Builds an event from topic and payload, then emits it.
    pub async fn emit_new(
        &self,
        topic: impl Into<String>,
        payload: Payload,
    ) -> Result<(), CellError> {
        let event = Event::new(topic, payload)?;
        self.emit(event).await
    }

    /// Calls `f` for every current subscriber, read-only.
    ///
    /// The first error short-circuits the iteration and is returned.
    pub fn subscribers_do<F>(&self, mut f: F) -> Result<(), CellError>
    where
        F: FnMut(&CellHandle) -> Result<(), CellError>,
    {
        for subscriber in self.subscribers {
            f(subscriber)?;
        }
        Ok(())
    }
}
