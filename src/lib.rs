//! # hive
//!
//! **hive** is a small general-purpose concurrent-actor runtime: a
//! supervised-worker primitive (the kernel) and an actor-style
//! event-routing network of *cells* riding on it (the router).
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Behavior   │   │   Behavior   │   │   Behavior   │
//!     │ (user logic) │   │ (user logic) │   │ (user logic) │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Environment (facade)                                             │
//! │  - Registry (id → cell + subscription graph, one write lock)      │
//! │  - Emit / EmitNew / Request (timeout-bounded delivery)            │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │     Cell     │   │     Cell     │   │     Cell     │
//!     │ worker+loop  │──►│ worker+loop  │──►│ worker+loop  │  (fan-out
//!     │ [mailbox]    │   │ [mailbox]    │   │ [mailbox]    │   along the
//!     │ [ctrl slot]  │   │ [ctrl slot]  │   │ [ctrl slot]  │   graph)
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Worker primitive: start / stop / kill / wait / restart,          │
//! │  shall-stop token, recovery policies, panic interception          │
//! │                                                                   │
//! │  Sentinel: a worker supervising other workers/sentinels —         │
//! │  observe / forget, fault notes, restart-or-cascade handlers       │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! Environment::start_cell ──► Registry ──► Cell ──► Worker::start
//!
//! cell loop {
//!   ├─► select! over shall-stop / control slot / mailbox
//!   ├─► Behavior::process_event (guarded: panics become Outcome::Fault)
//!   ├─► error/fault ─► circuit breaker ─► Behavior::recover
//!   └─► fatal ─► worker terminates ─► parent sentinel notified
//! }
//! ```
//!
//! ## Features
//! | Area            | Description                                           | Key types / traits                        |
//! |-----------------|-------------------------------------------------------|-------------------------------------------|
//! | **Workers**     | Supervised tasks with stop/kill/wait/restart.         | [`Worker`], [`Work`], [`WorkFn`]           |
//! | **Recovery**    | Pluggable resume-or-die policies, frequency bounded.  | [`RecoveryPolicy`], [`FrequencyPolicy`]    |
//! | **Supervision** | Erlang-style trees, restart-or-cascade per fault.     | [`Sentinel`], [`FaultHandler`]             |
//! | **Cells**       | One behavior per cell, bounded mailbox, backpressure. | [`Behavior`], [`BehaviorOptions`]          |
//! | **Events**      | Immutable topic + payload, one-shot replies.          | [`Event`], [`Payload`], [`Value`]          |
//! | **Facade**      | Start/stop cells, wire graph, emit, request.          | [`Environment`]                            |
//!
//! ## Example
//! ```no_run
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use hive::{topics, Behavior, CellError, Context, Environment, Event, Payload, Value};
//!
//! /// Forwards each event to all subscribers, tagged with its own id.
//! struct Relay;
//!
//! #[async_trait]
//! impl Behavior for Relay {
//!     async fn init(&mut self, _ctx: &Context<'_>) -> Result<(), CellError> { Ok(()) }
//!     async fn terminate(&mut self) -> Result<(), CellError> { Ok(()) }
//!     async fn recover(&mut self, _reason: &CellError) -> Result<(), CellError> { Ok(()) }
//!
//!     async fn process_event(&mut self, event: Event, ctx: &Context<'_>) -> Result<(), CellError> {
//!         let tagged = event.payload().apply([("via", ctx.cell_id())]);
//!         ctx.emit_new(event.topic(), tagged).await
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CellError> {
//!     let env = Environment::new();
//!     env.start_cell("relay", Box::new(Relay)).await?;
//!     env.emit_new("relay", "tick", Payload::empty()).await?;
//!     env.stop().await
//! }
//! ```

mod cells;
mod config;
mod error;
mod worker;

// ---- Public re-exports ----

pub use cells::{topics, Behavior, CellHandle, Context, Environment, Event, Payload, ReplySlot, Value};
pub use config::{
    BehaviorOptions, DEFAULT_EMIT_TIMEOUT, DEFAULT_MAILBOX_CAPACITY, DEFAULT_RECOVERY_LIMIT,
    DEFAULT_RECOVERY_WINDOW, MAILBOX_RETRY_INTERVAL, MAX_EMIT_TIMEOUT, MAX_MAILBOX_CAPACITY,
    MAX_RECOVERY_WINDOW, MIN_EMIT_TIMEOUT, MIN_MAILBOX_CAPACITY, MIN_RECOVERY_LIMIT,
    MIN_RECOVERY_WINDOW,
};
pub use error::{CellError, WorkerError};
pub use worker::{
    exceeds_frequency, run_guarded, trim, FaultHandler, FaultNote, FaultScope, FrequencyPolicy,
    Observable, ObservableRef, Outcome, Recovering, RecoveryPolicy, Sentinel, Work, WorkFn,
    WorkRef, Worker, WorkerStatus,
};
