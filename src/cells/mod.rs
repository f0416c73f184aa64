//! The actor-style cell network: behaviors, cells, registry, environment.
//!
//! A cell is one worker running one [`Behavior`]'s event loop over a
//! bounded mailbox. The registry owns the cells and their subscription
//! graph; the [`Environment`] is the facade applications talk to.

mod behavior;
mod cell;
mod environment;
mod event;
mod registry;

pub use behavior::{Behavior, Context};
pub use cell::CellHandle;
pub use environment::Environment;
pub use event::{topics, Event, Payload, ReplySlot, Value};
