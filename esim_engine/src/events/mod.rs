//! In-process event hooks.
//!
//! The engine publishes events after the transaction that caused them has committed. The server subscribes to them to
//! trigger follow-up work without blocking the request that produced the event.
mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
