//! Typed publish/subscribe channel for workflow execution events.
//!
//! The bus is the observability backbone of the engine: every lifecycle,
//! step, progress, tool, UI and wait transition is published here as a
//! [`WorkflowEvent`]. Delivery order to a single subscriber matches
//! publication order; a misbehaving subscriber or sink never prevents the
//! others from receiving an event and never aborts the emit call.
//!
//! See [`EventBus`] for sink composition and [`EventStream`] for async
//! consumption.

mod bus;
mod emitter;
mod event;
mod hub;
mod sink;

pub use bus::{EventBus, SinkId};
pub use emitter::{EmitterError, EventEmitter, EventScope};
pub use event::{EventKind, WorkflowEvent};
pub use hub::{EventHub, EventHubMetrics, EventStream, HubEmitter};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink, StdOutSink};
