//! Network layer
//!
//! Internal event bus plus the server-sent-event connection to the
//! automation service.

pub mod event_bus;
pub mod sse;

pub use event_bus::{spawn_event_handler, AppEvent, EventBus, EventProcessor};
pub use sse::{ConnectionState, SseManager, SseParser, StreamHealth};
