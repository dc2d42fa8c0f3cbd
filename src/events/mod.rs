//! Operator event reporting: structured events, sinks, and a fan-out bus.
//!
//! Only reportable occurrences travel here (exhausted retries, permanent
//! failures, circuit transitions, backpressure, deactivations). Routine
//! progress stays on the `tracing` debug level inside each component.

pub mod bus;
pub mod event;
pub mod sink;

pub use bus::EventBus;
pub use event::{Event, EventScope};
pub use sink::{EventSink, MemorySink, TracingSink};
