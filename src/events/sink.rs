use std::io::Result as IoResult;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::event::{Event, EventScope};

/// Abstraction over an output target that consumes full [`Event`] objects.
pub trait EventSink: Send + Sync {
    /// Handle a structured event. The sink decides how to serialize it.
    fn handle(&mut self, event: &Event) -> IoResult<()>;
}

/// Default sink: forwards events into the `tracing` pipeline.
///
/// Job and gateway events log at `warn` (they only reach the bus when
/// something needs attention); scheduler and app events log at `info`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        match event.scope {
            EventScope::Job { .. } | EventScope::Gateway { .. } => {
                warn!(scope = event.scope_label(), details = %event.details, "{event}");
            }
            EventScope::Scheduler { .. } | EventScope::App => {
                info!(scope = event.scope_label(), details = %event.details, "{event}");
            }
        }
        Ok(())
    }
}

/// In-memory sink for tests and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all captured events.
    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        self.entries.lock().unwrap().push(event.clone());
        Ok(())
    }
}
