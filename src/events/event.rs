use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Cadence, Dependency, EntityId};

/// One operator-facing occurrence: a job outcome, a circuit transition, a
/// backpressure rejection, a deactivation signal.
///
/// Events are the narrow reporting channel out of the scheduler and gateway.
/// Component-local noise (single transient retries, cache misses) is absorbed
/// before it reaches here; what does reach here is worth an operator's
/// attention or a dashboard row.
///
/// # Examples
///
/// ```
/// use fleetcast::events::Event;
/// use fleetcast::types::{Cadence, EntityId};
/// use serde_json::json;
///
/// let event = Event::job(
///     EntityId::from("group:12"),
///     Cadence::Visible,
///     2,
///     "retries exhausted",
/// )
/// .with_details(json!({"attempts": 3}));
///
/// assert_eq!(event.message(), "retries exhausted");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(default = "Utc::now")]
    pub when: DateTime<Utc>,
    pub scope: EventScope,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

/// Where in the system an event originated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum EventScope {
    /// Coordinator-level: tick summaries, discovery changes, housekeeping.
    Scheduler { cadence: Option<Cadence> },
    /// One job's terminal outcome for one session.
    Job {
        entity_id: EntityId,
        cadence: Cadence,
        attempt: u32,
    },
    /// Gateway-level: circuit transitions, quota backoff, classification.
    Gateway { dependency: Dependency },
    /// Process-level.
    App,
}

impl Event {
    pub fn scheduler(cadence: Option<Cadence>, message: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            scope: EventScope::Scheduler { cadence },
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn job(
        entity_id: EntityId,
        cadence: Cadence,
        attempt: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            when: Utc::now(),
            scope: EventScope::Job {
                entity_id,
                cadence,
                attempt,
            },
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn gateway(dependency: Dependency, message: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            scope: EventScope::Gateway { dependency },
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn app(message: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            scope: EventScope::App,
            message: message.into(),
            details: Value::Null,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Short label for the originating scope, used by sinks and tests.
    pub fn scope_label(&self) -> &'static str {
        match &self.scope {
            EventScope::Scheduler { .. } => "scheduler",
            EventScope::Job { .. } => "job",
            EventScope::Gateway { .. } => "gateway",
            EventScope::App => "app",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            EventScope::Scheduler { cadence: Some(c) } => {
                write!(f, "[scheduler/{c}] {}", self.message)
            }
            EventScope::Scheduler { cadence: None } => write!(f, "[scheduler] {}", self.message),
            EventScope::Job {
                entity_id,
                cadence,
                attempt,
            } => write!(f, "[{entity_id}/{cadence}#{attempt}] {}", self.message),
            EventScope::Gateway { dependency } => write!(f, "[{dependency}] {}", self.message),
            EventScope::App => write!(f, "{}", self.message),
        }
    }
}
