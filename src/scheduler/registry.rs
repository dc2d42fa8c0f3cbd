//! Session lifecycle records, one per `(entity, cadence)` pair.
//!
//! The registry replaces per-entity timers with arena-style records indexed
//! by [`SessionKey`]. Sessions are owned and mutated exclusively through this
//! type from the coordinator's tick/result path; job execution code reports
//! outcomes over a channel and never touches a record directly.

use std::sync::Mutex;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{FirstRunPolicy, SchedulerConfig};
use crate::gateway::RetryPolicy;
use crate::providers::EntitySpec;
use crate::types::{Cadence, EntityId, Target};

/// Identity of one schedulable unit.
pub type SessionKey = (EntityId, Cadence);

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    /// Timed out or no longer eligible; removed on the next sweep.
    Expired,
    /// Retry budget exhausted on the last run. Still schedulable at the
    /// natural interval, so a recovered backend heals the session on its own.
    Failed,
}

/// The scheduling record for one entity under one cadence.
#[derive(Clone, Debug)]
pub struct Session {
    pub entity_id: EntityId,
    pub cadence: Cadence,
    pub target: Option<Target>,
    pub interval: Duration,
    pub last_run_at: Option<Instant>,
    pub next_due_at: Instant,
    pub status: SessionStatus,
    pub consecutive_failures: u32,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// At most one outstanding job per key: set when a job is enqueued,
    /// cleared when its result (or cancellation) is applied.
    pub in_flight: bool,
}

impl Session {
    fn key(&self) -> SessionKey {
        (self.entity_id.clone(), self.cadence)
    }
}

/// What the tick loop needs to know about one due session.
#[derive(Clone, Debug)]
pub struct DueSession {
    pub key: SessionKey,
    pub target: Option<Target>,
    /// 1-based attempt number for the job about to be dispatched.
    pub attempt: u32,
}

/// Outcome of applying a transient failure to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Rescheduled with backoff; the session stays Active.
    Rescheduled { attempt: u32, delay: Duration },
    /// Retry budget exhausted; marked Failed and left at the natural
    /// interval.
    Exhausted { attempts: u32 },
}

/// Changes produced by one discovery reconciliation.
#[derive(Clone, Debug, Default)]
pub struct ReconcileReport {
    pub added: Vec<SessionKey>,
    pub removed: Vec<SessionKey>,
    /// Entities skipped because the per-cadence session ceiling was reached.
    pub at_capacity: usize,
}

/// Session counts per status, exposed on the health surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub active: usize,
    pub failed: usize,
    pub expired: usize,
    pub in_flight: usize,
}

/// Shared registry of all sessions, keyed by `(entity, cadence)`.
pub struct SessionRegistry {
    sessions: Mutex<FxHashMap<SessionKey, Session>>,
    max_per_cadence: usize,
    session_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            sessions: Mutex::new(FxHashMap::default()),
            max_per_cadence: config.max_sessions_per_cadence,
            session_timeout: config.session_timeout,
        }
    }

    /// Reconcile against the collaborator-supplied set of eligible entities.
    ///
    /// New entities get Active sessions seeded per the first-run policy;
    /// sessions whose entity disappeared from the set are removed. Existing
    /// sessions keep their schedule but pick up target changes.
    pub fn reconcile(
        &self,
        specs: &[EntitySpec],
        config: &SchedulerConfig,
        now: Instant,
    ) -> ReconcileReport {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        let mut report = ReconcileReport::default();

        let eligible: FxHashMap<SessionKey, &EntitySpec> = specs
            .iter()
            .map(|spec| ((spec.entity_id.clone(), spec.cadence), spec))
            .collect();

        let stale: Vec<SessionKey> = sessions
            .keys()
            .filter(|key| !eligible.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(mut session) = sessions.remove(&key) {
                session.status = SessionStatus::Expired;
                report.removed.push(key);
            }
        }

        for (key, spec) in eligible {
            if let Some(session) = sessions.get_mut(&key) {
                session.target = spec.target.clone();
                continue;
            }
            let cadence_count = sessions.values().filter(|s| s.cadence == key.1).count();
            if cadence_count >= self.max_per_cadence {
                report.at_capacity += 1;
                continue;
            }
            let interval = config.interval(key.1);
            let next_due_at = match config.first_run {
                FirstRunPolicy::Immediate => now,
                FirstRunPolicy::Stagger => now + interval,
            };
            sessions.insert(
                key.clone(),
                Session {
                    entity_id: key.0.clone(),
                    cadence: key.1,
                    target: spec.target.clone(),
                    interval,
                    last_run_at: None,
                    next_due_at,
                    status: SessionStatus::Active,
                    consecutive_failures: 0,
                    created_at: now,
                    expires_at: now + self.session_timeout,
                    in_flight: false,
                },
            );
            report.added.push(key);
        }

        report
    }

    /// Sessions due for dispatch, ordered by due time.
    ///
    /// Failed sessions are included: they stay schedulable at the natural
    /// interval. In-flight sessions are excluded, which is what makes a
    /// repeated tick with nothing newly due dispatch nothing.
    pub fn due(&self, now: Instant) -> Vec<DueSession> {
        let sessions = self.sessions.lock().expect("registry poisoned");
        let mut due: Vec<(Instant, DueSession)> = sessions
            .values()
            .filter(|s| {
                !s.in_flight
                    && s.next_due_at <= now
                    && matches!(s.status, SessionStatus::Active | SessionStatus::Failed)
            })
            .map(|s| {
                (
                    s.next_due_at,
                    DueSession {
                        key: s.key(),
                        target: s.target.clone(),
                        attempt: s.consecutive_failures + 1,
                    },
                )
            })
            .collect();
        due.sort_by_key(|(due_at, _)| *due_at);
        due.into_iter().map(|(_, d)| d).collect()
    }

    /// Mark a session's job as dispatched.
    pub fn begin(&self, key: &SessionKey) {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        if let Some(session) = sessions.get_mut(key) {
            session.in_flight = true;
        }
    }

    /// Undo [`begin`](Self::begin) for a dispatch rejected before execution
    /// (queue full); the session retries on the next natural tick.
    pub fn defer(&self, key: &SessionKey) {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        if let Some(session) = sessions.get_mut(key) {
            session.in_flight = false;
        }
    }

    /// True when the session may still execute (cancellation check at
    /// dequeue time).
    pub fn is_live(&self, key: &SessionKey, now: Instant) -> bool {
        let sessions = self.sessions.lock().expect("registry poisoned");
        match sessions.get(key) {
            Some(session) => {
                now <= session.expires_at && !matches!(session.status, SessionStatus::Expired)
            }
            None => false,
        }
    }

    /// Apply a successful run: failures reset, schedule and expiry advance.
    pub fn finish_success(&self, key: &SessionKey, now: Instant) {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        if let Some(session) = sessions.get_mut(key) {
            session.in_flight = false;
            session.consecutive_failures = 0;
            session.status = SessionStatus::Active;
            session.last_run_at = Some(now);
            session.next_due_at = now + session.interval;
            session.expires_at = now + self.session_timeout;
        }
    }

    /// Apply a transient failure: reschedule with backoff until the retry
    /// budget is exhausted, then mark Failed but keep the natural schedule.
    pub fn finish_transient(
        &self,
        key: &SessionKey,
        policy: &RetryPolicy,
        now: Instant,
    ) -> Option<FailureDisposition> {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        let session = sessions.get_mut(key)?;
        session.in_flight = false;
        session.consecutive_failures += 1;
        if policy.exhausted(session.consecutive_failures) {
            session.status = SessionStatus::Failed;
            let attempts = session.consecutive_failures;
            session.consecutive_failures = 0;
            session.next_due_at = now + session.interval;
            Some(FailureDisposition::Exhausted { attempts })
        } else {
            let delay = policy.delay_for(session.consecutive_failures);
            session.next_due_at = now + delay;
            Some(FailureDisposition::Rescheduled {
                attempt: session.consecutive_failures,
                delay,
            })
        }
    }

    /// Apply a dispatch-level rejection (backpressure, circuit open): no
    /// retry budget consumed, re-attempted after `delay`.
    pub fn finish_deferred(&self, key: &SessionKey, delay: Duration, now: Instant) {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        if let Some(session) = sessions.get_mut(key) {
            session.in_flight = false;
            session.next_due_at = now + delay;
        }
    }

    /// Clear in-flight bookkeeping for a cancelled job, if the session still
    /// exists.
    pub fn finish_cancelled(&self, key: &SessionKey) {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        if let Some(session) = sessions.get_mut(key) {
            session.in_flight = false;
        }
    }

    /// Deregister a session outright (permanent failure or explicit signal).
    pub fn remove(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.lock().expect("registry poisoned").remove(key)
    }

    /// Drop every session past its expiry horizon. Returns the removed keys.
    pub fn expire_overdue(&self, now: Instant) -> Vec<SessionKey> {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        let overdue: Vec<SessionKey> = sessions
            .values()
            .filter(|s| now > s.expires_at && !s.in_flight)
            .map(Session::key)
            .collect();
        for key in &overdue {
            sessions.remove(key);
        }
        overdue
    }

    pub fn get(&self, key: &SessionKey) -> Option<Session> {
        self.sessions
            .lock()
            .expect("registry poisoned")
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counts(&self, cadence: Cadence) -> SessionCounts {
        let sessions = self.sessions.lock().expect("registry poisoned");
        let mut counts = SessionCounts::default();
        for session in sessions.values().filter(|s| s.cadence == cadence) {
            match session.status {
                SessionStatus::Active => counts.active += 1,
                SessionStatus::Failed => counts.failed += 1,
                SessionStatus::Expired => counts.expired += 1,
            }
            if session.in_flight {
                counts.in_flight += 1;
            }
        }
        counts
    }
}
