//! The coordinating scheduler: two cadences, one tick loop.
//!
//! A single [`Scheduler`] drives every session instead of one timer per
//! entity. Each tick it applies finished job results, reconciles the
//! registry against the collaborator-supplied eligibility roster, selects
//! due sessions, and enqueues jobs spread with uniform jitter. Each queued
//! job sleeps out its jitter on its own task and executes under a global
//! concurrency ceiling, reporting its outcome back over a channel; sessions
//! are only ever mutated on this tick/result path.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetcast::config::FleetcastConfig;
//! use fleetcast::events::EventBus;
//! use fleetcast::scheduler::{Collaborators, Handlers, Scheduler};
//! # fn collaborators() -> Collaborators { unimplemented!() }
//!
//! # async fn demo() {
//! let bus = EventBus::default();
//! bus.listen();
//!
//! let scheduler = Scheduler::new(
//!     FleetcastConfig::from_env(),
//!     collaborators(),
//!     Handlers::default(),
//!     bus.sender(),
//! );
//! let runner = Arc::clone(&scheduler);
//! tokio::spawn(async move { runner.run().await });
//! # }
//! ```

pub mod handlers;
pub mod job;
pub mod queue;
pub mod registry;

pub use handlers::{RenderFn, SilentRefreshHandler, VisibleUpdateHandler};
pub use job::{Job, JobContext, JobHandler, JobOutcome, JobReport};
pub use queue::{DispatchRejected, JobQueue};
pub use registry::{
    DueSession, FailureDisposition, ReconcileReport, Session, SessionKey, SessionRegistry,
    SessionStatus,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::sync::{Semaphore, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{FleetcastConfig, SchedulerConfig};
use crate::events::Event;
use crate::gateway::{
    GeocoderGateway, MessengerGateway, ResponseCache, RetryPolicy, StoreGateway, TtlTier,
};
use crate::health::{
    CacheHealth, CadenceSessions, DependencyHealth, HealthSnapshot, QueueHealth, SchedulerCounters,
};
use crate::providers::{DataStore, EntitySource, EntitySpec, Geocoder, Messenger};
use crate::types::Cadence;

/// The external collaborators the scheduler fronts with gateways.
pub struct Collaborators {
    pub store: Arc<dyn DataStore>,
    pub messenger: Arc<dyn Messenger>,
    pub geocoder: Arc<dyn Geocoder>,
    pub source: Arc<dyn EntitySource>,
}

/// One handler per cadence.
pub struct Handlers {
    pub visible: Arc<dyn JobHandler>,
    pub silent: Arc<dyn JobHandler>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self {
            visible: Arc::new(VisibleUpdateHandler::passthrough()),
            silent: Arc::new(SilentRefreshHandler::new()),
        }
    }
}

#[derive(Default)]
struct Counters {
    visible_sent: AtomicU64,
    silent_refreshes: AtomicU64,
    retries_exhausted: AtomicU64,
    sessions_deregistered: AtomicU64,
    backpressure_rejections: AtomicU64,
    jobs_cancelled: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SchedulerCounters {
        SchedulerCounters {
            visible_sent: self.visible_sent.load(Ordering::Relaxed),
            silent_refreshes: self.silent_refreshes.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            sessions_deregistered: self.sessions_deregistered.load(Ordering::Relaxed),
            backpressure_rejections: self.backpressure_rejections.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
        }
    }
}

const ROSTER_KEY: &str = "roster";

/// The dual-cadence coordinator.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: SessionRegistry,
    queue: JobQueue,
    context: JobContext,
    handlers: Handlers,
    source: Arc<dyn EntitySource>,
    roster_cache: ResponseCache<Vec<EntitySpec>>,
    retry: RetryPolicy,
    results_tx: flume::Sender<JobReport>,
    results_rx: flume::Receiver<JobReport>,
    semaphore: Arc<Semaphore>,
    started_at: Instant,
    shutdown: watch::Sender<bool>,
    events: flume::Sender<Event>,
    counters: Counters,
}

impl Scheduler {
    pub fn new(
        config: FleetcastConfig,
        collaborators: Collaborators,
        handlers: Handlers,
        events: flume::Sender<Event>,
    ) -> Arc<Self> {
        let context = JobContext {
            store: Arc::new(StoreGateway::new(
                collaborators.store,
                &config.store,
                &config.cache,
                events.clone(),
            )),
            messenger: Arc::new(MessengerGateway::new(
                collaborators.messenger,
                &config.messenger,
                events.clone(),
            )),
            geocoder: Arc::new(GeocoderGateway::new(
                collaborators.geocoder,
                &config.geocoder,
                &config.cache,
                events.clone(),
            )),
            events: events.clone(),
        };

        let (results_tx, results_rx) = flume::unbounded();
        let (shutdown, _) = watch::channel(false);
        let scheduler = config.scheduler.clone();

        Arc::new(Self {
            registry: SessionRegistry::new(&scheduler),
            queue: JobQueue::new(scheduler.queue_capacity),
            context,
            handlers,
            source: collaborators.source,
            roster_cache: ResponseCache::new(&config.cache),
            retry: RetryPolicy::new(&scheduler.retry),
            results_tx,
            results_rx,
            semaphore: Arc::new(Semaphore::new(scheduler.max_concurrent_sends)),
            started_at: Instant::now(),
            shutdown,
            events,
            counters: Counters::default(),
            config: scheduler,
        })
    }

    /// Drive both cadences until [`shutdown`](Self::shutdown) is called.
    ///
    /// Spawns the queue drain, then loops the coordinating tick and the
    /// housekeeping sweep.
    pub async fn run(self: Arc<Self>) {
        {
            let drainer = Arc::clone(&self);
            let rx = self.queue.receiver();
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move { drainer.drain(rx, shutdown).await });
        }

        let mut tick = tokio::time::interval(self.config.tick_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut housekeeping = tokio::time::interval(self.config.housekeeping_interval);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.subscribe();

        info!(
            visible_interval = ?self.config.visible_interval,
            silent_interval = ?self.config.silent_interval,
            jitter_max = ?self.config.jitter_max,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => self.tick().await,
                _ = housekeeping.tick() => self.housekeeping(),
            }
        }
        info!("scheduler stopped");
    }

    /// Request a cooperative stop of the run loop and queue drain.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// One coordinating pass: apply results, reconcile discovery, dispatch
    /// due sessions with jitter.
    pub async fn tick(&self) {
        self.apply_results();
        self.discover().await;
        self.dispatch_due();
    }

    /// Apply every finished job result waiting on the channel.
    pub fn apply_results(&self) {
        while let Ok(report) = self.results_rx.try_recv() {
            self.apply(report);
        }
    }

    async fn discover(&self) {
        let roster = self
            .roster_cache
            .get_or_fetch(ROSTER_KEY, TtlTier::Long, || async {
                self.context
                    .store
                    .gateway()
                    .call("eligible", self.source.eligible())
                    .await
            })
            .await;

        let specs = match roster {
            Ok(specs) => specs,
            // Keep the existing registry on discovery failures; sessions
            // only leave through an explicit signal or expiry.
            Err(err) => {
                warn!(%err, "eligibility discovery failed, keeping current sessions");
                return;
            }
        };

        let report = self.registry.reconcile(&specs, &self.config, Instant::now());
        if !report.added.is_empty() || !report.removed.is_empty() {
            self.emit(
                Event::scheduler(None, "roster reconciled").with_details(json!({
                    "added": report.added.len(),
                    "removed": report.removed.len(),
                })),
            );
        }
        if report.at_capacity > 0 {
            self.emit(
                Event::scheduler(None, "session ceiling reached, entities skipped")
                    .with_details(json!({"skipped": report.at_capacity})),
            );
        }
    }

    fn dispatch_due(&self) {
        let now = Instant::now();
        let warmup = self.started_at.elapsed() < self.config.warmup_hold;
        let due = self.registry.due(now);
        if due.is_empty() {
            return;
        }

        let mut jobs = Vec::with_capacity(due.len());
        let mut held_back = 0usize;
        for session in due {
            // Visible sends hold until upstream data has refreshed after a
            // restart; silent refreshes are exempt.
            if warmup && session.key.1 == Cadence::Visible {
                held_back += 1;
                continue;
            }
            let dispatch_at = now + self.draw_jitter();
            jobs.push(Job::new(
                session.key,
                session.target,
                dispatch_at,
                session.attempt,
            ));
        }
        if held_back > 0 {
            debug!(held_back, "visible sessions held for warmup");
        }
        // Near-due jobs leave the queue first.
        jobs.sort_by_key(|job| job.dispatch_at);

        let mut rejected = 0usize;
        for job in jobs {
            let key = job.key.clone();
            self.registry.begin(&key);
            if let Err(err) = self.queue.dispatch(job) {
                debug!(entity = %key.0, cadence = %key.1, %err, "dispatch rejected");
                self.registry.defer(&key);
                self.counters
                    .backpressure_rejections
                    .fetch_add(1, Ordering::Relaxed);
                rejected += 1;
            }
        }
        if rejected > 0 {
            self.emit(
                Event::scheduler(None, "job queue full, dispatches deferred")
                    .with_details(json!({"rejected": rejected})),
            );
        }
    }

    fn draw_jitter(&self) -> Duration {
        let max = self.config.jitter_max;
        if max.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::rng().random_range(0.0..max.as_secs_f64()))
    }

    fn apply(&self, report: JobReport) {
        let now = Instant::now();
        let JobReport { job, outcome } = report;
        let key = job.key.clone();
        match outcome {
            JobOutcome::Success => {
                self.registry.finish_success(&key, now);
                match job.cadence {
                    Cadence::Visible => &self.counters.visible_sent,
                    Cadence::Silent => &self.counters.silent_refreshes,
                }
                .fetch_add(1, Ordering::Relaxed);
                debug!(entity = %key.0, cadence = %key.1, "job succeeded");
            }
            JobOutcome::Transient(err) => {
                match self.registry.finish_transient(&key, &self.retry, now) {
                    Some(FailureDisposition::Rescheduled { attempt, delay }) => {
                        debug!(
                            entity = %key.0,
                            cadence = %key.1,
                            attempt,
                            ?delay,
                            %err,
                            "transient failure, rescheduled with backoff"
                        );
                    }
                    Some(FailureDisposition::Exhausted { attempts }) => {
                        self.counters
                            .retries_exhausted
                            .fetch_add(1, Ordering::Relaxed);
                        self.emit(
                            Event::job(
                                key.0.clone(),
                                key.1,
                                attempts,
                                "retries exhausted, session marked failed",
                            )
                            .with_details(json!({"error": err.to_string()})),
                        );
                    }
                    None => {}
                }
            }
            JobOutcome::Permanent(err) => {
                self.registry.remove(&key);
                self.counters
                    .sessions_deregistered
                    .fetch_add(1, Ordering::Relaxed);
                let message = if err.is_entity_gone() {
                    "entity gone, session deregistered"
                } else {
                    "permanent failure, session deregistered"
                };
                self.emit(
                    Event::job(key.0.clone(), key.1, job.attempt, message)
                        .with_details(json!({"error": err.to_string()})),
                );
            }
            JobOutcome::Backpressure => {
                // Re-attempted on the next natural tick; no retry budget
                // consumed.
                self.registry.finish_deferred(&key, Duration::ZERO, now);
                self.counters
                    .backpressure_rejections
                    .fetch_add(1, Ordering::Relaxed);
                debug!(entity = %key.0, cadence = %key.1, "execution hit backpressure, deferred");
            }
            JobOutcome::CircuitOpen { retry_after } => {
                self.registry.finish_deferred(&key, retry_after, now);
                debug!(
                    entity = %key.0,
                    cadence = %key.1,
                    ?retry_after,
                    "circuit open, deferred without consuming retries"
                );
            }
            JobOutcome::Cancelled => {
                self.registry.finish_cancelled(&key);
                self.counters.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(entity = %key.0, cadence = %key.1, "job cancelled before execution");
            }
        }
    }

    /// Dequeue jobs and give each its own task. The semaphore, not this
    /// loop, bounds concurrent executions, so a job sleeping out a long
    /// jitter never delays a nearer-due one queued behind it. Tasks are
    /// bounded by the registry: at most one in-flight job per session.
    async fn drain(
        self: Arc<Self>,
        rx: flume::Receiver<Job>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                job = rx.recv_async() => match job {
                    Err(_) => break,
                    Ok(job) => {
                        let runner = Arc::clone(&self);
                        tokio::spawn(async move { runner.execute(job).await });
                    }
                }
            }
        }
    }

    async fn execute(&self, job: Job) {
        // Dequeue-time cancellation: an expired or deregistered session's
        // job is dropped without any gateway call.
        if !self.registry.is_live(&job.key, Instant::now()) {
            self.report(job, JobOutcome::Cancelled);
            return;
        }
        tokio::time::sleep_until(job.dispatch_at).await;
        if *self.shutdown.borrow() || !self.registry.is_live(&job.key, Instant::now()) {
            self.report(job, JobOutcome::Cancelled);
            return;
        }

        let Ok(_permit) = self.semaphore.acquire().await else {
            return;
        };
        let handler = match job.cadence {
            Cadence::Visible => Arc::clone(&self.handlers.visible),
            Cadence::Silent => Arc::clone(&self.handlers.silent),
        };
        let result = handler.run(&job, &self.context).await;
        self.report(job, JobOutcome::from_result(result));
    }

    fn report(&self, job: Job, outcome: JobOutcome) {
        let _ = self.results_tx.send(JobReport { job, outcome });
    }

    /// Expire overdue sessions and evict stale cache entries.
    pub fn housekeeping(&self) {
        let expired = self.registry.expire_overdue(Instant::now());
        for key in &expired {
            self.emit(Event::scheduler(
                Some(key.1),
                format!("session expired: {}", key.0),
            ));
        }
        let swept = self.context.store.sweep_cache()
            + self.context.geocoder.sweep_cache()
            + self.roster_cache.sweep();
        debug!(expired = expired.len(), swept, "housekeeping complete");
    }

    /// Point-in-time health snapshot for the liveness surface.
    pub fn health(&self) -> HealthSnapshot {
        let store = self.context.store.gateway();
        let messenger = self.context.messenger.gateway();
        let geocoder = self.context.geocoder.gateway();
        HealthSnapshot {
            when: chrono::Utc::now(),
            sessions: CadenceSessions {
                visible: self.registry.counts(Cadence::Visible),
                silent: self.registry.counts(Cadence::Silent),
            },
            queue: QueueHealth {
                depth: self.queue.depth(),
                capacity: self.queue.capacity(),
            },
            dependencies: vec![
                DependencyHealth {
                    dependency: store.dependency(),
                    circuit: store.circuit_state(),
                    limiter_utilization: store.limiter_utilization(),
                },
                DependencyHealth {
                    dependency: messenger.dependency(),
                    circuit: messenger.circuit_state(),
                    limiter_utilization: messenger.limiter_utilization(),
                },
                DependencyHealth {
                    dependency: geocoder.dependency(),
                    circuit: geocoder.circuit_state(),
                    limiter_utilization: geocoder.limiter_utilization(),
                },
            ],
            caches: CacheHealth {
                store: self.context.store.cache_stats(),
                geocoder: self.context.geocoder.cache_stats(),
            },
            counters: self.counters.snapshot(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn context(&self) -> &JobContext {
        &self.context
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}
