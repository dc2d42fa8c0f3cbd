//! # Fleetcast: Dual-Cadence Fleet Update Scheduler
//!
//! Fleetcast keeps a fleet-tracking chat service sending periodic location
//! updates without melting its rate-limited backends. One coordinating
//! scheduler drives every tracked entity on two cadences: an hourly
//! user-visible message and a five-minute silent data refresh. Every
//! outbound call crosses a per-dependency gateway composing a token bucket,
//! a circuit breaker, a TTL response cache with singleflight, and
//! transient/permanent failure classification.
//!
//! ## Core Concepts
//!
//! - **Sessions**: One scheduling record per `(entity, cadence)` pair, owned
//!   by the [`scheduler::SessionRegistry`]
//! - **Jobs**: Dispatched units of work executed under a bounded
//!   concurrency ceiling behind the [`scheduler::JobHandler`] seam
//! - **Gateways**: The guarded call path ([`gateway::Gateway`]) plus typed
//!   facades for the store, messenger, and geocoder
//! - **Providers**: Narrow async traits ([`providers`]) the embedding
//!   process implements for its real backends
//! - **Events**: Operator-facing occurrences fanned out by the
//!   [`events::EventBus`]
//!
//! ## Quick Start
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
//!
//! ## Module Guide
//!
//! - [`scheduler`] - The coordinating tick loop, session registry, job
//!   queue, and cadence handlers
//! - [`gateway`] - Rate limiter, circuit breaker, response cache, retry
//!   policy, and the guarded call path
//! - [`providers`] - Collaborator trait seams and the provider error
//!   taxonomy
//! - [`config`] - Construction-time tunables and environment overlay
//! - [`events`] - Operator event bus and sinks
//! - [`health`] - Point-in-time health snapshot
//! - [`telemetry`] - Tracing subscriber setup for binaries

pub mod config;
pub mod events;
pub mod gateway;
pub mod health;
pub mod providers;
pub mod scheduler;
pub mod telemetry;
pub mod types;
