//! Configuration surface for the scheduler and gateway.
//!
//! All tunables are explicit construction-time structs; nothing is reassigned
//! at runtime. Defaults match the production service this crate grew out of
//! (hourly visible cadence, 5-minute silent cadence, 180 store requests per
//! minute, 5/30-minute cache tiers). [`FleetcastConfig::from_env`] overlays
//! `FLEETCAST_*` environment variables on those defaults, loading a `.env`
//! file first when present.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use fleetcast::config::{FleetcastConfig, FirstRunPolicy};
//!
//! let config = FleetcastConfig::default()
//!     .with_jitter_max(Duration::from_secs(600))
//!     .with_first_run(FirstRunPolicy::Stagger);
//!
//! assert_eq!(config.scheduler.jitter_max, Duration::from_secs(600));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Dependency;

/// Token-bucket admission settings for one downstream dependency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Bucket capacity and per-minute refill ceiling.
    pub max_per_minute: u32,
    /// How long a caller waits for a token before the attempt is rejected
    /// as backpressure.
    pub acquire_timeout: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 60,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Circuit-breaker thresholds for one downstream dependency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive transient failures before the circuit opens.
    pub threshold: u32,
    /// How long an open circuit fails fast before allowing one trial call.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// TTL tiers for the response cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Tier for volatile data (fleet positions).
    pub short_ttl: Duration,
    /// Tier for stable data (rosters, row indexes).
    pub long_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            short_ttl: Duration::from_secs(300),
            long_ttl: Duration::from_secs(1800),
        }
    }
}

/// Retry and backoff policy applied to transient failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per job before the session is marked failed (1-based).
    pub max_attempts: u32,
    /// Base delay; attempt `n` backs off `base * 2^(n-1)`, capped.
    pub backoff_base: Duration,
    /// Upper bound on any single backoff delay.
    pub backoff_cap: Duration,
    /// Fraction of the delay added as random jitter in `[0, factor)`.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            jitter_factor: 0.1,
        }
    }
}

/// Per-dependency gateway settings: admission, circuit, retry, call timeout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub limiter: LimiterConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    /// Hard timeout on every outbound call; a timed-out call counts as a
    /// transient failure.
    pub call_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            limiter: LimiterConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Production defaults for the given dependency.
    ///
    /// The store tolerates a higher ceiling but trips a patient breaker; the
    /// messenger ceiling matches chat-provider fan-out limits; the geocoder
    /// sits in between with a short call timeout.
    #[must_use]
    pub fn for_dependency(dependency: Dependency) -> Self {
        match dependency {
            Dependency::Store => Self {
                limiter: LimiterConfig {
                    max_per_minute: 180,
                    ..LimiterConfig::default()
                },
                breaker: BreakerConfig {
                    threshold: 10,
                    ..BreakerConfig::default()
                },
                ..Self::default()
            },
            Dependency::Messenger => Self {
                limiter: LimiterConfig {
                    max_per_minute: 60,
                    ..LimiterConfig::default()
                },
                ..Self::default()
            },
            Dependency::Geocoder => Self {
                limiter: LimiterConfig {
                    max_per_minute: 120,
                    ..LimiterConfig::default()
                },
                call_timeout: Duration::from_secs(5),
                ..Self::default()
            },
        }
    }
}

/// Seeding policy for sessions discovered at startup or mid-run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstRunPolicy {
    /// New sessions fire on the next tick (still jitter-spread).
    Immediate,
    /// New sessions wait one full interval, avoiding a fresh-boot herd.
    Stagger,
}

/// Coordinator settings: cadences, jitter, concurrency, session lifecycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval of the visible (user-facing message) cadence.
    pub visible_interval: Duration,
    /// Interval of the silent (internal refresh) cadence.
    pub silent_interval: Duration,
    /// Period of the coordinating tick; must stay below the smallest cadence
    /// interval so due sessions are discovered promptly.
    pub tick_period: Duration,
    /// Upper bound of the uniform per-job dispatch jitter.
    pub jitter_max: Duration,
    /// Global ceiling on simultaneously in-flight job executions. Bounds
    /// parallelism; the rate limiters bound throughput.
    pub max_concurrent_sends: usize,
    /// Bounded job-queue capacity; enqueues beyond it are rejected as
    /// backpressure.
    pub queue_capacity: usize,
    /// Ceiling on active sessions per cadence.
    pub max_sessions_per_cadence: usize,
    /// Horizon after which a session that was never refreshed expires.
    pub session_timeout: Duration,
    /// Hold on visible-cadence dispatch after process start so upstream data
    /// has refreshed before the first user-facing send. Silent jobs are
    /// exempt.
    pub warmup_hold: Duration,
    pub first_run: FirstRunPolicy,
    /// Period of the housekeeping sweep (expired sessions, stale cache).
    pub housekeeping_interval: Duration,
    /// Session-level retry budget and backoff for transient job failures.
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            visible_interval: Duration::from_secs(3600),
            silent_interval: Duration::from_secs(300),
            tick_period: Duration::from_secs(30),
            jitter_max: Duration::from_secs(900),
            max_concurrent_sends: 12,
            queue_capacity: 1000,
            max_sessions_per_cadence: 500,
            session_timeout: Duration::from_secs(24 * 3600),
            warmup_hold: Duration::from_secs(300),
            first_run: FirstRunPolicy::Immediate,
            housekeeping_interval: Duration::from_secs(1800),
            retry: RetryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Interval for the given cadence.
    #[must_use]
    pub fn interval(&self, cadence: crate::types::Cadence) -> Duration {
        match cadence {
            crate::types::Cadence::Visible => self.visible_interval,
            crate::types::Cadence::Silent => self.silent_interval,
        }
    }
}

/// Top-level configuration: the scheduler plus one gateway block per
/// downstream dependency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FleetcastConfig {
    pub scheduler: SchedulerConfig,
    pub store: GatewayConfig,
    pub messenger: GatewayConfig,
    pub geocoder: GatewayConfig,
    pub cache: CacheConfig,
}

impl Default for FleetcastConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            store: GatewayConfig::for_dependency(Dependency::Store),
            messenger: GatewayConfig::for_dependency(Dependency::Messenger),
            geocoder: GatewayConfig::for_dependency(Dependency::Geocoder),
            cache: CacheConfig::default(),
        }
    }
}

impl FleetcastConfig {
    /// Build a configuration from `FLEETCAST_*` environment variables layered
    /// over the defaults. Unset or unparseable variables fall back silently.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        let s = &mut config.scheduler;
        s.visible_interval = env_secs("FLEETCAST_VISIBLE_INTERVAL_SECS", s.visible_interval);
        s.silent_interval = env_secs("FLEETCAST_SILENT_INTERVAL_SECS", s.silent_interval);
        s.tick_period = env_secs("FLEETCAST_TICK_PERIOD_SECS", s.tick_period);
        s.jitter_max = env_secs("FLEETCAST_JITTER_MAX_SECS", s.jitter_max);
        s.max_concurrent_sends =
            env_usize("FLEETCAST_MAX_CONCURRENT_SENDS", s.max_concurrent_sends);
        s.queue_capacity = env_usize("FLEETCAST_JOB_QUEUE_MAX_SIZE", s.queue_capacity);
        s.max_sessions_per_cadence =
            env_usize("FLEETCAST_MAX_SESSIONS_PER_CADENCE", s.max_sessions_per_cadence);
        s.session_timeout = env_secs("FLEETCAST_SESSION_TIMEOUT_SECS", s.session_timeout);
        s.warmup_hold = env_secs("FLEETCAST_WARMUP_HOLD_SECS", s.warmup_hold);

        config.store.limiter.max_per_minute = env_u32(
            "FLEETCAST_STORE_MAX_REQUESTS_PER_MINUTE",
            config.store.limiter.max_per_minute,
        );
        config.messenger.limiter.max_per_minute = env_u32(
            "FLEETCAST_MESSENGER_MAX_REQUESTS_PER_MINUTE",
            config.messenger.limiter.max_per_minute,
        );
        config.geocoder.limiter.max_per_minute = env_u32(
            "FLEETCAST_GEOCODER_MAX_REQUESTS_PER_MINUTE",
            config.geocoder.limiter.max_per_minute,
        );
        config.cache.short_ttl = env_secs("FLEETCAST_CACHE_SHORT_TTL_SECS", config.cache.short_ttl);
        config.cache.long_ttl = env_secs("FLEETCAST_CACHE_LONG_TTL_SECS", config.cache.long_ttl);

        config
    }

    /// Gateway block for the given dependency.
    #[must_use]
    pub fn gateway(&self, dependency: Dependency) -> &GatewayConfig {
        match dependency {
            Dependency::Store => &self.store,
            Dependency::Messenger => &self.messenger,
            Dependency::Geocoder => &self.geocoder,
        }
    }

    #[must_use]
    pub fn with_jitter_max(mut self, jitter_max: Duration) -> Self {
        self.scheduler.jitter_max = jitter_max;
        self
    }

    #[must_use]
    pub fn with_first_run(mut self, policy: FirstRunPolicy) -> Self {
        self.scheduler.first_run = policy;
        self
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    match std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok()) {
        Some(secs) => Duration::from_secs(secs),
        None => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cadence;

    #[test]
    fn defaults_match_production_values() {
        let config = FleetcastConfig::default();
        assert_eq!(config.scheduler.visible_interval, Duration::from_secs(3600));
        assert_eq!(config.scheduler.silent_interval, Duration::from_secs(300));
        assert_eq!(config.store.limiter.max_per_minute, 180);
        assert_eq!(config.messenger.limiter.max_per_minute, 60);
        assert_eq!(config.cache.long_ttl, Duration::from_secs(1800));
    }

    #[test]
    fn interval_follows_cadence() {
        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.interval(Cadence::Visible), scheduler.visible_interval);
        assert_eq!(scheduler.interval(Cadence::Silent), scheduler.silent_interval);
    }

    #[test]
    fn builders_override_fields() {
        let config = FleetcastConfig::default()
            .with_jitter_max(Duration::from_secs(60))
            .with_first_run(FirstRunPolicy::Stagger);
        assert_eq!(config.scheduler.jitter_max, Duration::from_secs(60));
        assert_eq!(config.scheduler.first_run, FirstRunPolicy::Stagger);
    }
}
