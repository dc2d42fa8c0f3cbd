//! TTL response cache with singleflight fetch coalescing.
//!
//! Two tiers: a short TTL for volatile reads (fleet positions) and a long TTL
//! for stable reads (rosters, row indexes). Expired entries are evicted
//! lazily on lookup; the scheduler's housekeeping pass calls [`sweep`]
//! periodically. A miss admits exactly one in-flight fetch per key; later
//! callers await the leader's broadcast result instead of issuing redundant
//! concurrent fetches.
//!
//! [`sweep`]: ResponseCache::sweep

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::errors::GatewayError;
use crate::config::CacheConfig;

/// TTL tier selected per call site based on data volatility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlTier {
    /// Volatile data, ~5 minutes by default.
    Short,
    /// Stable data, ~30 minutes by default.
    Long,
}

/// Counters exposed on the health surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
}

enum Slot<V> {
    Ready {
        value: V,
        inserted_at: Instant,
        ttl: Duration,
    },
    InFlight(broadcast::Sender<Result<V, String>>),
}

/// Keyed store of recent read results shared by all jobs hitting one
/// dependency.
pub struct ResponseCache<V> {
    short_ttl: Duration,
    long_ttl: Duration,
    slots: Mutex<FxHashMap<String, Slot<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl<V: Clone + Send + 'static> ResponseCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            short_ttl: config.short_ttl,
            long_ttl: config.long_ttl,
            slots: Mutex::new(FxHashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    fn ttl(&self, tier: TtlTier) -> Duration {
        match tier {
            TtlTier::Short => self.short_ttl,
            TtlTier::Long => self.long_ttl,
        }
    }

    /// Fresh value for `key`, or the result of `fetch` stored under the
    /// tier's TTL.
    ///
    /// Concurrent callers during a miss share one fetch: the first caller
    /// becomes the leader and runs `fetch`; followers await its broadcast
    /// result. A follower observing the leader's failure gets
    /// [`GatewayError::SharedFetch`], which classifies as transient. If the
    /// leader is dropped before reporting, followers re-enter the race.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        tier: TtlTier,
        fetch: F,
    ) -> Result<V, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, GatewayError>>,
    {
        let mut fetch = Some(fetch);
        loop {
            enum Role<V> {
                Hit(V),
                Follower(broadcast::Receiver<Result<V, String>>),
                Leader(broadcast::Sender<Result<V, String>>),
            }

            let role = {
                let mut slots = self.slots.lock().expect("cache poisoned");
                match slots.get(key) {
                    Some(Slot::Ready {
                        value,
                        inserted_at,
                        ttl,
                    }) if inserted_at.elapsed() < *ttl => Role::Hit(value.clone()),
                    Some(Slot::InFlight(tx)) => Role::Follower(tx.subscribe()),
                    _ => {
                        let (tx, _) = broadcast::channel(1);
                        slots.insert(key.to_string(), Slot::InFlight(tx.clone()));
                        Role::Leader(tx)
                    }
                }
            };

            match role {
                Role::Hit(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Role::Follower(mut rx) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    match rx.recv().await {
                        Ok(Ok(value)) => return Ok(value),
                        Ok(Err(message)) => return Err(GatewayError::SharedFetch { message }),
                        // Leader dropped without reporting; race again.
                        Err(_) => continue,
                    }
                }
                Role::Leader(tx) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let fetch = fetch.take().expect("leader role claimed twice");
                    let result = fetch().await;
                    let mut slots = self.slots.lock().expect("cache poisoned");
                    match &result {
                        Ok(value) => {
                            slots.insert(
                                key.to_string(),
                                Slot::Ready {
                                    value: value.clone(),
                                    inserted_at: Instant::now(),
                                    ttl: self.ttl(tier),
                                },
                            );
                            let _ = tx.send(Ok(value.clone()));
                        }
                        Err(err) => {
                            slots.remove(key);
                            let _ = tx.send(Err(err.to_string()));
                        }
                    }
                    return result;
                }
            }
        }
    }

    /// Fresh cached value, if any, without fetching.
    pub fn peek(&self, key: &str) -> Option<V> {
        let mut slots = self.slots.lock().expect("cache poisoned");
        match slots.get(key) {
            Some(Slot::Ready {
                value,
                inserted_at,
                ttl,
            }) if inserted_at.elapsed() < *ttl => Some(value.clone()),
            Some(Slot::Ready { .. }) => {
                slots.remove(key);
                None
            }
            _ => None,
        }
    }

    /// Store a value directly (used by write-through call sites).
    pub fn put(&self, key: &str, value: V, tier: TtlTier) {
        let mut slots = self.slots.lock().expect("cache poisoned");
        slots.insert(
            key.to_string(),
            Slot::Ready {
                value,
                inserted_at: Instant::now(),
                ttl: self.ttl(tier),
            },
        );
    }

    /// Drop the entry for `key`, forcing the next read to fetch.
    pub fn invalidate(&self, key: &str) {
        self.slots.lock().expect("cache poisoned").remove(key);
    }

    /// Evict every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut slots = self.slots.lock().expect("cache poisoned");
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready {
                inserted_at, ttl, ..
            } => inserted_at.elapsed() < *ttl,
            Slot::InFlight(_) => true,
        });
        before - slots.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.slots.lock().expect("cache poisoned").len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}
