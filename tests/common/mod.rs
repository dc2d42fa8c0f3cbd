#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use fleetcast::providers::{
    DataStore, EntitySource, EntitySpec, Geocoder, Messenger, ProviderError,
};
use fleetcast::types::{Cadence, Target};

/// Scripted failures for one mock method: queued errors pop first, then an
/// optional standing failure applies to every call, then calls succeed.
#[derive(Default)]
pub struct FailureScript {
    queued: Mutex<VecDeque<ProviderError>>,
    standing: Mutex<Option<fn() -> ProviderError>>,
}

impl FailureScript {
    pub fn push(&self, err: ProviderError) {
        self.queued.lock().unwrap().push_back(err);
    }

    pub fn push_unavailable(&self, count: usize) {
        for _ in 0..count {
            self.push(ProviderError::Unavailable("scripted outage".into()));
        }
    }

    /// Every subsequent call fails with the produced error.
    pub fn always(&self, make: fn() -> ProviderError) {
        *self.standing.lock().unwrap() = Some(make);
    }

    pub fn clear(&self) {
        self.queued.lock().unwrap().clear();
        *self.standing.lock().unwrap() = None;
    }

    fn next(&self) -> Option<ProviderError> {
        if let Some(err) = self.queued.lock().unwrap().pop_front() {
            return Some(err);
        }
        self.standing.lock().unwrap().map(|make| make())
    }
}

#[derive(Default)]
pub struct MockStore {
    rows: Mutex<FxHashMap<String, Value>>,
    pub read_failures: FailureScript,
    pub write_failures: FailureScript,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, key: &str, value: Value) {
        self.rows.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn row(&self, key: &str) -> Option<Value> {
        self.rows.lock().unwrap().get(key).cloned()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for MockStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, ProviderError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.read_failures.next() {
            return Err(err);
        }
        Ok(self.rows.lock().unwrap().get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), ProviderError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.write_failures.next() {
            return Err(err);
        }
        self.rows.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockMessenger {
    sent: Mutex<Vec<(Target, Value)>>,
    pub failures: FailureScript,
}

impl MockMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(Target, Value)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    async fn send(&self, target: &Target, payload: &Value) -> Result<(), ProviderError> {
        if let Some(err) = self.failures.next() {
            return Err(err);
        }
        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), payload.clone()));
        Ok(())
    }
}

pub struct MockGeocoder {
    address: Mutex<Option<String>>,
    pub failures: FailureScript,
    calls: AtomicUsize,
}

impl Default for MockGeocoder {
    fn default() -> Self {
        Self {
            address: Mutex::new(Some("1 Main St, Springfield".to_string())),
            failures: FailureScript::default(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockGeocoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_address(&self, address: Option<&str>) {
        *self.address.lock().unwrap() = address.map(str::to_string);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn reverse_geocode(
        &self,
        _lat: f64,
        _lon: f64,
    ) -> Result<Option<String>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.next() {
            return Err(err);
        }
        Ok(self.address.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MockSource {
    specs: Mutex<Vec<EntitySpec>>,
    pub failures: FailureScript,
}

impl MockSource {
    pub fn new(specs: Vec<EntitySpec>) -> Arc<Self> {
        Arc::new(Self {
            specs: Mutex::new(specs),
            failures: FailureScript::default(),
        })
    }

    pub fn set_specs(&self, specs: Vec<EntitySpec>) {
        *self.specs.lock().unwrap() = specs;
    }
}

#[async_trait]
impl EntitySource for MockSource {
    async fn eligible(&self) -> Result<Vec<EntitySpec>, ProviderError> {
        if let Some(err) = self.failures.next() {
            return Err(err);
        }
        Ok(self.specs.lock().unwrap().clone())
    }
}

pub fn visible_spec(id: &str) -> EntitySpec {
    EntitySpec::new(id, Cadence::Visible).with_target(Target::from(id))
}

pub fn silent_spec(id: &str) -> EntitySpec {
    EntitySpec::new(id, Cadence::Silent)
}

pub fn position_row(lat: f64, lon: f64) -> Value {
    json!({"lat": lat, "lon": lon, "speed_kmh": 42, "heading": 180})
}
