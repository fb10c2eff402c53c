//! Cache-first RPC client

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::keys::cache_key;
use super::policy::{is_valid, policy_for, CacheDurations};
use crate::blockchain::{Dispatcher, InFlightTracker, RpcError};
use crate::config::Settings;
use crate::db::{CacheRecord, KvStore, Partition};

const SETTINGS_KEY: &str = "explorer_settings";

type SharedCall = Shared<BoxFuture<'static, Result<Value, RpcError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub ratio: f64,
}

/// A decoded record together with the time it was written
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub stored_at: i64,
}

/// Removes a coalesced call from the pending map once its creator is done,
/// including when the creator is dropped mid-flight.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<String, SharedCall>>,
    key: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct CacheClient {
    store: Arc<dyn KvStore>,
    dispatcher: Dispatcher,
    durations: RwLock<CacheDurations>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    in_flight: Arc<InFlightTracker>,
    pending: Mutex<HashMap<String, SharedCall>>,
}

impl CacheClient {
    pub fn new(
        store: Arc<dyn KvStore>,
        dispatcher: Dispatcher,
        durations: CacheDurations,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!("Read-through client using {} store", store.name());

        Self {
            store,
            dispatcher,
            durations: RwLock::new(durations),
            in_flight: Arc::new(InFlightTracker::new(clock.clone())),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Serve `method(params)` from the results partition while valid under
    /// the method's policy, otherwise fetch through the dispatcher and write
    /// the result back. Failed calls are never cached.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let policy = policy_for(method);
        if !policy.is_cacheable() {
            return self.fetch(method, params).await;
        }

        let key = cache_key(method, &params);
        let max_age = self.durations().duration_for(policy);

        if let Some(record) = self.read_record(Partition::Results, &key).await {
            if is_valid(max_age, record.stored_at, self.now()) {
                self.record_hit(&key);
                return Ok(record.value);
            }
        }
        self.record_miss(&key);

        let value = self.fetch_coalesced(&key, method, params).await?;
        self.write_record(Partition::Results, &key, value.clone()).await;

        Ok(value)
    }

    /// Fetch from the network without consulting the cache, still writing the
    /// result back. For callers that keep their own validity rules on top.
    pub async fn refresh(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let policy = policy_for(method);
        if !policy.is_cacheable() {
            return self.fetch(method, params).await;
        }

        let key = cache_key(method, &params);
        self.record_miss(&key);

        let value = self.fetch_coalesced(&key, method, params).await?;
        self.write_record(Partition::Results, &key, value.clone()).await;

        Ok(value)
    }

    /// [`CacheClient::call`] decoded into a typed result
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, RpcError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    async fn fetch(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.in_flight.register(method);
        let result = self.dispatcher.enqueue(method, params).await;
        self.in_flight.finish(id);
        result
    }

    /// Concurrent misses on one key share a single dispatched call
    async fn fetch_coalesced(&self, key: &str, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let (call, _guard) = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.get(key) {
                Some(call) => {
                    debug!("Joining in-flight request for {}", key);
                    (call.clone(), None)
                }
                None => {
                    let dispatcher = self.dispatcher.clone();
                    let tracker = self.in_flight.clone();
                    let method = method.to_string();
                    let call = async move {
                        let id = tracker.register(&method);
                        let result = dispatcher.enqueue(&method, params).await;
                        tracker.finish(id);
                        result
                    }
                    .boxed()
                    .shared();

                    pending.insert(key.to_string(), call.clone());
                    let guard = PendingGuard {
                        pending: &self.pending,
                        key: key.to_string(),
                    };
                    (call, Some(guard))
                }
            }
        };

        call.await
    }

    fn record_hit(&self, key: &str) {
        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Cache hit for {}", key);
        if hits % 100 == 0 {
            info!(
                "Cache stats: {} hits, {} misses",
                hits,
                self.misses.load(Ordering::Relaxed)
            );
        }
    }

    fn record_miss(&self, key: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Cache miss for {}", key);
    }

    async fn read_record(&self, partition: Partition, key: &str) -> Option<CacheRecord> {
        match self.store.get(partition, key).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Cache read failed for {}/{}: {}", partition, key, e);
                None
            }
        }
    }

    async fn write_record(&self, partition: Partition, key: &str, value: Value) {
        let record = CacheRecord::new(key, value, self.now());
        if let Err(e) = self.store.put(partition, record).await {
            warn!("Cache write failed for {}/{}: {}", partition, key, e);
        }
    }

    /// Typed read of a derived record. Store and decode failures read as a miss.
    pub async fn load<T: DeserializeOwned>(&self, partition: Partition, key: &str) -> Option<Cached<T>> {
        let record = self.read_record(partition, key).await?;
        match serde_json::from_value(record.value) {
            Ok(value) => Some(Cached {
                value,
                stored_at: record.stored_at,
            }),
            Err(e) => {
                warn!("Discarding undecodable record {}/{}: {}", partition, key, e);
                None
            }
        }
    }

    /// Like [`CacheClient::load`] but only returns records younger than `max_age`
    pub async fn load_fresh<T: DeserializeOwned>(
        &self,
        partition: Partition,
        key: &str,
        max_age: Duration,
    ) -> Option<T> {
        self.load(partition, key)
            .await
            .filter(|cached| self.is_fresh(cached.stored_at, max_age))
            .map(|cached| cached.value)
    }

    /// Best-effort write of a derived record
    pub async fn save<T: Serialize>(&self, partition: Partition, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(value) => self.write_record(partition, key, value).await,
            Err(e) => warn!("Failed to serialize record {}/{}: {}", partition, key, e),
        }
    }

    pub fn is_fresh(&self, stored_at: i64, max_age: Duration) -> bool {
        is_valid(Some(max_age), stored_at, self.now())
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn durations(&self) -> CacheDurations {
        *self.durations.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the duration table, the concurrency bound and the endpoint.
    /// Invalid values leave the current ones in place. Returns the settings
    /// now in force.
    pub fn update_settings(&self, settings: &Settings) -> Settings {
        *self.durations.write().unwrap_or_else(PoisonError::into_inner) = settings.cache_durations;

        if settings.max_concurrent_requests == 0 {
            warn!("Ignoring max concurrent requests of 0");
        } else {
            self.dispatcher.set_max_concurrent(settings.max_concurrent_requests);
        }

        if settings.rpc_url.trim().is_empty() {
            warn!("Ignoring empty RPC URL");
        } else {
            self.dispatcher.set_endpoint(settings.rpc_url.trim());
        }

        info!("Cache settings updated: {:?}", settings.cache_durations);

        Settings {
            rpc_url: self.dispatcher.endpoint(),
            max_concurrent_requests: self.dispatcher.max_concurrent(),
            cache_durations: self.durations(),
            theme: settings.theme,
        }
    }

    pub async fn load_settings(&self) -> Option<Settings> {
        self.load(Partition::Settings, SETTINGS_KEY)
            .await
            .map(|cached| cached.value)
    }

    pub async fn save_settings(&self, settings: &Settings) {
        self.save(Partition::Settings, SETTINGS_KEY, settings).await;
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = (hits + misses).max(1);

        CacheStats {
            hits,
            misses,
            ratio: hits as f64 / total as f64,
        }
    }

    /// Empty every cache partition and reset the hit/miss counters. Saved
    /// settings are kept. Returns `false` if any partition failed to clear.
    pub async fn clear_all_caches(&self) -> bool {
        let mut cleared = true;

        for partition in Partition::ALL {
            if partition == Partition::Settings {
                continue;
            }
            if let Err(e) = self.store.clear(partition).await {
                warn!("Failed to clear partition {}: {}", partition, e);
                cleared = false;
            }
        }

        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);

        if cleared {
            info!("All caches cleared");
        }
        cleared
    }

    pub fn in_flight(&self) -> &Arc<InFlightTracker> {
        &self.in_flight
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.count()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
