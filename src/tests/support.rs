//! Shared fixtures: a scripted transport, a store that always fails and a
//! service wired to both with a manual clock

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::blockchain::{Dispatcher, RpcError, RpcTransport};
use crate::cache::{CacheClient, CacheDurations, ManualClock};
use crate::db::{CacheRecord, KvStore, MemoryStore, Partition, StoreError};
use crate::service::ExplorerService;

pub const START_MILLIS: i64 = 1_700_000_000_000;

type Responder = Box<dyn Fn(&[Value]) -> Result<Value, RpcError> + Send + Sync>;

/// Transport answering from per-method closures. Unknown methods fail the way
/// a node reports them.
#[derive(Default)]
pub struct MockTransport {
    responders: Mutex<HashMap<String, Responder>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    completed: Mutex<Vec<(String, Vec<Value>)>>,
    latency: Mutex<Duration>,
    live: AtomicUsize,
    peak: AtomicUsize,
    endpoint: Mutex<String>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond<F>(&self, method: &str, responder: F)
    where
        F: Fn(&[Value]) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.responders
            .lock()
            .unwrap()
            .insert(method.to_string(), Box::new(responder));
    }

    pub fn respond_value(&self, method: &str, value: Value) {
        self.respond(method, move |_| Ok(value.clone()));
    }

    pub fn fail(&self, method: &str, message: &str) {
        let message = message.to_string();
        self.respond(method, move |_| {
            Err(RpcError::Remote {
                code: -5,
                message: message.clone(),
            })
        });
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_log(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn completion_log(&self) -> Vec<(String, Vec<Value>)> {
        self.completed.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn send(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.to_vec()));

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = match self.responders.lock().unwrap().get(method) {
            Some(responder) => responder(params),
            None => Err(RpcError::Remote {
                code: -32601,
                message: format!("Method not found: {}", method),
            }),
        };

        self.live.fetch_sub(1, Ordering::SeqCst);
        self.completed
            .lock()
            .unwrap()
            .push((method.to_string(), params.to_vec()));

        result
    }

    fn set_endpoint(&self, url: &str) {
        *self.endpoint.lock().unwrap() = url.to_string();
    }

    fn endpoint(&self) -> String {
        self.endpoint.lock().unwrap().clone()
    }
}

/// Store whose every operation fails
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _partition: Partition, _key: &str) -> Result<Option<CacheRecord>, StoreError> {
        Err(StoreError::Unavailable("offline".to_string()))
    }

    async fn put(&self, _partition: Partition, _record: CacheRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("offline".to_string()))
    }

    async fn delete(&self, _partition: Partition, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("offline".to_string()))
    }

    async fn clear(&self, _partition: Partition) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("offline".to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<dyn KvStore>,
    pub client: Arc<CacheClient>,
    pub service: Arc<ExplorerService>,
}

pub fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStore::default()))
}

pub fn harness_with_store(store: Arc<dyn KvStore>) -> Harness {
    let transport = Arc::new(MockTransport::new());
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let dispatcher = Dispatcher::new(transport.clone(), 50);
    let client = Arc::new(CacheClient::new(
        store.clone(),
        dispatcher,
        CacheDurations::default(),
        clock.clone(),
    ));
    let service = Arc::new(ExplorerService::new(client.clone()));

    Harness {
        transport,
        clock,
        store,
        client,
        service,
    }
}

/// A 34 character address that decodes to 25 bytes
pub fn address(fill: char) -> String {
    format!("E{}", fill.to_string().repeat(33))
}

/// Deterministic 64 hex character id
pub fn txid(n: u64) -> String {
    format!("{:064x}", n)
}

/// Verbose transaction as `getrawtransaction` returns it
pub fn tx_json(id: &str, inputs: &[(&str, u32)], outputs: &[(f64, &str)], height: Option<u64>) -> Value {
    let vin: Vec<Value> = inputs
        .iter()
        .map(|(prev, vout)| json!({ "txid": prev, "vout": vout, "sequence": 4294967295u64 }))
        .collect();
    let vout: Vec<Value> = outputs
        .iter()
        .enumerate()
        .map(|(n, (value, address))| {
            json!({
                "value": value,
                "n": n,
                "scriptPubKey": { "addresses": [address], "type": "pubkeyhash" }
            })
        })
        .collect();

    let mut tx = json!({ "txid": id, "size": 225, "version": 2, "vin": vin, "vout": vout });
    if let Some(height) = height {
        tx["blockhash"] = json!(txid(1_000_000 + height));
        tx["height"] = json!(height);
        tx["time"] = json!(1_600_000_000 + height as i64 * 60);
    }
    tx
}

/// Serve `getrawtransaction` from a fixed set of transactions
pub fn serve_transactions(transport: &MockTransport, txs: Vec<Value>) {
    let by_id: HashMap<String, Value> = txs
        .into_iter()
        .map(|tx| (tx["txid"].as_str().unwrap_or_default().to_string(), tx))
        .collect();

    transport.respond("getrawtransaction", move |params| {
        let id = params.first().and_then(Value::as_str).unwrap_or_default();
        by_id.get(id).cloned().ok_or_else(|| RpcError::Remote {
            code: -5,
            message: "No such mempool or blockchain transaction".to_string(),
        })
    });
}
