use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::Clock;

pub const STALE_REQUEST_AGE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightRequest {
    pub id: u64,
    pub method: String,
    pub submitted_at: i64,
}

/// Network calls currently awaiting a response, for status display
pub struct InFlightTracker {
    next_id: AtomicU64,
    requests: Mutex<HashMap<u64, InFlightRequest>>,
    clock: Arc<dyn Clock>,
}

impl InFlightTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            requests: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn register(&self, method: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = InFlightRequest {
            id,
            method: method.to_string(),
            submitted_at: self.clock.now_millis(),
        };
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, request);
        id
    }

    pub fn finish(&self, id: u64) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn snapshot(&self) -> Vec<InFlightRequest> {
        let mut requests: Vec<_> = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.id);
        requests
    }

    /// Drops entries older than `max_age`. Does not touch the calls themselves.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let cutoff = self.clock.now_millis() - max_age.as_millis() as i64;
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        let before = requests.len();
        requests.retain(|_, r| r.submitted_at > cutoff);
        let removed = before - requests.len();
        if removed > 0 {
            debug!("Swept {} stale in-flight requests", removed);
        }
        removed
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("In-flight sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep_stale(STALE_REQUEST_AGE);
                    }
                }
            }
        })
    }
}
