//! Bounded-concurrency FIFO queue in front of the RPC transport

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use super::client::{RpcError, RpcTransport};

pub const DEFAULT_MAX_CONCURRENT: usize = 50;

struct Job {
    ticket: u64,
    method: String,
    params: Vec<Value>,
    reply: oneshot::Sender<Result<Value, RpcError>>,
}

struct QueueState {
    queue: VecDeque<Job>,
    active: usize,
    max_concurrent: usize,
    next_ticket: u64,
}

struct Inner {
    transport: Arc<dyn RpcTransport>,
    state: Mutex<QueueState>,
    limiter: Option<DefaultDirectRateLimiter>,
    /// Ticket of the next job allowed to start
    turn: watch::Sender<u64>,
}

/// Jobs start in submission order, rate limit permits included; at most
/// `max_concurrent` run at once. Completion order follows network latency.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn RpcTransport>, max_concurrent: usize) -> Self {
        Self::with_rate_limit(transport, max_concurrent, None)
    }

    /// Same as [`Dispatcher::new`], additionally holding outbound calls to
    /// `per_second` requests
    pub fn with_rate_limit(transport: Arc<dyn RpcTransport>, max_concurrent: usize, per_second: Option<u32>) -> Self {
        let limiter = per_second
            .and_then(NonZeroU32::new)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));

        if let Some(rate) = per_second {
            info!("RPC rate limit set to {} requests/second", rate);
        }

        let (turn, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                transport,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    active: 0,
                    max_concurrent: max_concurrent.max(1),
                    next_ticket: 0,
                }),
                limiter,
                turn,
            }),
        }
    }

    pub async fn enqueue(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let (reply, response) = oneshot::channel();

        self.inner.lock().queue.push_back(Job {
            ticket: 0,
            method: method.to_string(),
            params,
            reply,
        });
        Inner::drain(&self.inner);

        response.await.map_err(|_| RpcError::Dropped)?
    }

    /// Values below one are raised to one. Raising the bound starts queued
    /// jobs immediately.
    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        let max_concurrent = max_concurrent.max(1);
        {
            let mut state = self.inner.lock();
            if state.max_concurrent == max_concurrent {
                return;
            }
            info!("Max concurrent RPC requests changed from {} to {}", state.max_concurrent, max_concurrent);
            state.max_concurrent = max_concurrent;
        }
        Inner::drain(&self.inner);
    }

    pub fn set_endpoint(&self, url: &str) {
        self.inner.transport.set_endpoint(url);
    }

    pub fn endpoint(&self) -> String {
        self.inner.transport.endpoint()
    }

    pub fn active(&self) -> usize {
        self.inner.lock().active
    }

    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.lock().max_concurrent
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(inner: &Arc<Inner>) {
        let mut started = Vec::new();
        {
            let mut state = inner.lock();
            while state.active < state.max_concurrent {
                match state.queue.pop_front() {
                    Some(mut job) => {
                        state.active += 1;
                        job.ticket = state.next_ticket;
                        state.next_ticket += 1;
                        started.push(job);
                    }
                    None => break,
                }
            }
        }

        for job in started {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                inner.run(job).await;
            });
        }
    }

    async fn run(self: Arc<Self>, job: Job) {
        // Sender lives in `self`, so waiting cannot fail
        let _ = self.turn.subscribe().wait_for(|turn| *turn == job.ticket).await;
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        self.turn.send_modify(|turn| *turn += 1);

        let result = self.transport.send(&job.method, &job.params).await;
        if let Err(e) = &result {
            debug!("RPC {} failed: {}", job.method, e);
        }

        // Caller may have gone away; nothing to do then
        let _ = job.reply.send(result);

        {
            let mut state = self.lock();
            state.active = state.active.saturating_sub(1);
        }
        Inner::drain(&self);
    }
}
