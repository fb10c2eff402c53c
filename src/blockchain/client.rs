use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{endpoint_host, Config};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    #[error("RPC error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Failed to decode {method} result: {reason}")]
    Decode { method: String, reason: String },

    #[error("Request dropped before a response arrived")]
    Dropped,
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RpcError::Http {
                status: status.as_u16(),
            },
            None => RpcError::Transport(err.to_string()),
        }
    }
}

/// Outbound JSON-RPC channel to the node
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(&self, method: &str, params: &[Value]) -> Result<Value, RpcError>;

    /// Point subsequent calls at another node
    fn set_endpoint(&self, _url: &str) {}

    fn endpoint(&self) -> String {
        String::new()
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: &'a [Value],
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl From<RpcErrorBody> for RpcError {
    fn from(body: RpcErrorBody) -> Self {
        RpcError::Remote {
            code: body.code,
            message: body.message,
        }
    }
}

/// JSON-RPC 1.0 over HTTP POST
pub struct HttpTransport {
    http: reqwest::Client,
    url: RwLock<String>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, RpcError> {
        let timeout = Duration::from_secs(config.rpc_timeout_secs);
        info!("Initializing RPC transport with endpoint: {}, timeout: {:?}", endpoint_host(&config.rpc_url), timeout);

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            url: RwLock::new(config.rpc_url.clone()),
        })
    }

    fn url(&self) -> String {
        self.url.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: "1",
            method,
            params,
        };

        debug!("RPC call {} with {} params", method, params.len());

        let response = self.http.post(self.url()).json(&request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        // Nodes answer RPC errors with a 500 and a JSON body; prefer the body
        let parsed = serde_json::from_slice::<RpcResponse>(&body);

        match parsed {
            Ok(RpcResponse { error: Some(error), .. }) => Err(error.into()),
            Ok(RpcResponse { result, .. }) if status.is_success() => Ok(result),
            Ok(_) => Err(RpcError::Http {
                status: status.as_u16(),
            }),
            Err(e) if status.is_success() => Err(RpcError::Decode {
                method: method.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(RpcError::Http {
                status: status.as_u16(),
            }),
        }
    }

    fn set_endpoint(&self, url: &str) {
        let mut current = self.url.write().unwrap_or_else(PoisonError::into_inner);
        if *current != url {
            warn!("RPC endpoint changed from {} to {}", endpoint_host(&current), endpoint_host(url));
            *current = url.to_string();
        }
    }

    fn endpoint(&self) -> String {
        self.url()
    }
}
