pub mod client;
pub mod dispatcher;
pub mod inflight;
pub mod models;

// Re-exports for convenience
pub use client::{HttpTransport, RpcError, RpcTransport};
pub use dispatcher::{Dispatcher, DEFAULT_MAX_CONCURRENT};
pub use inflight::{InFlightRequest, InFlightTracker, STALE_REQUEST_AGE};
