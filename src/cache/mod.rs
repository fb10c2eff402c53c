//! Cache layer: duration policy, key normalization and the read-through client

pub mod clock;
pub mod keys;
pub mod policy;
pub mod read_through;

pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::{cache_key, AddressQuery, CacheKey};
pub use policy::{policy_for, CacheClass, CacheDurations, CachePolicy};
pub use read_through::{CacheClient, CacheStats, Cached};
