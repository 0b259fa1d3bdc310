//! Common utilities and types shared across versions

pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod race;
pub mod tracing_middleware;
pub mod utils;

pub use error::{Error, Result};
pub use hash::HashRing;
pub use metrics::MetricsRegistry;
pub use race::{failover, fastest};
pub use utils::{absolute_url, extname, http_date, parse_duration, timestamp_now_millis};
