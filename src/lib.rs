//! # versions
//!
//! Edge cache for versioned static assets:
//! - Edge nodes pull assets from ordered origin servers with failover
//! - In-memory TTL cache with gzip/deflate variants and content negotiation
//! - Client SDK spreading asset URLs over alias hosts by consistent hashing
//! - Cluster-wide version and alias replication over Redis pub/sub, with an
//!   HTTP-polling fallback
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!          ┌───────────┐   tag("/css/a.css")
//!          │  Client   │──────────────────────► //cdn-2/versions:1.0.4/css/a.css
//!          └─────┬─────┘
//!                │ PUT /version | pub/sub
//!   ┌────────────┼──────────────┬──────────────┐
//!   │            │              │              │
//! ┌─▼──────────┐ ┌▼───────────┐ ┌▼───────────┐  │
//! │ Edge node 1│ │ Edge node 2│ │ Edge node 3│◄─┘ Redis channel + snapshot
//! │  + cache   │ │  + cache   │ │  + cache   │
//! └─────┬──────┘ └─────┬──────┘ └─────┬──────┘
//!       └──────────────┼──────────────┘
//!                      │ failover
//!            ┌─────────▼─────────┐
//!            │  Origin servers   │
//!            └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start an edge node
//! ```bash
//! versions serve \
//!   --port 8080 \
//!   --origin http://origin-1.local=primary \
//!   --origin http://origin-2.local \
//!   --auth s3cret \
//!   --redis redis://localhost:6379/
//! ```
//!
//! ### Use the control CLI
//! ```bash
//! # Tag asset paths
//! versions-ctl tag /css/site.css --server //edge.local --alias //cdn-1 --alias //cdn-2
//!
//! # Bump the cluster version
//! versions-ctl version --server http://edge.local:8080 --auth s3cret
//! ```

pub mod cache;
pub mod client;
pub mod common;
pub mod server;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use client::{Client, ConnectOptions};
pub use common::{Error, Result};
pub use server::EdgeNode;
pub use store::{ConfigStore, ConfigValue};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
