//! Edge node server
//!
//! - [`negotiate`]: encoding/extension/304 decisions per request
//! - [`fetch`]: multi-origin pull with ordered failover
//! - [`respond`]: response headers and bodies
//! - [`admin`]: token-gated admin routes
//! - [`http`]: the request pipeline
//! - [`node`]: the composed [`EdgeNode`]

pub mod admin;
pub mod fetch;
pub mod http;
pub mod negotiate;
pub mod node;
pub mod respond;

pub use fetch::{Fetcher, OriginServer};
pub use negotiate::{Capability, ContentNegotiator, RequestInfo};
pub use node::EdgeNode;
