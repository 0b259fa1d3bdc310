//! Cluster replication of the curated config keys
//!
//! Two transports share one handle type:
//! - [`PubSubSync`]: broker pub/sub with snapshot catch-up
//! - [`HttpPoller`]: fixed-interval `GET <server>/version` when no broker exists

pub mod broker;
pub mod message;
pub mod polling;
pub mod pubsub;

pub use broker::{Broker, MemoryBroker, RedisBroker};
pub use message::SyncMessage;
pub use polling::HttpPoller;
pub use pubsub::PubSubSync;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Owns the tasks of a running transport. Dropping it shuts them down.
pub struct SyncHandle {
    destroyed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    pub(crate) fn new(destroyed: Arc<AtomicBool>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { destroyed, tasks }
    }

    /// Mark the transport inert and cancel its tasks. Results of requests
    /// already in flight are discarded.
    pub fn shutdown(&mut self) {
        self.destroyed.store(true, Ordering::SeqCst);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
