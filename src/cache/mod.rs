//! In-memory artifact cache
//!
//! A TTL map from cache key (`<tag>#<path>`) to [`Artifact`]. One expiry
//! window applies to every entry and counts from insertion. Expired entries
//! are invisible immediately and physically dropped by a background sweeper.
//! Nothing is persisted: every artifact can be pulled again from its origin.

pub mod artifact;
pub mod compress;

pub use artifact::{cache_key, Artifact, Encoding};
pub use compress::{compress, is_compressible};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Lower bound on the sweep period
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
enum Slot {
    /// Key recognised, body still being pulled
    Pending,
    Ready(Arc<Artifact>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Instant,
}

#[derive(Debug)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Cloning shares the same entries
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    inner: Arc<Inner>,
}

impl ArtifactCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                ttl,
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Start the background sweeper. Must run inside a tokio runtime.
    pub fn start(&self) {
        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.ttl.max(MIN_SWEEP_INTERVAL);
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let now = Instant::now();
                let mut entries = inner.entries.lock();
                let before = entries.len();
                entries.retain(|_, entry| entry.expires_at > now);
                let swept = before - entries.len();
                if swept > 0 {
                    tracing::debug!(swept, "expired artifacts swept");
                }
            }
        }));
    }

    /// Drop every entry and stop the sweeper. Call [`start`](Self::start)
    /// to resume with a fresh clock.
    pub fn destroy(&self) {
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        self.inner.entries.lock().clear();
    }

    /// Key is known and not expired, whether ready or pending
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .get(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Stored artifact. Pending and expired keys read as a miss.
    pub fn get(&self, key: &str) -> Option<Arc<Artifact>> {
        let now = Instant::now();
        let entries = self.inner.entries.lock();
        match entries.get(key) {
            Some(Entry {
                slot: Slot::Ready(artifact),
                expires_at,
            }) if *expires_at > now => Some(artifact.clone()),
            _ => None,
        }
    }

    /// Store an artifact, replacing whatever the key held
    pub fn set(&self, key: impl Into<String>, artifact: Artifact) -> Arc<Artifact> {
        let artifact = Arc::new(artifact);
        let entry = Entry {
            slot: Slot::Ready(artifact.clone()),
            expires_at: Instant::now() + self.inner.ttl,
        };
        self.inner.entries.lock().insert(key.into(), entry);
        artifact
    }

    /// Record that a pull for `key` is under way.
    ///
    /// Returns false when the key already holds a live entry.
    pub fn mark_pending(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        if entries.get(key).is_some_and(|e| e.expires_at > now) {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Pending,
                expires_at: now + self.inner.ttl,
            },
        );
        true
    }

    /// Forget a pending marker after a failed pull. Ready entries are kept.
    pub fn clear_pending(&self, key: &str) {
        let mut entries = self.inner.entries.lock();
        if matches!(entries.get(key), Some(Entry { slot: Slot::Pending, .. })) {
            entries.remove(key);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.entries.lock().remove(key).is_some()
    }

    /// Remove every key containing `pattern`. Returns how many went.
    pub fn remove_matching(&self, pattern: &str) -> usize {
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        before - entries.len()
    }

    /// Visit every live artifact with its expiry instant
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &Artifact, Instant),
    {
        let now = Instant::now();
        let snapshot: Vec<(String, Arc<Artifact>, Instant)> = {
            let entries = self.inner.entries.lock();
            entries
                .iter()
                .filter(|(_, e)| e.expires_at > now)
                .filter_map(|(key, e)| match &e.slot {
                    Slot::Ready(artifact) => Some((key.clone(), artifact.clone(), e.expires_at)),
                    Slot::Pending => None,
                })
                .collect()
        };

        for (key, artifact, expires_at) in snapshot {
            visit(&key, &artifact, expires_at);
        }
    }

    /// Live artifact keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        self.for_each(|key, _, _| keys.push(key.to_string()));
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by live artifacts, variants included
    pub fn size_bytes(&self) -> usize {
        let mut total = 0;
        self.for_each(|_, artifact, _| total += artifact.size());
        total
    }
}
