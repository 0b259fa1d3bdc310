//! Per-node metrics collection
//!
//! Counters are created on first use and addressed by name (`cache hit`,
//! `origin server pull`, `404`, ...). A request-duration histogram is fed by
//! the tracing middleware. Output is JSON for the admin surface, or
//! Prometheus text.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets
    pub fn new() -> Self {
        let boundaries = LATENCY_BUCKETS.to_vec();
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as microseconds for precision
        self.sum.fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, `+Inf` last
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.buckets.len());

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter for tracking event counts
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics registry owned by one edge node
#[derive(Debug)]
pub struct MetricsRegistry {
    counters: Mutex<BTreeMap<String, Arc<Counter>>>,
    pub request_duration: Histogram,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(BTreeMap::new()),
            request_duration: Histogram::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create a named counter
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        self.counters
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Counter::new()))
            .clone()
    }

    /// Increase a named counter
    pub fn incr(&self, name: &str) {
        self.counter(name).inc();
    }

    /// Current value of a counter, 0 when it never fired
    pub fn get(&self, name: &str) -> u64 {
        self.counters.lock().get(name).map(|c| c.get()).unwrap_or(0)
    }

    pub fn record_request(&self, duration: Duration) {
        self.request_duration
            .observe(duration.as_secs_f64() * 1000.0);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// JSON view: every counter, plus lifetime request rate and cache size
    pub fn to_json(&self, cache_bytes: usize) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (name, counter) in self.counters.lock().iter() {
            out.insert(name.clone(), counter.get().into());
        }

        let seconds = self.start_time.elapsed().as_secs_f64().max(1.0);
        let per_second = self.get("requests") as f64 / seconds;
        out.insert(
            "requests per second".into(),
            format!("{:.2} requests per second", per_second).into(),
        );
        out.insert(
            "cache size".into(),
            format!("{:.2}kb", cache_bytes as f64 / 1024.0).into(),
        );
        out.insert("uptime".into(), self.uptime_seconds().into());

        serde_json::Value::Object(out)
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self, cache_bytes: usize) -> String {
        let mut out = String::new();

        out.push_str("# HELP versions_events_total Events per counter name\n");
        out.push_str("# TYPE versions_events_total counter\n");
        for (name, counter) in self.counters.lock().iter() {
            let _ = writeln!(
                out,
                "versions_events_total{{name=\"{}\"}} {}",
                name,
                counter.get()
            );
        }

        out.push_str("# HELP versions_cache_bytes Bytes held by the artifact cache\n");
        out.push_str("# TYPE versions_cache_bytes gauge\n");
        let _ = writeln!(out, "versions_cache_bytes {}", cache_bytes);

        out.push_str("# HELP versions_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE versions_uptime_seconds gauge\n");
        let _ = writeln!(out, "versions_uptime_seconds {}", self.uptime_seconds());

        out.push_str("# HELP versions_request_duration_ms Request duration in milliseconds\n");
        out.push_str("# TYPE versions_request_duration_ms histogram\n");
        for (le, count) in self.request_duration.get_buckets() {
            if le.is_infinite() {
                let _ = writeln!(
                    out,
                    "versions_request_duration_ms_bucket{{le=\"+Inf\"}} {}",
                    count
                );
            } else {
                let _ = writeln!(
                    out,
                    "versions_request_duration_ms_bucket{{le=\"{}\"}} {}",
                    le, count
                );
            }
        }
        let _ = writeln!(
            out,
            "versions_request_duration_ms_sum {}",
            self.request_duration.sum()
        );
        let _ = writeln!(
            out,
            "versions_request_duration_ms_count {}",
            self.request_duration.count()
        );

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();

        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(50_000.0);

        assert_eq!(hist.count(), 3);
        let buckets = hist.get_buckets();
        assert_eq!(buckets.last().map(|b| b.1), Some(3));
    }

    #[test]
    fn test_named_counters() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.get("cache hit"), 0);

        registry.incr("cache hit");
        registry.incr("cache hit");
        registry.incr("404");

        assert_eq!(registry.get("cache hit"), 2);
        assert_eq!(registry.get("404"), 1);
    }

    #[test]
    fn test_json_view() {
        let registry = MetricsRegistry::new();
        registry.incr("requests");
        registry.incr("304");

        let json = registry.to_json(2048);
        assert_eq!(json["requests"], 1);
        assert_eq!(json["304"], 1);
        assert_eq!(json["cache size"], "2.00kb");
        assert!(json["requests per second"]
            .as_str()
            .unwrap()
            .ends_with("requests per second"));
    }

    #[test]
    fn test_prometheus_output() {
        let registry = MetricsRegistry::new();
        registry.incr("origin server pull");
        registry.record_request(Duration::from_millis(12));

        let text = registry.to_prometheus(0);
        assert!(text.contains("versions_events_total{name=\"origin server pull\"} 1"));
        assert!(text.contains("versions_request_duration_ms_count 1"));
    }
}
