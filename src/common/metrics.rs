//! Broker metrics
//!
//! Prometheus-compatible counters, gauges and latency histograms for the
//! append/poll/commit paths, plus per-operation request accounting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Latency histogram with fixed bucket boundaries
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in milliseconds
    pub fn observe(&self, value_ms: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| value_ms <= b)
            .unwrap_or(self.boundaries.len());

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value_ms * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64() * 1000.0);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
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

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        // Saturate at zero rather than wrapping.
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Request accounting for one operation type
#[derive(Debug, Default)]
pub struct OperationMetrics {
    pub requests_total: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

/// Registry of all broker metrics
#[derive(Debug)]
pub struct MetricsRegistry {
    operations: Mutex<HashMap<String, Arc<OperationMetrics>>>,

    pub appends_total: Counter,
    pub append_attempts_total: Counter,
    pub append_conflicts_total: Counter,
    pub append_exhausted_total: Counter,
    pub appends_in_flight: Gauge,
    pub append_latency: Histogram,

    pub polls_total: Counter,
    pub poll_key_errors_total: Counter,
    pub poll_entries_total: Counter,

    pub commits_total: Counter,
    pub corrupt_entries_total: Counter,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            operations: Mutex::new(HashMap::new()),
            appends_total: Counter::new(),
            append_attempts_total: Counter::new(),
            append_conflicts_total: Counter::new(),
            append_exhausted_total: Counter::new(),
            appends_in_flight: Gauge::new(),
            append_latency: Histogram::new(),
            polls_total: Counter::new(),
            poll_key_errors_total: Counter::new(),
            poll_entries_total: Counter::new(),
            commits_total: Counter::new(),
            corrupt_entries_total: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create the metrics for an operation
    pub fn operation(&self, op: &str) -> Arc<OperationMetrics> {
        let mut operations = self
            .operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        operations
            .entry(op.to_string())
            .or_insert_with(|| Arc::new(OperationMetrics::default()))
            .clone()
    }

    /// Record a handled request
    pub fn record_request(&self, op: &str, duration: Duration, success: bool) {
        let metrics = self.operation(op);
        metrics.requests_total.inc();
        metrics.latency.observe_duration(duration);
        if !success {
            metrics.requests_error.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render in the Prometheus text exposition format
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters: [(&str, &str, &Counter); 9] = [
            ("minilog_appends_total", "Appends committed", &self.appends_total),
            (
                "minilog_append_attempts_total",
                "Read-CAS attempts issued by appends",
                &self.append_attempts_total,
            ),
            (
                "minilog_append_conflicts_total",
                "Failed append attempts (CAS conflicts and substrate errors)",
                &self.append_conflicts_total,
            ),
            (
                "minilog_append_exhausted_total",
                "Appends that ran out of attempts",
                &self.append_exhausted_total,
            ),
            ("minilog_polls_total", "Poll requests", &self.polls_total),
            (
                "minilog_poll_key_errors_total",
                "Keys dropped from poll results after a read failure",
                &self.poll_key_errors_total,
            ),
            (
                "minilog_poll_entries_total",
                "Entries returned by polls",
                &self.poll_entries_total,
            ),
            ("minilog_commits_total", "Offsets committed", &self.commits_total),
            (
                "minilog_corrupt_entries_total",
                "Stored elements skipped while decoding",
                &self.corrupt_entries_total,
            ),
        ];
        for (name, help, counter) in counters {
            writeln!(out, "# HELP {} {}", name, help).unwrap();
            writeln!(out, "# TYPE {} counter", name).unwrap();
            writeln!(out, "{} {}", name, counter.get()).unwrap();
        }

        out.push_str("# HELP minilog_appends_in_flight Appends currently retrying\n");
        out.push_str("# TYPE minilog_appends_in_flight gauge\n");
        writeln!(out, "minilog_appends_in_flight {}", self.appends_in_flight.get()).unwrap();

        out.push_str("# HELP minilog_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE minilog_uptime_seconds gauge\n");
        writeln!(out, "minilog_uptime_seconds {}", self.uptime_seconds()).unwrap();

        out.push_str("# HELP minilog_append_duration_ms Append duration in milliseconds\n");
        out.push_str("# TYPE minilog_append_duration_ms histogram\n");
        write_histogram(&mut out, "minilog_append_duration_ms", None, &self.append_latency);

        let operations = self
            .operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        out.push_str("# HELP minilog_requests_total Requests per operation\n");
        out.push_str("# TYPE minilog_requests_total counter\n");
        for (op, metrics) in operations.iter() {
            writeln!(
                out,
                "minilog_requests_total{{op=\"{}\"}} {}",
                op,
                metrics.requests_total.get()
            )
            .unwrap();
        }

        out.push_str("# HELP minilog_request_errors_total Failed requests per operation\n");
        out.push_str("# TYPE minilog_request_errors_total counter\n");
        for (op, metrics) in operations.iter() {
            writeln!(
                out,
                "minilog_request_errors_total{{op=\"{}\"}} {}",
                op,
                metrics.requests_error.get()
            )
            .unwrap();
        }

        out.push_str("# HELP minilog_request_duration_ms Request duration in milliseconds\n");
        out.push_str("# TYPE minilog_request_duration_ms histogram\n");
        for (op, metrics) in operations.iter() {
            write_histogram(&mut out, "minilog_request_duration_ms", Some(op), &metrics.latency);
        }

        out
    }
}

fn write_histogram(out: &mut String, name: &str, op: Option<&str>, hist: &Histogram) {
    use std::fmt::Write;
    let label = op.map(|op| format!("op=\"{}\",", op)).unwrap_or_default();
    for (le, count) in hist.get_buckets() {
        if le.is_infinite() {
            writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, label, count).unwrap();
        } else {
            writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, label, le, count).unwrap();
        }
    }
    let label = label.trim_end_matches(',');
    writeln!(out, "{}_sum{{{}}} {}", name, label, hist.sum()).unwrap();
    writeln!(out, "{}_count{{{}}} {}", name, label, hist.count()).unwrap();
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);

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
        assert_eq!(buckets.len(), LATENCY_BUCKETS.len() + 1);
        // 5ms lands in the 5ms bucket
        assert_eq!(buckets[1], (5.0, 1));
        assert_eq!(buckets.last().unwrap().1, 3);
    }

    #[test]
    fn test_gauge_saturates() {
        let gauge = Gauge::new();
        gauge.dec();
        assert_eq!(gauge.get(), 0);
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 1);
    }

    #[test]
    fn test_record_request() {
        let registry = MetricsRegistry::new();

        registry.record_request("send", Duration::from_millis(3), true);
        registry.record_request("send", Duration::from_millis(30), false);

        let send = registry.operation("send");
        assert_eq!(send.requests_total.get(), 2);
        assert_eq!(send.requests_error.get(), 1);
        assert_eq!(send.latency.count(), 2);
    }

    #[test]
    fn test_prometheus_output() {
        let registry = MetricsRegistry::new();
        registry.appends_total.add(4);
        registry.record_request("poll", Duration::from_millis(1), true);

        let out = registry.to_prometheus();
        assert!(out.contains("minilog_appends_total 4"));
        assert!(out.contains("minilog_requests_total{op=\"poll\"} 1"));
        assert!(out.contains("minilog_request_duration_ms_count{op=\"poll\"} 1"));
        assert!(out.contains("minilog_append_duration_ms_count{} 0"));
    }
}
