//! # Gateway Metrics
//!
//! Counter, gauge, dan histogram atomic untuk gateway, diekspor dalam
//! Prometheus text exposition format lewat `GET /metrics`.
//!
//! ## Prinsip
//!
//! - Semua metrics thread-safe (atomic operations)
//! - Urutan output deterministik
//!
//! ## Metrics
//!
//! - `fabric_submissions_total`
//! - `fabric_verifications_total`
//! - `fabric_quorum_success_total` / `fabric_quorum_failure_total`
//! - `fabric_conflicts_opened_total`, `fabric_conflicts_open`
//! - `fabric_idempotency_hits_total`, `fabric_idempotency_entries`
//! - `fabric_witness_requests_total{outcome}`
//! - `fabric_fanout_latency_ms` (histogram)

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

// ════════════════════════════════════════════════════════════════════════════
// PRIMITIVES
// ════════════════════════════════════════════════════════════════════════════

/// Thread-safe counter menggunakan atomic operations.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Thread-safe gauge untuk nilai yang bisa naik turun.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::SeqCst);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Histogram latency berbasis bucket.
///
/// Buckets: 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1000ms, 5000ms, +Inf
pub struct Histogram {
    buckets: [AtomicU64; 10],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    pub const BUCKET_BOUNDS: [u64; 9] = [5, 10, 25, 50, 100, 250, 500, 1000, 5000];

    pub fn observe(&self, value_ms: u64) {
        self.sum.fetch_add(value_ms, Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::SeqCst);
        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| value_ms <= bound)
            .unwrap_or(9);
        self.buckets[idx].fetch_add(1, Ordering::SeqCst);
    }

    /// Cumulative count sampai dan termasuk bucket `idx`.
    pub fn get_cumulative(&self, idx: usize) -> u64 {
        self.buckets[..=idx.min(9)]
            .iter()
            .map(|b| b.load(Ordering::SeqCst))
            .sum()
    }

    pub fn get_sum(&self) -> u64 {
        self.sum.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram")
            .field("count", &self.get_count())
            .field("sum", &self.get_sum())
            .finish()
    }
}

/// Counter per label `outcome`.
#[derive(Debug, Default)]
pub struct OutcomeCounters {
    counters: RwLock<BTreeMap<&'static str, Counter>>,
}

impl OutcomeCounters {
    pub fn inc(&self, outcome: &'static str) {
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(outcome) {
                counter.inc();
                return;
            }
        }
        self.counters.write().entry(outcome).or_default().inc();
    }

    pub fn get(&self, outcome: &str) -> u64 {
        self.counters.read().get(outcome).map(Counter::get).unwrap_or(0)
    }

    /// Semua label, urut alfabetis.
    pub fn get_all(&self) -> Vec<(&'static str, u64)> {
        self.counters.read().iter().map(|(&k, v)| (k, v.get())).collect()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// GATEWAY METRICS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub submissions_total: Counter,
    pub verifications_total: Counter,
    pub quorum_success: Counter,
    pub quorum_failure: Counter,
    pub conflicts_opened: Counter,
    pub conflicts_open: Gauge,
    pub idempotency_hits: Counter,
    pub idempotency_entries: Gauge,
    pub witness_requests: OutcomeCounters,
    pub fanout_latency: Histogram,
}

impl GatewayMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_quorum(&self, ok: bool) {
        if ok {
            self.quorum_success.inc();
        } else {
            self.quorum_failure.inc();
        }
    }

    /// Rasio sukses quorum, 0.0 jika belum ada ronde.
    #[must_use]
    pub fn quorum_success_rate(&self) -> f64 {
        let ok = self.quorum_success.get();
        let total = ok + self.quorum_failure.get();
        if total == 0 {
            0.0
        } else {
            ok as f64 / total as f64
        }
    }

    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(4096);

        write_scalar(&mut out, "fabric_submissions_total", "counter", "Record submissions received", self.submissions_total.get());
        write_scalar(&mut out, "fabric_verifications_total", "counter", "Record verifications requested", self.verifications_total.get());
        write_scalar(&mut out, "fabric_quorum_success_total", "counter", "Verification rounds that reached quorum", self.quorum_success.get());
        write_scalar(&mut out, "fabric_quorum_failure_total", "counter", "Verification rounds that missed quorum", self.quorum_failure.get());
        write_scalar(&mut out, "fabric_conflicts_opened_total", "counter", "Conflict tickets opened", self.conflicts_opened.get());
        write_scalar(&mut out, "fabric_conflicts_open", "gauge", "Conflict tickets currently open", self.conflicts_open.get());
        write_scalar(&mut out, "fabric_idempotency_hits_total", "counter", "Submissions answered from the idempotency cache", self.idempotency_hits.get());
        write_scalar(&mut out, "fabric_idempotency_entries", "gauge", "Live idempotency cache entries", self.idempotency_entries.get());

        let _ = writeln!(out, "# HELP fabric_witness_requests_total Witness calls by outcome");
        let _ = writeln!(out, "# TYPE fabric_witness_requests_total counter");
        for (outcome, count) in self.witness_requests.get_all() {
            let _ = writeln!(out, "fabric_witness_requests_total{{outcome=\"{}\"}} {}", outcome, count);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "# HELP fabric_fanout_latency_ms Witness fan-out latency in milliseconds");
        let _ = writeln!(out, "# TYPE fabric_fanout_latency_ms histogram");
        for (i, &bound) in Histogram::BUCKET_BOUNDS.iter().enumerate() {
            let _ = writeln!(out, "fabric_fanout_latency_ms_bucket{{le=\"{}\"}} {}", bound, self.fanout_latency.get_cumulative(i));
        }
        let _ = writeln!(out, "fabric_fanout_latency_ms_bucket{{le=\"+Inf\"}} {}", self.fanout_latency.get_cumulative(9));
        let _ = writeln!(out, "fabric_fanout_latency_ms_sum {}", self.fanout_latency.get_sum());
        let _ = writeln!(out, "fabric_fanout_latency_ms_count {}", self.fanout_latency.get_count());

        out
    }
}

fn write_scalar(out: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
    let _ = writeln!(out, "{} {}", name, value);
    let _ = writeln!(out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_histogram_buckets() {
        let h = Histogram::default();
        h.observe(3);
        h.observe(40);
        h.observe(9_000);
        assert_eq!(h.get_cumulative(0), 1);
        assert_eq!(h.get_cumulative(3), 2);
        assert_eq!(h.get_cumulative(8), 2);
        assert_eq!(h.get_cumulative(9), 3);
        assert_eq!(h.get_sum(), 9_043);
    }

    #[test]
    fn test_outcome_counters_sorted() {
        let c = OutcomeCounters::default();
        c.inc("timeout");
        c.inc("success");
        c.inc("success");
        assert_eq!(c.get_all(), vec![("success", 2), ("timeout", 1)]);
        assert_eq!(c.get("network_error"), 0);
    }

    #[test]
    fn test_success_rate() {
        let m = GatewayMetrics::new();
        assert_eq!(m.quorum_success_rate(), 0.0);
        m.record_quorum(true);
        m.record_quorum(true);
        m.record_quorum(true);
        m.record_quorum(false);
        assert!((m.quorum_success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_prometheus_output() {
        let m = GatewayMetrics::new();
        m.submissions_total.inc();
        m.witness_requests.inc("success");
        m.fanout_latency.observe(12);
        let out = m.to_prometheus();
        assert!(out.contains("# TYPE fabric_submissions_total counter"));
        assert!(out.contains("fabric_submissions_total 1\n"));
        assert!(out.contains("fabric_witness_requests_total{outcome=\"success\"} 1"));
        assert!(out.contains("fabric_fanout_latency_ms_bucket{le=\"25\"} 1"));
        assert!(out.contains("fabric_fanout_latency_ms_count 1"));
    }

    #[test]
    fn test_concurrent_increments() {
        let m = Arc::new(GatewayMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = m.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.submissions_total.inc();
                        m.witness_requests.inc("success");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("join");
        }
        assert_eq!(m.submissions_total.get(), 8000);
        assert_eq!(m.witness_requests.get("success"), 8000);
    }
}
