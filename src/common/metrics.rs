//! Server metrics
//!
//! Counters for discovery calls and mutative messages broken down by kind
//! and outcome, plus gauges mirroring the server's change log position.
//! Rendered in Prometheus text format at `/metrics`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

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

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics for one nomad server
#[derive(Debug)]
pub struct NomadMetrics {
    pub discover_total: Counter,
    /// (message kind, outcome) -> count
    mutations: Mutex<BTreeMap<(&'static str, &'static str), u64>>,
    pub mutative_message_count: Gauge,
    pub current_version: Gauge,
    pub highest_version: Gauge,
    /// 1 while a change is prepared
    pub prepared: Gauge,
    start_time: Instant,
}

impl NomadMetrics {
    pub fn new() -> Self {
        Self {
            discover_total: Counter::new(),
            mutations: Mutex::new(BTreeMap::new()),
            mutative_message_count: Gauge::new(),
            current_version: Gauge::new(),
            highest_version: Gauge::new(),
            prepared: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    /// Record the outcome of one mutative message
    pub fn record_mutation(&self, kind: &'static str, outcome: &'static str) {
        if let Ok(mut mutations) = self.mutations.lock() {
            *mutations.entry((kind, outcome)).or_insert(0) += 1;
        }
    }

    /// Count for one (kind, outcome) pair
    pub fn mutation_count(&self, kind: &str, outcome: &str) -> u64 {
        self.mutations
            .lock()
            .map(|m| {
                m.iter()
                    .filter(|((k, o), _)| *k == kind && *o == outcome)
                    .map(|(_, v)| *v)
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self, server: &str) -> String {
        use std::fmt::Write;

        let mut out = String::new();

        out.push_str("# HELP nomad_discover_total Discovery requests served\n");
        out.push_str("# TYPE nomad_discover_total counter\n");
        let _ = writeln!(
            out,
            "nomad_discover_total{{server=\"{}\"}} {}",
            server,
            self.discover_total.get()
        );

        out.push_str("# HELP nomad_mutations_total Mutative messages by kind and outcome\n");
        out.push_str("# TYPE nomad_mutations_total counter\n");
        if let Ok(mutations) = self.mutations.lock() {
            for ((kind, outcome), count) in mutations.iter() {
                let _ = writeln!(
                    out,
                    "nomad_mutations_total{{server=\"{}\",kind=\"{}\",outcome=\"{}\"}} {}",
                    server, kind, outcome, count
                );
            }
        }

        let gauges = [
            (
                "nomad_mutative_message_count",
                "Mutative messages processed by this server",
                self.mutative_message_count.get(),
            ),
            (
                "nomad_current_version",
                "Version of the last committed change",
                self.current_version.get(),
            ),
            (
                "nomad_highest_version",
                "Highest version ever prepared",
                self.highest_version.get(),
            ),
            (
                "nomad_prepared",
                "1 while a change is awaiting commit or rollback",
                self.prepared.get(),
            ),
            (
                "nomad_uptime_seconds",
                "Server uptime in seconds",
                self.uptime_seconds(),
            ),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{}{{server=\"{}\"}} {}", name, server, value);
        }

        out
    }
}

impl Default for NomadMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_counters() {
        let metrics = NomadMetrics::new();
        metrics.record_mutation("prepare", "accepted");
        metrics.record_mutation("prepare", "accepted");
        metrics.record_mutation("commit", "dead");

        assert_eq!(metrics.mutation_count("prepare", "accepted"), 2);
        assert_eq!(metrics.mutation_count("commit", "dead"), 1);
        assert_eq!(metrics.mutation_count("rollback", "accepted"), 0);
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = NomadMetrics::new();
        metrics.discover_total.inc();
        metrics.record_mutation("takeover", "accepted");
        metrics.current_version.set(7);

        let text = metrics.to_prometheus("node-a");
        assert!(text.contains("nomad_discover_total{server=\"node-a\"} 1"));
        assert!(text.contains(
            "nomad_mutations_total{server=\"node-a\",kind=\"takeover\",outcome=\"accepted\"} 1"
        ));
        assert!(text.contains("nomad_current_version{server=\"node-a\"} 7"));
    }
}
