//! In-process counters for the metrics surface.
//!
//! Thread-safe monotonic counters per provider and per sink, read out as one
//! consistent JSON snapshot by the HTTP surface. A mutex-guarded map is
//! plenty at the volumes this service targets.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Collects request/write counters from the scheduler's call sites.
pub struct MetricsCollector {
    started_at: Instant,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    providers: HashMap<String, ProviderCounters>,
    sinks: HashMap<String, SinkCounters>,
}

#[derive(Default, Clone)]
struct ProviderCounters {
    requests_total: u64,
    errors_total: u64,
    last_request: Option<DateTime<Utc>>,
}

#[derive(Default, Clone)]
struct SinkCounters {
    writes_total: u64,
    errors_total: u64,
    documents_written: u64,
    last_write: Option<DateTime<Utc>>,
}

/// Point-in-time view of all counters, serialized on `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    pub providers: BTreeMap<String, ProviderMetrics>,
    pub sinks: BTreeMap<String, SinkMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderMetrics {
    pub requests_total: u64,
    pub errors_total: u64,
    pub last_request_time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkMetrics {
    pub writes_total: u64,
    pub errors_total: u64,
    pub documents_written: u64,
    pub last_write_time: String,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// One provider call is about to be made.
    pub fn record_provider_request(&self, provider: &str) {
        let mut inner = self.inner.write().expect("metrics lock poisoned");
        let counters = inner.providers.entry(provider.to_string()).or_default();
        counters.requests_total += 1;
        counters.last_request = Some(Utc::now());
    }

    /// One provider call failed.
    pub fn record_provider_error(&self, provider: &str) {
        let mut inner = self.inner.write().expect("metrics lock poisoned");
        inner
            .providers
            .entry(provider.to_string())
            .or_default()
            .errors_total += 1;
    }

    /// One sink batch succeeded, carrying `documents` documents.
    pub fn record_sink_write(&self, sink: &str, documents: u64) {
        let mut inner = self.inner.write().expect("metrics lock poisoned");
        let counters = inner.sinks.entry(sink.to_string()).or_default();
        counters.writes_total += 1;
        counters.documents_written += documents;
        counters.last_write = Some(Utc::now());
    }

    /// One sink batch failed outright or reported per-document errors.
    pub fn record_sink_error(&self, sink: &str) {
        let mut inner = self.inner.write().expect("metrics lock poisoned");
        inner.sinks.entry(sink.to_string()).or_default().errors_total += 1;
    }

    /// Consistent snapshot of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().expect("metrics lock poisoned");

        MetricsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            providers: inner
                .providers
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        ProviderMetrics {
                            requests_total: c.requests_total,
                            errors_total: c.errors_total,
                            last_request_time: format_time(c.last_request),
                        },
                    )
                })
                .collect(),
            sinks: inner
                .sinks
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        SinkMetrics {
                            writes_total: c.writes_total,
                            errors_total: c.errors_total,
                            documents_written: c.documents_written,
                            last_write_time: format_time(c.last_write),
                        },
                    )
                })
                .collect(),
        }
    }
}

fn format_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_counters_accumulate() {
        let metrics = MetricsCollector::new();
        metrics.record_provider_request("ecobee");
        metrics.record_provider_request("ecobee");
        metrics.record_provider_error("ecobee");

        let snapshot = metrics.snapshot();
        let ecobee = &snapshot.providers["ecobee"];
        assert_eq!(ecobee.requests_total, 2);
        assert_eq!(ecobee.errors_total, 1);
        assert!(!ecobee.last_request_time.is_empty());
    }

    #[test]
    fn sink_counters_track_documents() {
        let metrics = MetricsCollector::new();
        metrics.record_sink_write("elasticsearch", 12);
        metrics.record_sink_write("elasticsearch", 3);
        metrics.record_sink_error("elasticsearch");

        let snapshot = metrics.snapshot();
        let es = &snapshot.sinks["elasticsearch"];
        assert_eq!(es.writes_total, 2);
        assert_eq!(es.documents_written, 15);
        assert_eq!(es.errors_total, 1);
    }

    #[test]
    fn empty_collector_snapshots_cleanly() {
        let snapshot = MetricsCollector::new().snapshot();
        assert!(snapshot.providers.is_empty());
        assert!(snapshot.sinks.is_empty());
        assert!(snapshot.uptime_seconds >= 0.0);
    }

    #[test]
    fn error_before_request_creates_the_entry() {
        let metrics = MetricsCollector::new();
        metrics.record_provider_error("ecobee");

        let snapshot = metrics.snapshot();
        let ecobee = &snapshot.providers["ecobee"];
        assert_eq!(ecobee.requests_total, 0);
        assert_eq!(ecobee.errors_total, 1);
        assert!(ecobee.last_request_time.is_empty());
    }
}
