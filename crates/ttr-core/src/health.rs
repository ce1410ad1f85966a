//! Health checks over the configured providers and sinks.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::model::{Provider, Sink};

/// Deadline for a single sink connectivity probe.
const SINK_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Overall service health plus the per-component checks behind it.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// One of `healthy`, `degraded`, `unhealthy`.
    pub status: String,
    pub timestamp: String,
    pub checks: BTreeMap<String, CheckResult>,
}

/// Result of one provider or sink check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// One of `pass`, `warn`, `fail`.
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub duration_ms: u64,
    pub last_checked: String,
}

impl CheckResult {
    fn new(status: &str, message: impl Into<String>, started: Instant) -> Self {
        Self {
            status: status.to_string(),
            message: message.into(),
            duration_ms: started.elapsed().as_millis() as u64,
            last_checked: Utc::now().to_rfc3339(),
        }
    }
}

/// Runs provider/sink checks and caches the most recent result.
pub struct HealthChecker {
    providers: Vec<Arc<dyn Provider>>,
    sinks: Vec<Arc<dyn Sink>>,
    status: RwLock<HealthStatus>,
}

impl HealthChecker {
    pub fn new(providers: Vec<Arc<dyn Provider>>, sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self {
            providers,
            sinks,
            status: RwLock::new(HealthStatus {
                status: "healthy".to_string(),
                timestamp: Utc::now().to_rfc3339(),
                checks: BTreeMap::new(),
            }),
        }
    }

    /// Run every check and return (and cache) the aggregated status.
    ///
    /// Aggregation: any fail makes the service unhealthy; any warn without a
    /// fail makes it degraded; otherwise it is healthy.
    pub async fn check_health(&self) -> HealthStatus {
        let mut checks = BTreeMap::new();

        for provider in &self.providers {
            let name = provider.info().name;
            checks.insert(
                format!("provider_{name}"),
                check_provider(provider.as_ref()).await,
            );
        }

        for sink in &self.sinks {
            let name = sink.info().name;
            checks.insert(format!("sink_{name}"), check_sink(sink.as_ref()).await);
        }

        let mut overall = "healthy";
        for check in checks.values() {
            if check.status == "fail" {
                overall = "unhealthy";
                break;
            }
            if check.status == "warn" {
                overall = "degraded";
            }
        }

        let status = HealthStatus {
            status: overall.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            checks,
        };

        *self.status.write().expect("health lock poisoned") = status.clone();
        status
    }

    /// Most recently computed status without re-running the checks.
    pub fn last_status(&self) -> HealthStatus {
        self.status.read().expect("health lock poisoned").clone()
    }
}

/// Provider check: a usable (or refreshable) token and a reachable API.
/// Auth failure is a hard fail; connectivity trouble is only a warning.
async fn check_provider(provider: &dyn Provider) -> CheckResult {
    let started = Instant::now();
    let auth = provider.auth();

    if !auth.is_valid().await {
        if let Err(err) = auth.refresh().await {
            return CheckResult::new("fail", format!("authentication failed: {err}"), started);
        }
    }

    match provider.list_thermostats().await {
        Ok(_) => CheckResult::new("pass", "provider is healthy", started),
        Err(err) => CheckResult::new("warn", format!("provider connectivity issue: {err}"), started),
    }
}

/// Sink check: `open` must succeed within the probe deadline.
async fn check_sink(sink: &dyn Sink) -> CheckResult {
    let started = Instant::now();

    match tokio::time::timeout(SINK_CHECK_TIMEOUT, sink.open()).await {
        Ok(Ok(())) => CheckResult::new("pass", "sink is healthy", started),
        Ok(Err(err)) => CheckResult::new("fail", format!("sink connectivity failed: {err}"), started),
        Err(_) => CheckResult::new("fail", "sink connectivity check timed out", started),
    }
}
