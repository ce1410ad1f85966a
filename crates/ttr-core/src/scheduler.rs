//! Polling scheduler: startup backfill, then fixed-cadence collection.
//!
//! Each cycle walks every provider × thermostat through the same sequence:
//! summary, then (when the revision and staleness gate opens) a snapshot,
//! then runtime rows since the high-watermark with transition detection
//! across consecutive rows. Offsets advance only after the whole batch was
//! written successfully, so a failed write makes the next cycle re-cover the
//! same window and the deterministic IDs turn the re-delivery into upserts.
//!
//! Failure containment: a thermostat failing any step is logged and skipped,
//! a provider failing to enumerate is logged and skipped, and a panicking
//! cycle is caught so the next tick still runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use snafu::ResultExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{
    DocumentIdSnafu, RuntimeFetchSnafu, SchedulerError, SnapshotFetchSnafu, SummaryFetchSnafu,
};
use crate::id::IdGenerator;
use crate::metrics::MetricsCollector;
use crate::model::{
    Doc, Document, EventInfo, OffsetStore, Provider, Sink, ThermostatRef,
};
use crate::normalize::Normalizer;
use crate::transition::TransitionDetector;

/// Minimum age, in minutes, of the previous snapshot before a new one is
/// fetched.
const SNAPSHOT_STALENESS_MINUTES: i64 = 15;

/// Drives backfill and the periodic polling loop.
pub struct Scheduler {
    providers: Vec<Arc<dyn Provider>>,
    sinks: Vec<Arc<dyn Sink>>,
    normalizer: Normalizer,
    offsets: Arc<dyn OffsetStore>,
    poll_interval: Duration,
    backfill_window: Duration,
    metrics: Arc<MetricsCollector>,
    ids: IdGenerator,
    detector: TransitionDetector,
    shutdown: CancellationToken,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        sinks: Vec<Arc<dyn Sink>>,
        normalizer: Normalizer,
        offsets: Arc<dyn OffsetStore>,
        poll_interval: Duration,
        backfill_window: Duration,
        metrics: Arc<MetricsCollector>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            providers,
            sinks,
            normalizer,
            offsets,
            poll_interval,
            backfill_window,
            metrics,
            ids: IdGenerator::new(),
            detector: TransitionDetector::new(),
            shutdown,
        }
    }

    /// Run the backfill once, then poll until cancelled.
    pub async fn run(self: Arc<Self>) {
        info!(
            poll_interval = ?self.poll_interval,
            backfill_window = ?self.backfill_window,
            providers = self.providers.len(),
            sinks = self.sinks.len(),
            "starting telemetry scheduler"
        );

        if self
            .shutdown
            .run_until_cancelled(self.backfill_all())
            .await
            .is_none()
        {
            info!("shutdown requested during backfill");
            return;
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        // A cycle that outlives the interval swallows the missed ticks; there
        // is never more than one active cycle.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("scheduler stopping");
                    return;
                }

                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&self);
                    let mut cycle = tokio::spawn(async move { scheduler.poll_all().await });

                    tokio::select! {
                        biased;

                        _ = self.shutdown.cancelled() => {
                            cycle.abort();
                            info!("scheduler stopping mid-cycle");
                            return;
                        }

                        result = &mut cycle => {
                            if let Err(err) = result {
                                if err.is_panic() {
                                    error!(error = %err, "polling cycle panicked; continuing");
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// One-shot ingest over `[now - backfill_window, now]` for every
    /// thermostat, priming the runtime watermarks.
    pub async fn backfill_all(&self) {
        info!("performing initial backfill");

        let now = Utc::now();
        let from = now
            - chrono::Duration::from_std(self.backfill_window)
                .unwrap_or_else(|_| chrono::Duration::hours(168));

        for provider in &self.providers {
            let provider_name = provider.info().name;

            let thermostats = match provider.list_thermostats().await {
                Ok(thermostats) => thermostats,
                Err(err) => {
                    error!(provider = %provider_name, error = %err, "failed to list thermostats");
                    continue;
                }
            };

            for thermostat in thermostats {
                if let Err(err) = self
                    .backfill_thermostat(provider.as_ref(), &thermostat, from, now)
                    .await
                {
                    error!(
                        provider = %provider_name,
                        thermostat = %thermostat.id,
                        error = %err,
                        "failed to backfill thermostat"
                    );
                }
            }
        }
    }

    async fn backfill_thermostat(
        &self,
        provider: &dyn Provider,
        thermostat: &ThermostatRef,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let provider_name = provider.info().name;
        info!(thermostat = %thermostat.id, %from, %to, "backfilling thermostat");

        self.metrics.record_provider_request(&provider_name);
        let rows = provider
            .get_runtime(thermostat, from, to)
            .await
            .map_err(|err| {
                self.metrics.record_provider_error(&provider_name);
                err
            })
            .context(RuntimeFetchSnafu)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let canonical = self.normalizer.runtime_5m(row, &provider_name);
            let id = self
                .ids
                .runtime_5m_id(&canonical)
                .context(DocumentIdSnafu)?;
            docs.push(Doc {
                id,
                body: Document::Runtime5m(canonical),
            });
        }

        self.write_to_all_sinks(&docs).await?;

        if let Some(last) = rows.last() {
            if let Err(err) = self
                .offsets
                .set_last_runtime_time(&thermostat.id, last.event_time)
                .await
            {
                error!(thermostat = %thermostat.id, error = %err, "failed to update runtime offset");
            }
        }

        Ok(())
    }

    /// One polling cycle over every provider and thermostat.
    pub async fn poll_all(&self) {
        debug!("starting polling cycle");

        for provider in &self.providers {
            let provider_name = provider.info().name;

            let thermostats = match provider.list_thermostats().await {
                Ok(thermostats) => thermostats,
                Err(err) => {
                    error!(provider = %provider_name, error = %err, "failed to poll provider");
                    continue;
                }
            };

            for thermostat in thermostats {
                if let Err(err) = self.poll_thermostat(provider.as_ref(), &thermostat).await {
                    error!(
                        provider = %provider_name,
                        thermostat = %thermostat.id,
                        error = %err,
                        "failed to poll thermostat"
                    );
                }
            }
        }
    }

    async fn poll_thermostat(
        &self,
        provider: &dyn Provider,
        thermostat: &ThermostatRef,
    ) -> Result<(), SchedulerError> {
        let provider_name = provider.info().name;

        self.metrics.record_provider_request(&provider_name);
        let summary = provider
            .get_summary(thermostat)
            .await
            .map_err(|err| {
                self.metrics.record_provider_error(&provider_name);
                err
            })
            .context(SummaryFetchSnafu)?;

        let last_snapshot = match self.offsets.last_snapshot_time(&thermostat.id).await {
            Ok(value) => value,
            Err(err) => {
                warn!(thermostat = %thermostat.id, error = %err, "failed to read snapshot offset");
                None
            }
        };

        let snapshot_due = !summary.revision.is_empty()
            && last_snapshot.is_none_or(|at| {
                Utc::now() - at >= chrono::Duration::minutes(SNAPSHOT_STALENESS_MINUTES)
            });

        if snapshot_due {
            if let Err(err) = self.collect_snapshot(provider, thermostat).await {
                error!(thermostat = %thermostat.id, error = %err, "failed to fetch snapshot");
            }
        }

        let last_runtime = match self.offsets.last_runtime_time(&thermostat.id).await {
            Ok(value) => value,
            Err(err) => {
                warn!(thermostat = %thermostat.id, error = %err, "failed to read runtime offset");
                None
            }
        };

        // A fresh thermostat has no watermark until the backfill primes it;
        // skip the runtime fetch until then.
        if let Some(last_runtime) = last_runtime {
            if let Err(err) = self
                .collect_runtime(provider, thermostat, last_runtime)
                .await
            {
                error!(thermostat = %thermostat.id, error = %err, "failed to fetch runtime data");
            }
        }

        Ok(())
    }

    async fn collect_snapshot(
        &self,
        provider: &dyn Provider,
        thermostat: &ThermostatRef,
    ) -> Result<(), SchedulerError> {
        let provider_name = provider.info().name;
        debug!(thermostat = %thermostat.id, "fetching snapshot");

        self.metrics.record_provider_request(&provider_name);
        let snapshot = provider
            .get_snapshot(thermostat, None)
            .await
            .map_err(|err| {
                self.metrics.record_provider_error(&provider_name);
                err
            })
            .context(SnapshotFetchSnafu)?;

        let canonical = self.normalizer.device_snapshot(&snapshot, &provider_name);
        let id = self
            .ids
            .device_snapshot_id(&canonical)
            .context(DocumentIdSnafu)?;

        self.write_to_all_sinks(&[Doc {
            id,
            body: Document::DeviceSnapshot(canonical),
        }])
        .await?;

        if let Err(err) = self
            .offsets
            .set_last_snapshot_time(&thermostat.id, snapshot.collected_at)
            .await
        {
            error!(thermostat = %thermostat.id, error = %err, "failed to update snapshot offset");
        }

        Ok(())
    }

    async fn collect_runtime(
        &self,
        provider: &dyn Provider,
        thermostat: &ThermostatRef,
        last_runtime: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let provider_name = provider.info().name;
        debug!(thermostat = %thermostat.id, since = %last_runtime, "fetching runtime data");

        self.metrics.record_provider_request(&provider_name);
        let now = Utc::now();
        let rows = provider
            .get_runtime(thermostat, last_runtime, now)
            .await
            .map_err(|err| {
                self.metrics.record_provider_error(&provider_name);
                err
            })
            .context(RuntimeFetchSnafu)?;

        if rows.is_empty() {
            debug!(thermostat = %thermostat.id, "no new runtime data");
            return Ok(());
        }

        let normalized: Vec<_> = rows
            .iter()
            .map(|row| self.normalizer.runtime_5m(row, &provider_name))
            .collect();

        let mut docs = Vec::with_capacity(normalized.len());
        for canonical in &normalized {
            let id = self
                .ids
                .runtime_5m_id(canonical)
                .context(DocumentIdSnafu)?;
            docs.push(Doc {
                id,
                body: Document::Runtime5m(canonical.clone()),
            });
        }

        for detected in self.detector.detect(&normalized) {
            let transition = self.normalizer.transition(
                thermostat,
                detected.event_time,
                &detected.prev,
                &detected.next,
                EventInfo {
                    kind: detected.kind.to_string(),
                    ..Default::default()
                },
                &provider_name,
                None,
            );
            let id = self.ids.transition_id(&transition).context(DocumentIdSnafu)?;
            docs.push(Doc {
                id,
                body: Document::Transition(transition),
            });
        }

        self.write_to_all_sinks(&docs).await?;

        if let Some(last) = rows.last() {
            if let Err(err) = self
                .offsets
                .set_last_runtime_time(&thermostat.id, last.event_time)
                .await
            {
                error!(thermostat = %thermostat.id, error = %err, "failed to update runtime offset");
            }
        }

        Ok(())
    }

    /// Write a batch to every sink. Succeeds only when every sink accepted
    /// every document; any failure leaves the caller's offsets untouched.
    async fn write_to_all_sinks(&self, docs: &[Doc]) -> Result<(), SchedulerError> {
        if docs.is_empty() {
            return Ok(());
        }

        let mut failed = 0;
        for sink in &self.sinks {
            let sink_name = sink.info().name;

            match sink.write(docs).await {
                Ok(result) => {
                    self.metrics
                        .record_sink_write(&sink_name, result.success_count as u64);
                    debug!(
                        sink = %sink_name,
                        success_count = result.success_count,
                        error_count = result.error_count,
                        "wrote batch to sink"
                    );

                    if result.error_count > 0 {
                        warn!(
                            sink = %sink_name,
                            errors = ?result.errors,
                            "some documents failed to write"
                        );
                        self.metrics.record_sink_error(&sink_name);
                        failed += 1;
                    }
                }
                Err(err) => {
                    error!(sink = %sink_name, error = %err, "failed to write to sink");
                    self.metrics.record_sink_error(&sink_name);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(SchedulerError::SinkBatch { failed });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use crate::error::{ProviderError, SinkError};
    use crate::model::{
        AuthManager, ProviderInfo, RuntimeRow, Snapshot, SinkInfo, Summary, WriteResult,
    };
    use crate::offset::MemoryOffsetStore;

    fn thermostat() -> ThermostatRef {
        ThermostatRef {
            id: "th1".to_string(),
            name: "Hallway".to_string(),
            provider: "fake".to_string(),
            household_id: None,
        }
    }

    fn runtime_rows(count: usize, start: DateTime<Utc>) -> Vec<RuntimeRow> {
        (0..count)
            .map(|i| RuntimeRow {
                thermostat_ref: thermostat(),
                event_time: start + chrono::Duration::minutes(5 * i as i64),
                mode: "heat".to_string(),
                climate: "Home".to_string(),
                set_heat_c: Some(20.0),
                set_cool_c: None,
                avg_temp_c: Some(21.0),
                outdoor_temp_c: None,
                outdoor_humidity: None,
                equipment: None,
                sensors: None,
            })
            .collect()
    }

    struct FakeAuth;

    #[async_trait]
    impl AuthManager for FakeAuth {
        async fn refresh(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn access_token(&self) -> Result<String, ProviderError> {
            Ok("token".to_string())
        }

        async fn is_valid(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct FakeProvider {
        thermostats: Vec<ThermostatRef>,
        revision: String,
        rows: Mutex<Vec<RuntimeRow>>,
        summary_fails: bool,
        snapshot_calls: Mutex<u32>,
        runtime_calls: Mutex<u32>,
    }

    impl FakeProvider {
        fn with_rows(rows: Vec<RuntimeRow>) -> Self {
            Self {
                thermostats: vec![thermostat()],
                revision: "R1".to_string(),
                rows: Mutex::new(rows),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "fake".to_string(),
                version: "0.0.0".to_string(),
                description: "fake provider".to_string(),
            }
        }

        async fn list_thermostats(&self) -> Result<Vec<ThermostatRef>, ProviderError> {
            Ok(self.thermostats.clone())
        }

        async fn get_summary(&self, tr: &ThermostatRef) -> Result<Summary, ProviderError> {
            if self.summary_fails {
                return Err(ProviderError::Transport {
                    message: "connection refused".to_string(),
                });
            }
            Ok(Summary {
                thermostat_ref: tr.clone(),
                revision: self.revision.clone(),
                last_update: Utc::now(),
            })
        }

        async fn get_snapshot(
            &self,
            tr: &ThermostatRef,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Snapshot, ProviderError> {
            *self.snapshot_calls.lock().unwrap() += 1;
            Ok(Snapshot {
                thermostat_ref: tr.clone(),
                collected_at: "2026-01-05T12:00:00Z".parse().unwrap(),
                program: Some(serde_json::json!({"name": "Winter"})),
                events_active: None,
            })
        }

        async fn get_runtime(
            &self,
            _tr: &ThermostatRef,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<RuntimeRow>, ProviderError> {
            *self.runtime_calls.lock().unwrap() += 1;
            Ok(self.rows.lock().unwrap().clone())
        }

        fn auth(&self) -> Arc<dyn AuthManager> {
            Arc::new(FakeAuth)
        }
    }

    #[derive(Default)]
    struct FakeSink {
        written: Mutex<Vec<Doc>>,
        fail_writes: AtomicBool,
    }

    impl FakeSink {
        fn docs_of_type(&self, type_tag: &str) -> usize {
            self.written
                .lock()
                .unwrap()
                .iter()
                .filter(|doc| doc.body.type_tag() == type_tag)
                .count()
        }
    }

    #[async_trait]
    impl Sink for FakeSink {
        fn info(&self) -> SinkInfo {
            SinkInfo {
                name: "fake".to_string(),
                version: "0.0.0".to_string(),
                description: "fake sink".to_string(),
            }
        }

        async fn open(&self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn write(&self, docs: &[Doc]) -> Result<WriteResult, SinkError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(SinkError::Unreachable {
                    message: "connection refused".to_string(),
                });
            }
            self.written.lock().unwrap().extend_from_slice(docs);
            Ok(WriteResult {
                success_count: docs.len(),
                error_count: 0,
                errors: Vec::new(),
            })
        }

        async fn close(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct Harness {
        scheduler: Scheduler,
        provider: Arc<FakeProvider>,
        sink: Arc<FakeSink>,
        offsets: Arc<MemoryOffsetStore>,
        metrics: Arc<MetricsCollector>,
    }

    fn harness(provider: FakeProvider) -> Harness {
        let provider = Arc::new(provider);
        let sink = Arc::new(FakeSink::default());
        let offsets = Arc::new(MemoryOffsetStore::new());
        let metrics = Arc::new(MetricsCollector::new());

        let scheduler = Scheduler::new(
            vec![provider.clone() as Arc<dyn Provider>],
            vec![sink.clone() as Arc<dyn Sink>],
            Normalizer::new("UTC").unwrap(),
            offsets.clone() as Arc<dyn OffsetStore>,
            Duration::from_secs(300),
            Duration::from_secs(3600),
            metrics.clone(),
            CancellationToken::new(),
        );

        Harness {
            scheduler,
            provider,
            sink,
            offsets,
            metrics,
        }
    }

    #[tokio::test]
    async fn backfill_writes_rows_and_primes_the_offset() {
        let start: DateTime<Utc> = "2026-01-05T11:00:00Z".parse().unwrap();
        let rows = runtime_rows(12, start);
        let last_event = rows.last().unwrap().event_time;
        let h = harness(FakeProvider::with_rows(rows));

        h.scheduler.backfill_all().await;

        assert_eq!(h.sink.docs_of_type("runtime_5m"), 12);
        assert_eq!(h.sink.docs_of_type("transition"), 0);
        assert_eq!(
            h.offsets.last_runtime_time("th1").await.unwrap(),
            Some(last_event)
        );
    }

    #[tokio::test]
    async fn backfill_with_no_rows_leaves_the_offset_unset() {
        let h = harness(FakeProvider::with_rows(Vec::new()));

        h.scheduler.backfill_all().await;

        assert_eq!(h.offsets.last_runtime_time("th1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cycle_skips_runtime_fetch_without_a_watermark() {
        let start: DateTime<Utc> = "2026-01-05T11:00:00Z".parse().unwrap();
        let h = harness(FakeProvider::with_rows(runtime_rows(3, start)));

        h.scheduler.poll_all().await;

        assert_eq!(*h.provider.runtime_calls.lock().unwrap(), 0);
        assert_eq!(h.sink.docs_of_type("runtime_5m"), 0);
    }

    #[tokio::test]
    async fn snapshot_gating_follows_revision_and_staleness() {
        let h = harness(FakeProvider::with_rows(Vec::new()));

        // No previous snapshot: fetched, and the offset is set to the
        // snapshot's own collected_at.
        h.scheduler.poll_all().await;
        assert_eq!(*h.provider.snapshot_calls.lock().unwrap(), 1);
        assert_eq!(
            h.offsets.last_snapshot_time("th1").await.unwrap(),
            Some("2026-01-05T12:00:00Z".parse().unwrap())
        );

        // Fresh snapshot (10 minutes old): gated off.
        h.offsets
            .set_last_snapshot_time("th1", Utc::now() - chrono::Duration::minutes(10))
            .await
            .unwrap();
        h.scheduler.poll_all().await;
        assert_eq!(*h.provider.snapshot_calls.lock().unwrap(), 1);

        // Stale snapshot (16 minutes old): fetched again.
        h.offsets
            .set_last_snapshot_time("th1", Utc::now() - chrono::Duration::minutes(16))
            .await
            .unwrap();
        h.scheduler.poll_all().await;
        assert_eq!(*h.provider.snapshot_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_revision_never_fetches_a_snapshot() {
        let mut provider = FakeProvider::with_rows(Vec::new());
        provider.revision = String::new();
        let h = harness(provider);

        h.scheduler.poll_all().await;

        assert_eq!(*h.provider.snapshot_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn transitions_are_emitted_between_changed_rows() {
        let start: DateTime<Utc> = "2026-01-05T11:00:00Z".parse().unwrap();
        let mut rows = runtime_rows(3, start);
        rows[1].set_heat_c = Some(21.0);
        rows[2].mode = "cool".to_string();
        rows[2].climate = "Away".to_string();
        rows[2].set_heat_c = None;
        rows[2].set_cool_c = Some(24.0);
        let h = harness(FakeProvider::with_rows(rows));

        h.offsets
            .set_last_runtime_time("th1", start - chrono::Duration::minutes(5))
            .await
            .unwrap();
        h.scheduler.poll_all().await;

        assert_eq!(h.sink.docs_of_type("runtime_5m"), 3);
        assert_eq!(h.sink.docs_of_type("transition"), 2);

        let written = h.sink.written.lock().unwrap();
        let kinds: Vec<String> = written
            .iter()
            .filter_map(|doc| match &doc.body {
                Document::Transition(t) => Some(t.event.kind.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec!["hold".to_string(), "manual".to_string()]);
    }

    #[tokio::test]
    async fn failed_sink_write_leaves_offsets_unchanged() {
        let start: DateTime<Utc> = "2026-01-05T11:00:00Z".parse().unwrap();
        let h = harness(FakeProvider::with_rows(runtime_rows(3, start)));
        let watermark = start - chrono::Duration::minutes(5);

        h.offsets
            .set_last_runtime_time("th1", watermark)
            .await
            .unwrap();
        h.sink.fail_writes.store(true, Ordering::SeqCst);

        h.scheduler.poll_all().await;

        // The watermark did not advance, so the next cycle re-covers the
        // same window.
        assert_eq!(
            h.offsets.last_runtime_time("th1").await.unwrap(),
            Some(watermark)
        );
        // The snapshot fetch failed its write too, so its offset is also
        // unset and both failures were counted.
        assert_eq!(h.offsets.last_snapshot_time("th1").await.unwrap(), None);
        assert_eq!(h.metrics.snapshot().sinks["fake"].errors_total, 2);

        // Recovery: the next cycle re-fetches from the same watermark.
        h.sink.fail_writes.store(false, Ordering::SeqCst);
        h.scheduler.poll_all().await;
        assert_eq!(h.sink.docs_of_type("runtime_5m"), 3);
        assert!(h.offsets.last_runtime_time("th1").await.unwrap().unwrap() > watermark);
    }

    #[tokio::test]
    async fn summary_failure_aborts_only_that_thermostat() {
        let mut provider = FakeProvider::with_rows(Vec::new());
        provider.summary_fails = true;
        provider.thermostats = vec![
            thermostat(),
            ThermostatRef {
                id: "th2".to_string(),
                name: "Bedroom".to_string(),
                provider: "fake".to_string(),
                household_id: None,
            },
        ];
        let h = harness(provider);

        // Both thermostats fail their summary; the cycle still completes and
        // records one error per thermostat.
        h.scheduler.poll_all().await;

        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.providers["fake"].errors_total, 2);
        assert_eq!(*h.provider.snapshot_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn provider_request_metrics_count_each_call_site() {
        let start: DateTime<Utc> = "2026-01-05T11:00:00Z".parse().unwrap();
        let h = harness(FakeProvider::with_rows(runtime_rows(2, start)));

        h.offsets
            .set_last_runtime_time("th1", start - chrono::Duration::minutes(5))
            .await
            .unwrap();
        h.scheduler.poll_all().await;

        // Summary + snapshot + runtime.
        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.providers["fake"].requests_total, 3);
        assert_eq!(snapshot.providers["fake"].errors_total, 0);
        assert_eq!(snapshot.sinks["fake"].documents_written, 3);
    }

    #[tokio::test]
    async fn rerunning_a_window_produces_identical_ids() {
        let start: DateTime<Utc> = "2026-01-05T11:00:00Z".parse().unwrap();
        let h = harness(FakeProvider::with_rows(runtime_rows(2, start)));
        let watermark = start - chrono::Duration::minutes(5);

        h.offsets
            .set_last_runtime_time("th1", watermark)
            .await
            .unwrap();
        h.scheduler.poll_all().await;

        // Roll the watermark back, as if the offset write had been lost.
        h.offsets
            .set_last_runtime_time("th1", watermark)
            .await
            .unwrap();
        h.scheduler.poll_all().await;

        let written = h.sink.written.lock().unwrap();
        let runtime_ids: Vec<&str> = written
            .iter()
            .filter(|doc| doc.body.type_tag() == "runtime_5m")
            .map(|doc| doc.id.as_str())
            .collect();
        assert_eq!(runtime_ids.len(), 4);
        assert_eq!(runtime_ids[0], runtime_ids[2]);
        assert_eq!(runtime_ids[1], runtime_ids[3]);
    }
}
