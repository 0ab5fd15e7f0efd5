//! Tracker / Telemetry (C8, spec §4.8): in-process aggregation over the
//! `EventHub`'s upstream attempt stream, plus request-level `TraceRecord`
//! assembly handed to a durable `TraceStore` (implemented by
//! `rcc-storage`). `tracing` remains the operator-facing log; this is the
//! durable, queryable trail.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use rcc_provider_core::trace::{AttemptRecord, RequestOutcome, TraceRecord, TraceStore};
use rcc_provider_core::{CredentialId, Event, EventHub};
use tracing::warn;

const LATENCY_WINDOW: usize = 2_000;

/// Rolling per-scheduler counters and a bounded latency sample window for
/// p50/p95/p99 (spec §4.8 "aggregated metrics").
#[derive(Default)]
struct SchedulerStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
    latencies_ms: Mutex<VecDeque<u64>>,
}

impl SchedulerStats {
    fn record(&self, success: bool, latency_ms: u64) {
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let mut samples = self.latencies_ms.lock().expect("latency lock poisoned");
        if samples.len() >= LATENCY_WINDOW {
            samples.pop_front();
        }
        samples.push_back(latency_ms);
    }

    fn percentiles(&self) -> (u64, u64, u64) {
        let mut samples: Vec<u64> = self
            .latencies_ms
            .lock()
            .expect("latency lock poisoned")
            .iter()
            .copied()
            .collect();
        if samples.is_empty() {
            return (0, 0, 0);
        }
        samples.sort_unstable();
        let pick = |q: f64| samples[((samples.len() - 1) as f64 * q).round() as usize];
        (pick(0.50), pick(0.95), pick(0.99))
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerMetrics {
    pub virtual_model_id: String,
    pub succeeded: u64,
    pub failed: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Default)]
struct CredentialUsage {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

struct OpenTrace {
    virtual_model_id: String,
    started_at: SystemTime,
    attempts: Vec<AttemptRecord>,
}

struct Inner {
    scheduler_stats: Mutex<HashMap<String, Arc<SchedulerStats>>>,
    credential_usage: Mutex<HashMap<CredentialId, Arc<CredentialUsage>>>,
    open_traces: Mutex<HashMap<String, OpenTrace>>,
    store: Option<Arc<dyn TraceStore>>,
}

/// Subscribes to the `EventHub`'s upstream attempt stream for live metrics
/// and assembles per-request `TraceRecord`s, closed explicitly by whoever
/// drives a request to completion (`Manager::route`).
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

impl Tracker {
    pub fn new(events: EventHub, store: Option<Arc<dyn TraceStore>>) -> Self {
        let inner = Arc::new(Inner {
            scheduler_stats: Mutex::new(HashMap::new()),
            credential_usage: Mutex::new(HashMap::new()),
            open_traces: Mutex::new(HashMap::new()),
            store,
        });
        let tracker = Self { inner };
        tracker.clone().spawn_subscriber(events);
        tracker
    }

    fn spawn_subscriber(self, events: EventHub) {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Event::Upstream(upstream)) => self.on_upstream(upstream),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "tracker lagged behind the event stream");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn on_upstream(&self, event: rcc_provider_core::UpstreamEvent) {
        let success = event.classification == rcc_provider_core::Classification::Success;

        {
            let mut map = self.inner.scheduler_stats.lock().expect("lock poisoned");
            let stats = map
                .entry(event.virtual_model_id.clone())
                .or_insert_with(|| Arc::new(SchedulerStats::default()))
                .clone();
            stats.record(success, event.latency_ms);
        }

        if let Some(credential_id) = event.credential_id {
            let mut map = self.inner.credential_usage.lock().expect("lock poisoned");
            let usage = map.entry(credential_id).or_insert_with(|| Arc::new(CredentialUsage::default()));
            if success {
                usage.succeeded.fetch_add(1, Ordering::Relaxed);
            } else {
                usage.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut traces = self.inner.open_traces.lock().expect("lock poisoned");
        let trace = traces.entry(event.trace_id.clone()).or_insert_with(|| OpenTrace {
            virtual_model_id: event.virtual_model_id.clone(),
            started_at: event.at,
            attempts: Vec::new(),
        });
        trace.attempts.push(AttemptRecord {
            pipeline_id: event.pipeline_id,
            provider_id: event.provider,
            credential_id: event.credential_id,
            started_at: event.at,
            ended_at: event.at,
            outcome: event.classification,
            error_category: event.error_message,
        });
    }

    /// Closes the in-progress trace for `request_id` with its final
    /// disposition and hands it to the durable store, if configured. Safe
    /// to call even if no attempts were ever recorded (e.g.
    /// `UnknownVirtualModel`): an empty-attempt record is still written.
    pub async fn close_request(
        &self,
        request_id: &str,
        virtual_model_id: &str,
        outcome: RequestOutcome,
    ) {
        let open = {
            let mut traces = self.inner.open_traces.lock().expect("lock poisoned");
            traces.remove(request_id)
        };

        let (started_at, attempts, resolved_virtual_model_id) = match open {
            Some(trace) => (trace.started_at, trace.attempts, trace.virtual_model_id),
            None => (SystemTime::now(), Vec::new(), virtual_model_id.to_string()),
        };

        let record = TraceRecord {
            request_id: request_id.to_string(),
            virtual_model_id: resolved_virtual_model_id,
            started_at,
            ended_at: SystemTime::now(),
            outcome,
            attempts,
        };

        if let Some(store) = &self.inner.store
            && let Err(err) = store.append(record).await
        {
            warn!(request_id, error = %err, "failed to persist trace record");
        }
    }

    pub fn scheduler_metrics(&self) -> Vec<SchedulerMetrics> {
        self.inner
            .scheduler_stats
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(virtual_model_id, stats)| {
                let (p50, p95, p99) = stats.percentiles();
                SchedulerMetrics {
                    virtual_model_id: virtual_model_id.clone(),
                    succeeded: stats.succeeded.load(Ordering::Relaxed),
                    failed: stats.failed.load(Ordering::Relaxed),
                    p50_ms: p50,
                    p95_ms: p95,
                    p99_ms: p99,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use rcc_provider_core::{Classification, UpstreamEvent};

    #[derive(Default)]
    struct MemoryStore {
        records: StdMutex<Vec<TraceRecord>>,
    }

    impl TraceStore for MemoryStore {
        fn append<'a>(
            &'a self,
            record: TraceRecord,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'a>>
        {
            Box::pin(async move {
                self.records.lock().expect("lock poisoned").push(record);
                Ok(())
            })
        }
    }

    fn upstream_event(trace_id: &str, virtual_model_id: &str, classification: Classification, latency_ms: u64) -> Event {
        Event::Upstream(UpstreamEvent {
            trace_id: trace_id.to_string(),
            at: SystemTime::now(),
            virtual_model_id: virtual_model_id.to_string(),
            pipeline_id: "default:p1:model-a".to_string(),
            provider: "p1".to_string(),
            credential_id: Some(1),
            attempt_no: 1,
            model: "model-a".to_string(),
            response_status: None,
            classification,
            usage: None,
            error_message: None,
            latency_ms,
        })
    }

    #[tokio::test]
    async fn aggregates_success_and_failure_counts_per_scheduler() {
        let events = EventHub::new(16);
        let tracker = Tracker::new(events.clone(), None);

        events.emit(upstream_event("req-1", "default", Classification::Success, 10)).await;
        events.emit(upstream_event("req-2", "default", Classification::ServerError, 20)).await;
        events.emit(upstream_event("req-3", "default", Classification::Success, 30)).await;

        // Give the subscriber task a chance to drain the channel.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let metrics = tracker.scheduler_metrics();
        let default = metrics.iter().find(|m| m.virtual_model_id == "default").expect("metrics recorded");
        assert_eq!(default.succeeded, 2);
        assert_eq!(default.failed, 1);
    }

    #[tokio::test]
    async fn closing_a_request_with_no_attempts_still_produces_a_record() {
        let events = EventHub::new(16);
        let store = Arc::new(MemoryStore::default());
        let tracker = Tracker::new(events, Some(store.clone() as Arc<dyn TraceStore>));

        tracker
            .close_request("req-unknown", "ghost", RequestOutcome::UnknownVirtualModel)
            .await;

        let records = store.records.lock().expect("lock poisoned");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request_id, "req-unknown");
        assert!(records[0].attempts.is_empty());
        assert_eq!(records[0].outcome, RequestOutcome::UnknownVirtualModel);
    }

    #[tokio::test]
    async fn closing_a_request_with_recorded_attempts_carries_them_into_the_trace() {
        let events = EventHub::new(16);
        let store = Arc::new(MemoryStore::default());
        let tracker = Tracker::new(events.clone(), Some(store.clone() as Arc<dyn TraceStore>));

        events.emit(upstream_event("req-1", "default", Classification::Success, 5)).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        tracker.close_request("req-1", "default", RequestOutcome::Success).await;

        let records = store.records.lock().expect("lock poisoned");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempts.len(), 1);
        assert_eq!(records[0].attempts[0].outcome, Classification::Success);
    }
}
