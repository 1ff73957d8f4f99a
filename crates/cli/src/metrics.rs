use anyhow::{anyhow, Result};
use conductor_protocol::{ContractViolation, EventKind, PairKey};
use conductor_reconciler::{FailureReason, ReconcileObserver, ReconciliationOutcome};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder, TEXT_FORMAT,
};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

const DURATION_BUCKETS: [f64; 10] = [0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Consecutive failures after which a pair counts as repeatedly failing.
const REPEATED_FAILURE_THRESHOLD: u32 = 2;

/// Pairs with an open failure streak that are tracked at once. Streaks of pairs that
/// are never attempted again are only dropped on their next outcome.
const MAX_TRACKED_STREAKS: usize = 10_000;

#[derive(Clone)]
struct KindMetrics {
    events: IntCounter,
    success: IntCounter,
    error: IntCounter,
    duration: Histogram,
}

impl KindMetrics {
    fn new(kind: EventKind) -> Result<Self> {
        let prefix = kind.metric_prefix();
        let label = kind.as_str();
        Ok(Self {
            events: IntCounter::with_opts(Opts::new(
                format!("{prefix}_events_total"),
                format!("{label} events received"),
            ))?,
            success: IntCounter::with_opts(Opts::new(
                format!("{prefix}_success_total"),
                format!("{label} events reconciled without failures"),
            ))?,
            error: IntCounter::with_opts(Opts::new(
                format!("{prefix}_error_total"),
                format!("{label} events with failed pairs or enumeration"),
            ))?,
            duration: Histogram::with_opts(
                HistogramOpts::new(
                    format!("{prefix}_duration_seconds"),
                    format!("Time spent handling {label} events"),
                )
                .buckets(DURATION_BUCKETS.to_vec()),
            )?,
        })
    }

    fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.events.clone()))?;
        registry.register(Box::new(self.success.clone()))?;
        registry.register(Box::new(self.error.clone()))?;
        registry.register(Box::new(self.duration.clone()))?;
        Ok(())
    }
}

/// Prometheus view of reconciliation, fed through [`ReconcileObserver`].
pub struct ConductorMetrics {
    registry: Arc<Registry>,
    project_created: KindMetrics,
    regional_scenario_created: KindMetrics,
    pairs: IntCounterVec,
    retries: IntCounter,
    rejected: IntCounter,
    repeatedly_failing: IntGauge,
    failure_streaks: Mutex<HashMap<PairKey, u32>>,
}

impl ConductorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let project_created = KindMetrics::new(EventKind::ProjectCreated)?;
        let regional_scenario_created = KindMetrics::new(EventKind::RegionalScenarioCreated)?;
        let pairs = IntCounterVec::new(
            Opts::new("base_scenario_pairs_total", "Pair reconciliation outcomes"),
            &["outcome"],
        )?;
        let retries = IntCounter::with_opts(Opts::new(
            "directory_retries_total",
            "Directory calls retried after a transient failure",
        ))?;
        let rejected = IntCounter::with_opts(Opts::new(
            "events_rejected_total",
            "Events dropped as contract violations",
        ))?;
        let repeatedly_failing = IntGauge::with_opts(Opts::new(
            "base_scenario_pairs_repeatedly_failing",
            "Pairs whose last two or more reconciliations failed",
        ))?;

        project_created.register(&registry)?;
        regional_scenario_created.register(&registry)?;
        registry.register(Box::new(pairs.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(rejected.clone()))?;
        registry.register(Box::new(repeatedly_failing.clone()))?;

        Ok(Self {
            registry,
            project_created,
            regional_scenario_created,
            pairs,
            retries,
            rejected,
            repeatedly_failing,
            failure_streaks: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String> {
        encode(&self.registry)
    }

    fn kind(&self, kind: EventKind) -> &KindMetrics {
        match kind {
            EventKind::ProjectCreated => &self.project_created,
            EventKind::RegionalScenarioCreated => &self.regional_scenario_created,
        }
    }

    fn track_streak(&self, key: PairKey, outcome: &ReconciliationOutcome) {
        // a pair cut short by shutdown says nothing about its health
        if let ReconciliationOutcome::Failed(FailureReason::Cancelled { .. }) = outcome {
            return;
        }
        let mut streaks = self
            .failure_streaks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if outcome.is_failed() {
            if !streaks.contains_key(&key) && streaks.len() >= MAX_TRACKED_STREAKS {
                log::debug!(
                    "not tracking failure streak of {key}: {MAX_TRACKED_STREAKS} pairs already tracked"
                );
                return;
            }
            let streak = streaks.entry(key).or_insert(0);
            *streak += 1;
            if *streak == REPEATED_FAILURE_THRESHOLD {
                self.repeatedly_failing.inc();
                log::warn!("{key} failed {streak} times in a row");
            }
        } else if let Some(streak) = streaks.remove(&key) {
            if streak >= REPEATED_FAILURE_THRESHOLD {
                self.repeatedly_failing.dec();
            }
        }
    }
}

impl ReconcileObserver for ConductorMetrics {
    fn on_event_received(&self, kind: EventKind) {
        self.kind(kind).events.inc();
    }

    fn on_event_finished(&self, kind: EventKind, succeeded: bool, elapsed: Duration) {
        let metrics = self.kind(kind);
        if succeeded {
            metrics.success.inc();
        } else {
            metrics.error.inc();
        }
        metrics.duration.observe(elapsed.as_secs_f64());
    }

    fn on_event_rejected(&self, _violation: &ContractViolation) {
        self.rejected.inc();
    }

    fn on_pair_outcome(&self, _kind: EventKind, key: PairKey, outcome: &ReconciliationOutcome) {
        self.pairs.with_label_values(&[outcome.label()]).inc();
        self.track_streak(key, outcome);
    }

    fn on_retry(&self, _kind: EventKind, _attempt: u32) {
        self.retries.inc();
    }
}

fn encode(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Serves the registry on `0.0.0.0:port`; any path returns the text exposition.
pub fn serve(registry: Arc<Registry>, port: u16) -> Result<JoinHandle<()>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_service = make_service_fn(move |_| {
        let registry = Arc::clone(&registry);
        async move {
            Ok::<_, Infallible>(service_fn(move |_req: Request<Body>| {
                let registry = Arc::clone(&registry);
                async move {
                    let body = encode(&registry).unwrap_or_else(|err| {
                        log::error!("failed to encode metrics: {err}");
                        String::new()
                    });
                    let mut response = Response::new(Body::from(body));
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .map_err(|err| anyhow!("failed to bind metrics endpoint on {addr}: {err}"))?
        .serve(make_service);
    log::info!("serving Prometheus metrics on {addr}");

    Ok(tokio::spawn(async move {
        if let Err(err) = server.await {
            log::error!("Prometheus endpoint failed: {err}");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_directory::DirectoryError;
    use conductor_protocol::{BaseScenarioId, ProjectId, RegionalScenarioId};

    fn failed() -> ReconciliationOutcome {
        ReconciliationOutcome::Failed(FailureReason::Rejected {
            error: DirectoryError::Rejected {
                status: 400,
                message: "bad".into(),
            },
        })
    }

    fn key(p: i64) -> PairKey {
        PairKey::new(ProjectId(p), RegionalScenarioId(1))
    }

    #[test]
    fn event_counters_use_per_kind_families() {
        let metrics = ConductorMetrics::new().unwrap();
        metrics.on_event_received(EventKind::ProjectCreated);
        metrics.on_event_finished(EventKind::ProjectCreated, true, Duration::from_millis(300));
        metrics.on_event_received(EventKind::RegionalScenarioCreated);
        metrics.on_event_finished(EventKind::RegionalScenarioCreated, false, Duration::from_secs(1));

        let text = metrics.render().unwrap();
        assert!(text.contains("project_created_events_total 1"));
        assert!(text.contains("project_created_success_total 1"));
        assert!(text.contains("regional_scenario_created_error_total 1"));
        assert!(text.contains("project_created_duration_seconds_bucket{le=\"0.5\"} 1"));
    }

    #[test]
    fn pair_outcomes_are_labelled() {
        let metrics = ConductorMetrics::new().unwrap();
        metrics.on_pair_outcome(
            EventKind::ProjectCreated,
            key(1),
            &ReconciliationOutcome::Created {
                base_scenario_id: BaseScenarioId(3),
            },
        );
        metrics.on_pair_outcome(EventKind::ProjectCreated, key(2), &ReconciliationOutcome::AlreadyExists);

        let text = metrics.render().unwrap();
        assert!(text.contains("base_scenario_pairs_total{outcome=\"created\"} 1"));
        assert!(text.contains("base_scenario_pairs_total{outcome=\"already_exists\"} 1"));
    }

    #[test]
    fn repeated_failures_are_tracked_until_success() {
        let metrics = ConductorMetrics::new().unwrap();
        let kind = EventKind::ProjectCreated;

        metrics.on_pair_outcome(kind, key(1), &failed());
        assert_eq!(metrics.repeatedly_failing.get(), 0);
        metrics.on_pair_outcome(kind, key(1), &failed());
        metrics.on_pair_outcome(kind, key(1), &failed());
        metrics.on_pair_outcome(kind, key(2), &failed());
        assert_eq!(metrics.repeatedly_failing.get(), 1);

        metrics.on_pair_outcome(kind, key(1), &ReconciliationOutcome::AlreadyExists);
        assert_eq!(metrics.repeatedly_failing.get(), 0);
        metrics.on_pair_outcome(kind, key(2), &ReconciliationOutcome::AlreadyExists);
        assert_eq!(metrics.repeatedly_failing.get(), 0);
    }

    #[test]
    fn cancelled_outcomes_leave_streaks_untouched() {
        let metrics = ConductorMetrics::new().unwrap();
        let kind = EventKind::ProjectCreated;
        let cancelled = ReconciliationOutcome::Failed(FailureReason::Cancelled { attempts: 0 });

        for _ in 0..3 {
            metrics.on_pair_outcome(kind, key(1), &cancelled);
        }
        assert_eq!(metrics.repeatedly_failing.get(), 0);

        metrics.on_pair_outcome(kind, key(2), &failed());
        metrics.on_pair_outcome(kind, key(2), &cancelled);
        metrics.on_pair_outcome(kind, key(2), &failed());
        assert_eq!(metrics.repeatedly_failing.get(), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("base_scenario_pairs_total{outcome=\"failed\"} 5"));
    }

    #[test]
    fn streak_tracking_is_bounded() {
        let metrics = ConductorMetrics::new().unwrap();
        let kind = EventKind::RegionalScenarioCreated;
        let extra = 5;
        for p in 0..(MAX_TRACKED_STREAKS + extra) as i64 {
            metrics.on_pair_outcome(kind, key(p), &failed());
        }
        assert_eq!(metrics.failure_streaks.lock().unwrap().len(), MAX_TRACKED_STREAKS);

        // pairs already tracked keep counting
        metrics.on_pair_outcome(kind, key(0), &failed());
        assert_eq!(metrics.repeatedly_failing.get(), 1);
    }

    #[tokio::test]
    async fn endpoint_serves_text_exposition() {
        let metrics = ConductorMetrics::new().unwrap();
        metrics.on_retry(EventKind::ProjectCreated, 1);

        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let handle = serve(metrics.registry(), port).unwrap();

        let uri: hyper::Uri = format!("http://127.0.0.1:{port}/metrics").parse().unwrap();
        let response = hyper::Client::new().get(uri).await.unwrap();
        assert_eq!(response.status(), 200);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("directory_retries_total 1"));

        handle.abort();
    }
}
