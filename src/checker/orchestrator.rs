//! The check orchestrator.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::checker::credentials::FileToken;
use crate::checker::probe::{
    always_happy_url, Probe, API_SERVER_DIRECT, API_SERVER_DNS, ME_INGRESS, ME_SERVICE,
};
use crate::checker::snapshot::{ResultSnapshot, STATE_OK, STATE_SKIPPED};
use crate::config::validation::validate_extra_checks;
use crate::config::{ChecksConfig, ConfigError, NeighbourhoodConfig, NurseConfig};
use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};
use crate::neighbourhood::discovery::filter_candidates;
use crate::neighbourhood::{self, Discovery, DiscoveryError, Neighbour, SelectError, TtlCache};
use crate::observability::metrics::NEIGHBOURHOOD_INCOMING_CHECKS;
use crate::transport::{CheckOutcome, InstrumentedTransport};

const INCOMPLETE: &str = "probe did not complete";

/// Why no neighbour probes ran this cycle.
#[derive(Debug, Error)]
enum NeighbourhoodError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Select(#[from] SelectError),
}

/// Runs probe cycles and publishes their snapshots.
pub struct Checker {
    checks: ChecksConfig,
    neighbourhood: NeighbourhoodConfig,
    use_tls: bool,
    transport: InstrumentedTransport,
    discovery: Arc<dyn Discovery>,
    token: Option<FileToken>,
    last: ArcSwapOption<ResultSnapshot>,
    incoming: TtlCache<String>,
    permits: Arc<Semaphore>,
    stop: Shutdown,
}

impl Checker {
    /// Fails only if the extra checks are invalid.
    pub fn new(
        config: &NurseConfig,
        transport: InstrumentedTransport,
        discovery: Arc<dyn Discovery>,
    ) -> Result<Self, ConfigError> {
        let errors = validate_extra_checks(&config.checks.extra_checks);
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }

        Ok(Self {
            checks: config.checks.clone(),
            neighbourhood: config.neighbourhood.clone(),
            use_tls: config.server.use_tls,
            transport,
            discovery,
            token: config.tls.token_path.clone().map(FileToken::new),
            last: ArcSwapOption::empty(),
            incoming: TtlCache::new(config.neighbourhood.incoming_ttl()),
            permits: Arc::new(Semaphore::new(config.checks.max_concurrent_probes.max(1))),
            stop: Shutdown::new(),
        })
    }

    /// Run one full cycle and publish its snapshot.
    pub async fn run(&self) -> Arc<ResultSnapshot> {
        let started = Instant::now();
        let mut outcomes = BTreeMap::new();
        let mut probes = Vec::new();

        for (label, skip, probe) in self.fixed_probes() {
            if skip {
                outcomes.insert(label.to_string(), CheckOutcome::Skipped);
            } else {
                probes.push(probe);
            }
        }
        probes.extend(
            self.checks
                .extra_checks
                .iter()
                .map(|(name, url)| Probe::new(name.clone(), url.clone())),
        );

        let (neighbourhood_state, neighbours) = if self.checks.skip_neighbourhood {
            (STATE_SKIPPED.to_string(), Vec::new())
        } else {
            match self.neighbours().await {
                Ok(neighbours) => (STATE_OK.to_string(), neighbours),
                Err(e) => {
                    warn!(error = %e, "Neighbourhood unavailable, skipping neighbour checks");
                    (e.to_string(), Vec::new())
                }
            }
        };

        let mut labels: HashSet<String> = outcomes
            .keys()
            .chain(probes.iter().map(|p| &p.label))
            .cloned()
            .collect();
        for neighbour in &neighbours {
            let label = neighbour.label();
            if !labels.insert(label.clone()) {
                debug!(label = %label, pod = %neighbour.pod_name, "Duplicate neighbour label, skipping");
                continue;
            }
            probes.push(Probe::new(label, self.neighbour_url(neighbour)).with_origin());
        }

        let probe_count = probes.len();
        outcomes.extend(self.execute(probes).await);

        let snapshot = Arc::new(ResultSnapshot {
            checks: outcomes,
            neighbourhood_state,
            neighbourhood: neighbours,
            produced_at: SystemTime::now(),
        });
        self.last.store(Some(snapshot.clone()));

        debug!(
            probes = probe_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Check cycle complete"
        );
        snapshot
    }

    /// Most recently published snapshot; `None` before the first cycle.
    pub fn last_snapshot(&self) -> Option<Arc<ResultSnapshot>> {
        self.last.load_full()
    }

    /// Run a cycle every `interval` until [`stop`](Self::stop) is called or
    /// `shutdown` fires. The first cycle starts immediately.
    pub async fn run_scheduled(&self, interval: Duration, mut shutdown: ShutdownSignal) {
        let mut stop = self.stop.subscribe();
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = interval.as_millis() as u64, "Checker scheduled");
        loop {
            tokio::select! {
                biased;
                _ = stop.recv() => break,
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    self.run().await;
                }
            }
        }
        info!("Checker stopped");
    }

    /// Stop scheduling further cycles. Idempotent; a running cycle finishes.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    /// Note an inbound ping from a neighbour.
    pub fn record_ping(&self, peer: impl Into<String>) {
        self.incoming.insert(peer.into());
    }

    /// Distinct neighbours that pinged within the incoming TTL.
    pub fn active_peer_count(&self) -> usize {
        self.incoming.active_entries()
    }

    /// Publish the incoming-checks gauge.
    pub fn report_incoming_checks(&self) {
        self.transport
            .sink()
            .set_gauge(NEIGHBOURHOOD_INCOMING_CHECKS, &[], self.active_peer_count() as f64);
    }

    fn fixed_probes(&self) -> [(&'static str, bool, Probe); 4] {
        let c = &self.checks;
        [
            (
                API_SERVER_DIRECT,
                c.skip_api_server_direct,
                Probe::new(
                    API_SERVER_DIRECT,
                    format!("https://{}/version", host_port(&c.api_server_host, c.api_server_port)),
                )
                .with_bearer(),
            ),
            (
                API_SERVER_DNS,
                c.skip_api_server_dns,
                Probe::new(
                    API_SERVER_DNS,
                    format!("https://{}/version", host_port(&c.api_server_dns_name, c.api_server_port)),
                )
                .with_bearer(),
            ),
            (
                ME_INGRESS,
                c.skip_me_ingress,
                Probe::new(ME_INGRESS, always_happy_url(&c.ingress_url)),
            ),
            (
                ME_SERVICE,
                c.skip_me_service,
                Probe::new(ME_SERVICE, always_happy_url(&c.service_url)),
            ),
        ]
    }

    fn neighbour_url(&self, neighbour: &Neighbour) -> String {
        let (scheme, port) = if self.use_tls {
            ("https", self.neighbourhood.neighbour_https_port)
        } else {
            ("http", self.neighbourhood.neighbour_http_port)
        };
        always_happy_url(&format!("{scheme}://{}", host_port(&neighbour.pod_ip, port)))
    }

    async fn neighbours(&self) -> Result<Vec<Neighbour>, NeighbourhoodError> {
        let n = &self.neighbourhood;
        let candidates = self
            .discovery
            .list_candidates(&n.namespace, &n.label_selector)
            .await?;
        let (self_node, eligible) = filter_candidates(candidates, &n.pod_name, n.allow_unschedulable);
        let selected = neighbourhood::select(
            self_node.as_deref().unwrap_or_default(),
            &eligible,
            n.neighbour_limit,
        )?;
        Ok(selected)
    }

    /// Run `probes` concurrently. Every probe gets an outcome, even if its
    /// task panicked.
    async fn execute(&self, probes: Vec<Probe>) -> BTreeMap<String, CheckOutcome> {
        let mut outcomes: BTreeMap<String, CheckOutcome> = probes
            .iter()
            .map(|p| (p.label.clone(), CheckOutcome::Error(INCOMPLETE.to_string())))
            .collect();

        let needs_token = probes.iter().any(|p| p.bearer);
        let token = match (&self.token, needs_token) {
            (Some(token), true) => token.read().await,
            _ => None,
        };

        let mut tasks = JoinSet::new();
        for probe in probes {
            let request = probe.build_request(token.as_deref(), &self.neighbourhood.pod_name);
            let transport = self.transport.clone();
            let permits = self.permits.clone();
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                let outcome = match request {
                    Ok(request) => transport.probe(&probe.label, request).await,
                    Err(e) => CheckOutcome::Error(e.to_string()),
                };
                (probe.label, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((label, outcome)) => {
                    if let CheckOutcome::Error(detail) = &outcome {
                        warn!(label = %label, outcome = %detail, "Check failed");
                    }
                    outcomes.insert(label, outcome);
                }
                Err(e) => error!(error = %e, "Probe task failed"),
            }
        }
        outcomes
    }
}

impl std::fmt::Debug for Checker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checker")
            .field("namespace", &self.neighbourhood.namespace)
            .field("neighbour_limit", &self.neighbourhood.neighbour_limit)
            .finish_non_exhaustive()
    }
}

/// `host:port`, bracketing IPv6 literals.
fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validation::ValidationError;
    use crate::neighbourhood::{Candidate, StaticDiscovery};
    use crate::observability::metrics::ERRORS_TOTAL;
    use crate::observability::RecordingSink;
    use crate::transport::{ProbeRequest, ProbeResponse, RoundTrip, TraceContext, TransportError};
    use async_trait::async_trait;
    use axum::http::{Response, StatusCode};
    use std::sync::Mutex;

    /// Answers every request with a fixed status and remembers the URIs.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        status: u16,
        headers: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl RoundTrip for Recorder {
        async fn round_trip(
            &self,
            request: ProbeRequest,
            _trace: &TraceContext,
        ) -> Result<ProbeResponse, TransportError> {
            let origin = request
                .headers()
                .get(crate::checker::probe::ORIGIN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.seen.lock().unwrap().push(request.uri().to_string());
            self.headers.lock().unwrap().push((request.uri().to_string(), origin));
            Ok(Response::builder()
                .status(StatusCode::from_u16(self.status).unwrap())
                .body(())
                .unwrap())
        }
    }

    fn config() -> NurseConfig {
        let mut config = NurseConfig::default();
        config.checks.api_server_host = "10.96.0.1".to_string();
        config.checks.ingress_url = "https://nurse.example.com".to_string();
        config.checks.service_url = "http://netnurse.kube-system.svc:8080".to_string();
        config.neighbourhood.pod_name = "nurse-a".to_string();
        config.neighbourhood.neighbour_limit = 2;
        config.tls.token_path = None;
        config
    }

    fn fleet() -> Vec<Candidate> {
        (0..6)
            .map(|i| {
                let name = if i == 0 { "nurse-a".to_string() } else { format!("nurse-{i}") };
                Candidate::running(name, format!("10.0.0.{}", i + 1), format!("node-{i}"))
            })
            .collect()
    }

    fn checker(config: &NurseConfig, status: u16, discovery: StaticDiscovery) -> (Checker, Arc<Recorder>, Arc<RecordingSink>) {
        let recorder = Arc::new(Recorder { status, ..Default::default() });
        let sink = Arc::new(RecordingSink::new());
        let transport = InstrumentedTransport::new(recorder.clone(), sink.clone());
        let checker = Checker::new(config, transport, Arc::new(discovery)).unwrap();
        (checker, recorder, sink)
    }

    #[tokio::test]
    async fn test_full_cycle() {
        let (checker, recorder, _) = checker(&config(), 200, StaticDiscovery::new(fleet()));
        assert!(checker.last_snapshot().is_none());

        let snapshot = checker.run().await;
        assert_eq!(snapshot.outcome(API_SERVER_DIRECT), Some(&CheckOutcome::Ok));
        assert_eq!(snapshot.outcome(ME_SERVICE), Some(&CheckOutcome::Ok));
        assert_eq!(snapshot.neighbourhood_state, "ok");
        assert_eq!(snapshot.neighbourhood.len(), 2);
        for neighbour in &snapshot.neighbourhood {
            assert_eq!(snapshot.outcome(&neighbour.label()), Some(&CheckOutcome::Ok));
        }
        assert_eq!(snapshot.checks.len(), 6);

        let seen = recorder.seen.lock().unwrap().clone();
        assert!(seen.contains(&"https://10.96.0.1:443/version".to_string()));
        assert!(seen.contains(&"https://kubernetes.default.svc.cluster.local:443/version".to_string()));
        assert!(seen.contains(&"https://nurse.example.com/alwayshappy".to_string()));

        let headers = recorder.headers.lock().unwrap().clone();
        let neighbour_calls: Vec<_> = headers.iter().filter(|(uri, _)| uri.contains(":8080/alwayshappy") && uri.starts_with("http://10.")).collect();
        assert_eq!(neighbour_calls.len(), 2);
        assert!(neighbour_calls.iter().all(|(_, origin)| origin.as_deref() == Some("nurse-a")));

        assert!(Arc::ptr_eq(&checker.last_snapshot().unwrap(), &snapshot));
    }

    #[tokio::test]
    async fn test_skip_issues_no_request() {
        let mut config = config();
        config.checks.skip_api_server_direct = true;
        config.checks.skip_neighbourhood = true;
        let (checker, recorder, _) = checker(&config, 200, StaticDiscovery::new(fleet()));

        let snapshot = checker.run().await;
        assert_eq!(snapshot.outcome(API_SERVER_DIRECT), Some(&CheckOutcome::Skipped));
        assert_eq!(snapshot.neighbourhood_state, "skipped");
        assert!(snapshot.neighbourhood.is_empty());
        assert!(!recorder.seen.lock().unwrap().iter().any(|uri| uri.contains("10.96.0.1")));
        assert_eq!(recorder.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_discovery_failure_only_affects_neighbours() {
        let (checker, _, _) = checker(&config(), 200, StaticDiscovery::failing("pods is forbidden"));
        let snapshot = checker.run().await;
        assert_eq!(snapshot.neighbourhood_state, "pods is forbidden");
        assert!(snapshot.neighbourhood.is_empty());
        assert_eq!(snapshot.outcome(ME_INGRESS), Some(&CheckOutcome::Ok));
        assert_eq!(snapshot.checks.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_self_skips_neighbours() {
        let mut config = config();
        config.neighbourhood.pod_name = "not-in-fleet".to_string();
        let (checker, _, _) = checker(&config, 200, StaticDiscovery::new(fleet()));
        let snapshot = checker.run().await;
        assert_eq!(snapshot.neighbourhood_state, SelectError::UnknownSelf.to_string());
        assert_eq!(snapshot.checks.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_checks_are_outcomes() {
        let (checker, _, sink) = checker(&config(), 503, StaticDiscovery::new(Vec::new()));
        let snapshot = checker.run().await;
        assert_eq!(
            snapshot.outcome(ME_SERVICE),
            Some(&CheckOutcome::Error("503 Service Unavailable".to_string()))
        );
        assert!(snapshot.has_errors());
        assert_eq!(
            sink.counter(ERRORS_TOTAL, &[("event", "status_code_503"), ("type", ME_SERVICE)]),
            1
        );
    }

    #[tokio::test]
    async fn test_extra_checks() {
        let mut config = config();
        config.checks.skip_neighbourhood = true;
        config.checks.extra_checks.insert("upstream".to_string(), "http://10.1.1.1:9000/healthz".to_string());
        let (checker, recorder, _) = checker(&config, 200, StaticDiscovery::default());
        let snapshot = checker.run().await;
        assert_eq!(snapshot.outcome("upstream"), Some(&CheckOutcome::Ok));
        assert!(recorder.seen.lock().unwrap().contains(&"http://10.1.1.1:9000/healthz".to_string()));
    }

    #[test]
    fn test_invalid_extra_check_is_fatal() {
        let mut config = config();
        config.checks.extra_checks.insert("me_service".to_string(), "http://x".to_string());
        let transport = InstrumentedTransport::new(Arc::new(Recorder::default()), Arc::new(RecordingSink::new()));
        let err = Checker::new(&config, transport, Arc::new(StaticDiscovery::default())).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_extra_check_shadowing_result_key_is_fatal() {
        let mut config = config();
        config.checks.extra_checks.insert("neighbourhood_state".to_string(), "http://x".to_string());
        let transport = InstrumentedTransport::new(Arc::new(Recorder::default()), Arc::new(RecordingSink::new()));
        let err = Checker::new(&config, transport, Arc::new(StaticDiscovery::default())).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.contains(&ValidationError::ReservedCheckName("neighbourhood_state".into()))));
    }

    #[tokio::test]
    async fn test_duplicate_node_probed_once() {
        let mut fleet = fleet();
        fleet.push(Candidate::running("nurse-twin", "10.0.0.99", "node-1"));
        let mut config = config();
        config.neighbourhood.neighbour_limit = 0;
        let (checker, _, _) = checker(&config, 200, StaticDiscovery::new(fleet));
        let snapshot = checker.run().await;
        assert_eq!(snapshot.neighbourhood.len(), 6);
        assert_eq!(snapshot.checks.keys().filter(|l| l.starts_with("path_")).count(), 5);
    }

    #[tokio::test]
    async fn test_incoming_pings() {
        let (checker, _, sink) = checker(&config(), 200, StaticDiscovery::default());
        checker.record_ping("nurse-b");
        checker.record_ping("nurse-c");
        checker.record_ping("nurse-b");
        assert_eq!(checker.active_peer_count(), 2);
        checker.report_incoming_checks();
        assert_eq!(sink.gauge(NEIGHBOURHOOD_INCOMING_CHECKS), Some(2.0));
    }

    #[tokio::test]
    async fn test_stop_ends_schedule() {
        let mut config = config();
        config.checks.skip_neighbourhood = true;
        let (checker, _, _) = checker(&config, 200, StaticDiscovery::default());
        let checker = Arc::new(checker);
        let shutdown = Shutdown::new();

        let runner = {
            let checker = checker.clone();
            let signal = shutdown.subscribe();
            tokio::spawn(async move { checker.run_scheduled(Duration::from_millis(10), signal).await })
        };
        time::sleep(Duration::from_millis(50)).await;
        checker.stop();
        checker.stop();
        time::timeout(Duration::from_secs(1), runner).await.unwrap().unwrap();
        assert!(checker.last_snapshot().is_some());
    }

    /// Tracks the highest number of requests in flight at once.
    #[derive(Default)]
    struct InFlight {
        current: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl RoundTrip for InFlight {
        async fn round_trip(
            &self,
            _request: ProbeRequest,
            _trace: &TraceContext,
        ) -> Result<ProbeResponse, TransportError> {
            use std::sync::atomic::Ordering;
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Response::builder().status(StatusCode::OK).body(()).unwrap())
        }
    }

    #[tokio::test]
    async fn test_probe_fan_out_is_bounded() {
        let mut config = config();
        config.checks.max_concurrent_probes = 1;
        let in_flight = Arc::new(InFlight::default());
        let transport = InstrumentedTransport::new(in_flight.clone(), Arc::new(RecordingSink::new()));
        let checker = Checker::new(&config, transport, Arc::new(StaticDiscovery::new(fleet()))).unwrap();

        let snapshot = checker.run().await;
        assert_eq!(snapshot.checks.len(), 6);
        assert!(snapshot.checks.values().all(|outcome| *outcome == CheckOutcome::Ok));
        assert_eq!(in_flight.peak.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_host_port() {
        assert_eq!(host_port("10.0.0.1", 80), "10.0.0.1:80");
        assert_eq!(host_port("fd00::1", 8080), "[fd00::1]:8080");
        assert_eq!(host_port("[fd00::1]", 8080), "[fd00::1]:8080");
    }
}
