use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use futures::{stream, StreamExt};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::discovery::SurfaceDiscovery;
use crate::core::mutator::{self, InjectionPoint};
use crate::core::oracles::{self, FollowUp, OracleRef, Probe};
use crate::core::paths::{PathBruteforcer, PathScanOptions};
use crate::core::result_aggregator::{ResultAggregator, ScanResult};
use crate::core::store::FindingStore;
use crate::core::{
    CounterSnapshot, ExpectedSignal, Finding, Parameter, Payload, RunCounters, Surface,
    SurfaceMethod, VulnerabilityClass,
};
use crate::error::{DiscoveryError, EngineError};
use crate::http::{HarnessOptions, ProbeHarness, ProbeResponse};
use crate::utils::payload_loader::PayloadCorpus;
use crate::{NullSink, ScanConfig, SinkRef};

const FINDING_CHANNEL_SIZE: usize = 100;

/// Per-class lifecycle. `Discovering` goes straight to `Done` when nothing is
/// testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Idle,
    Discovering,
    Probing,
    Aggregating,
    Done,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Discovering => "discovering",
            ScanPhase::Probing => "probing",
            ScanPhase::Aggregating => "aggregating",
            ScanPhase::Done => "done",
        };
        f.write_str(label)
    }
}

/// State owned by one invocation of [`ScanEngine::run`].
#[derive(Debug)]
pub struct ScanRun {
    pub scan_id: String,
    pub target: Url,
    pub classes_requested: Vec<VulnerabilityClass>,
    /// Unix seconds.
    pub started_at: u64,
    pub counters: Arc<RunCounters>,
}

impl ScanRun {
    fn new(target: Url, classes_requested: Vec<VulnerabilityClass>) -> Self {
        Self {
            scan_id: new_scan_id(),
            target,
            classes_requested,
            started_at: unix_now(),
            counters: Arc::new(RunCounters::default()),
        }
    }
}

/// What a run hands back: one result per requested class plus run counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineReport {
    pub scan_id: String,
    pub target: Url,
    pub started_at: u64,
    pub results: Vec<ScanResult>,
    pub counters: CounterSnapshot,
    pub cancelled: bool,
}

impl EngineReport {
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.results.iter().flat_map(|r| r.findings.iter())
    }

    pub fn result_for(&self, class: VulnerabilityClass) -> Option<&ScanResult> {
        self.results.iter().find(|r| r.class == class)
    }
}

/// Drives discovery, probing and aggregation for each requested class.
///
/// The engine never fails for target-side conditions. `run` only returns an
/// error for caller mistakes: bad configuration, an unusable target URL, or a
/// requested class with no payloads.
pub struct ScanEngine {
    config: ScanConfig,
    corpus: Arc<PayloadCorpus>,
    sink: SinkRef,
    store: Option<Arc<dyn FindingStore>>,
}

impl ScanEngine {
    pub fn new(config: ScanConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let corpus = PayloadCorpus::from_config(&config)?;
        Ok(Self {
            config,
            corpus: Arc::new(corpus),
            sink: NullSink::new_ref(),
            store: None,
        })
    }

    pub fn with_corpus(mut self, corpus: PayloadCorpus) -> Self {
        self.corpus = Arc::new(corpus);
        self
    }

    pub fn with_sink(mut self, sink: SinkRef) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn FindingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn corpus(&self) -> &PayloadCorpus {
        &self.corpus
    }

    /// Scans `target` for every class in `classes` (all classes when empty).
    ///
    /// `page_body`, when given, is used instead of fetching the target page.
    /// Cancelling `cancel` stops new requests; whatever was found so far is
    /// still returned.
    pub async fn run(
        &self,
        target: &str,
        page_body: Option<String>,
        classes: &[VulnerabilityClass],
        cancel: CancellationToken,
    ) -> Result<EngineReport, EngineError> {
        let target = normalize_target(target)?;
        let classes = requested_classes(classes);
        for class in &classes {
            if self.corpus.for_class(*class).is_empty() {
                return Err(EngineError::EmptyCorpus(*class));
            }
        }

        let run = ScanRun::new(target, classes);
        let harness = Arc::new(HarnessOptions::from_config(&self.config).build(run.counters.clone())?);
        info!("Scan {} started against {}", run.scan_id, run.target);

        // No request goes out once the run is cancelled, the page fetch included.
        let page = if cancel.is_cancelled() {
            None
        } else {
            Some(self.fetch_page(&harness, &run.target, page_body).await)
        };
        if let Some(Err(e)) = &page {
            warn!("Discovery failed: {}", e);
        }

        let mut results = Vec::with_capacity(run.classes_requested.len());
        for class in &run.classes_requested {
            let class = *class;
            let mut result = match page.as_ref().filter(|_| !cancel.is_cancelled()) {
                None => ScanResult { cancelled: true, ..ScanResult::new(class) },
                Some(Err(e)) => {
                    self.enter(class, ScanPhase::Discovering);
                    self.enter(class, ScanPhase::Done);
                    ScanResult { discovery_error: Some(e.to_string()), ..ScanResult::new(class) }
                }
                Some(Ok((page_url, body))) => match class {
                    VulnerabilityClass::DirectoryBruteforce => {
                        self.scan_paths(&harness, page_url, &cancel).await
                    }
                    _ => self.scan_injection(class, &harness, page_url, body, &cancel).await,
                },
            };
            result.cancelled |= cancel.is_cancelled();
            self.persist(&run.scan_id, &result).await;
            results.push(result);
        }

        let counters = run.counters.snapshot();
        info!(
            "Scan {} finished: {} payload(s), {} request(s)",
            run.scan_id, counters.payloads_sent, counters.requests_sent
        );

        Ok(EngineReport {
            scan_id: run.scan_id,
            target: run.target,
            started_at: run.started_at,
            results,
            counters,
            cancelled: cancel.is_cancelled(),
        })
    }

    async fn fetch_page(
        &self,
        harness: &ProbeHarness,
        target: &Url,
        page_body: Option<String>,
    ) -> Result<(Url, String), DiscoveryError> {
        if let Some(body) = page_body {
            return Ok((target.clone(), body));
        }
        let response = harness.get(target).await;
        if response.rate_limited {
            return Err(DiscoveryError::RateLimited { url: target.to_string() });
        }
        if let Some(err) = response.error {
            return Err(DiscoveryError::Fetch { url: target.to_string(), source: err });
        }
        Ok((response.url, response.body))
    }

    async fn scan_injection(
        &self,
        class: VulnerabilityClass,
        harness: &ProbeHarness,
        page_url: &Url,
        body: &str,
        cancel: &CancellationToken,
    ) -> ScanResult {
        let mut result = ScanResult::new(class);

        self.enter(class, ScanPhase::Discovering);
        let surfaces = SurfaceDiscovery::new(page_url.clone()).discover(body);
        let items: Vec<(&Surface, InjectionPoint)> = surfaces
            .iter()
            .flat_map(|s| mutator::extract_injection_points(s).into_iter().map(move |p| (s, p)))
            .collect();
        if items.is_empty() {
            debug!("{}: no injectable surfaces on {}", class, page_url);
            self.enter(class, ScanPhase::Done);
            return result;
        }
        result.surfaces_tested = surfaces.iter().filter(|s| s.injectable().next().is_some()).count();

        self.enter(class, ScanPhase::Probing);
        self.sink.on_progress(&format!("{} probing", class), 0, items.len());

        let oracles = oracles::oracles_for(class, &self.config);
        let ctx = ParameterProbe {
            class,
            harness,
            payloads: self.corpus.for_class(class),
            oracles: &oracles,
            cancel,
        };
        let threads = self.config.threads.max(1);
        let (tx, rx) = mpsc::channel::<Finding>(FINDING_CHANNEL_SIZE);

        let probing = async move {
            let stats: Vec<ParameterStats> = stream::iter(items)
                .map(|(surface, point)| {
                    let tx = tx.clone();
                    async move { ctx.run(surface, point, tx).await }
                })
                .buffer_unordered(threads)
                .collect()
                .await;
            drop(tx);
            stats
        };
        let (stats, findings) = tokio::join!(probing, ResultAggregator::run(rx, self.sink.clone()));

        self.enter(class, ScanPhase::Aggregating);
        for s in &stats {
            result.payloads_tested += s.payloads;
            result.inconclusive += s.inconclusive;
            result.rate_limited += s.rate_limited;
        }
        result.findings = findings;
        self.enter(class, ScanPhase::Done);
        result
    }

    async fn scan_paths(&self, harness: &Arc<ProbeHarness>, page_url: &Url, cancel: &CancellationToken) -> ScanResult {
        let class = VulnerabilityClass::DirectoryBruteforce;
        let mut result = ScanResult::new(class);

        self.enter(class, ScanPhase::Discovering);
        let options = PathScanOptions::from_config(&self.config, self.corpus.extensions());
        let bruteforcer = PathBruteforcer::new(harness.clone(), page_url, options, cancel.clone());
        let surface = Surface {
            action: bruteforcer.base().path().to_string(),
            endpoint: bruteforcer.base().clone(),
            method: SurfaceMethod::Get,
            parameters: vec![Parameter {
                name: "path".into(),
                kind: "path".into(),
                default_value: None,
            }],
        };

        self.enter(class, ScanPhase::Probing);
        let wordlist = self.corpus.wordlist();
        self.sink.on_progress(&format!("{} probing", class), 0, wordlist.len());
        let summary = bruteforcer.run(&wordlist).await;

        self.enter(class, ScanPhase::Aggregating);
        let (tx, rx) = mpsc::channel::<Finding>(FINDING_CHANNEL_SIZE);
        let hits = summary.hits.clone();
        let sending = async move {
            for hit in hits {
                let finding = Finding {
                    class,
                    surface: surface.clone(),
                    parameter: "path".into(),
                    payload: Payload::new(class, hit.path, ExpectedSignal::Exists),
                    verdict: hit.verdict,
                };
                if tx.send(finding).await.is_err() {
                    break;
                }
            }
        };
        let ((), findings) = tokio::join!(sending, ResultAggregator::run(rx, self.sink.clone()));

        result.surfaces_tested = 1;
        result.payloads_tested = summary.total_requests;
        result.rate_limited = summary.rate_limited;
        result.inconclusive = summary.inconclusive;
        result.cancelled = summary.cancelled;
        result.findings = findings;
        result.paths = Some(summary);
        self.enter(class, ScanPhase::Done);
        result
    }

    async fn persist(&self, scan_id: &str, result: &ScanResult) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.store_findings(scan_id, &result.findings).await {
            warn!("Failed to store findings for {}: {:#}", result.class, e);
        }
        if let Err(e) = store.store_surface_results(scan_id, result).await {
            warn!("Failed to store {} results: {:#}", result.class, e);
        }
    }

    fn enter(&self, class: VulnerabilityClass, phase: ScanPhase) {
        debug!("{} -> {}", class, phase);
    }
}

#[derive(Debug, Default)]
struct ParameterStats {
    payloads: usize,
    inconclusive: usize,
    rate_limited: usize,
}

/// Shared, read-only inputs of every (surface, parameter) work item.
#[derive(Clone, Copy)]
struct ParameterProbe<'a> {
    class: VulnerabilityClass,
    harness: &'a ProbeHarness,
    payloads: &'a [Payload],
    oracles: &'a [OracleRef],
    cancel: &'a CancellationToken,
}

impl<'a> ParameterProbe<'a> {
    /// Walks the payloads for one parameter in corpus order and stops at the
    /// first payload any oracle confirms.
    async fn run(self, surface: &Surface, point: InjectionPoint, tx: mpsc::Sender<Finding>) -> ParameterStats {
        let mut stats = ParameterStats::default();

        for payload in self.payloads {
            if self.cancel.is_cancelled() {
                debug!("Cancelled before {} on {}", point.name(), surface.endpoint);
                break;
            }
            self.harness.counters().record_payload();
            stats.payloads += 1;

            let request = mutator::mutate_request(surface, &point, &payload.value);
            let response = self.harness.send(&request).await;
            if response.rate_limited {
                stats.rate_limited += 1;
                continue;
            }
            if let Some(err) = &response.error {
                debug!("{} {} inconclusive for {:?}: {}", surface.endpoint, point.name(), payload.value, err);
                stats.inconclusive += 1;
                continue;
            }

            let mut confirmed = false;
            for oracle in self.oracles.iter().filter(|o| o.applies_to(payload)) {
                let follow_up = match oracle.follow_up(payload) {
                    Some(_) if self.cancel.is_cancelled() => continue,
                    Some(plan) => self.follow_up(surface, &point, plan).await,
                    None => Vec::new(),
                };
                let verdict = oracle.evaluate(&Probe::new(payload, &request, &response).with_follow_up(&follow_up));
                if !verdict.vulnerable {
                    continue;
                }
                confirmed = true;
                let finding = Finding {
                    class: self.class,
                    surface: surface.clone(),
                    parameter: point.name().to_string(),
                    payload: payload.clone(),
                    verdict,
                };
                if tx.send(finding).await.is_err() {
                    warn!("Finding channel closed");
                    return stats;
                }
            }
            if confirmed {
                break;
            }
        }
        stats
    }

    async fn follow_up(&self, surface: &Surface, point: &InjectionPoint, plan: FollowUp) -> Vec<ProbeResponse> {
        match plan {
            FollowUp::BooleanPair { truthy, falsy } => {
                let truthy = self.harness.send(&mutator::mutate_request(surface, point, &truthy)).await;
                let falsy = self.harness.send(&mutator::mutate_request(surface, point, &falsy)).await;
                vec![truthy, falsy]
            }
            FollowUp::Fetch(url) => vec![self.harness.get(&url).await],
        }
    }
}

/// Adds `http://` when no scheme is given; only http(s) URLs with a host are accepted.
pub fn normalize_target(raw: &str) -> Result<Url, EngineError> {
    let raw = raw.trim();
    let invalid = |reason: String| EngineError::InvalidTarget { target: raw.to_string(), reason };
    if raw.is_empty() {
        return Err(invalid("empty target".into()));
    }
    let candidate = if raw.contains("://") { raw.to_string() } else { format!("http://{}", raw) };
    let url = Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".into()));
    }
    Ok(url)
}

fn requested_classes(classes: &[VulnerabilityClass]) -> Vec<VulnerabilityClass> {
    if classes.is_empty() {
        return VulnerabilityClass::ALL.to_vec();
    }
    let mut out = Vec::with_capacity(classes.len());
    for class in classes {
        if !out.contains(class) {
            out.push(*class);
        }
    }
    out
}

fn new_scan_id() -> String {
    format!("{:016x}", rand::rng().random::<u64>())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
