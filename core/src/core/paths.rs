use futures::{stream, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::oracles::{Oracle, PathExistenceOracle, PathVerdict, Probe};
use crate::core::{ExpectedSignal, Payload, Verdict, VulnerabilityClass};
use crate::http::{ProbeHarness, ProbeRequest};
use crate::utils::payload_loader::expand_extensions;
use crate::ScanConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    Directory,
    File,
}

impl PathKind {
    /// A last segment with a dot is a file. Leading dots (`.git`) don't count.
    pub fn of(path: &str) -> Self {
        let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        if last.trim_start_matches('.').contains('.') {
            PathKind::File
        } else {
            PathKind::Directory
        }
    }
}

/// One path that exists on the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathHit {
    pub path: String,
    pub url: Url,
    pub kind: PathKind,
    pub status_code: u16,
    /// Response length in bytes, for telling apart catch-all pages.
    pub size: usize,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathScanSummary {
    pub directories_found: Vec<String>,
    pub files_found: Vec<String>,
    pub hits: Vec<PathHit>,
    pub total_requests: usize,
    pub rate_limited: usize,
    pub inconclusive: usize,
    pub cancelled: bool,
}

impl PathScanSummary {
    fn absorb(&mut self, outcome: PathOutcome) {
        self.total_requests += 1;
        match outcome.verdict.exists {
            Some(true) => {
                let hit = outcome.hit;
                match hit.kind {
                    PathKind::Directory => self.directories_found.push(hit.path.clone()),
                    PathKind::File => self.files_found.push(hit.path.clone()),
                }
                self.hits.push(hit);
            }
            Some(false) => {}
            None => {
                if outcome.verdict.rate_limited {
                    self.rate_limited += 1;
                } else {
                    self.inconclusive += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathScanOptions {
    pub threads: usize,
    pub recursive: bool,
    pub max_depth: usize,
    pub extension_bruteforce: bool,
    pub extensions: Vec<String>,
}

impl PathScanOptions {
    pub fn from_config(config: &ScanConfig, extensions: &[String]) -> Self {
        Self {
            threads: config.threads.max(1),
            recursive: config.recursive,
            max_depth: config.max_depth,
            extension_bruteforce: config.extension_bruteforce,
            extensions: extensions.to_vec(),
        }
    }
}

impl Default for PathScanOptions {
    fn default() -> Self {
        Self {
            threads: 4,
            recursive: false,
            max_depth: 1,
            extension_bruteforce: false,
            extensions: Vec::new(),
        }
    }
}

/// Result of probing one candidate path.
#[derive(Debug, Clone)]
pub struct PathOutcome {
    pub verdict: PathVerdict,
    pub hit: PathHit,
}

/// Directory and file bruteforce relative to a base directory URL.
pub struct PathBruteforcer {
    harness: Arc<ProbeHarness>,
    base: Url,
    options: PathScanOptions,
    cancel: CancellationToken,
}

impl PathBruteforcer {
    pub fn new(harness: Arc<ProbeHarness>, target: &Url, options: PathScanOptions, cancel: CancellationToken) -> Self {
        Self {
            harness,
            base: base_directory(target),
            options,
            cancel,
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Probes a single path. Every call is one candidate.
    pub async fn check_path(&self, path: &str) -> PathOutcome {
        let path = path.trim().trim_start_matches('/');
        let url = self.base.join(path).unwrap_or_else(|_| self.base.clone());
        self.harness.counters().record_payload();

        let request = ProbeRequest::get(url.clone());
        let response = self.harness.send(&request).await;
        let verdict = PathExistenceOracle::check(&response);
        let payload = Payload::new(VulnerabilityClass::DirectoryBruteforce, path, ExpectedSignal::Exists);
        let oracle_verdict = PathExistenceOracle.evaluate(&Probe::new(&payload, &request, &response));

        if verdict.rate_limited {
            warn!("Rate limited while probing {}", url);
        } else if let Some(err) = &response.error {
            debug!("Path probe {} inconclusive: {}", url, err);
        }

        PathOutcome {
            verdict,
            hit: PathHit {
                path: path.to_string(),
                url,
                kind: PathKind::of(path),
                status_code: verdict.status_code.unwrap_or(0),
                size: verdict.size,
                verdict: oracle_verdict,
            },
        }
    }

    /// Probes candidates with bounded parallelism. Results come back in
    /// candidate order; candidates not started before cancellation are dropped.
    async fn probe_all(&self, candidates: Vec<String>) -> Vec<PathOutcome> {
        stream::iter(candidates)
            .map(|candidate| async move {
                if self.cancel.is_cancelled() {
                    return None;
                }
                Some(self.check_path(&candidate).await)
            })
            .buffered(self.options.threads.max(1))
            .filter_map(|outcome| async move { outcome })
            .collect()
            .await
    }

    /// Children of `directory` from `wordlist`, down to `depth` levels.
    pub async fn scan_recursively(&self, directory: &str, wordlist: &[String], depth: usize) -> Vec<PathOutcome> {
        let mut found = Vec::new();
        let mut frontier = vec![directory.trim_matches('/').to_string()];

        for level in 0..depth {
            if frontier.is_empty() || self.cancel.is_cancelled() {
                break;
            }
            let candidates: Vec<String> = frontier
                .iter()
                .flat_map(|dir| wordlist.iter().map(move |w| format!("{}/{}", dir, w.trim_matches('/'))))
                .collect();
            debug!("Recursion level {}: {} candidate(s)", level + 1, candidates.len());

            let outcomes = self.probe_all(candidates).await;
            frontier = outcomes
                .iter()
                .filter(|o| o.verdict.exists == Some(true) && o.hit.kind == PathKind::Directory)
                .map(|o| o.hit.path.clone())
                .collect();
            found.extend(outcomes);
        }
        found
    }

    /// `base × extensions`, each existence-tested.
    pub async fn bruteforce_extensions(&self, base: &str, extensions: &[String]) -> Vec<PathOutcome> {
        let candidates = expand_extensions(&[base.to_string()], extensions);
        self.probe_all(candidates).await
    }

    pub async fn run(&self, wordlist: &[String]) -> PathScanSummary {
        let mut candidates: Vec<String> = wordlist.to_vec();
        if self.options.extension_bruteforce {
            candidates.extend(expand_extensions(wordlist, &self.options.extensions));
        }

        let mut summary = PathScanSummary::default();
        let outcomes = self.probe_all(candidates).await;
        let directories: Vec<String> = outcomes
            .iter()
            .filter(|o| o.verdict.exists == Some(true) && o.hit.kind == PathKind::Directory)
            .map(|o| o.hit.path.clone())
            .collect();
        for outcome in outcomes {
            summary.absorb(outcome);
        }

        if self.options.recursive && self.options.max_depth > 0 {
            for directory in directories {
                if self.cancel.is_cancelled() {
                    break;
                }
                for outcome in self.scan_recursively(&directory, wordlist, self.options.max_depth).await {
                    summary.absorb(outcome);
                }
            }
        }

        summary.cancelled = self.cancel.is_cancelled();
        summary
    }
}

/// Directory URL paths are resolved against: always ends in `/`.
pub fn base_directory(target: &Url) -> Url {
    let mut base = target.clone();
    base.set_query(None);
    base.set_fragment(None);
    if base.path().ends_with('/') {
        return base;
    }
    let path = base.path().to_string();
    let last = path.rsplit('/').next().unwrap_or("");
    if last.contains('.') {
        let dir = &path[..path.len() - last.len()];
        base.set_path(dir);
    } else {
        base.set_path(&format!("{}/", path));
    }
    base
}
