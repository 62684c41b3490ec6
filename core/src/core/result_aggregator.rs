use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::paths::PathScanSummary;
use crate::core::{Finding, VulnerabilityClass};
use crate::SinkRef;

/// Outcome of one vulnerability class over one target.
///
/// `surfaces_tested == 0` means nothing could be tested; `findings` empty with
/// surfaces tested means nothing was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub class: VulnerabilityClass,
    pub surfaces_tested: usize,
    pub payloads_tested: usize,
    pub findings: Vec<Finding>,
    /// Attempts that failed at the request level (timeout, connection error).
    pub inconclusive: usize,
    /// Attempts still answered with 429 once retries ran out.
    pub rate_limited: usize,
    pub discovery_error: Option<String>,
    pub cancelled: bool,
    pub paths: Option<PathScanSummary>,
}

impl ScanResult {
    pub fn new(class: VulnerabilityClass) -> Self {
        Self {
            class,
            surfaces_tested: 0,
            payloads_tested: 0,
            findings: Vec::new(),
            inconclusive: 0,
            rate_limited: 0,
            discovery_error: None,
            cancelled: false,
            paths: None,
        }
    }

    pub fn could_not_test(&self) -> bool {
        self.surfaces_tested == 0
    }
}

/// Collects findings from probing workers and forwards each to the sink.
/// Findings are kept as sent: no deduplication, not even across classes.
pub struct ResultAggregator;

impl ResultAggregator {
    pub async fn run(mut receiver: mpsc::Receiver<Finding>, sink: SinkRef) -> Vec<Finding> {
        let mut findings = Vec::new();
        while let Some(finding) = receiver.recv().await {
            sink.on_finding(&finding);
            findings.push(finding);
        }
        findings
    }

    pub fn report_summary(results: &[ScanResult], sink: &SinkRef) {
        for result in results {
            let label = result.class.to_string();
            if let Some(err) = &result.discovery_error {
                sink.on_log("error", &format!("[!] {}: target could not be fetched ({})", label, err));
                continue;
            }
            if result.could_not_test() {
                sink.on_log("warn", &format!("[-] {}: no surfaces could be tested", label));
                continue;
            }

            let mut line = format!(
                "{}: {} surface(s), {} payload(s)",
                label, result.surfaces_tested, result.payloads_tested
            );
            if result.inconclusive > 0 || result.rate_limited > 0 {
                line.push_str(&format!(
                    ", {} inconclusive, {} rate limited",
                    result.inconclusive, result.rate_limited
                ));
            }
            if result.cancelled {
                line.push_str(" (cancelled, partial)");
            }

            if result.findings.is_empty() {
                sink.on_log("success", &format!("[+] {} - no vulnerabilities found", line));
            } else {
                sink.on_log("warn", &format!("[+] {} - {} finding(s):", line, result.findings.len()));
                for (i, f) in result.findings.iter().enumerate() {
                    let param = if f.parameter.is_empty() { "-" } else { f.parameter.as_str() };
                    sink.on_log("error", &format!(
                        "  #{} {} [{}] {} param={} (payload: {})",
                        i + 1, f.class, f.verdict.oracle, f.surface.endpoint, param, f.payload.value
                    ));
                }
            }

            if let Some(paths) = &result.paths {
                sink.on_log("info", &format!(
                    "    directories: [{}]  files: [{}]  requests: {}",
                    paths.directories_found.join(", "),
                    paths.files_found.join(", "),
                    paths.total_requests
                ));
            }
        }
    }
}
