pub mod core;
pub mod error;
pub mod http;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub use crate::core::discovery::SurfaceDiscovery;
pub use crate::core::engine::{normalize_target, EngineReport, ScanEngine, ScanPhase, ScanRun};
pub use crate::core::oracles::{Oracle, OracleRef};
pub use crate::core::paths::{PathBruteforcer, PathHit, PathKind, PathScanOptions, PathScanSummary};
pub use crate::core::result_aggregator::{ResultAggregator, ScanResult};
pub use crate::core::store::{FindingStore, JsonlStore};
pub use crate::core::throttle::{RetryConfig, RetryStrategy};
pub use crate::core::{
    CounterSnapshot, ExpectedSignal, Finding, OracleKind, Parameter, Payload, Surface, SurfaceMethod, Verdict,
    VulnerabilityClass,
};
pub use crate::error::{DiscoveryError, EngineError, ProbeError};
pub use crate::http::{HarnessOptions, ProbeHarness, ProbeRequest, ProbeResponse};
pub use crate::utils::payload_loader::PayloadCorpus;
pub use crate::utils::read_lines;
pub use tokio_util::sync::CancellationToken;

/// Engine configuration shared by the CLI and library callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    /// Per-request timeout in seconds.
    pub timeout: u64,
    /// Accept invalid TLS certificates. Lab targets only.
    pub insecure: bool,
    pub follow_redirects: bool,
    pub threads: usize,
    pub retry: RetryConfig,
    pub proxy: String,
    pub headers: String,
    pub max_body_bytes: usize,
    /// TimingOracle threshold in seconds.
    pub timing_threshold: u64,
    pub similarity_threshold: f64,
    /// Listing page fetched after every XSS submission to catch stored payloads.
    pub stored_xss_listing: Option<String>,
    pub wordlist: Option<String>,
    pub extensions: Vec<String>,
    pub extension_bruteforce: bool,
    pub recursive: bool,
    pub max_depth: usize,
    pub payload_files: HashMap<VulnerabilityClass, String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout: 10,
            insecure: false,
            follow_redirects: true,
            threads: 4,
            retry: RetryConfig::default(),
            proxy: String::new(),
            headers: String::new(),
            max_body_bytes: 1024 * 1024,
            timing_threshold: 5,
            similarity_threshold: 0.95,
            stored_xss_listing: None,
            wordlist: None,
            extensions: Vec::new(),
            extension_bruteforce: false,
            recursive: false,
            max_depth: 1,
            payload_files: HashMap::new(),
        }
    }
}

impl ScanConfig {
    /// Loads a JSON config file. Missing fields fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config '{}': {}", path.display(), e))?;
        let config: ScanConfig = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("failed to parse config '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Rejects settings that can only come from a caller mistake.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.threads == 0 {
            return Err(EngineError::InvalidConfig("threads must be at least 1".into()));
        }
        if self.timeout == 0 {
            return Err(EngineError::InvalidConfig("timeout must be at least 1 second".into()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(EngineError::InvalidConfig(format!(
                "similarity threshold {} is outside [0, 1]",
                self.similarity_threshold
            )));
        }
        if self.max_body_bytes == 0 {
            return Err(EngineError::InvalidConfig("maxBodyBytes must be positive".into()));
        }
        if let Some(listing) = &self.stored_xss_listing {
            url::Url::parse(listing).map_err(|e| {
                EngineError::InvalidConfig(format!("stored XSS listing '{}': {}", listing, e))
            })?;
        }
        Ok(())
    }

    pub fn header_list(&self) -> Vec<String> {
        if self.headers.is_empty() {
            Vec::new()
        } else {
            self.headers
                .split(';')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }
    }

    pub fn parsed_headers(&self) -> Vec<(String, String)> {
        parse_custom_headers(&self.header_list())
    }

    pub fn proxy_ref(&self) -> Option<&str> {
        if self.proxy.is_empty() { None } else { Some(&self.proxy) }
    }
}

pub fn parse_custom_headers(raw: &[String]) -> Vec<(String, String)> {
    raw.iter().filter_map(|h| {
        let mut parts = h.splitn(2, ':');
        let key = parts.next()?.trim().to_string();
        let val = parts.next().unwrap_or("").trim().to_string();
        if key.is_empty() { return None; }
        Some((key, val))
    }).collect()
}

/// Output abstraction for scan progress and findings.
/// The CLI renders it to the terminal; library callers may ignore it.
pub trait ScanEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_finding(&self, finding: &Finding);
    fn on_progress(&self, phase: &str, current: usize, total: usize);
}

pub type SinkRef = Arc<dyn ScanEventSink>;

/// Discards every event.
pub struct NullSink;

impl NullSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl ScanEventSink for NullSink {
    fn on_log(&self, _level: &str, _message: &str) {}
    fn on_finding(&self, _finding: &Finding) {}
    fn on_progress(&self, _phase: &str, _current: usize, _total: usize) {}
}

/// Terminal output sink for CLI usage.
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl ScanEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        use std::io::Write;
        let colored = match level {
            "success" => message.green().to_string(),
            "error"   => message.red().to_string(),
            "warn"    => message.yellow().to_string(),
            "phase"   => message.bright_cyan().bold().to_string(),
            _         => message.to_string(),
        };
        print!("{}\r\n", colored);
        std::io::stdout().flush().ok();
    }

    fn on_finding(&self, finding: &Finding) {
        use colored::*;
        use std::io::Write;
        let out = |text: &str| {
            print!("{}\r\n", text);
            std::io::stdout().flush().ok();
        };
        out(&format!(
            "\n{} {} detected! [{}]",
            "[+]".green().bold(),
            finding.class.to_string().red().bold(),
            finding.verdict.oracle.to_string().magenta()
        ));
        out(&format!(
            "    Target:    {} {}",
            finding.surface.method,
            finding.surface.endpoint.as_str().white()
        ));
        if !finding.parameter.is_empty() {
            out(&format!("    Parameter: {}", finding.parameter.cyan()));
        }
        out(&format!("    Payload:   {}", finding.payload.value.bright_yellow()));
        out(&format!("    Evidence:  {}", finding.verdict.evidence.dimmed()));
        out(&"──────────────────────────────────────────".dimmed().to_string());
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        use colored::*;
        use std::io::Write;
        if total > 0 {
            print!("{}\r\n", format!("[*] {} ({}/{})", phase, current, total).bright_cyan());
        } else {
            print!("{}\r\n", format!("[*] {}", phase).bright_cyan());
        }
        std::io::stdout().flush().ok();
    }
}
