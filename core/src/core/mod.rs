pub mod discovery;
pub mod engine;
pub mod mutator;
pub mod oracles;
pub mod paths;
pub mod result_aggregator;
pub mod store;
pub mod throttle;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use url::Url;

/// Vulnerability class a scan pass is run for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilityClass {
    SqlInjection,
    Xss,
    Lfi,
    Rfi,
    DirectoryBruteforce,
}

impl VulnerabilityClass {
    pub const ALL: [VulnerabilityClass; 5] = [
        VulnerabilityClass::SqlInjection,
        VulnerabilityClass::Xss,
        VulnerabilityClass::Lfi,
        VulnerabilityClass::Rfi,
        VulnerabilityClass::DirectoryBruteforce,
    ];
}

impl fmt::Display for VulnerabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VulnerabilityClass::SqlInjection => write!(f, "SQLi"),
            VulnerabilityClass::Xss => write!(f, "XSS"),
            VulnerabilityClass::Lfi => write!(f, "LFI"),
            VulnerabilityClass::Rfi => write!(f, "RFI"),
            VulnerabilityClass::DirectoryBruteforce => write!(f, "Directory Bruteforce"),
        }
    }
}

impl FromStr for VulnerabilityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqli" | "sql" | "sql_injection" => Ok(VulnerabilityClass::SqlInjection),
            "xss" => Ok(VulnerabilityClass::Xss),
            "lfi" => Ok(VulnerabilityClass::Lfi),
            "rfi" => Ok(VulnerabilityClass::Rfi),
            "dirs" | "dir" | "paths" | "directory_bruteforce" => {
                Ok(VulnerabilityClass::DirectoryBruteforce)
            }
            other => Err(format!("unknown vulnerability class '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SurfaceMethod {
    Get,
    Post,
}

impl SurfaceMethod {
    /// HTML form semantics: anything but POST submits as GET.
    pub fn from_form(raw: Option<&str>) -> Self {
        match raw.map(|m| m.trim().to_uppercase()) {
            Some(m) if m == "POST" => SurfaceMethod::Post,
            _ => SurfaceMethod::Get,
        }
    }

    pub fn as_method(&self) -> reqwest::Method {
        match self {
            SurfaceMethod::Get => reqwest::Method::GET,
            SurfaceMethod::Post => reqwest::Method::POST,
        }
    }
}

impl fmt::Display for SurfaceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceMethod::Get => write!(f, "GET"),
            SurfaceMethod::Post => write!(f, "POST"),
        }
    }
}

/// A named input of a surface. Unnamed form fields keep an empty name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Input type (`text`, `hidden`, `textarea`, `query`, ...).
    pub kind: String,
    /// Value found on the page, used as the neutral baseline when present.
    pub default_value: Option<String>,
}

/// An injectable point discovered on the target page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surface {
    /// Action or href exactly as written in the page.
    pub action: String,
    pub endpoint: Url,
    pub method: SurfaceMethod,
    pub parameters: Vec<Parameter>,
}

impl Surface {
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Parameters that can be addressed in a request.
    pub fn injectable(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| !p.name.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedSignal {
    Error,
    Delay,
    Reflect,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub class: VulnerabilityClass,
    pub value: String,
    pub signal: ExpectedSignal,
}

impl Payload {
    pub fn new(class: VulnerabilityClass, value: impl Into<String>, signal: ExpectedSignal) -> Self {
        Self { class, value: value.into(), signal }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    Error,
    Differential,
    Timing,
    Reflect,
    Exists,
}

impl fmt::Display for OracleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OracleKind::Error => "error",
            OracleKind::Differential => "differential",
            OracleKind::Timing => "timing",
            OracleKind::Reflect => "reflect",
            OracleKind::Exists => "exists",
        };
        f.write_str(label)
    }
}

/// Upper bound on evidence length, in characters.
pub const MAX_EVIDENCE_CHARS: usize = 240;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub vulnerable: bool,
    pub oracle: OracleKind,
    pub evidence: String,
    pub confidence: Option<f32>,
}

impl Verdict {
    pub fn positive(oracle: OracleKind, evidence: impl AsRef<str>) -> Self {
        Self {
            vulnerable: true,
            oracle,
            evidence: bound_evidence(evidence.as_ref()),
            confidence: None,
        }
    }

    pub fn negative(oracle: OracleKind, evidence: impl AsRef<str>) -> Self {
        Self {
            vulnerable: false,
            oracle,
            evidence: bound_evidence(evidence.as_ref()),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

fn bound_evidence(text: &str) -> String {
    if text.chars().count() <= MAX_EVIDENCE_CHARS {
        return text.to_string();
    }
    let mut bounded: String = text.chars().take(MAX_EVIDENCE_CHARS).collect();
    bounded.push_str("...");
    bounded
}

/// One evidenced positive verdict. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub class: VulnerabilityClass,
    pub surface: Surface,
    pub parameter: String,
    pub payload: Payload,
    pub verdict: Verdict,
}

/// Advisory per-run counters. Never consulted for scan decisions.
#[derive(Debug, Default)]
pub struct RunCounters {
    payloads_sent: AtomicU64,
    requests_sent: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub payloads_sent: u64,
    pub requests_sent: u64,
}

impl RunCounters {
    pub fn record_payload(&self) {
        self.payloads_sent.fetch_add(1, Relaxed);
    }

    pub fn record_request(&self) {
        self.requests_sent.fetch_add(1, Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            payloads_sent: self.payloads_sent.load(Relaxed),
            requests_sent: self.requests_sent.load(Relaxed),
        }
    }
}
