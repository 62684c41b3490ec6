pub mod client;

pub use client::{HarnessOptions, ProbeHarness};

use reqwest::Method;
use std::time::Duration;
use url::Url;

use crate::error::ProbeError;

/// One concrete request handed to the harness.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub method: Method,
    pub url: Url,
    /// Query pairs for GET, urlencoded form fields for POST.
    pub params: Vec<(String, String)>,
}

impl ProbeRequest {
    pub fn new(method: Method, url: Url, params: Vec<(String, String)>) -> Self {
        Self { method, url, params }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, Vec::new())
    }

    /// Value sent for `name`, if present.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Immutable outcome of one request, including failed ones.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub url: Url,
    /// `None` when no HTTP response was received.
    pub status_code: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Raw body length in bytes, after truncation.
    pub size: usize,
    /// False when the body was not valid UTF-8; `body` then holds a lossy copy.
    pub decoded: bool,
    /// Wall-clock round trip measured by the harness.
    pub elapsed: Duration,
    pub truncated: bool,
    /// Still 429 after the retry policy gave up.
    pub rate_limited: bool,
    pub error: Option<ProbeError>,
}

impl ProbeResponse {
    pub fn failed(url: Url, error: ProbeError, elapsed: Duration) -> Self {
        Self {
            url,
            status_code: None,
            headers: Vec::new(),
            body: String::new(),
            size: 0,
            decoded: true,
            elapsed,
            truncated: false,
            rate_limited: false,
            error: Some(error),
        }
    }

    /// Builds a successful response from raw parts. Used by the harness and by tests.
    pub fn from_parts(url: Url, status_code: u16, body: impl Into<String>, elapsed: Duration) -> Self {
        let body = body.into();
        Self {
            url,
            status_code: Some(status_code),
            headers: Vec::new(),
            size: body.len(),
            body,
            decoded: true,
            elapsed,
            truncated: false,
            rate_limited: false,
            error: None,
        }
    }

    /// A request-level failure or exhausted rate limit: the attempt is inconclusive.
    pub fn is_inconclusive(&self) -> bool {
        self.error.is_some() || self.rate_limited
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
