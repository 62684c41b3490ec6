use std::time::Duration;
use thiserror::Error;

use crate::core::VulnerabilityClass;

/// Failure of a single request. Stored on the response, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl ProbeError {
    pub fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout(timeout)
        } else if err.is_connect() {
            ProbeError::Connection(err.to_string())
        } else {
            ProbeError::Request(err.to_string())
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeError::Timeout(_))
    }
}

/// The target page could not be obtained. Terminal for a scan class, not for the process.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("could not fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: ProbeError,
    },

    #[error("{url} is still rate limiting after retries")]
    RateLimited { url: String },
}

/// Errors the engine's public API returns. Target-side conditions never end up here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("no payloads available for {0}")]
    EmptyCorpus(VulnerabilityClass),

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}
