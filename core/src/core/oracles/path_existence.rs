use serde::{Deserialize, Serialize};

use super::{Oracle, Probe};
use crate::core::{ExpectedSignal, OracleKind, Payload, Verdict};
use crate::http::ProbeResponse;

/// Existence of one bruteforced path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathVerdict {
    /// `None` when the probe could not tell (rate limited, request failed).
    pub exists: Option<bool>,
    pub rate_limited: bool,
    pub status_code: Option<u16>,
    pub size: usize,
}

/// 200 and 403 both prove the path is there; 403 just means it is guarded.
pub struct PathExistenceOracle;

impl PathExistenceOracle {
    pub fn check(response: &ProbeResponse) -> PathVerdict {
        let rate_limited = response.rate_limited || response.status_code == Some(429);
        let exists = if rate_limited || response.error.is_some() {
            None
        } else {
            Some(matches!(response.status_code, Some(200) | Some(403)))
        };
        PathVerdict {
            exists,
            rate_limited,
            status_code: response.status_code,
            size: response.size,
        }
    }
}

impl Oracle for PathExistenceOracle {
    fn kind(&self) -> OracleKind {
        OracleKind::Exists
    }

    fn applies_to(&self, payload: &Payload) -> bool {
        payload.signal == ExpectedSignal::Exists
    }

    fn evaluate(&self, probe: &Probe<'_>) -> Verdict {
        let verdict = Self::check(probe.response);
        let status = verdict
            .status_code
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".into());
        let evidence = format!("{} -> status {}, {} bytes", probe.response.url.path(), status, verdict.size);
        match verdict.exists {
            Some(true) => Verdict::positive(OracleKind::Exists, evidence),
            Some(false) => Verdict::negative(OracleKind::Exists, evidence),
            None => Verdict::negative(OracleKind::Exists, format!("inconclusive: {}", evidence)),
        }
    }
}
