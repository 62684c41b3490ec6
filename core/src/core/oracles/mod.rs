//! Response classifiers.
//!
//! Every oracle is stateless: the same probe always produces the same verdict.
//! The engine holds an ordered list per vulnerability class and calls each one
//! whose `applies_to` accepts the payload. Oracles that need extra responses
//! (the boolean pair, a stored-XSS listing page) declare them through
//! `follow_up`; the engine issues those from the same worker, right after the
//! primary request, and hands them back in order.

pub mod differential;
pub mod error_pattern;
pub mod path_existence;
pub mod reflection;
pub mod timing;

pub use differential::DifferentialOracle;
pub use error_pattern::ErrorPatternOracle;
pub use path_existence::{PathExistenceOracle, PathVerdict};
pub use reflection::ReflectionOracle;
pub use timing::TimingOracle;

use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::core::{OracleKind, Payload, Verdict, VulnerabilityClass};
use crate::http::{ProbeRequest, ProbeResponse};
use crate::ScanConfig;

pub const TRUE_CONDITION: &str = " AND '1'='1";
pub const FALSE_CONDITION: &str = " AND '1'='2";

/// Extra requests an oracle needs before it can judge a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Resend the injected value with a true and a false condition appended.
    BooleanPair { truthy: String, falsy: String },
    /// Fetch a second endpoint after the submission.
    Fetch(Url),
}

impl FollowUp {
    pub fn boolean_pair(injected: &str) -> Self {
        FollowUp::BooleanPair {
            truthy: format!("{}{}", injected, TRUE_CONDITION),
            falsy: format!("{}{}", injected, FALSE_CONDITION),
        }
    }
}

/// Everything an oracle may look at for one payload attempt.
pub struct Probe<'a> {
    pub payload: &'a Payload,
    pub request: &'a ProbeRequest,
    pub response: &'a ProbeResponse,
    /// Responses to this oracle's `follow_up`, in declaration order.
    pub follow_up: &'a [ProbeResponse],
}

impl<'a> Probe<'a> {
    pub fn new(payload: &'a Payload, request: &'a ProbeRequest, response: &'a ProbeResponse) -> Self {
        Self { payload, request, response, follow_up: &[] }
    }

    pub fn with_follow_up(mut self, follow_up: &'a [ProbeResponse]) -> Self {
        self.follow_up = follow_up;
        self
    }
}

pub trait Oracle: Send + Sync {
    fn kind(&self) -> OracleKind;

    fn applies_to(&self, payload: &Payload) -> bool;

    fn follow_up(&self, _payload: &Payload) -> Option<FollowUp> {
        None
    }

    fn evaluate(&self, probe: &Probe<'_>) -> Verdict;
}

pub type OracleRef = Arc<dyn Oracle>;

/// Ordered oracle list for one vulnerability class.
pub fn oracles_for(class: VulnerabilityClass, config: &ScanConfig) -> Vec<OracleRef> {
    match class {
        VulnerabilityClass::SqlInjection => vec![
            Arc::new(ErrorPatternOracle::sql_errors()),
            Arc::new(DifferentialOracle::new(config.similarity_threshold)),
            Arc::new(TimingOracle::new(Duration::from_secs(config.timing_threshold))),
        ],
        VulnerabilityClass::Xss => {
            let mut oracles: Vec<OracleRef> = vec![Arc::new(ReflectionOracle::reflected())];
            if let Some(listing) = config
                .stored_xss_listing
                .as_deref()
                .and_then(|l| Url::parse(l).ok())
            {
                oracles.push(Arc::new(ReflectionOracle::stored(listing)));
            }
            oracles
        }
        VulnerabilityClass::Lfi => vec![Arc::new(ErrorPatternOracle::file_disclosure())],
        VulnerabilityClass::Rfi => vec![Arc::new(ErrorPatternOracle::remote_inclusion())],
        VulnerabilityClass::DirectoryBruteforce => vec![Arc::new(PathExistenceOracle)],
    }
}

pub(crate) const UNDECODABLE_BODY: &str = "response body could not be decoded as UTF-8";

/// A window of `body` around `start..end`, widened by `context` bytes on each
/// side and snapped to char boundaries.
pub(crate) fn excerpt(body: &str, start: usize, end: usize, context: usize) -> String {
    let mut from = start.saturating_sub(context);
    while !body.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + context).min(body.len());
    while !body.is_char_boundary(to) {
        to += 1;
    }
    body[from..to].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_pair_appends_conditions() {
        match FollowUp::boolean_pair("x") {
            FollowUp::BooleanPair { truthy, falsy } => {
                assert_eq!(truthy, "x AND '1'='1");
                assert_eq!(falsy, "x AND '1'='2");
            }
            other => panic!("unexpected follow-up {:?}", other),
        }
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let body = "ééé<script>ééé";
        let start = body.find('<').unwrap();
        let end = start + "<script>".len();
        let text = excerpt(body, start, end, 1);
        assert!(text.contains("<script>"));
    }

    #[test]
    fn xss_gets_stored_oracle_only_with_listing() {
        let config = ScanConfig::default();
        assert_eq!(oracles_for(VulnerabilityClass::Xss, &config).len(), 1);

        let config = ScanConfig {
            stored_xss_listing: Some("http://lab.local/comments".into()),
            ..ScanConfig::default()
        };
        assert_eq!(oracles_for(VulnerabilityClass::Xss, &config).len(), 2);
    }

    #[test]
    fn sqli_uses_three_oracles_in_order() {
        let kinds: Vec<_> = oracles_for(VulnerabilityClass::SqlInjection, &ScanConfig::default())
            .iter()
            .map(|o| o.kind())
            .collect();
        assert_eq!(kinds, vec![OracleKind::Error, OracleKind::Differential, OracleKind::Timing]);
    }
}
