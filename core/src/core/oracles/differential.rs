use similar::TextDiff;
use std::time::Duration;

use super::{FollowUp, Oracle, Probe};
use crate::core::{ExpectedSignal, OracleKind, Payload, Verdict, VulnerabilityClass};
use crate::http::ProbeResponse;

/// Bodies longer than this are compared on their leading bytes only.
const MAX_COMPARED_BYTES: usize = 10_000;
const DIFF_DEADLINE: Duration = Duration::from_millis(500);

/// Character-level similarity ratio in `[0, 1]`. Identical bodies are 1.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let (a, b) = (head(a), head(b));
    let diff = TextDiff::configure().timeout(DIFF_DEADLINE).diff_chars(a, b);
    diff.ratio().into()
}

fn head(text: &str) -> &str {
    if text.len() <= MAX_COMPARED_BYTES {
        return text;
    }
    let mut end = MAX_COMPARED_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Boolean-based SQLi: the same injected value is resent with a true and a
/// false condition appended. Diverging status codes, or bodies less similar
/// than the threshold, mean the condition reached the query.
///
/// The two requests are sequential, so target-side drift (caching, load
/// balancing, rotating tokens) shows up here as noise.
pub struct DifferentialOracle {
    threshold: f64,
}

impl DifferentialOracle {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn compare(&self, truthy: &ProbeResponse, falsy: &ProbeResponse) -> Verdict {
        if truthy.is_inconclusive() || falsy.is_inconclusive() {
            return Verdict::negative(
                OracleKind::Differential,
                "inconclusive: true/false pair did not both complete",
            );
        }
        if truthy.status_code != falsy.status_code {
            return Verdict::positive(
                OracleKind::Differential,
                format!(
                    "Different status codes: {} vs {}",
                    status_label(truthy),
                    status_label(falsy)
                ),
            );
        }
        let ratio = similarity(&truthy.body, &falsy.body);
        if ratio < self.threshold {
            Verdict::positive(
                OracleKind::Differential,
                format!("Different responses detected (similarity: {:.2})", ratio),
            )
            .with_confidence((1.0 - ratio) as f32)
        } else {
            Verdict::negative(OracleKind::Differential, format!("similarity: {:.2}", ratio))
        }
    }
}

fn status_label(response: &ProbeResponse) -> String {
    response
        .status_code
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl Oracle for DifferentialOracle {
    fn kind(&self) -> OracleKind {
        OracleKind::Differential
    }

    fn applies_to(&self, payload: &Payload) -> bool {
        payload.class == VulnerabilityClass::SqlInjection && payload.signal == ExpectedSignal::Error
    }

    fn follow_up(&self, payload: &Payload) -> Option<FollowUp> {
        Some(FollowUp::boolean_pair(&payload.value))
    }

    fn evaluate(&self, probe: &Probe<'_>) -> Verdict {
        match probe.follow_up {
            [truthy, falsy, ..] => self.compare(truthy, falsy),
            _ => Verdict::negative(OracleKind::Differential, "inconclusive: no true/false pair"),
        }
    }
}
