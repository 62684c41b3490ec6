use url::Url;

use super::{excerpt, FollowUp, Oracle, Probe, UNDECODABLE_BODY};
use crate::core::{ExpectedSignal, OracleKind, Payload, Verdict};
use crate::http::ProbeResponse;

const CONTEXT_BYTES: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    /// Payload echoed in the response to the submission itself.
    Reflected,
    /// Payload persisted and served from a listing page fetched afterwards.
    Stored { listing: Url },
}

/// XSS by reflection. A body counts as reflecting the payload when it contains
/// the payload verbatim, or the payload's HTML-decoded form verbatim. The body
/// itself is never decoded: escaped output is safe output.
pub struct ReflectionOracle {
    mode: Mode,
}

impl ReflectionOracle {
    pub fn reflected() -> Self {
        Self { mode: Mode::Reflected }
    }

    pub fn stored(listing: Url) -> Self {
        Self { mode: Mode::Stored { listing } }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self.mode, Mode::Stored { .. })
    }

    /// Excerpt around the first reflection of `payload`, if any.
    pub fn find_reflection(body: &str, payload: &str) -> Option<String> {
        if payload.is_empty() {
            return None;
        }
        let decoded = html_escape::decode_html_entities(payload);
        let found = [payload, &*decoded]
            .into_iter()
            .filter(|needle| !needle.is_empty())
            .find_map(|needle| {
                body.find(needle)
                    .map(|start| excerpt(body, start, start + needle.len(), CONTEXT_BYTES))
            });
        found
    }

    fn judge(&self, response: &ProbeResponse, payload: &str, location: &str) -> Verdict {
        if response.is_inconclusive() {
            return Verdict::negative(OracleKind::Reflect, format!("inconclusive: {} not fetched", location));
        }
        if !response.decoded {
            return Verdict::negative(OracleKind::Reflect, UNDECODABLE_BODY);
        }
        match Self::find_reflection(&response.body, payload) {
            Some(context) => {
                Verdict::positive(OracleKind::Reflect, format!("{}: {}", location, context))
            }
            None => Verdict::negative(OracleKind::Reflect, format!("payload not found in {}", location)),
        }
    }
}

impl Oracle for ReflectionOracle {
    fn kind(&self) -> OracleKind {
        OracleKind::Reflect
    }

    fn applies_to(&self, payload: &Payload) -> bool {
        payload.signal == ExpectedSignal::Reflect
    }

    fn follow_up(&self, _payload: &Payload) -> Option<FollowUp> {
        match &self.mode {
            Mode::Reflected => None,
            Mode::Stored { listing } => Some(FollowUp::Fetch(listing.clone())),
        }
    }

    fn evaluate(&self, probe: &Probe<'_>) -> Verdict {
        let payload = probe.payload.value.as_str();
        match &self.mode {
            Mode::Reflected => self.judge(probe.response, payload, "reflected in response"),
            Mode::Stored { listing } => match probe.follow_up.first() {
                Some(page) => self.judge(page, payload, &format!("stored, served by {}", listing)),
                None => Verdict::negative(OracleKind::Reflect, "inconclusive: listing not fetched"),
            },
        }
    }
}
