use std::time::Duration;

use super::{Oracle, Probe};
use crate::core::{ExpectedSignal, OracleKind, Payload, Verdict};

/// Judges delay payloads by the harness-measured round trip.
pub struct TimingOracle {
    threshold: Duration,
}

impl TimingOracle {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn judge(&self, elapsed: Duration) -> Verdict {
        let evidence = format!(
            "Request took {:.2} seconds (threshold {:.2}s)",
            elapsed.as_secs_f64(),
            self.threshold.as_secs_f64()
        );
        if elapsed >= self.threshold {
            Verdict::positive(OracleKind::Timing, evidence)
        } else {
            Verdict::negative(OracleKind::Timing, evidence)
        }
    }
}

impl Oracle for TimingOracle {
    fn kind(&self) -> OracleKind {
        OracleKind::Timing
    }

    fn applies_to(&self, payload: &Payload) -> bool {
        payload.signal == ExpectedSignal::Delay
    }

    fn evaluate(&self, probe: &Probe<'_>) -> Verdict {
        // A timed-out request reports elapsed == timeout; that is unreachability, not delay.
        if let Some(err) = &probe.response.error {
            return Verdict::negative(OracleKind::Timing, format!("inconclusive: {}", err));
        }
        self.judge(probe.response.elapsed)
    }
}
