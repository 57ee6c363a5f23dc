use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sim::SimTime;

/// How far below the expected interval a retransmission may still arrive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tolerance {
    /// Lower bound is the expected interval minus the measured initial RTO.
    #[default]
    StartRto,
    /// Lower bound is the expected interval minus a fixed slack.
    Additive(SimTime),
    /// Lower bound is the expected interval scaled by this factor.
    Multiplicative(f64),
}

impl Tolerance {
    /// Acceptance window for a probe expected `current` after the previous one.
    pub fn window(&self, current: SimTime, start_rto: SimTime) -> TimingWindow {
        let lower = match *self {
            Tolerance::StartRto => current.saturating_sub(start_rto),
            Tolerance::Additive(slack) => current.saturating_sub(slack),
            Tolerance::Multiplicative(k) => current.mul_f64(k.clamp(0.0, 1.0)),
        };
        TimingWindow {
            expected: current,
            lower,
            upper: current.saturating_mul(2),
        }
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tolerance::StartRto => f.write_str("start-rto"),
            Tolerance::Additive(d) => write!(f, "add:{}", d.as_secs_f64() * 1e3),
            Tolerance::Multiplicative(k) => write!(f, "mul:{k}"),
        }
    }
}

/// `start-rto`, `add:<ms>` or `mul:<factor in 0..=1>`.
impl FromStr for Tolerance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || {
            Error::Config(format!(
                "bad tolerance `{s}` (want start-rto, add:<ms>, mul:<factor>)"
            ))
        };
        match s.split_once(':') {
            None if s == "start-rto" || s == "start_rto" => Ok(Tolerance::StartRto),
            Some(("add", ms)) => {
                let ms: f64 = ms.parse().map_err(|_| bad())?;
                if !ms.is_finite() || ms < 0.0 {
                    return Err(bad());
                }
                Ok(Tolerance::Additive(SimTime::from_millis(1).mul_f64(ms)))
            }
            Some(("mul", k)) => {
                let k: f64 = k.parse().map_err(|_| bad())?;
                if !(0.0..=1.0).contains(&k) {
                    return Err(bad());
                }
                Ok(Tolerance::Multiplicative(k))
            }
            _ => Err(bad()),
        }
    }
}

/// Bounds on one retransmission interval.
///
/// `upper` is enforced as the wait deadline; `lower` by [`TimingWindow::admits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingWindow {
    pub expected: SimTime,
    pub lower: SimTime,
    pub upper: SimTime,
}

impl TimingWindow {
    pub fn admits(&self, elapsed: SimTime) -> bool {
        elapsed >= self.lower
    }
}
