//! Error kinds surfaced by the test engine.

use thiserror::Error;

use crate::sim::SimTime;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bytes that do not form a valid IPv4/TCP segment. Absorbed by the
    /// expectation scan loop, never fatal there.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("segment specification constrains no field")]
    EmptySpec,

    #[error("got no frame matching {spec}{payload} within {waited}")]
    Timeout {
        spec: String,
        payload: String,
        waited: SimTime,
    },

    #[error("handshake did not complete: {0}")]
    HandshakeTimeout(#[source] Box<Error>),

    #[error("remote control `{op}` failed: {reason}")]
    RemoteControl { op: &'static str, reason: String },

    #[error("retransmit came sooner interval {observed} probe {probe} (expected at least {lower})")]
    TimingViolation {
        probe: usize,
        observed: SimTime,
        lower: SimTime,
    },

    #[error("expected a packet with payload {payload}: {source}{}", fmt_iteration(.iteration))]
    Expectation {
        payload: String,
        iteration: Option<usize>,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("config: {0}")]
    Config(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn fmt_iteration(iteration: &Option<usize>) -> String {
    match iteration {
        Some(i) => format!(" loop {i}"),
        None => String::new(),
    }
}

impl Error {
    pub fn remote(op: &'static str, reason: impl Into<String>) -> Self {
        Error::RemoteControl {
            op,
            reason: reason.into(),
        }
    }

    /// True for the errors the expectation scan loop discards.
    pub fn is_discardable(&self) -> bool {
        matches!(self, Error::MalformedFrame(_))
    }
}
