//! Bench configuration (JSON).
//!
//! Every field is optional; unset fields fall back to the defaults of
//! [`RetransmitTest`] and [`SimDutConfig`]. The CLI writes its flags into the
//! same structure before resolving it.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dut::simulated::SimDutConfig;
use crate::error::{Error, Result};
use crate::oracle::{MIN_RETRANSMITS, RetransmitTest, Tolerance};
use crate::peer::Endpoint;
use crate::sim::SimTime;

const DEFAULT_PEER_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const DEFAULT_PEER_PORT: u16 = 49_152;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub peer_addr: Option<Ipv4Addr>,
    #[serde(default)]
    pub peer_port: Option<u16>,
    #[serde(default)]
    pub dut_addr: Option<Ipv4Addr>,
    #[serde(default)]
    pub listen_backlog: Option<i32>,
    #[serde(default)]
    pub retransmit: RetransmitSection,
    #[serde(default)]
    pub sim: SimSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetransmitSection {
    #[serde(default)]
    pub start_rto_ms: Option<u64>,
    #[serde(default)]
    pub retransmits: Option<usize>,
    #[serde(default)]
    pub tolerance: Option<Tolerance>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub handshake_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimSection {
    #[serde(default)]
    pub latency_us: Option<u64>,
    #[serde(default)]
    pub initial_rto_ms: Option<u64>,
    #[serde(default)]
    pub min_rto_ms: Option<u64>,
    #[serde(default)]
    pub max_rto_ms: Option<u64>,
    #[serde(default)]
    pub backoff: Option<f64>,
    #[serde(default)]
    pub timer_slack_us: Option<u64>,
    #[serde(default)]
    pub blackhole: Option<bool>,
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: BenchConfig = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), ?cfg, "加载配置");
        Ok(cfg)
    }

    pub fn peer_endpoint(&self) -> Endpoint {
        Endpoint::new(
            self.peer_addr.unwrap_or(DEFAULT_PEER_ADDR),
            self.peer_port.unwrap_or(DEFAULT_PEER_PORT),
        )
    }

    pub fn retransmit_test(&self) -> Result<RetransmitTest> {
        let mut t = RetransmitTest::default();
        let r = &self.retransmit;
        if let Some(ms) = r.start_rto_ms {
            if ms == 0 {
                return Err(Error::Config("retransmit.start_rto_ms must be positive".into()));
            }
            t.start_rto = SimTime::from_millis(ms);
        }
        if let Some(n) = r.retransmits {
            if n < MIN_RETRANSMITS {
                return Err(Error::Config(format!(
                    "retransmit.retransmits must be at least {MIN_RETRANSMITS}, got {n}"
                )));
            }
            t.retransmits = n;
        }
        if let Some(tol) = r.tolerance {
            t.tolerance = tol;
        }
        if let Some(p) = &r.payload {
            if p.is_empty() {
                return Err(Error::Config("retransmit.payload must not be empty".into()));
            }
            t.data = p.as_bytes().to_vec();
        }
        if let Some(ms) = r.handshake_timeout_ms {
            t.handshake_timeout = SimTime::from_millis(ms);
        }
        if let Some(b) = self.listen_backlog {
            t.backlog = b;
        }
        Ok(t)
    }

    pub fn sim_dut(&self) -> Result<SimDutConfig> {
        let mut c = SimDutConfig::default();
        let s = &self.sim;
        if let Some(addr) = self.dut_addr {
            c.addr = addr;
        }
        if let Some(us) = s.latency_us {
            c.latency = SimTime::from_micros(us);
        }
        if let Some(ms) = s.initial_rto_ms {
            c.initial_rto = SimTime::from_millis(ms);
        }
        if let Some(ms) = s.min_rto_ms {
            c.min_rto = SimTime::from_millis(ms);
        }
        if let Some(ms) = s.max_rto_ms {
            c.max_rto = SimTime::from_millis(ms);
        }
        if let Some(b) = s.backoff {
            if !b.is_finite() || b < 1.0 {
                return Err(Error::Config(format!("sim.backoff must be >= 1, got {b}")));
            }
            c.backoff = b;
        }
        if let Some(us) = s.timer_slack_us {
            c.timer_slack = SimTime::from_micros(us);
        }
        if let Some(b) = s.blackhole {
            c.blackhole = b;
        }
        if c.min_rto > c.max_rto {
            return Err(Error::Config("sim.min_rto_ms exceeds sim.max_rto_ms".into()));
        }
        Ok(c)
    }
}
