use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::sim::SimTime;
use crate::wire;

/// Raw bytes read off the wire and the instant they arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub at: SimTime,
    pub bytes: Vec<u8>,
}

/// Address/port filter for frames travelling from the DUT to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowScope {
    pub dut_addr: Ipv4Addr,
    pub peer_addr: Ipv4Addr,
    #[serde(default)]
    pub dut_port: Option<u16>,
    #[serde(default)]
    pub peer_port: Option<u16>,
}

impl FlowScope {
    pub fn between(dut_addr: Ipv4Addr, peer_addr: Ipv4Addr) -> Self {
        Self {
            dut_addr,
            peer_addr,
            dut_port: None,
            peer_port: None,
        }
    }

    /// Frames that do not decode are admitted; the expectation engine is the
    /// one that discards them.
    pub fn admits(&self, bytes: &[u8]) -> bool {
        let Ok(seg) = wire::decode(bytes) else {
            return true;
        };
        seg.src_addr == self.dut_addr
            && seg.dst_addr == self.peer_addr
            && self.dut_port.is_none_or(|p| p == seg.src_port)
            && self.peer_port.is_none_or(|p| p == seg.dst_port)
    }
}
