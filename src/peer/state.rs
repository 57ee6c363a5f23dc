use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::wire::{ParsedSegment, SegmentSpec, SeqNumber, TcpFlags, ipv4};

pub const DEFAULT_WINDOW: u16 = 30_000;

/// One side of the 4-tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Connection phase as seen by the synthetic peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Closed,
    SynSent,
    Established,
    /// Closed after a FIN or RST.
    Finished,
}

/// The synthetic peer's view of one connection.
#[derive(Debug, Clone)]
pub struct PeerState {
    local: Endpoint,
    remote: Endpoint,
    /// Next sequence number the peer will send.
    local_seq: SeqNumber,
    /// Next sequence number expected from the DUT; `None` until its SYN is seen.
    remote_seq: Option<SeqNumber>,
    window: u16,
    next_ident: u16,
    phase: Phase,
    last_seen: TcpFlags,
}

impl PeerState {
    /// Fresh peer with a random initial sequence number.
    pub fn initial(local: Endpoint, remote: Endpoint) -> Self {
        Self::with_isn(local, remote, SeqNumber(rand::random()))
    }

    pub fn with_isn(local: Endpoint, remote: Endpoint, isn: SeqNumber) -> Self {
        Self {
            local,
            remote,
            local_seq: isn,
            remote_seq: None,
            window: DEFAULT_WINDOW,
            next_ident: 1,
            phase: Phase::Closed,
            last_seen: TcpFlags::NONE,
        }
    }

    pub fn local(&self) -> Endpoint {
        self.local
    }

    pub fn remote(&self) -> Endpoint {
        self.remote
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn local_seq(&self) -> SeqNumber {
        self.local_seq
    }

    /// Cumulative position of data received from the DUT.
    pub fn remote_seq(&self) -> Option<SeqNumber> {
        self.remote_seq
    }

    pub fn last_seen_flags(&self) -> TcpFlags {
        self.last_seen
    }

    /// Spec matching only traffic from the DUT to this peer.
    pub fn inbound_flow(&self) -> SegmentSpec {
        SegmentSpec::new()
            .with_src_addr(self.remote.addr)
            .with_dst_addr(self.local.addr)
            .with_src_port(self.remote.port)
            .with_dst_port(self.local.port)
    }

    /// Record a segment received from the DUT.
    ///
    /// A SYN anchors the remote sequence space. Data advances it only when it
    /// extends past what was already received, so retransmissions and
    /// duplicates leave it unchanged.
    pub fn observe(&mut self, seg: &ParsedSegment) {
        self.last_seen = seg.flags;

        if seg.flags.contains(TcpFlags::RST) {
            self.phase = Phase::Finished;
            return;
        }

        if seg.flags.contains(TcpFlags::SYN) {
            let next = seg.seq_num + seg.seq_len();
            self.remote_seq = Some(match self.remote_seq {
                Some(cur) if cur >= next => cur,
                _ => next,
            });
            return;
        }

        let Some(cur) = self.remote_seq else {
            return;
        };
        let end = seg.seq_num + seg.seq_len();
        if seg.seq_num <= cur && end > cur {
            self.remote_seq = Some(end);
            if seg.flags.contains(TcpFlags::FIN) {
                self.phase = Phase::Finished;
            }
        }
        trace!(
            seq = %seg.seq_num,
            len = seg.payload.len(),
            remote_seq = ?self.remote_seq,
            "observed"
        );
    }

    /// Fill every unset field of `spec` from the current state without
    /// mutating it.
    pub fn next_outgoing(&self, spec: &SegmentSpec) -> SegmentSpec {
        let flags = spec.flags.unwrap_or(TcpFlags::ACK);
        let ack = if flags.contains(TcpFlags::ACK) {
            spec.ack_num.or(self.remote_seq)
        } else {
            spec.ack_num
        };
        SegmentSpec {
            src_addr: Some(spec.src_addr.unwrap_or(self.local.addr)),
            dst_addr: Some(spec.dst_addr.unwrap_or(self.remote.addr)),
            src_port: Some(spec.src_port.unwrap_or(self.local.port)),
            dst_port: Some(spec.dst_port.unwrap_or(self.remote.port)),
            seq_num: Some(spec.seq_num.unwrap_or(self.local_seq)),
            ack_num: ack,
            flags: Some(flags),
            window: Some(spec.window.unwrap_or(self.window)),
        }
    }

    /// Concrete segment for `spec` carrying `payload`.
    pub fn build(&self, spec: &SegmentSpec, payload: &[u8]) -> ParsedSegment {
        let full = self.next_outgoing(spec);
        ParsedSegment {
            src_addr: full.src_addr.unwrap_or(self.local.addr),
            dst_addr: full.dst_addr.unwrap_or(self.remote.addr),
            ident: self.next_ident,
            ttl: ipv4::DEFAULT_TTL,
            dont_frag: true,
            src_port: full.src_port.unwrap_or(self.local.port),
            dst_port: full.dst_port.unwrap_or(self.remote.port),
            seq_num: full.seq_num.unwrap_or(self.local_seq),
            ack_num: full.ack_num.unwrap_or_default(),
            flags: full.flags.unwrap_or(TcpFlags::ACK),
            window: full.window.unwrap_or(self.window),
            urgent: 0,
            options: Vec::new(),
            payload: payload.to_vec(),
        }
    }

    /// Point a not-yet-opened peer at another remote endpoint.
    pub fn retarget(&mut self, remote: Endpoint) -> bool {
        if self.phase != Phase::Closed {
            return false;
        }
        self.remote = remote;
        true
    }

    /// Give up on an unanswered SYN.
    pub fn abandon_open(&mut self) {
        if self.phase == Phase::SynSent {
            self.phase = Phase::Closed;
        }
    }

    pub fn finish(&mut self) {
        self.phase = Phase::Finished;
    }

    /// Apply a segment that was actually put on the wire.
    pub fn on_transmit(&mut self, seg: &ParsedSegment) {
        self.next_ident = self.next_ident.wrapping_add(1);
        self.local_seq = self.local_seq.max(seg.seq_num + seg.seq_len());

        let flags = seg.flags;
        self.phase = match self.phase {
            _ if flags.intersects(TcpFlags::RST | TcpFlags::FIN) => Phase::Finished,
            Phase::Closed if flags.contains(TcpFlags::SYN) => Phase::SynSent,
            Phase::SynSent
                if flags == TcpFlags::ACK
                    && self.remote_seq.is_some()
                    && self.last_seen.contains(TcpFlags::SYN | TcpFlags::ACK) =>
            {
                Phase::Established
            }
            p => p,
        };
    }
}
