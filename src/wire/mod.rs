//! Frame codec
//!
//! Pure conversions between raw IPv4/TCP frames and typed segments. Nothing
//! here holds state: outgoing defaults come from the caller's [`PeerState`].

pub mod checksum;
pub mod ipv4;
mod segment;
pub mod tcp;

pub use segment::{ParsedSegment, Payload, SegmentSpec, decode, emit};
pub use tcp::{SeqNumber, TcpFlags};

use crate::peer::PeerState;

/// Build a frame from `spec`, filling every unset field from `peer`.
pub fn encode(peer: &PeerState, spec: &SegmentSpec, payload: &[u8]) -> Vec<u8> {
    emit(&peer.build(spec, payload))
}
