use crate::wire::{ParsedSegment, Payload, SegmentSpec};

/// Header match: every field `spec` constrains equals the segment's value.
/// Flags compare exactly.
pub fn matches(spec: &SegmentSpec, seg: &ParsedSegment) -> bool {
    spec.src_addr.is_none_or(|v| v == seg.src_addr)
        && spec.dst_addr.is_none_or(|v| v == seg.dst_addr)
        && spec.src_port.is_none_or(|v| v == seg.src_port)
        && spec.dst_port.is_none_or(|v| v == seg.dst_port)
        && spec.seq_num.is_none_or(|v| v == seg.seq_num)
        && spec.ack_num.is_none_or(|v| v == seg.ack_num)
        && spec.flags.is_none_or(|v| v == seg.flags)
        && spec.window.is_none_or(|v| v == seg.window)
}

/// Byte-exact payload comparison; no payload constraint matches anything.
pub fn payload_matches(payload: Option<&Payload>, seg: &ParsedSegment) -> bool {
    payload.is_none_or(|p| p.bytes() == seg.payload.as_slice())
}
