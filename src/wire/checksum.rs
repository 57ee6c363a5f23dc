//! RFC 1071 internet checksum arithmetic.

use std::net::Ipv4Addr;

use byteorder::{ByteOrder, NetworkEndian};

use super::ipv4::PROTO_TCP;

fn propagate_carries(word: u32) -> u16 {
    let sum = (word >> 16) + (word & 0xffff);
    ((sum >> 16) as u16) + (sum as u16)
}

/// One's complement sum over `data` (without the final complement).
pub fn data(data: &[u8]) -> u16 {
    let mut accum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        accum += NetworkEndian::read_u16(word) as u32;
    }
    if let [last] = chunks.remainder() {
        accum += (*last as u32) << 8;
    }
    propagate_carries(accum)
}

/// Combine several partial sums.
pub fn combine(sums: &[u16]) -> u16 {
    let accum: u32 = sums.iter().map(|&w| w as u32).sum();
    propagate_carries(accum)
}

/// Partial sum of the IPv4 pseudo header used by the TCP checksum.
pub fn pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, tcp_len: u16) -> u16 {
    let mut proto_len = [0u8; 4];
    proto_len[1] = PROTO_TCP;
    NetworkEndian::write_u16(&mut proto_len[2..4], tcp_len);
    combine(&[data(&src.octets()), data(&dst.octets()), data(&proto_len)])
}

/// TCP checksum of `segment` (header + payload, checksum field included as-is).
/// A segment carrying a correct checksum sums to `0xffff`.
pub fn tcp(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    combine(&[pseudo_header(src, dst, segment.len() as u16), data(segment)])
}
