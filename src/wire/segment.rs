//! Segment specifications, decoded segments, and the byte-level codec.

use std::fmt;
use std::net::Ipv4Addr;

use byteorder::{ByteOrder, NetworkEndian};

use super::checksum;
use super::ipv4;
use super::tcp::{self, SeqNumber, TcpFlags, read_u16, read_u32};
use crate::error::{Error, Result};

/// A sparse set of field predicates over a TCP/IPv4 segment.
///
/// Unset fields are wildcards when matching and are filled from peer state
/// when building an outgoing segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentSpec {
    pub src_addr: Option<Ipv4Addr>,
    pub dst_addr: Option<Ipv4Addr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub seq_num: Option<SeqNumber>,
    pub ack_num: Option<SeqNumber>,
    pub flags: Option<TcpFlags>,
    pub window: Option<u16>,
}

impl SegmentSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_src_addr(mut self, v: Ipv4Addr) -> Self {
        self.src_addr = Some(v);
        self
    }

    pub fn with_dst_addr(mut self, v: Ipv4Addr) -> Self {
        self.dst_addr = Some(v);
        self
    }

    pub fn with_src_port(mut self, v: u16) -> Self {
        self.src_port = Some(v);
        self
    }

    pub fn with_dst_port(mut self, v: u16) -> Self {
        self.dst_port = Some(v);
        self
    }

    pub fn with_seq(mut self, v: SeqNumber) -> Self {
        self.seq_num = Some(v);
        self
    }

    pub fn with_ack(mut self, v: SeqNumber) -> Self {
        self.ack_num = Some(v);
        self
    }

    pub fn with_flags(mut self, v: TcpFlags) -> Self {
        self.flags = Some(v);
        self
    }

    pub fn with_window(mut self, v: u16) -> Self {
        self.window = Some(v);
        self
    }

    /// True if no field is constrained.
    pub fn is_empty(&self) -> bool {
        *self == SegmentSpec::default()
    }

    /// Fields set in `over` replace the ones in `self`.
    pub fn merge(&self, over: &SegmentSpec) -> SegmentSpec {
        SegmentSpec {
            src_addr: over.src_addr.or(self.src_addr),
            dst_addr: over.dst_addr.or(self.dst_addr),
            src_port: over.src_port.or(self.src_port),
            dst_port: over.dst_port.or(self.dst_port),
            seq_num: over.seq_num.or(self.seq_num),
            ack_num: over.ack_num.or(self.ack_num),
            flags: over.flags.or(self.flags),
            window: over.window.or(self.window),
        }
    }
}

impl fmt::Display for SegmentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("{any}");
        }
        let mut parts = Vec::new();
        if let Some(v) = self.src_addr {
            parts.push(format!("src_addr={v}"));
        }
        if let Some(v) = self.dst_addr {
            parts.push(format!("dst_addr={v}"));
        }
        if let Some(v) = self.src_port {
            parts.push(format!("src_port={v}"));
        }
        if let Some(v) = self.dst_port {
            parts.push(format!("dst_port={v}"));
        }
        if let Some(v) = self.seq_num {
            parts.push(format!("seq={v}"));
        }
        if let Some(v) = self.ack_num {
            parts.push(format!("ack={v}"));
        }
        if let Some(v) = self.flags {
            parts.push(format!("flags={v}"));
        }
        if let Some(v) = self.window {
            parts.push(format!("win={v}"));
        }
        write!(f, "{{{}}}", parts.join(" "))
    }
}

/// Exact application-data constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Payload(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{s:?}"),
            _ => {
                f.write_str("0x")?;
                for b in &self.0 {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// A fully decoded TCP/IPv4 segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSegment {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub ident: u16,
    pub ttl: u8,
    pub dont_frag: bool,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: SeqNumber,
    pub ack_num: SeqNumber,
    pub flags: TcpFlags,
    pub window: u16,
    pub urgent: u16,
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
}

impl ParsedSegment {
    /// Sequence space consumed: payload plus one for each of SYN and FIN.
    pub fn seq_len(&self) -> u32 {
        let mut len = self.payload.len() as u32;
        if self.flags.contains(TcpFlags::SYN) {
            len += 1;
        }
        if self.flags.contains(TcpFlags::FIN) {
            len += 1;
        }
        len
    }

    fn options_len(&self) -> usize {
        self.options.len().div_ceil(4) * 4
    }

    pub fn tcp_len(&self) -> usize {
        tcp::HEADER_LEN + self.options_len() + self.payload.len()
    }

    pub fn frame_len(&self) -> usize {
        ipv4::HEADER_LEN + self.tcp_len()
    }

    /// Whether the header length fields can describe this segment.
    pub fn check_fits(&self) -> Result<()> {
        if self.options_len() > tcp::MAX_OPTIONS_LEN {
            return Err(Error::MalformedFrame("tcp options too long"));
        }
        if self.frame_len() > usize::from(u16::MAX) {
            return Err(Error::MalformedFrame("frame exceeds ipv4 total length"));
        }
        Ok(())
    }
}

impl fmt::Display for ParsedSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TCP {}:{} -> {}:{} flags={} seq={}",
            self.src_addr, self.src_port, self.dst_addr, self.dst_port, self.flags, self.seq_num
        )?;
        if self.flags.contains(TcpFlags::ACK) {
            write!(f, " ack={}", self.ack_num)?;
        }
        write!(f, " win={} len={}", self.window, self.payload.len())
    }
}

/// Serialize a segment into an IPv4 frame with valid checksums.
///
/// Options are zero-padded to a multiple of four bytes. Callers check
/// [`ParsedSegment::check_fits`] first; oversized lengths are truncated.
pub fn emit(seg: &ParsedSegment) -> Vec<u8> {
    let total = seg.frame_len();
    let mut buf = vec![0u8; total];

    {
        use ipv4::field;
        let ip = &mut buf[..ipv4::HEADER_LEN];
        ip[field::VER_IHL] = 0x40 | (ipv4::HEADER_LEN / 4) as u8;
        NetworkEndian::write_u16(&mut ip[field::TOTAL_LEN], total as u16);
        NetworkEndian::write_u16(&mut ip[field::IDENT], seg.ident);
        let frag = if seg.dont_frag { ipv4::FLAG_DF } else { 0 };
        NetworkEndian::write_u16(&mut ip[field::FLAGS_FRAG], frag);
        ip[field::TTL] = seg.ttl;
        ip[field::PROTOCOL] = ipv4::PROTO_TCP;
        ip[field::SRC_ADDR].copy_from_slice(&seg.src_addr.octets());
        ip[field::DST_ADDR].copy_from_slice(&seg.dst_addr.octets());
        let sum = !checksum::data(ip);
        NetworkEndian::write_u16(&mut ip[field::CHECKSUM], sum);
    }

    {
        use tcp::field;
        let header_len = tcp::HEADER_LEN + seg.options_len();
        let t = &mut buf[ipv4::HEADER_LEN..];
        NetworkEndian::write_u16(&mut t[field::SRC_PORT], seg.src_port);
        NetworkEndian::write_u16(&mut t[field::DST_PORT], seg.dst_port);
        NetworkEndian::write_u32(&mut t[field::SEQ_NUM], seg.seq_num.0);
        NetworkEndian::write_u32(&mut t[field::ACK_NUM], seg.ack_num.0);
        t[field::DATA_OFF] = ((header_len / 4) as u8) << 4;
        t[field::FLAGS] = seg.flags.0;
        NetworkEndian::write_u16(&mut t[field::WINDOW], seg.window);
        NetworkEndian::write_u16(&mut t[field::URGENT], seg.urgent);
        t[tcp::HEADER_LEN..tcp::HEADER_LEN + seg.options.len()].copy_from_slice(&seg.options);
        t[header_len..].copy_from_slice(&seg.payload);
        let sum = !checksum::tcp(seg.src_addr, seg.dst_addr, t);
        NetworkEndian::write_u16(&mut t[field::CHECKSUM], sum);
    }

    buf
}

/// Parse a raw IPv4 frame carrying TCP.
///
/// Bytes past the IPv4 total length (link padding) are ignored.
pub fn decode(buf: &[u8]) -> Result<ParsedSegment> {
    use ipv4::field as ip;

    if buf.len() < ipv4::HEADER_LEN {
        return Err(Error::MalformedFrame("truncated ipv4 header"));
    }
    if buf[ip::VER_IHL] >> 4 != 4 {
        return Err(Error::MalformedFrame("not ipv4"));
    }
    let ihl = ((buf[ip::VER_IHL] & 0x0f) as usize) * 4;
    if ihl < ipv4::HEADER_LEN || buf.len() < ihl {
        return Err(Error::MalformedFrame("bad ipv4 header length"));
    }
    let total = read_u16(buf, ip::TOTAL_LEN) as usize;
    if total < ihl || total > buf.len() {
        return Err(Error::MalformedFrame("bad ipv4 total length"));
    }
    if checksum::data(&buf[..ihl]) != 0xffff {
        return Err(Error::MalformedFrame("bad ipv4 checksum"));
    }
    let frag = read_u16(buf, ip::FLAGS_FRAG);
    if frag & ipv4::FLAG_MF != 0 || frag & ipv4::FRAG_OFFSET_MASK != 0 {
        return Err(Error::MalformedFrame("fragmented"));
    }
    if buf[ip::PROTOCOL] != ipv4::PROTO_TCP {
        return Err(Error::MalformedFrame("not tcp"));
    }
    let src_addr = Ipv4Addr::from(read_u32(buf, ip::SRC_ADDR));
    let dst_addr = Ipv4Addr::from(read_u32(buf, ip::DST_ADDR));

    let t = &buf[ihl..total];
    if t.len() < tcp::HEADER_LEN {
        return Err(Error::MalformedFrame("truncated tcp header"));
    }
    let data_off = ((t[tcp::field::DATA_OFF] >> 4) as usize) * 4;
    if data_off < tcp::HEADER_LEN || data_off > t.len() {
        return Err(Error::MalformedFrame("bad tcp data offset"));
    }
    if checksum::tcp(src_addr, dst_addr, t) != 0xffff {
        return Err(Error::MalformedFrame("bad tcp checksum"));
    }

    Ok(ParsedSegment {
        src_addr,
        dst_addr,
        ident: read_u16(buf, ip::IDENT),
        ttl: buf[ip::TTL],
        dont_frag: frag & ipv4::FLAG_DF != 0,
        src_port: read_u16(t, tcp::field::SRC_PORT),
        dst_port: read_u16(t, tcp::field::DST_PORT),
        seq_num: SeqNumber(read_u32(t, tcp::field::SEQ_NUM)),
        ack_num: SeqNumber(read_u32(t, tcp::field::ACK_NUM)),
        flags: TcpFlags(t[tcp::field::FLAGS]),
        window: read_u16(t, tcp::field::WINDOW),
        urgent: read_u16(t, tcp::field::URGENT),
        options: t[tcp::HEADER_LEN..data_off].to_vec(),
        payload: t[data_off..].to_vec(),
    })
}
