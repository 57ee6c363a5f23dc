use std::net::Ipv4Addr;

use byteorder::{ByteOrder, NetworkEndian};

use crate::error::Error;
use crate::peer::{DEFAULT_WINDOW, Endpoint, PeerState};
use crate::wire::{self, ParsedSegment, Payload, SegmentSpec, SeqNumber, TcpFlags, checksum};

const DUT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const PEER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

fn sample() -> ParsedSegment {
    ParsedSegment {
        src_addr: DUT,
        dst_addr: PEER,
        ident: 7,
        ttl: 64,
        dont_frag: true,
        src_port: 40_000,
        dst_port: 49_152,
        seq_num: SeqNumber(0xffff_fff0),
        ack_num: SeqNumber(12_345),
        flags: TcpFlags::PSH | TcpFlags::ACK,
        window: 1024,
        urgent: 0,
        options: Vec::new(),
        payload: b"Sample Data".to_vec(),
    }
}

fn fix_ip_checksum(frame: &mut [u8]) {
    NetworkEndian::write_u16(&mut frame[10..12], 0);
    let sum = !checksum::data(&frame[..20]);
    NetworkEndian::write_u16(&mut frame[10..12], sum);
}

fn malformed_reason(frame: &[u8]) -> &'static str {
    match wire::decode(frame) {
        Err(Error::MalformedFrame(why)) => why,
        other => panic!("expected a malformed frame, got {other:?}"),
    }
}

#[test]
fn emit_then_decode_preserves_fields() {
    let seg = sample();
    let bytes = wire::emit(&seg);
    assert_eq!(bytes.len(), 20 + 20 + 11);
    assert_eq!(seg.frame_len(), bytes.len());
    assert_eq!(wire::decode(&bytes).expect("decode"), seg);
}

#[test]
fn emitted_frames_carry_valid_checksums() {
    let bytes = wire::emit(&sample());
    assert_eq!(checksum::data(&bytes[..20]), 0xffff);
    assert_eq!(checksum::tcp(DUT, PEER, &bytes[20..]), 0xffff);
}

#[test]
fn options_are_padded_to_a_word_boundary() {
    let mut seg = sample();
    seg.options = vec![2, 4, 0x05, 0xb4, 1];
    let bytes = wire::emit(&seg);
    assert_eq!(bytes.len(), 20 + 28 + 11);

    let back = wire::decode(&bytes).expect("decode");
    assert_eq!(back.options, vec![2, 4, 0x05, 0xb4, 1, 0, 0, 0]);
    assert_eq!(back.payload, seg.payload);
}

#[test]
fn trailing_link_padding_is_ignored() {
    let mut bytes = wire::emit(&sample());
    bytes.extend_from_slice(&[0; 6]);
    assert_eq!(wire::decode(&bytes).expect("decode"), sample());
}

#[test]
fn decode_rejects_malformed_frames() {
    let good = wire::emit(&sample());

    assert_eq!(malformed_reason(&good[..10]), "truncated ipv4 header");

    let mut v6 = good.clone();
    v6[0] = 0x65;
    assert_eq!(malformed_reason(&v6), "not ipv4");

    assert_eq!(malformed_reason(&good[..good.len() - 1]), "bad ipv4 total length");

    let mut ttl = good.clone();
    ttl[8] ^= 1;
    assert_eq!(malformed_reason(&ttl), "bad ipv4 checksum");

    let mut frag = good.clone();
    frag[6] |= 0x20;
    fix_ip_checksum(&mut frag);
    assert_eq!(malformed_reason(&frag), "fragmented");

    let mut udp = good.clone();
    udp[9] = 17;
    fix_ip_checksum(&mut udp);
    assert_eq!(malformed_reason(&udp), "not tcp");

    let mut off = good.clone();
    off[20 + 12] = 0x40;
    assert_eq!(malformed_reason(&off), "bad tcp data offset");

    let mut body = good.clone();
    let last = body.len() - 1;
    body[last] ^= 0xff;
    assert_eq!(malformed_reason(&body), "bad tcp checksum");
}

#[test]
fn sequence_numbers_compare_across_wraparound() {
    let near_end = SeqNumber(0xffff_fff0);
    let wrapped = near_end + 0x20;
    assert_eq!(wrapped, SeqNumber(0x10));
    assert!(near_end < wrapped);
    assert_eq!(wrapped.diff(near_end), 0x20);
    assert_eq!(near_end.max(wrapped), wrapped);
}

#[test]
fn seq_len_counts_syn_and_fin() {
    let mut seg = sample();
    assert_eq!(seg.seq_len(), 11);
    seg.flags = TcpFlags::SYN | TcpFlags::FIN;
    assert_eq!(seg.seq_len(), 13);
}

#[test]
fn flags_and_specs_render_readably() {
    assert_eq!((TcpFlags::SYN | TcpFlags::ACK).to_string(), "SYN|ACK");
    assert_eq!(TcpFlags::NONE.to_string(), "none");
    assert_eq!(SegmentSpec::new().to_string(), "{any}");
    assert_eq!(
        SegmentSpec::new().with_src_port(80).with_flags(TcpFlags::RST).to_string(),
        "{src_port=80 flags=RST}"
    );
    assert_eq!(Payload::new("Sample Data").to_string(), "\"Sample Data\"");
    assert_eq!(Payload::new(vec![0u8, 0xab]).to_string(), "0x00ab");
}

#[test]
fn merge_prefers_fields_from_the_override() {
    let base = SegmentSpec::new().with_src_port(1).with_dst_port(2);
    let over = SegmentSpec::new().with_dst_port(3).with_seq(SeqNumber(9));
    let merged = base.merge(&over);
    assert_eq!(merged.src_port, Some(1));
    assert_eq!(merged.dst_port, Some(3));
    assert_eq!(merged.seq_num, Some(SeqNumber(9)));
    assert!(merged.flags.is_none());
}

#[test]
fn encode_fills_unset_fields_from_the_peer() {
    let local = Endpoint::new(PEER, 49_152);
    let peer = PeerState::with_isn(local, Endpoint::new(DUT, 40_000), SeqNumber(100));
    let bytes = wire::encode(&peer, &SegmentSpec::new().with_flags(TcpFlags::SYN), &[]);
    let seg = wire::decode(&bytes).expect("decode");

    assert_eq!((seg.src_addr, seg.src_port), (PEER, 49_152));
    assert_eq!((seg.dst_addr, seg.dst_port), (DUT, 40_000));
    assert_eq!(seg.seq_num, SeqNumber(100));
    assert_eq!(seg.ack_num, SeqNumber(0));
    assert_eq!(seg.flags, TcpFlags::SYN);
    assert_eq!(seg.window, DEFAULT_WINDOW);
    assert!(seg.payload.is_empty());
}

#[test]
fn oversized_segments_do_not_fit_the_length_fields() {
    assert!(sample().check_fits().is_ok());

    let mut seg = sample();
    seg.options = vec![1; 41];
    assert!(matches!(seg.check_fits(), Err(Error::MalformedFrame("tcp options too long"))));
    seg.options = vec![1; 40];
    assert!(seg.check_fits().is_ok());

    let mut seg = sample();
    seg.payload = vec![0; 65_535 - 40];
    assert!(seg.check_fits().is_ok());
    seg.payload.push(0);
    assert!(matches!(seg.check_fits(), Err(Error::MalformedFrame(_))));
}
