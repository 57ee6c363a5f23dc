use std::net::Ipv4Addr;

use crate::peer::{Endpoint, PeerState, Phase};
use crate::wire::{ParsedSegment, SegmentSpec, SeqNumber, TcpFlags};

const PEER: Endpoint = Endpoint {
    addr: Ipv4Addr::new(10, 0, 0, 1),
    port: 49_152,
};
const DUT: Endpoint = Endpoint {
    addr: Ipv4Addr::new(10, 0, 0, 2),
    port: 40_000,
};

fn from_dut(seq: u32, flags: TcpFlags, payload: &[u8]) -> ParsedSegment {
    ParsedSegment {
        src_addr: DUT.addr,
        dst_addr: PEER.addr,
        ident: 0,
        ttl: 64,
        dont_frag: true,
        src_port: DUT.port,
        dst_port: PEER.port,
        seq_num: SeqNumber(seq),
        ack_num: SeqNumber(1001),
        flags,
        window: 65_535,
        urgent: 0,
        options: Vec::new(),
        payload: payload.to_vec(),
    }
}

/// Peer that sent SYN with ISN 1000 and saw the DUT's SYN|ACK with ISN 5000.
fn opened() -> PeerState {
    let mut peer = PeerState::with_isn(PEER, DUT, SeqNumber(1000));
    let syn = peer.build(&SegmentSpec::new().with_flags(TcpFlags::SYN), &[]);
    peer.on_transmit(&syn);
    peer.observe(&from_dut(5000, TcpFlags::SYN | TcpFlags::ACK, &[]));
    let ack = peer.build(&SegmentSpec::new(), &[]);
    peer.on_transmit(&ack);
    peer
}

#[test]
fn handshake_walks_the_phases() {
    let mut peer = PeerState::with_isn(PEER, DUT, SeqNumber(1000));
    assert_eq!(peer.phase(), Phase::Closed);
    assert_eq!(peer.remote_seq(), None);

    let syn = peer.build(&SegmentSpec::new().with_flags(TcpFlags::SYN), &[]);
    peer.on_transmit(&syn);
    assert_eq!(peer.phase(), Phase::SynSent);
    assert_eq!(peer.local_seq(), SeqNumber(1001));

    peer.observe(&from_dut(5000, TcpFlags::SYN | TcpFlags::ACK, &[]));
    assert_eq!(peer.remote_seq(), Some(SeqNumber(5001)));
    assert_eq!(peer.phase(), Phase::SynSent);

    let ack = peer.build(&SegmentSpec::new(), &[]);
    assert_eq!(ack.flags, TcpFlags::ACK);
    assert_eq!(ack.ack_num, SeqNumber(5001));
    peer.on_transmit(&ack);
    assert_eq!(peer.phase(), Phase::Established);
}

#[test]
fn next_outgoing_does_not_mutate() {
    let peer = opened();
    let before = (peer.local_seq(), peer.remote_seq(), peer.phase());

    let full = peer.next_outgoing(&SegmentSpec::new().with_window(10));
    assert_eq!(full.seq_num, Some(SeqNumber(1001)));
    assert_eq!(full.ack_num, Some(SeqNumber(5001)));
    assert_eq!(full.window, Some(10));
    assert_eq!(full.src_port, Some(PEER.port));
    assert_eq!(full.dst_port, Some(DUT.port));

    assert_eq!((peer.local_seq(), peer.remote_seq(), peer.phase()), before);
}

#[test]
fn remote_seq_never_moves_backwards() {
    let mut peer = opened();
    let data = from_dut(5001, TcpFlags::PSH | TcpFlags::ACK, b"Sample Data");

    peer.observe(&data);
    assert_eq!(peer.remote_seq(), Some(SeqNumber(5012)));

    // 重传与旧段都不推进
    peer.observe(&data);
    assert_eq!(peer.remote_seq(), Some(SeqNumber(5012)));
    peer.observe(&from_dut(4990, TcpFlags::ACK, b"old"));
    assert_eq!(peer.remote_seq(), Some(SeqNumber(5012)));

    // 有洞的段不推进
    peer.observe(&from_dut(6000, TcpFlags::ACK, b"gap"));
    assert_eq!(peer.remote_seq(), Some(SeqNumber(5012)));

    // 部分重叠的段推进到其末尾
    peer.observe(&from_dut(5010, TcpFlags::ACK, b"abcd"));
    assert_eq!(peer.remote_seq(), Some(SeqNumber(5014)));
}

#[test]
fn sending_data_advances_local_seq() {
    let mut peer = opened();
    let seg = peer.build(&SegmentSpec::new(), b"hello");
    assert_eq!(seg.seq_num, SeqNumber(1001));
    peer.on_transmit(&seg);
    assert_eq!(peer.local_seq(), SeqNumber(1006));

    // 重发旧序号不会让本端序号后退
    let resend = peer.build(&SegmentSpec::new().with_seq(SeqNumber(1001)), b"hello");
    peer.on_transmit(&resend);
    assert_eq!(peer.local_seq(), SeqNumber(1006));
}

#[test]
fn rst_or_fin_finishes_the_connection() {
    let mut peer = opened();
    peer.observe(&from_dut(5001, TcpFlags::FIN | TcpFlags::ACK, &[]));
    assert_eq!(peer.phase(), Phase::Finished);
    assert_eq!(peer.remote_seq(), Some(SeqNumber(5002)));

    let mut peer = opened();
    peer.observe(&from_dut(5001, TcpFlags::RST, &[]));
    assert_eq!(peer.phase(), Phase::Finished);

    let mut peer = opened();
    let rst = peer.build(&SegmentSpec::new().with_flags(TcpFlags::RST), &[]);
    assert_eq!(rst.ack_num, SeqNumber(0));
    peer.on_transmit(&rst);
    assert_eq!(peer.phase(), Phase::Finished);
}

#[test]
fn initial_peers_draw_random_sequence_numbers() {
    let isns: Vec<_> = (0..8)
        .map(|_| PeerState::initial(PEER, DUT).local_seq())
        .collect();
    assert!(isns.iter().any(|isn| *isn != isns[0]), "{isns:?}");

    let peer = PeerState::initial(PEER, DUT);
    assert_eq!(peer.phase(), Phase::Closed);
    assert_eq!(peer.remote_seq(), None);
}

#[test]
fn abandon_and_retarget_only_apply_before_opening() {
    let mut peer = PeerState::initial(PEER, Endpoint::new(DUT.addr, 0));
    assert!(peer.retarget(DUT));
    assert_eq!(peer.remote(), DUT);

    let syn = peer.build(&SegmentSpec::new().with_flags(TcpFlags::SYN), &[]);
    peer.on_transmit(&syn);
    assert!(!peer.retarget(Endpoint::new(DUT.addr, 1)));
    assert_eq!(peer.inbound_flow().src_port, Some(DUT.port));

    peer.abandon_open();
    assert_eq!(peer.phase(), Phase::Closed);
}
