use std::net::Ipv4Addr;

use crate::capture::{FrameSink, PacketStream};
use crate::dut::simulated::{SimDut, SimDutConfig, SimTestbed};
use crate::dut::{DutControl, Fd, consts};
use crate::engine::Connection;
use crate::error::Error;
use crate::peer::{Endpoint, PeerState};
use crate::sim::SimTime;
use crate::wire::{self, Payload, SegmentSpec, SeqNumber, TcpFlags};

const PEER: Endpoint = Endpoint {
    addr: Ipv4Addr::new(10, 0, 0, 1),
    port: 49_152,
};

fn listen(dut: &mut SimDut) -> (Fd, u16) {
    dut.create_listener(consts::AF_INET, consts::SOCK_STREAM, consts::IPPROTO_TCP, 1)
        .expect("listen")
}

/// Testbed with one accepted connection.
fn established(cfg: SimDutConfig) -> (SimTestbed, SimDut, Connection, Fd) {
    let bed = SimTestbed::new(cfg);
    let mut dut = bed.dut();
    let (lfd, port) = listen(&mut dut);
    let peer = PeerState::with_isn(PEER, Endpoint::new(bed.dut_addr(), port), SeqNumber(1000));
    let mut conn = Connection::new(peer, bed.wire(), bed.wire(), bed.clock());
    conn.handshake(SimTime::from_secs(1)).expect("handshake");
    let fd = dut.accept(lfd).expect("accept");
    (bed, dut, conn, fd)
}

#[test]
fn syn_to_a_closed_port_gets_a_reset() {
    let bed = SimTestbed::new(SimDutConfig::default());
    let mut wire_end = bed.wire();
    let peer = PeerState::with_isn(PEER, Endpoint::new(bed.dut_addr(), 9), SeqNumber(77));
    let syn = wire::encode(&peer, &SegmentSpec::new().with_flags(TcpFlags::SYN), &[]);
    wire_end.send_frame(&syn).expect("send");

    let frame = wire_end
        .next_frame(SimTime::from_millis(10))
        .expect("next")
        .expect("rst");
    let rst = wire::decode(&frame.bytes).expect("decode");
    assert_eq!(rst.flags, TcpFlags::RST | TcpFlags::ACK);
    assert_eq!(rst.ack_num, SeqNumber(78));
    assert_eq!(rst.src_port, 9);
    assert_eq!(frame.at, SimTime::from_millis(2));
    assert_eq!(bed.stats().frames_in, 1);
}

#[test]
fn handshake_and_accept_follow_link_latency() {
    let (bed, _dut, conn, fd) = established(SimDutConfig::default());
    assert_eq!(fd, 4);
    assert_eq!(bed.now(), SimTime::from_millis(3));
    assert_eq!(conn.peer().remote_seq(), Some(SeqNumber(1_064_001)));
}

#[test]
fn socket_calls_validate_their_arguments() {
    let bed = SimTestbed::new(SimDutConfig::default());
    let mut dut = bed.dut();

    let err = dut.create_listener(10, consts::SOCK_STREAM, consts::IPPROTO_TCP, 1).expect_err("af");
    assert!(matches!(err, Error::RemoteControl { op: "create_listener", .. }));

    let (lfd, port) = listen(&mut dut);
    assert_eq!(port, 40_000);
    assert!(matches!(dut.send(lfd, b"x", 0), Err(Error::RemoteControl { op: "send", .. })));
    assert!(matches!(dut.close(99), Err(Error::RemoteControl { op: "close", .. })));
    assert!(matches!(dut.accept(99), Err(Error::RemoteControl { op: "accept", .. })));
    assert!(dut.set_sockopt_int(99, consts::SOL_SOCKET, 1, 1).is_err());

    // 没有对端时 accept 不会无限等待
    assert!(matches!(dut.accept(lfd), Err(Error::RemoteControl { op: "accept", .. })));
    dut.close(lfd).expect("close listener");
}

#[test]
fn socket_options_are_recorded() {
    let (bed, mut dut, _conn, fd) = established(SimDutConfig::default());
    dut.set_sockopt_int(fd, consts::IPPROTO_TCP, consts::TCP_NODELAY, 1)
        .expect("setsockopt");
    assert_eq!(bed.sockopt(fd, consts::IPPROTO_TCP, consts::TCP_NODELAY), Some(1));
    assert_eq!(bed.sockopt(fd, consts::SOL_SOCKET, 9), None);
}

#[test]
fn unacknowledged_data_is_retransmitted_with_doubling_intervals() {
    let (bed, mut dut, mut conn, fd) = established(SimDutConfig::default());
    let payload = Payload::new("Sample Data");
    dut.send(fd, payload.bytes(), 0).expect("send");

    let mut arrivals = Vec::new();
    for _ in 0..4 {
        let spec = SegmentSpec::new().with_seq(SeqNumber(1_064_001));
        conn.expect_data(&spec, &payload, SimTime::from_secs(10)).expect("data");
        arrivals.push(conn.now());
    }
    let gaps: Vec<_> = arrivals.windows(2).map(|w| w[1].saturating_sub(w[0])).collect();
    assert_eq!(
        gaps,
        [SimTime::from_secs(1), SimTime::from_secs(2), SimTime::from_secs(4)]
    );
    assert_eq!(bed.stats().retransmits, 3);
    assert_eq!(bed.stats().rtt_samples, 0);
}

#[test]
fn rtt_sample_brings_the_rto_down_to_the_minimum() {
    let (bed, mut dut, mut conn, fd) = established(SimDutConfig::default());
    let payload = Payload::new("Sample Data");

    dut.send(fd, payload.bytes(), 0).expect("send");
    conn.expect_data(&SegmentSpec::new(), &payload, SimTime::from_secs(1)).expect("data");
    conn.send(&SegmentSpec::new().with_flags(TcpFlags::ACK), &[]).expect("ack");

    dut.send(fd, payload.bytes(), 0).expect("send again");
    let seq = conn.peer().remote_seq().expect("seq");
    let spec = SegmentSpec::new().with_seq(seq);
    conn.expect_data(&spec, &payload, SimTime::from_secs(1)).expect("original");
    let original = conn.now();
    conn.expect_data(&spec, &payload, SimTime::from_secs(1)).expect("retransmit");

    assert_eq!(bed.stats().rtt_samples, 1);
    assert_eq!(conn.now().saturating_sub(original), SimTime::from_millis(201));
}

#[test]
fn retransmitted_segments_are_not_sampled() {
    let (bed, mut dut, mut conn, fd) = established(SimDutConfig::default());
    let payload = Payload::new("Sample Data");
    dut.send(fd, payload.bytes(), 0).expect("send");
    conn.expect_data(&SegmentSpec::new(), &payload, SimTime::from_secs(1)).expect("original");
    conn.expect_data(&SegmentSpec::new(), &payload, SimTime::from_secs(2)).expect("retransmit");
    conn.send(&SegmentSpec::new().with_flags(TcpFlags::ACK), &[]).expect("ack");
    bed.run_for(SimTime::from_secs(5));

    assert_eq!(bed.stats().rtt_samples, 0);
    assert_eq!(bed.stats().retransmits, 1);
}

#[test]
fn backoff_is_capped_by_max_rto() {
    let cfg = SimDutConfig {
        initial_rto: SimTime::from_millis(100),
        max_rto: SimTime::from_millis(300),
        ..SimDutConfig::default()
    };
    let (_bed, mut dut, mut conn, fd) = established(cfg);
    let payload = Payload::new("abc");
    dut.send(fd, payload.bytes(), 0).expect("send");

    let mut arrivals = Vec::new();
    for _ in 0..5 {
        let spec = SegmentSpec::new().with_seq(SeqNumber(1_064_001));
        conn.expect_data(&spec, &payload, SimTime::from_secs(1)).expect("data");
        arrivals.push(conn.now());
    }
    let gaps: Vec<_> = arrivals
        .windows(2)
        .map(|w| w[1].saturating_sub(w[0]).0 / 1_000_000)
        .collect();
    assert_eq!(gaps, [100, 200, 300, 300]);
}

#[test]
fn closing_the_connection_sends_fin() {
    let (_bed, mut dut, mut conn, fd) = established(SimDutConfig::default());
    dut.close(fd).expect("close");
    let spec = conn.peer().inbound_flow().with_flags(TcpFlags::FIN | TcpFlags::ACK);
    conn.expect(&spec, None, SimTime::from_millis(10)).expect("fin");
    assert!(matches!(dut.send(fd, b"x", 0), Err(Error::RemoteControl { .. })));
}

#[test]
fn blackhole_drops_everything() {
    let bed = SimTestbed::new(SimDutConfig {
        blackhole: true,
        ..SimDutConfig::default()
    });
    let mut dut = bed.dut();
    let (_lfd, port) = listen(&mut dut);
    let mut wire_end = bed.wire();
    let peer = PeerState::with_isn(PEER, Endpoint::new(bed.dut_addr(), port), SeqNumber(1));
    wire_end
        .send_frame(&wire::encode(&peer, &SegmentSpec::new().with_flags(TcpFlags::SYN), &[]))
        .expect("send");

    assert!(wire_end.next_frame(SimTime::from_secs(1)).expect("next").is_none());
    assert_eq!(bed.now(), SimTime::from_secs(1));
    assert_eq!(bed.stats().frames_dropped, 1);
    assert_eq!(bed.stats().frames_out, 0);
}
