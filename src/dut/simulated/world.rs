//! 仿真 DUT 的 TCP 实现（极简）
//!
//! 只覆盖一致性测试需要的部分：
//! - 被动打开（SYN → SYN-ACK → ACK），未监听端口回 RST
//! - 数据发送、累计确认、按 RFC 6298 估计 RTO（Karn：重传段不采样）
//! - 超时重传：每次超时 RTO 乘以 `backoff` 并受 `max_rto` 限制
//!
//! 不实现拥塞控制、窗口通告、选择确认等。

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use tracing::{debug, info, trace};

use super::SimDutConfig;
use super::events::{ArriveAtPeer, RetransmitTimer};
use crate::capture::CapturedFrame;
use crate::dut::Fd;
use crate::peer::Endpoint;
use crate::sim::{SimTime, Simulator, World};
use crate::wire::{self, ParsedSegment, SeqNumber, TcpFlags, ipv4};

const MSS: usize = 1460;
const WINDOW: u16 = 65_535;
/// RFC 6298 时钟粒度 G
const CLOCK_GRANULARITY: SimTime = SimTime(1_000_000);

pub(crate) type ConnId = u64;

/// 仿真 DUT 的计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DutStats {
    pub frames_in: u64,
    pub frames_dropped: u64,
    pub frames_out: u64,
    pub retransmits: u64,
    pub rtt_samples: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    SynReceived,
    Established,
}

#[derive(Debug, Clone)]
struct SentSeg {
    seq: SeqNumber,
    data: Vec<u8>,
    sent_at: SimTime,
    retransmitted: bool,
}

#[derive(Debug)]
struct DutConn {
    local_port: u16,
    remote: Endpoint,
    state: ConnState,
    listener: Fd,
    iss: SeqNumber,
    snd_una: SeqNumber,
    snd_nxt: SeqNumber,
    rcv_nxt: SeqNumber,
    inflight: VecDeque<SentSeg>,
    srtt: Option<SimTime>,
    rttvar: SimTime,
    rto: SimTime,
    // 定时器代数：旧的定时器事件到期时发现代数不符即忽略
    timer_gen: u64,
    timer_armed: bool,
}

#[derive(Debug)]
struct Listener {
    port: u16,
    backlog: usize,
    ready: VecDeque<ConnId>,
}

#[derive(Debug)]
enum Socket {
    Listener(Listener),
    Conn(ConnId),
}

/// 仿真 DUT 的全部状态
pub struct DutWorld {
    pub(crate) cfg: SimDutConfig,
    sockets: HashMap<Fd, Socket>,
    conns: HashMap<ConnId, DutConn>,
    next_fd: Fd,
    next_conn: ConnId,
    next_port: u16,
    next_ident: u16,
    pub(crate) sockopts: HashMap<(Fd, i32, i32), i32>,
    pub(crate) peer_inbox: VecDeque<CapturedFrame>,
    pub(crate) stats: DutStats,
}

impl World for DutWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl DutWorld {
    pub fn new(cfg: SimDutConfig) -> Self {
        let next_port = cfg.first_port;
        Self {
            cfg,
            sockets: HashMap::new(),
            conns: HashMap::new(),
            next_fd: 3,
            next_conn: 1,
            next_port,
            next_ident: 1,
            sockopts: HashMap::new(),
            peer_inbox: VecDeque::new(),
            stats: DutStats::default(),
        }
    }

    fn alloc_fd(&mut self) -> Fd {
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }

    pub(crate) fn has_socket(&self, fd: Fd) -> bool {
        self.sockets.contains_key(&fd)
    }

    pub(crate) fn listen(&mut self, backlog: usize) -> (Fd, u16) {
        let port = self.next_port;
        self.next_port = self.next_port.wrapping_add(1).max(1024);
        let fd = self.alloc_fd();
        self.sockets.insert(
            fd,
            Socket::Listener(Listener {
                port,
                backlog: backlog.max(1),
                ready: VecDeque::new(),
            }),
        );
        info!(fd, port, "DUT 开始监听");
        (fd, port)
    }

    /// `None`：不是监听 socket；`Some(None)`：暂无已完成握手的连接。
    pub(crate) fn try_accept(&mut self, fd: Fd) -> Option<Option<Fd>> {
        let Some(Socket::Listener(l)) = self.sockets.get_mut(&fd) else {
            return None;
        };
        let Some(conn) = l.ready.pop_front() else {
            return Some(None);
        };
        let new_fd = self.alloc_fd();
        self.sockets.insert(new_fd, Socket::Conn(conn));
        info!(listener = fd, fd = new_fd, conn, "DUT accept");
        Some(Some(new_fd))
    }

    /// 关闭 socket：连接发送 FIN 并丢弃未确认数据，监听关闭时回收未 accept 的连接。
    pub(crate) fn close(&mut self, fd: Fd, sim: &mut Simulator) -> bool {
        match self.sockets.remove(&fd) {
            Some(Socket::Listener(l)) => {
                for id in l.ready {
                    self.conns.remove(&id);
                }
                self.conns.retain(|_, c| c.listener != fd || c.state != ConnState::SynReceived);
                true
            }
            Some(Socket::Conn(id)) => {
                if let Some(conn) = self.conns.remove(&id) {
                    let fin = Self::segment(
                        self.cfg.addr,
                        &conn,
                        conn.snd_nxt,
                        TcpFlags::FIN | TcpFlags::ACK,
                        Vec::new(),
                    );
                    self.transmit(fin, sim);
                }
                true
            }
            None => false,
        }
    }

    /// 发送应用数据；返回写入的字节数，非连接 socket 返回 None。
    pub(crate) fn send(&mut self, fd: Fd, data: &[u8], sim: &mut Simulator) -> Option<usize> {
        let Some(Socket::Conn(id)) = self.sockets.get(&fd) else {
            return None;
        };
        let id = *id;
        let now = sim.now();
        let mut segs = Vec::new();
        {
            let conn = self.conns.get_mut(&id)?;
            if conn.state != ConnState::Established {
                return None;
            }
            for chunk in data.chunks(MSS) {
                let seg = SentSeg {
                    seq: conn.snd_nxt,
                    data: chunk.to_vec(),
                    sent_at: now,
                    retransmitted: false,
                };
                conn.snd_nxt += chunk.len() as u32;
                conn.inflight.push_back(seg.clone());
                segs.push(seg);
            }
        }
        for seg in segs {
            self.transmit_data(id, &seg, sim);
        }
        self.arm_timer_if_idle(id, sim);
        Some(data.len())
    }

    fn segment(
        src: Ipv4Addr,
        conn: &DutConn,
        seq: SeqNumber,
        flags: TcpFlags,
        payload: Vec<u8>,
    ) -> ParsedSegment {
        ParsedSegment {
            src_addr: src,
            dst_addr: conn.remote.addr,
            ident: 0,
            ttl: ipv4::DEFAULT_TTL,
            dont_frag: true,
            src_port: conn.local_port,
            dst_port: conn.remote.port,
            seq_num: seq,
            ack_num: conn.rcv_nxt,
            flags,
            window: WINDOW,
            urgent: 0,
            options: Vec::new(),
            payload,
        }
    }

    fn transmit_data(&mut self, id: ConnId, seg: &SentSeg, sim: &mut Simulator) {
        let Some(conn) = self.conns.get(&id) else {
            return;
        };
        let flags = TcpFlags::PSH | TcpFlags::ACK;
        let out = Self::segment(self.cfg.addr, conn, seg.seq, flags, seg.data.clone());
        self.transmit(out, sim);
    }

    /// 编码并经链路送往对端（到达时刻 = now + latency）
    fn transmit(&mut self, mut seg: ParsedSegment, sim: &mut Simulator) {
        seg.ident = self.next_ident;
        self.next_ident = self.next_ident.wrapping_add(1);
        self.stats.frames_out += 1;
        debug!(now = %sim.now(), seg = %seg, "DUT 发送");
        sim.schedule_after(self.cfg.latency, ArriveAtPeer { bytes: wire::emit(&seg) });
    }

    fn arm_timer_if_idle(&mut self, id: ConnId, sim: &mut Simulator) {
        let armed = self.conns.get(&id).is_some_and(|c| c.timer_armed);
        if !armed {
            self.arm_timer(id, sim);
        }
    }

    fn arm_timer(&mut self, id: ConnId, sim: &mut Simulator) {
        let slack = self.cfg.timer_slack;
        let Some(conn) = self.conns.get_mut(&id) else {
            return;
        };
        conn.timer_gen += 1;
        conn.timer_armed = true;
        let at = sim.now().saturating_add(conn.rto).saturating_add(slack);
        trace!(conn = id, rto = %conn.rto, at = %at, "启动重传定时器");
        sim.schedule(
            at,
            RetransmitTimer {
                conn: id,
                generation: conn.timer_gen,
            },
        );
    }

    fn cancel_timer(&mut self, id: ConnId) {
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.timer_gen += 1;
            conn.timer_armed = false;
        }
    }

    /// 重传定时器到期：重传最早未确认段并退避
    pub(crate) fn on_retransmit_timer(&mut self, id: ConnId, generation: u64, sim: &mut Simulator) {
        let (backoff, max_rto) = (self.cfg.backoff, self.cfg.max_rto);
        let Some(conn) = self.conns.get_mut(&id) else {
            return;
        };
        if conn.timer_gen != generation {
            return;
        }
        conn.timer_armed = false;
        let Some(first) = conn.inflight.front_mut() else {
            return;
        };
        first.retransmitted = true;
        let seg = first.clone();
        conn.rto = conn.rto.mul_f64(backoff).min(max_rto);
        info!(now = %sim.now(), conn = id, seq = %seg.seq, next_rto = %conn.rto, "DUT 超时重传");
        self.stats.retransmits += 1;
        self.transmit_data(id, &seg, sim);
        self.arm_timer(id, sim);
    }

    /// 对端发来的帧到达 DUT
    pub(crate) fn on_frame(&mut self, bytes: &[u8], sim: &mut Simulator) {
        self.stats.frames_in += 1;
        if self.cfg.blackhole {
            self.stats.frames_dropped += 1;
            trace!("blackhole：丢弃入站帧");
            return;
        }
        let seg = match wire::decode(bytes) {
            Ok(seg) if seg.dst_addr == self.cfg.addr => seg,
            Ok(_) | Err(_) => {
                self.stats.frames_dropped += 1;
                return;
            }
        };
        debug!(now = %sim.now(), seg = %seg, "DUT 收到");

        let remote = Endpoint::new(seg.src_addr, seg.src_port);
        let found = self
            .conns
            .iter()
            .find(|(_, c)| c.local_port == seg.dst_port && c.remote == remote)
            .map(|(id, _)| *id);

        match found {
            Some(id) => self.on_conn_segment(id, &seg, sim),
            None => self.on_unmatched(&seg, sim),
        }
    }

    fn listener_for(&self, port: u16) -> Option<Fd> {
        self.sockets.iter().find_map(|(fd, s)| match s {
            Socket::Listener(l) if l.port == port => Some(*fd),
            _ => None,
        })
    }

    fn on_unmatched(&mut self, seg: &ParsedSegment, sim: &mut Simulator) {
        if seg.flags.contains(TcpFlags::RST) {
            return;
        }
        let is_syn = seg.flags.contains(TcpFlags::SYN) && !seg.flags.contains(TcpFlags::ACK);
        if is_syn {
            if let Some(lfd) = self.listener_for(seg.dst_port) {
                let pending = self.conns.values().filter(|c| c.listener == lfd).count();
                let Some(Socket::Listener(l)) = self.sockets.get(&lfd) else {
                    return;
                };
                if pending > l.backlog {
                    debug!(port = seg.dst_port, "backlog 已满，丢弃 SYN");
                    return;
                }
                self.passive_open(lfd, seg, sim);
                return;
            }
        }
        self.send_rst(seg, sim);
    }

    fn passive_open(&mut self, listener: Fd, seg: &ParsedSegment, sim: &mut Simulator) {
        let id = self.next_conn;
        self.next_conn += 1;
        let iss = SeqNumber(self.cfg.isn.wrapping_add((id as u32).wrapping_mul(64_000)));
        let conn = DutConn {
            local_port: seg.dst_port,
            remote: Endpoint::new(seg.src_addr, seg.src_port),
            state: ConnState::SynReceived,
            listener,
            iss,
            snd_una: iss,
            snd_nxt: iss + 1,
            rcv_nxt: seg.seq_num + 1,
            inflight: VecDeque::new(),
            srtt: None,
            rttvar: SimTime::ZERO,
            rto: self.cfg.initial_rto,
            timer_gen: 0,
            timer_armed: false,
        };
        let syn_ack =
            Self::segment(self.cfg.addr, &conn, iss, TcpFlags::SYN | TcpFlags::ACK, Vec::new());
        self.conns.insert(id, conn);
        info!(conn = id, remote = %remote_of(seg), "DUT 收到 SYN，回复 SYN-ACK");
        self.transmit(syn_ack, sim);
    }

    fn send_rst(&mut self, seg: &ParsedSegment, sim: &mut Simulator) {
        let (seq, ack, flags) = if seg.flags.contains(TcpFlags::ACK) {
            (seg.ack_num, SeqNumber(0), TcpFlags::RST)
        } else {
            (SeqNumber(0), seg.seq_num + seg.seq_len(), TcpFlags::RST | TcpFlags::ACK)
        };
        let rst = ParsedSegment {
            src_addr: self.cfg.addr,
            dst_addr: seg.src_addr,
            ident: 0,
            ttl: ipv4::DEFAULT_TTL,
            dont_frag: true,
            src_port: seg.dst_port,
            dst_port: seg.src_port,
            seq_num: seq,
            ack_num: ack,
            flags,
            window: 0,
            urgent: 0,
            options: Vec::new(),
            payload: Vec::new(),
        };
        debug!(port = seg.dst_port, "无匹配连接，回复 RST");
        self.transmit(rst, sim);
    }

    fn on_conn_segment(&mut self, id: ConnId, seg: &ParsedSegment, sim: &mut Simulator) {
        if seg.flags.contains(TcpFlags::RST) {
            info!(conn = id, "连接被对端 RST");
            self.conns.remove(&id);
            return;
        }

        let state = match self.conns.get(&id) {
            Some(c) => c.state,
            None => return,
        };

        if seg.flags.contains(TcpFlags::SYN) {
            // 重复 SYN：重发 SYN-ACK
            if state == ConnState::SynReceived {
                if let Some(conn) = self.conns.get(&id) {
                    let flags = TcpFlags::SYN | TcpFlags::ACK;
                    let syn_ack =
                        Self::segment(self.cfg.addr, conn, conn.iss, flags, Vec::new());
                    self.transmit(syn_ack, sim);
                }
            }
            return;
        }

        if seg.flags.contains(TcpFlags::ACK) {
            self.on_ack(id, seg.ack_num, sim);
        }

        let Some(conn) = self.conns.get_mut(&id) else {
            return;
        };
        if conn.state != ConnState::Established {
            return;
        }
        let mut consumed = seg.payload.len() as u32;
        if seg.flags.contains(TcpFlags::FIN) {
            consumed += 1;
        }
        if consumed == 0 {
            return;
        }
        if seg.seq_num == conn.rcv_nxt {
            conn.rcv_nxt += consumed;
            self.stats.bytes_received += seg.payload.len() as u64;
        }
        // 按序与否都回累计 ACK（乱序体现为重复 ACK）
        let ack = Self::segment(self.cfg.addr, conn, conn.snd_nxt, TcpFlags::ACK, Vec::new());
        self.transmit(ack, sim);
    }

    fn on_ack(&mut self, id: ConnId, ack: SeqNumber, sim: &mut Simulator) {
        let now = sim.now();
        let (min_rto, max_rto) = (self.cfg.min_rto, self.cfg.max_rto);
        let Some(conn) = self.conns.get_mut(&id) else {
            return;
        };

        if conn.state == ConnState::SynReceived {
            if ack != conn.iss + 1 {
                return;
            }
            conn.state = ConnState::Established;
            conn.snd_una = ack;
            let listener = conn.listener;
            if let Some(Socket::Listener(l)) = self.sockets.get_mut(&listener) {
                l.ready.push_back(id);
            }
            info!(conn = id, "DUT 连接建立");
            return;
        }

        if !(ack > conn.snd_una && ack <= conn.snd_nxt) {
            return;
        }
        conn.snd_una = ack;

        let mut sample = None;
        while let Some(front) = conn.inflight.front() {
            let end = front.seq + front.data.len() as u32;
            if end > ack {
                break;
            }
            if !front.retransmitted && sample.is_none() {
                sample = Some(now.saturating_sub(front.sent_at));
            }
            conn.inflight.pop_front();
        }

        if let Some(r) = sample {
            update_rto(conn, r, min_rto, max_rto);
            self.stats.rtt_samples += 1;
            debug!(conn = id, rtt = %r, rto = %conn.rto, "RTT 采样");
        }

        if conn.inflight.is_empty() {
            self.cancel_timer(id);
        } else {
            self.arm_timer(id, sim);
        }
    }
}

/// RFC 6298 第 2 节
fn update_rto(conn: &mut DutConn, r: SimTime, min_rto: SimTime, max_rto: SimTime) {
    match conn.srtt {
        None => {
            conn.srtt = Some(r);
            conn.rttvar = SimTime(r.0 / 2);
        }
        Some(srtt) => {
            let delta = SimTime(srtt.0.abs_diff(r.0));
            conn.rttvar = SimTime((3 * conn.rttvar.0 + delta.0) / 4);
            conn.srtt = Some(SimTime((7 * srtt.0 + r.0) / 8));
        }
    }
    let srtt = conn.srtt.unwrap_or(r);
    let var = CLOCK_GRANULARITY.max(SimTime(conn.rttvar.0.saturating_mul(4)));
    conn.rto = srtt.saturating_add(var).max(min_rto).min(max_rto);
}

fn remote_of(seg: &ParsedSegment) -> Endpoint {
    Endpoint::new(seg.src_addr, seg.src_port)
}
