//! 仿真 DUT
//!
//! 在离散事件仿真器上运行一个极简 TCP 实现，并对外暴露三个句柄：
//! - `SimDut`：实现 `DutControl`
//! - `SimWire`：实现 `PacketStream` 与 `FrameSink`（对端一侧的线路）
//! - `SimClock`：实现 `Clock`，读取仿真时间
//!
//! 阻塞等待（`next_frame`、`accept`）推进仿真时间而不是真正睡眠，因此
//! 整个一致性测试可以确定性地在毫秒内跑完。

mod events;
mod world;

pub use world::{DutStats, DutWorld};

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

use tracing::{debug, info};

use events::ArriveAtDut;

use super::{DutControl, Fd, consts};
use crate::capture::{CapturedFrame, Clock, FrameSink, PacketStream};
use crate::error::{Error, Result};
use crate::sim::{SimTime, Simulator};

/// `accept` 最多推进的仿真时间
const ACCEPT_WAIT: SimTime = SimTime(60_000_000_000);

/// 仿真 DUT 参数
#[derive(Debug, Clone)]
pub struct SimDutConfig {
    /// DUT 在测试网络中的地址
    pub addr: Ipv4Addr,
    /// 单向链路时延
    pub latency: SimTime,
    /// 尚无 RTT 采样时的 RTO
    pub initial_rto: SimTime,
    pub min_rto: SimTime,
    pub max_rto: SimTime,
    /// 每次超时 RTO 的乘数；合规实现为 2
    pub backoff: f64,
    /// 定时器触发的固定额外延迟（模拟调度抖动）
    pub timer_slack: SimTime,
    /// 丢弃所有入站帧
    pub blackhole: bool,
    /// 监听端口从这里开始分配
    pub first_port: u16,
    pub isn: u32,
}

impl Default for SimDutConfig {
    fn default() -> Self {
        Self {
            addr: Ipv4Addr::new(10, 0, 0, 2),
            latency: SimTime::from_millis(1),
            initial_rto: SimTime::from_secs(1),
            min_rto: SimTime::from_millis(200),
            max_rto: SimTime::from_secs(120),
            backoff: 2.0,
            timer_slack: SimTime::ZERO,
            blackhole: false,
            first_port: 40_000,
            isn: 1_000_000,
        }
    }
}

struct Bed {
    sim: Simulator,
    world: DutWorld,
}

/// 仿真器 + 仿真 DUT；各句柄共享同一份状态。
#[derive(Clone)]
pub struct SimTestbed {
    bed: Rc<RefCell<Bed>>,
}

impl SimTestbed {
    pub fn new(cfg: SimDutConfig) -> Self {
        info!(?cfg, "创建仿真 DUT");
        Self {
            bed: Rc::new(RefCell::new(Bed {
                sim: Simulator::default(),
                world: DutWorld::new(cfg),
            })),
        }
    }

    pub fn dut(&self) -> SimDut {
        SimDut {
            bed: Rc::clone(&self.bed),
        }
    }

    pub fn wire(&self) -> SimWire {
        SimWire {
            bed: Rc::clone(&self.bed),
        }
    }

    pub fn clock(&self) -> SimClock {
        SimClock {
            bed: Rc::clone(&self.bed),
        }
    }

    pub fn now(&self) -> SimTime {
        self.bed.borrow().sim.now()
    }

    pub fn dut_addr(&self) -> Ipv4Addr {
        self.bed.borrow().world.cfg.addr
    }

    pub fn stats(&self) -> DutStats {
        self.bed.borrow().world.stats.clone()
    }

    /// 读取 DUT 上记录的整型 socket 选项
    pub fn sockopt(&self, fd: Fd, level: i32, name: i32) -> Option<i32> {
        self.bed.borrow().world.sockopts.get(&(fd, level, name)).copied()
    }

    /// 推进仿真时间 `d`，执行期间到期的所有事件
    pub fn run_for(&self, d: SimTime) {
        let mut bed = self.bed.borrow_mut();
        let Bed { sim, world } = &mut *bed;
        let until = sim.now().saturating_add(d);
        sim.run_until(until, world);
    }
}

/// 仿真时钟
#[derive(Clone)]
pub struct SimClock {
    bed: Rc<RefCell<Bed>>,
}

impl Clock for SimClock {
    fn now(&self) -> SimTime {
        self.bed.borrow().sim.now()
    }
}

/// 对端一侧的仿真线路
#[derive(Clone)]
pub struct SimWire {
    bed: Rc<RefCell<Bed>>,
}

impl PacketStream for SimWire {
    fn next_frame(&mut self, deadline: SimTime) -> Result<Option<CapturedFrame>> {
        let mut bed = self.bed.borrow_mut();
        let Bed { sim, world } = &mut *bed;
        loop {
            if let Some(frame) = world.peer_inbox.pop_front() {
                return Ok(Some(frame));
            }
            match sim.next_event_at() {
                Some(at) if at <= deadline => {
                    sim.step(world);
                }
                _ => {
                    sim.run_until(deadline, world);
                    return Ok(None);
                }
            }
        }
    }

    fn drain(&mut self) -> usize {
        let mut bed = self.bed.borrow_mut();
        let n = bed.world.peer_inbox.len();
        bed.world.peer_inbox.clear();
        n
    }
}

impl FrameSink for SimWire {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let mut bed = self.bed.borrow_mut();
        let latency = bed.world.cfg.latency;
        bed.sim.schedule_after(
            latency,
            ArriveAtDut {
                bytes: frame.to_vec(),
            },
        );
        Ok(())
    }
}

/// 仿真 DUT 的远程控制句柄
#[derive(Clone)]
pub struct SimDut {
    bed: Rc<RefCell<Bed>>,
}

impl DutControl for SimDut {
    fn addr(&self) -> Ipv4Addr {
        self.bed.borrow().world.cfg.addr
    }

    fn create_listener(
        &mut self,
        domain: i32,
        ty: i32,
        protocol: i32,
        backlog: i32,
    ) -> Result<(Fd, u16)> {
        if domain != consts::AF_INET {
            return Err(Error::remote("create_listener", "EAFNOSUPPORT"));
        }
        if ty != consts::SOCK_STREAM || protocol != consts::IPPROTO_TCP {
            return Err(Error::remote("create_listener", "EPROTONOSUPPORT"));
        }
        let backlog =
            usize::try_from(backlog).map_err(|_| Error::remote("create_listener", "EINVAL"))?;
        Ok(self.bed.borrow_mut().world.listen(backlog))
    }

    fn accept(&mut self, fd: Fd) -> Result<Fd> {
        let mut bed = self.bed.borrow_mut();
        let Bed { sim, world } = &mut *bed;
        let give_up = sim.now().saturating_add(ACCEPT_WAIT);
        loop {
            match world.try_accept(fd) {
                None => return Err(Error::remote("accept", "EINVAL: not a listening socket")),
                Some(Some(new_fd)) => return Ok(new_fd),
                Some(None) => {}
            }
            match sim.next_event_at() {
                Some(at) if at <= give_up => {
                    sim.step(world);
                }
                _ => return Err(Error::remote("accept", "no connection arrived")),
            }
        }
    }

    fn send(&mut self, fd: Fd, data: &[u8], _flags: i32) -> Result<usize> {
        let mut bed = self.bed.borrow_mut();
        let Bed { sim, world } = &mut *bed;
        debug!(fd, len = data.len(), now = %sim.now(), "DUT send");
        world
            .send(fd, data, sim)
            .ok_or_else(|| Error::remote("send", "EBADF: not a connected socket"))
    }

    fn set_sockopt_int(&mut self, fd: Fd, level: i32, name: i32, value: i32) -> Result<()> {
        let mut bed = self.bed.borrow_mut();
        if !bed.world.has_socket(fd) {
            return Err(Error::remote("set_sockopt", "EBADF"));
        }
        bed.world.sockopts.insert((fd, level, name), value);
        Ok(())
    }

    fn close(&mut self, fd: Fd) -> Result<()> {
        let mut bed = self.bed.borrow_mut();
        let Bed { sim, world } = &mut *bed;
        if world.close(fd, sim) {
            Ok(())
        } else {
            Err(Error::remote("close", "EBADF"))
        }
    }
}
