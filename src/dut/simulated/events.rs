//! 仿真 DUT 的事件
//!
//! 与链路和定时器相关的事件；执行时把世界向下转型为 `DutWorld`。

use super::world::{ConnId, DutWorld};
use crate::capture::CapturedFrame;
use crate::sim::{Event, Simulator, World};

fn dut_world(world: &mut dyn World) -> Option<&mut DutWorld> {
    world.as_any_mut().downcast_mut::<DutWorld>()
}

/// 对端发出的帧经过链路时延后到达 DUT
#[derive(Debug)]
pub struct ArriveAtDut {
    pub bytes: Vec<u8>,
}

impl Event for ArriveAtDut {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let ArriveAtDut { bytes } = *self;
        if let Some(w) = dut_world(world) {
            w.on_frame(&bytes, sim);
        }
    }
}

/// DUT 发出的帧到达对端一侧的线路，进入抓包队列
#[derive(Debug)]
pub struct ArriveAtPeer {
    pub bytes: Vec<u8>,
}

impl Event for ArriveAtPeer {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let ArriveAtPeer { bytes } = *self;
        if let Some(w) = dut_world(world) {
            w.peer_inbox.push_back(CapturedFrame { at: sim.now(), bytes });
        }
    }
}

/// 重传定时器；`generation` 不是最新时视为已取消
#[derive(Debug)]
pub struct RetransmitTimer {
    pub conn: ConnId,
    pub generation: u64,
}

impl Event for RetransmitTimer {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let RetransmitTimer { conn, generation } = *self;
        if let Some(w) = dut_world(world) {
            w.on_retransmit_timer(conn, generation, sim);
        }
    }
}
