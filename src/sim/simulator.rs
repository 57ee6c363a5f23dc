//! 仿真器
//!
//! 维护当前仿真时间与事件队列。除了批量运行之外，还支持逐个事件推进，
//! 以便阻塞式的期望匹配在“等待下一帧”时只推进到恰好需要的时刻。

use super::event::Event;
use super::time::SimTime;
use super::world::World;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::{debug, trace};

struct Scheduled {
    at: SimTime,
    seq: u64,
    kind: &'static str,
    ev: Box<dyn Event>,
}

// BinaryHeap 是 max-heap；最早时间优先，同一时刻按调度顺序。
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .cmp(&other.at)
            .then(self.seq.cmp(&other.seq))
            .reverse()
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

/// 事件驱动仿真器。
#[derive(Default)]
pub struct Simulator {
    now: SimTime,
    next_seq: u64,
    executed: u64,
    q: BinaryHeap<Scheduled>,
}

impl Simulator {
    /// 获取当前仿真时间
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// 已执行的事件数
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// 队列中尚未执行的事件数
    pub fn pending(&self) -> usize {
        self.q.len()
    }

    /// 最早待执行事件的时刻
    pub fn next_event_at(&self) -> Option<SimTime> {
        self.q.peek().map(|s| s.at)
    }

    /// 调度事件在指定时间执行；早于当前时间的事件按当前时间执行。
    pub fn schedule<E: Event>(&mut self, at: SimTime, ev: E) {
        let at = at.max(self.now);
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let kind = std::any::type_name::<E>();
        trace!(now = %self.now, at = %at, seq, kind, "调度事件");
        self.q.push(Scheduled {
            at,
            seq,
            kind,
            ev: Box::new(ev),
        });
    }

    /// 在 `now + delay` 调度事件
    pub fn schedule_after<E: Event>(&mut self, delay: SimTime, ev: E) {
        let at = self.now.saturating_add(delay);
        self.schedule(at, ev);
    }

    /// 执行最早的一个事件；队列为空时返回 false。
    pub fn step(&mut self, world: &mut dyn World) -> bool {
        let Some(item) = self.q.pop() else {
            return false;
        };
        self.now = item.at;
        self.executed += 1;
        debug!(
            now = %self.now,
            seq = item.seq,
            kind = item.kind,
            remaining = self.q.len(),
            "执行事件"
        );
        item.ev.execute(self, world);
        true
    }

    /// 运行直到事件队列为空或到达 `until`，之后时间停在 `until`。
    pub fn run_until(&mut self, until: SimTime, world: &mut dyn World) {
        while self.next_event_at().is_some_and(|at| at <= until) {
            self.step(world);
        }
        self.now = self.now.max(until);
    }
}
