//! 单调时钟
//!
//! 期望引擎只通过 `Clock` 读取时间；测试可注入仿真时钟而无需真实等待。

use std::time::Instant;

use crate::sim::SimTime;

/// 单调时钟：返回自时钟起点以来的时间。
pub trait Clock {
    fn now(&self) -> SimTime;
}

/// 基于 `Instant` 的墙上时钟。
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> SimTime {
        SimTime::from_duration(self.origin.elapsed())
    }
}
