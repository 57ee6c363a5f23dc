//! 抓包流（Packet Stream Capture）
//!
//! 持续从线路读取原始帧，按测试关心的地址/端口过滤后按到达顺序交给
//! 期望引擎。包含：
//! - `PacketStream`：引擎使用的“带截止时间的阻塞读取”原语
//! - `FrameSource` / `FrameSink`：原始收/发（外部协作方）
//! - `Capture`：后台线程实现，带显式 `start` / `stop` 生命周期
//! - `FeedSource`：内存帧源，用于确定性的单元测试

mod clock;
mod feed;
mod frame;
mod live;
#[cfg(target_os = "linux")]
pub mod raw_socket;

pub use clock::{Clock, SystemClock};
pub use feed::{FeedSender, FeedSource};
pub use frame::{CapturedFrame, FlowScope};
pub use live::{Capture, CaptureStats};

use std::io;
use std::time::Duration;

use crate::error::Result;
use crate::sim::SimTime;

/// Poll-or-block access to captured frames.
pub trait PacketStream {
    /// Next frame in arrival order, waiting no later than `deadline`.
    /// `Ok(None)` means the deadline elapsed with nothing available.
    fn next_frame(&mut self, deadline: SimTime) -> Result<Option<CapturedFrame>>;

    /// Drop every frame that has already arrived.
    fn drain(&mut self) -> usize {
        0
    }
}

/// Raw receive primitive.
pub trait FrameSource: Send {
    /// `Ok(None)` when nothing arrived within `timeout`.
    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;
}

/// Raw send primitive.
pub trait FrameSink {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()>;
}
