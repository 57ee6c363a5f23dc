//! 离散事件仿真核心
//!
//! 提供单调时间 `SimTime`，以及驱动仿真 DUT 的事件队列。
//! 仿真时钟在阻塞等待时推进，而不是真正睡眠。

mod event;
mod simulator;
mod time;
mod world;

pub use event::Event;
pub use simulator::Simulator;
pub use time::SimTime;
pub use world::World;
