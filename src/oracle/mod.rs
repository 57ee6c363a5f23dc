//! 重传时序判定
//!
//! 让 DUT 发送一段数据后不再确认，观察同一段的多次重传：
//! 第一次重传用来测得初始 RTO，此后每次间隔应当翻倍，过早到达即判失败。

mod retransmits;
mod timing;

pub use retransmits::{MIN_RETRANSMITS, Probe, RetransmitOutcome, RetransmitTest, SAMPLE_DATA};
pub use timing::{TimingWindow, Tolerance};
