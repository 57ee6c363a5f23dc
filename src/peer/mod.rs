//! 合成对端（synthetic peer）
//!
//! 记录测试一侧对连接的视角：双方序列号、端口、窗口与连接阶段，
//! 并据此为待发送的段填充默认字段。

mod state;

pub use state::{DEFAULT_WINDOW, Endpoint, PeerState, Phase};
