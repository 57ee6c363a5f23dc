//! 期望引擎
//!
//! 在抓包流上“按部分字段匹配 + 截止时间”阻塞等待，并驱动对端状态：
//! - `expect`：扫描直到匹配或超时；解码失败和不匹配的帧被静默丢弃
//! - `send`：以对端状态补全字段后发出，并推进本端序号
//! - `handshake` / `close`：主动建连与 RST 拆除

mod conn;
pub mod matcher;

pub use conn::Connection;
