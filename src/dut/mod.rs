//! Remote control of the device under test.
//!
//! The engine only needs the socket lifecycle calls below; how they reach the
//! DUT (an RPC channel, a local process) belongs to the implementor.

pub mod simulated;

use std::net::Ipv4Addr;

use crate::error::Result;

/// Socket handle on the DUT.
pub type Fd = i32;

/// Socket API constants, using Linux numbering as the DUT sees them.
pub mod consts {
    pub const AF_INET: i32 = 2;
    pub const SOCK_STREAM: i32 = 1;
    pub const IPPROTO_TCP: i32 = 6;
    pub const SOL_SOCKET: i32 = 1;
    pub const TCP_NODELAY: i32 = 1;
}

/// Socket operations issued against the DUT.
///
/// Any error is fatal to the running test.
pub trait DutControl {
    /// Address the DUT uses on the test network.
    fn addr(&self) -> Ipv4Addr;

    /// socket + bind(any port) + listen. Returns the handle and bound port.
    fn create_listener(
        &mut self,
        domain: i32,
        ty: i32,
        protocol: i32,
        backlog: i32,
    ) -> Result<(Fd, u16)>;

    /// Blocks until a connection is ready on `fd`.
    fn accept(&mut self, fd: Fd) -> Result<Fd>;

    fn send(&mut self, fd: Fd, data: &[u8], flags: i32) -> Result<usize>;

    fn set_sockopt_int(&mut self, fd: Fd, level: i32, name: i32, value: i32) -> Result<()>;

    fn close(&mut self, fd: Fd) -> Result<()>;
}
