//! Raw IPv4 socket carrying complete TCP frames (Linux, needs CAP_NET_RAW).
//!
//! The kernel hands every inbound TCP datagram to the socket, IP header
//! included; `IP_HDRINCL` lets us send frames built by the codec verbatim.

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use super::{FrameSink, FrameSource};
use crate::error::{Error, Result};
use crate::wire::ipv4;

const MAX_FRAME: usize = 65_535;

#[derive(Debug)]
pub struct RawIpSocket {
    fd: OwnedFd,
    buf: Vec<u8>,
}

fn check(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn sockaddr_in(addr: Ipv4Addr) -> libc::sockaddr_in {
    // SAFETY: sockaddr_in is plain old data; all-zero is a valid value.
    let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_addr = libc::in_addr {
        s_addr: u32::from(addr).to_be(),
    };
    sa
}

impl RawIpSocket {
    /// Open a raw TCP socket, optionally bound to the peer's local address.
    pub fn open(bind: Option<Ipv4Addr>) -> io::Result<Self> {
        // SAFETY: plain syscall; the returned descriptor is owned below.
        let fd = check(unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_TCP) })?;
        // SAFETY: `fd` is a freshly opened descriptor nobody else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        let sock = Self {
            fd,
            buf: vec![0; MAX_FRAME],
        };
        sock.set_int_opt(libc::IPPROTO_IP, libc::IP_HDRINCL, 1)?;
        if let Some(addr) = bind {
            let sa = sockaddr_in(addr);
            // SAFETY: `sa` outlives the call and the length matches its type.
            check(unsafe {
                libc::bind(
                    sock.fd.as_raw_fd(),
                    &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            })?;
        }
        Ok(sock)
    }

    /// Second handle on the same socket, so one side can receive on the
    /// capture thread while the other sends.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            fd: self.fd.try_clone()?,
            buf: vec![0; MAX_FRAME],
        })
    }

    fn set_int_opt(
        &self,
        level: libc::c_int,
        name: libc::c_int,
        value: libc::c_int,
    ) -> io::Result<()> {
        // SAFETY: `value` outlives the call and the length matches its type.
        check(unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                level,
                name,
                &value as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    fn set_recv_timeout(&self, timeout: Duration) -> io::Result<()> {
        // A zero timeval means "block forever" to the kernel.
        let timeout = timeout.max(Duration::from_micros(1));
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        // SAFETY: `tv` outlives the call and the length matches its type.
        check(unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }
}

impl FrameSource for RawIpSocket {
    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        self.set_recv_timeout(timeout)?;
        // SAFETY: the buffer is valid for `len` bytes for the whole call.
        let len = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                self.buf.as_mut_ptr() as *mut libc::c_void,
                self.buf.len(),
                0,
            )
        };
        if len < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Ok(None),
                _ => Err(err),
            };
        }
        Ok(Some(self.buf[..len as usize].to_vec()))
    }
}

impl FrameSink for RawIpSocket {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() < ipv4::HEADER_LEN {
            return Err(Error::MalformedFrame("truncated ipv4 header"));
        }
        let mut dst = [0u8; 4];
        dst.copy_from_slice(&frame[ipv4::field::DST_ADDR]);
        let sa = sockaddr_in(Ipv4Addr::from(dst));
        // SAFETY: `frame` and `sa` outlive the call; lengths match.
        let sent = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}
