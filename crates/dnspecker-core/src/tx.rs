//! Raw-IP transmit path: one socket, one fixed destination, one packet at a
//! time. Mirrors the teacher's preference for going straight to `libc` for
//! socket options the `socket2` wrapper doesn't expose.

use std::mem;
use std::net::Ipv4Addr;
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::SocketError;
use crate::forge::PacketForge;

/// Outcome of one `send()` call, already shaped the way the worker wants it
/// for counter bookkeeping.
pub enum SendOutcome {
    Sent(usize),
    ZeroBytes,
    Error(i32),
}

pub struct RawTxSocket {
    socket: Socket,
    dest: Option<libc::sockaddr_in>,
}

impl RawTxSocket {
    /// Opens a raw IPv4 socket on which the caller supplies the IP header.
    pub fn open() -> Result<Self, SocketError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(libc::IPPROTO_RAW)))
            .map_err(SocketError::Open)?;

        let fd = socket.as_raw_fd();
        let one: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_HDRINCL,
                &one as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(SocketError::Open(std::io::Error::last_os_error()));
        }

        Ok(Self { socket, dest: None })
    }

    pub fn set_destination(&mut self, ip: Ipv4Addr, port: u16) {
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be(); // sin_port is stored in network order
        addr.sin_addr.s_addr = u32::from_ne_bytes(ip.octets());
        self.dest = Some(addr);
    }

    /// Sends the forge's current buffer to the configured destination.
    pub fn send(&self, forge: &mut PacketForge) -> Result<SendOutcome, SocketError> {
        let dest = self.dest.ok_or(SocketError::UnknownDestination)?;
        let bytes = forge.bytes();

        let ret = unsafe {
            libc::sendto(
                self.socket.as_raw_fd(),
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
                0,
                &dest as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };

        Ok(if ret > 0 {
            SendOutcome::Sent(ret as usize)
        } else if ret == 0 {
            SendOutcome::ZeroBytes
        } else {
            SendOutcome::Error(std::io::Error::last_os_error().raw_os_error().unwrap_or(-1))
        })
    }

    /// Short (~100 µs) write-readiness probe, so the worker does not spin
    /// tightly on a congested socket. Never blocks indefinitely.
    pub fn is_writable(&self) -> bool {
        is_fd_ready(self.socket.as_raw_fd(), Direction::Write)
    }
}

enum Direction {
    Write,
}

fn is_fd_ready(fd: RawFd, direction: Direction) -> bool {
    unsafe {
        let mut set: libc::fd_set = mem::zeroed();
        libc::FD_ZERO(&mut set);
        libc::FD_SET(fd, &mut set);
        let mut timeout = libc::timeval {
            tv_sec: 0,
            tv_usec: 100,
        };
        let ret = match direction {
            Direction::Write => libc::select(
                fd + 1,
                std::ptr::null_mut(),
                &mut set,
                std::ptr::null_mut(),
                &mut timeout,
            ),
        };
        ret > 0 && libc::FD_ISSET(fd, &set)
    }
}
