//! Platform B (spec.md §4.D): a plain `AF_PACKET` raw socket with userspace
//! 4-tuple filtering. Grounded in the teacher's `shred-ingest::receiver`
//! socket-setup idiom (raw `libc::socket`/`setsockopt`, non-blocking mode,
//! `select`-based readiness probing).

use std::mem;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;

use crate::counters::ReceiverCounters;
use crate::error::SocketError;

use super::account_frame;

const ETH_P_IP: u16 = 0x0800;

pub struct LinuxRawRxSocket {
    fd: RawFd,
    source_ip: Ipv4Addr,
    source_port: u16,
    buf: Vec<u8>,
}

impl LinuxRawRxSocket {
    pub fn open() -> Result<Self, SocketError> {
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, (ETH_P_IP.to_be() as i32)) };
        if fd < 0 {
            return Err(SocketError::Open(std::io::Error::last_os_error()));
        }
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
        let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(SocketError::Open(err));
        }

        Ok(Self {
            fd,
            source_ip: Ipv4Addr::UNSPECIFIED,
            source_port: 0,
            buf: vec![0u8; 65536],
        })
    }

    fn passes_filter(&self, frame: &[u8]) -> bool {
        if frame.len() < 14 + 20 + 8 {
            return false;
        }
        if frame[12] != 0x08 || frame[13] != 0x00 {
            return false;
        }
        let ip_start = 14;
        if (frame[ip_start] >> 4) != 4 {
            return false;
        }
        let src_ip = Ipv4Addr::new(
            frame[ip_start + 12],
            frame[ip_start + 13],
            frame[ip_start + 14],
            frame[ip_start + 15],
        );
        if src_ip != self.source_ip {
            return false;
        }
        let proto = frame[ip_start + 9];
        if proto != 17 {
            return false;
        }
        let ihl = (frame[ip_start] & 0x0f) as usize * 4;
        let udp_start = ip_start + ihl;
        if frame.len() < udp_start + 4 {
            return false;
        }
        let src_port = u16::from_be_bytes([frame[udp_start], frame[udp_start + 1]]);
        src_port == self.source_port
    }
}

impl super::RawRxSocket for LinuxRawRxSocket {
    fn bind_interface(&mut self, _name: &str) -> Result<(), SocketError> {
        Ok(()) // platform-A only
    }

    fn set_source(&mut self, ip: Ipv4Addr, port: u16) -> Result<(), SocketError> {
        self.source_ip = ip;
        self.source_port = port;
        Ok(())
    }

    fn is_readable(&self) -> bool {
        unsafe {
            let mut set: libc::fd_set = mem::zeroed();
            libc::FD_ZERO(&mut set);
            libc::FD_SET(self.fd, &mut set);
            let mut timeout = libc::timeval { tv_sec: 0, tv_usec: 100 };
            let ret = libc::select(
                self.fd + 1,
                &mut set,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut timeout,
            );
            ret > 0 && libc::FD_ISSET(self.fd, &set)
        }
    }

    fn recv(&mut self, counters: &ReceiverCounters) {
        loop {
            let n = unsafe {
                libc::recvfrom(
                    self.fd,
                    self.buf.as_mut_ptr() as *mut libc::c_void,
                    self.buf.len(),
                    0,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };
            if n <= 0 {
                break;
            }
            let frame = &self.buf[..n as usize];
            if self.passes_filter(frame) {
                account_frame(frame, counters);
            }
        }
    }
}

impl Drop for LinuxRawRxSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
