//! Platform A (spec.md §4.D): `/dev/bpf`-based capture with a kernel-side
//! 4-tuple filter and an optional zero-copy shared-memory buffer. The
//! zero-copy path (dual alternating buffers, kernel/user generation
//! counters) is reproduced faithfully per spec.md §9's design notes; it is
//! a fallback chain, not an all-or-nothing feature.

use std::ffi::CString;
use std::mem;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;

use tracing::warn;

use crate::counters::ReceiverCounters;
use crate::error::SocketError;

use super::account_frame;

const ZCOPY_BUF_SIZE_LARGE: usize = 8192;
const ZCOPY_BUF_SIZE_SMALL: usize = 4096;
const BUFFERED_BUF_SIZE: usize = 8192;

enum BufferMode {
    ZeroCopy(ZeroCopyBuffers),
    Buffered { buf: Vec<u8> },
}

struct ZeroCopyBuffers {
    buf_a: Vec<u8>,
    buf_b: Vec<u8>,
    size: usize,
    active_is_a: bool,
}

impl ZeroCopyBuffers {
    fn header(&self, is_a: bool) -> *mut libc::bpf_zbuf_header {
        let buf = if is_a { &self.buf_a } else { &self.buf_b };
        buf.as_ptr() as *mut libc::bpf_zbuf_header
    }
}

pub struct BsdRawRxSocket {
    fd: RawFd,
    source_ip: Ipv4Addr,
    source_port: u16,
    mode: BufferMode,
}

fn open_bpf() -> Result<RawFd, SocketError> {
    for i in 0..255 {
        let path = CString::new(format!("/dev/bpf{i}")).unwrap();
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
        if fd >= 0 {
            return Ok(fd);
        }
    }
    Err(SocketError::Open(std::io::Error::last_os_error()))
}

/// Sets the BPF fd into zero-copy buffer mode and the timestamp type. Must
/// run once before the first [`try_alloc_zero_copy_buffer`] attempt, per
/// `examples/original_source/src/rawsocketreceiver.cpp:84-93`
/// (`initZeroCopyBuffer`'s `BIOCSETBUFMODE`/`BIOCSTSTAMP` pair).
fn init_zero_copy_mode(fd: RawFd) -> std::io::Result<()> {
    let bufmode: libc::c_uint = libc::BPF_BUFMODE_ZBUF as libc::c_uint;
    if unsafe { libc::ioctl(fd, libc::BIOCSETBUFMODE, &bufmode) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let tstype: libc::c_uint = libc::BPF_T_MICROTIME as libc::c_uint;
    if unsafe { libc::ioctl(fd, libc::BIOCSTSTAMP, &tstype) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Allocates the two userspace buffers the kernel will write into and only
/// then issues `BIOCSETZBUF`; `BIOCSETZBUF` is an input ioctl, so the
/// buffer addresses must exist before the call
/// (`rawsocketreceiver.cpp:61-82`, `tryAllocZeroCopyBuffer`).
fn try_alloc_zero_copy_buffer(fd: RawFd, size: usize) -> Option<ZeroCopyBuffers> {
    let mut buf_a = vec![0u8; size];
    let mut buf_b = vec![0u8; size];

    let mut zbuf: libc::bpf_zbuf = unsafe { mem::zeroed() };
    zbuf.bz_buflen = size;
    zbuf.bz_bufa = buf_a.as_mut_ptr() as _;
    zbuf.bz_bufb = buf_b.as_mut_ptr() as _;

    let ret = unsafe { libc::ioctl(fd, libc::BIOCSETZBUF, &mut zbuf) };
    if ret != 0 {
        return None;
    }
    Some(ZeroCopyBuffers {
        buf_a,
        buf_b,
        size,
        active_is_a: true,
    })
}

fn init_buffered_mode(fd: RawFd) -> std::io::Result<Vec<u8>> {
    let mode: libc::c_uint = libc::BPF_BUFMODE_BUFFER as libc::c_uint;
    let ret = unsafe { libc::ioctl(fd, libc::BIOCSETBUFMODE, &mode) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let mut buflen: libc::c_uint = BUFFERED_BUF_SIZE as libc::c_uint;
    unsafe { libc::ioctl(fd, libc::BIOCSBLEN, &mut buflen) };
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    Ok(vec![0u8; buflen as usize])
}

fn bpf_stmt(code: u16, k: u32) -> libc::bpf_insn {
    libc::bpf_insn { code, jt: 0, jf: 0, k }
}

fn bpf_jump(code: u16, k: u32, jt: u8, jf: u8) -> libc::bpf_insn {
    libc::bpf_insn { code, jt, jf, k }
}

/// The exact 10-instruction program from spec.md §4.D / §9: accept iff
/// Ethernet type == IPv4, IP source == `sip`, protocol == UDP, UDP source
/// port == `port`.
fn build_filter_program(sip: u32, port: u16) -> Vec<libc::bpf_insn> {
    vec![
        bpf_stmt(libc::BPF_LD | libc::BPF_H | libc::BPF_ABS, 12),
        bpf_jump(libc::BPF_JMP | libc::BPF_JEQ | libc::BPF_K, 0x0800, 0, 7),
        bpf_stmt(libc::BPF_LD | libc::BPF_W | libc::BPF_ABS, 26),
        bpf_jump(libc::BPF_JMP | libc::BPF_JEQ | libc::BPF_K, sip, 0, 5),
        bpf_stmt(libc::BPF_LD | libc::BPF_B | libc::BPF_ABS, 23),
        bpf_jump(libc::BPF_JMP | libc::BPF_JEQ | libc::BPF_K, 17, 0, 3),
        bpf_stmt(libc::BPF_LD | libc::BPF_H | libc::BPF_ABS, 34),
        bpf_jump(libc::BPF_JMP | libc::BPF_JEQ | libc::BPF_K, port as u32, 0, 1),
        bpf_stmt(libc::BPF_RET | libc::BPF_K, u32::MAX),
        bpf_stmt(libc::BPF_RET | libc::BPF_K, 0),
    ]
}

fn word_align(x: usize) -> usize {
    let word = mem::size_of::<libc::c_long>();
    (x + word - 1) & !(word - 1)
}

impl BsdRawRxSocket {
    pub fn open() -> Result<Self, SocketError> {
        let fd = open_bpf()?;
        Ok(Self {
            fd,
            source_ip: Ipv4Addr::UNSPECIFIED,
            source_port: 0,
            mode: BufferMode::Buffered {
                buf: vec![0u8; BUFFERED_BUF_SIZE],
            },
        })
    }

    fn read_zbuffer(&self, z: &ZeroCopyBuffers, counters: &ReceiverCounters) {
        let hdr_ptr = z.header(z.active_is_a);
        let hdr = unsafe { &*hdr_ptr };
        if hdr.bzh_kernel_gen == hdr.bzh_user_gen {
            return; // nothing new from the kernel
        }
        let base = hdr_ptr as *const u8;
        let data_start = unsafe { base.add(mem::size_of::<libc::bpf_zbuf_header>()) };
        let mut offset = 0usize;
        while offset < z.size {
            let record = unsafe { data_start.add(offset) as *const libc::bpf_hdr };
            let record = unsafe { &*record };
            if record.bh_caplen == 0 {
                break;
            }
            let frame_start = unsafe { (record as *const _ as *const u8).add(record.bh_hdrlen as usize) };
            let frame = unsafe { std::slice::from_raw_parts(frame_start, record.bh_caplen as usize) };
            account_frame(frame, counters);
            offset += word_align((record.bh_hdrlen + record.bh_caplen) as usize);
        }
        // release ownership back to the kernel by syncing generation counters
        unsafe {
            (*hdr_ptr).bzh_user_gen = (*hdr_ptr).bzh_kernel_gen;
        }
    }
}

impl super::RawRxSocket for BsdRawRxSocket {
    fn bind_interface(&mut self, name: &str) -> Result<(), SocketError> {
        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
        let name_bytes = name.as_bytes();
        let len = name_bytes.len().min(ifr.ifr_name.len() - 1);
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name_bytes[..len].iter()) {
            *dst = *src as libc::c_char;
        }
        let ret = unsafe { libc::ioctl(self.fd, libc::BIOCSETIF, &ifr) };
        if ret != 0 {
            return Err(SocketError::Interface(std::io::Error::last_os_error()));
        }
        let promisc: libc::c_uint = 1;
        unsafe { libc::ioctl(self.fd, libc::BIOCPROMISC, &promisc) };
        Ok(())
    }

    fn set_source(&mut self, ip: Ipv4Addr, port: u16) -> Result<(), SocketError> {
        self.source_ip = ip;
        self.source_port = port;

        let zero_copy = init_zero_copy_mode(self.fd).ok().and_then(|()| {
            try_alloc_zero_copy_buffer(self.fd, ZCOPY_BUF_SIZE_LARGE)
                .or_else(|| try_alloc_zero_copy_buffer(self.fd, ZCOPY_BUF_SIZE_SMALL))
        });

        if let Some(z) = zero_copy {
            self.mode = BufferMode::ZeroCopy(z);
        } else {
            warn!("zero-copy BPF buffer unavailable, falling back to buffered mode");
            match init_buffered_mode(self.fd) {
                Ok(buf) => self.mode = BufferMode::Buffered { buf },
                Err(e) => return Err(SocketError::Open(e)),
            }
        }

        let ip_host_order = u32::from_be_bytes(ip.octets());
        let mut program = build_filter_program(ip_host_order, port);
        let bpf_program = libc::bpf_program {
            bf_len: program.len() as libc::c_uint,
            bf_insns: program.as_mut_ptr(),
        };
        let ret = unsafe { libc::ioctl(self.fd, libc::BIOCSETF, &bpf_program) };
        if ret != 0 {
            return Err(SocketError::FilterInstall(
                std::io::Error::last_os_error().to_string(),
            ));
        }
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
        match &mut self.mode {
            BufferMode::ZeroCopy(z) => {
                self.read_zbuffer(z, counters);
                z.active_is_a = !z.active_is_a;
            }
            BufferMode::Buffered { buf } => loop {
                let n = unsafe {
                    libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
                };
                if n <= 0 {
                    break;
                }
                let mut offset = 0usize;
                while offset < n as usize {
                    let record = unsafe { buf.as_ptr().add(offset) as *const libc::bpf_hdr };
                    let record = unsafe { &*record };
                    if record.bh_caplen == 0 {
                        break;
                    }
                    let frame_start = offset + record.bh_hdrlen as usize;
                    let frame = &buf[frame_start..frame_start + record.bh_caplen as usize];
                    account_frame(frame, counters);
                    offset += word_align((record.bh_hdrlen + record.bh_caplen) as usize);
                }
            },
        }
    }
}

impl Drop for BsdRawRxSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `header()` must point into memory this struct actually owns, not a
    /// pointer handed back from a kernel that was never given a buffer to
    /// write into.
    #[test]
    fn zero_copy_header_points_into_owned_buffer() {
        let z = ZeroCopyBuffers {
            buf_a: vec![0u8; ZCOPY_BUF_SIZE_SMALL],
            buf_b: vec![0u8; ZCOPY_BUF_SIZE_SMALL],
            size: ZCOPY_BUF_SIZE_SMALL,
            active_is_a: true,
        };
        let hdr = z.header(true);
        assert_eq!(hdr as *const u8, z.buf_a.as_ptr());
        let hdr = unsafe { &*hdr };
        assert_eq!(hdr.bzh_kernel_gen, 0);
        assert_eq!(hdr.bzh_user_gen, 0);
    }

    /// An invalid fd must fail the ioctl and return `None`, never a
    /// `ZeroCopyBuffers` wrapping buffers the kernel didn't accept.
    #[test]
    fn try_alloc_zero_copy_buffer_rejects_invalid_fd() {
        assert!(try_alloc_zero_copy_buffer(-1, ZCOPY_BUF_SIZE_SMALL).is_none());
    }
}
