//! Layer-2 promiscuous receive path. Two OS-specific implementations share
//! one trait and one packet-accounting procedure.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(any(target_os = "freebsd", target_os = "macos", target_os = "netbsd", target_os = "openbsd"))]
mod bsd;

#[cfg(target_os = "linux")]
pub use linux::LinuxRawRxSocket as PlatformRawRxSocket;
#[cfg(any(target_os = "freebsd", target_os = "macos", target_os = "netbsd", target_os = "openbsd"))]
pub use bsd::BsdRawRxSocket as PlatformRawRxSocket;

use std::net::Ipv4Addr;

use crate::counters::ReceiverCounters;
use crate::error::SocketError;
use crate::timestamp;

/// A layer-2 capture handle filtered to one source 4-tuple.
pub trait RawRxSocket: Send {
    /// Binds a named interface. Platform-A (BSD/BPF) only; a no-op
    /// elsewhere.
    fn bind_interface(&mut self, name: &str) -> Result<(), SocketError>;

    /// Records the 4-tuple filter values and, on platform A, installs the
    /// BPF program.
    fn set_source(&mut self, ip: Ipv4Addr, port: u16) -> Result<(), SocketError>;

    /// Non-blocking readiness probe with a short timeout.
    fn is_readable(&self) -> bool;

    /// Reads available traffic, invoking the accounting procedure for each
    /// accepted frame. Returns once the underlying buffer is drained.
    fn recv(&mut self, counters: &ReceiverCounters);
}

/// Shared DNS accounting logic invoked by both platform variants for every
/// Ethernet frame that passed the 4-tuple filter.
///
/// `frame` starts at the Ethernet header; IHL is assumed to be 5 since the
/// sender never emits IP options. Frames too short to hold a full
/// Ethernet+IP+UDP+DNS header are dropped.
pub(crate) fn account_frame(frame: &[u8], counters: &ReceiverCounters) {
    const ETH_LEN: usize = 14;
    const IP_LEN: usize = 20;
    const UDP_LEN: usize = 8;
    const DNS_HDR_LEN: usize = 12;

    if frame.len() < ETH_LEN + IP_LEN + UDP_LEN + DNS_HDR_LEN {
        return;
    }
    let ip_start = ETH_LEN;
    if (frame[ip_start] & 0x0f) != 5 {
        return; // IHL other than 5: sender never emits this, drop defensively
    }
    let dns_start = ip_start + IP_LEN + UDP_LEN;

    let dns_id = u16::from_be_bytes([frame[dns_start], frame[dns_start + 1]]);
    let flags_hi = frame[dns_start + 2];
    let flags_lo = frame[dns_start + 3];
    let truncated = flags_hi & 0x02 != 0;
    let rcode = flags_lo & 0x0f;

    let rtt = timestamp::decode(dns_id);
    let rtt = if (0.0..=timestamp::MAX_PLAUSIBLE_RTT_SECS).contains(&rtt) {
        Some(rtt)
    } else {
        None
    };

    counters.record_frame(frame.len(), rcode, truncated, rtt);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn build_frame(dns_id: u16, rcode: u8, tc: bool) -> Vec<u8> {
        let mut frame = vec![0u8; 14 + 20 + 8 + 12];
        frame[12] = 0x08;
        frame[13] = 0x00;
        frame[14] = (4 << 4) | 5; // version/IHL
        let dns_start = 14 + 20 + 8;
        frame[dns_start] = (dns_id >> 8) as u8;
        frame[dns_start + 1] = (dns_id & 0xff) as u8;
        frame[dns_start + 2] = if tc { 0x02 } else { 0x00 };
        frame[dns_start + 3] = rcode & 0x0f;
        frame
    }

    #[test]
    fn accepts_well_formed_frame_and_drops_truncated_flag() {
        let counters = ReceiverCounters::new();
        let id = timestamp::encode();
        let frame = build_frame(id, 3, true);
        account_frame(&frame, &counters);
        assert_eq!(counters.packets_received.load(Ordering::Relaxed), 1);
        assert_eq!(counters.rcode_histogram[3].load(Ordering::Relaxed), 1);
        assert_eq!(counters.truncated_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn drops_frame_with_non_default_ihl() {
        let counters = ReceiverCounters::new();
        let mut frame = build_frame(0, 0, false);
        frame[14] = (4 << 4) | 6; // IHL=6
        account_frame(&frame, &counters);
        assert_eq!(counters.packets_received.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn drops_too_short_frame() {
        let counters = ReceiverCounters::new();
        account_frame(&[0u8; 10], &counters);
        assert_eq!(counters.packets_received.load(Ordering::Relaxed), 0);
    }
}
