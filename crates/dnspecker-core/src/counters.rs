//! Shared counter sets. Each set is written by exactly one thread (a
//! worker, or the receiver) and read by the Controller for progress
//! snapshots and final aggregation; readers tolerate slightly stale values,
//! so plain atomics with `Relaxed` ordering are sufficient throughout.

use std::sync::atomic::{AtomicU64, Ordering};

/// A `f64` stored behind an `AtomicU64` bit pattern. Safe here because each
/// field has exactly one writer thread; readers never race a write against
/// another write.
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Per-worker send-side counters (spec.md §3, "Worker counter set").
pub struct WorkerCounters {
    pub packets_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub zero_byte_sends: AtomicU64,
    pub send_errors: AtomicU64,
    pub errno_histogram: Box<[AtomicU64]>,
}

impl WorkerCounters {
    pub fn new() -> Self {
        Self {
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            zero_byte_sends: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            errno_histogram: (0..255).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_zero_byte(&self) {
        self.zero_byte_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, errno: i32) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
        if (0..255).contains(&errno) {
            self.errno_histogram[errno as usize].fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for WorkerCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run receive-side counters (spec.md §3, "Receiver counter set").
pub struct ReceiverCounters {
    pub packets_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub rcode_histogram: [AtomicU64; 16],
    pub truncated_count: AtomicU64,
    rtt_sum: AtomicF64,
    rtt_min: AtomicF64,
    rtt_max: AtomicF64,
    rtt_samples: AtomicU64,
}

impl ReceiverCounters {
    pub fn new() -> Self {
        Self {
            packets_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            rcode_histogram: std::array::from_fn(|_| AtomicU64::new(0)),
            truncated_count: AtomicU64::new(0),
            rtt_sum: AtomicF64::new(0.0),
            rtt_min: AtomicF64::new(f64::INFINITY),
            rtt_max: AtomicF64::new(0.0),
            rtt_samples: AtomicU64::new(0),
        }
    }

    /// Records one accepted frame. `rtt` is `None` when the recovered RTT
    /// was implausible and should be excluded from min/max/sum.
    pub fn record_frame(&self, frame_len: usize, rcode: u8, truncated: bool, rtt: Option<f64>) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(frame_len as u64, Ordering::Relaxed);
        self.rcode_histogram[(rcode & 0x0f) as usize].fetch_add(1, Ordering::Relaxed);
        if truncated {
            self.truncated_count.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(rtt) = rtt {
            self.rtt_sum.store(self.rtt_sum.load() + rtt);
            if rtt < self.rtt_min.load() {
                self.rtt_min.store(rtt);
            }
            if rtt > self.rtt_max.load() {
                self.rtt_max.store(rtt);
            }
            self.rtt_samples.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn rtt_sum(&self) -> f64 {
        self.rtt_sum.load()
    }

    pub fn rtt_min(&self) -> f64 {
        let v = self.rtt_min.load();
        if v.is_finite() {
            v
        } else {
            0.0
        }
    }

    pub fn rtt_max(&self) -> f64 {
        self.rtt_max.load()
    }
}

impl Default for ReceiverCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_counters_accumulate() {
        let c = WorkerCounters::new();
        c.record_sent(100);
        c.record_sent(50);
        c.record_zero_byte();
        c.record_error(32); // EPIPE on Linux
        assert_eq!(c.packets_sent.load(Ordering::Relaxed), 2);
        assert_eq!(c.bytes_sent.load(Ordering::Relaxed), 150);
        assert_eq!(c.zero_byte_sends.load(Ordering::Relaxed), 1);
        assert_eq!(c.send_errors.load(Ordering::Relaxed), 1);
        assert_eq!(c.errno_histogram[32].load(Ordering::Relaxed), 1);
    }

    #[test]
    fn receiver_counters_track_rtt_min_max() {
        let c = ReceiverCounters::new();
        c.record_frame(100, 0, false, Some(0.01));
        c.record_frame(100, 0, false, Some(0.05));
        c.record_frame(100, 3, true, None);
        assert_eq!(c.packets_received.load(Ordering::Relaxed), 3);
        assert_eq!(c.rcode_histogram[3].load(Ordering::Relaxed), 1);
        assert_eq!(c.truncated_count.load(Ordering::Relaxed), 1);
        assert!((c.rtt_min() - 0.01).abs() < 1e-12);
        assert!((c.rtt_max() - 0.05).abs() < 1e-12);
        assert!((c.rtt_sum() - 0.06).abs() < 1e-12);
    }
}
