//! Thread that loops forge→send under an optional rate limit, producing
//! outbound traffic for one rate-step.

use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use crate::controller::INTERRUPTED;
use crate::counters::WorkerCounters;
use crate::forge::PacketForge;
use crate::payload::PayloadStore;
use crate::spoof::SourceSpoof;
use crate::timestamp;
use crate::tx::{RawTxSocket, SendOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Armed,
    Running,
    Draining,
    Stopped,
}

/// Checkpoints at which the unlimited-mode send loop polls for interrupt
/// and deadline.
const UNLIMITED_CHECK_EVERY: u32 = 10_000;
/// Checkpoints at which the rate-limited send loop polls while sleeping.
const RATE_LIMITED_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct SenderWorker {
    forge: PacketForge,
    tx: RawTxSocket,
    source: SourceSpoof,
    payload: Arc<PayloadStore>,
    counters: Arc<WorkerCounters>,

    runtime: Duration,
    timeout: Duration,
    query_rate: u64,
    timeslice_ms: f64,
    dnssec_rate: u8,
    dnssec_accumulator: u32,

    state: WorkerState,
    /// Pre-drain transmit interval, recorded once the send loop exits.
    duration: Duration,
}

impl SenderWorker {
    pub fn new(
        tx: RawTxSocket,
        destination: (Ipv4Addr, u16),
        source: SourceSpoof,
        payload: Arc<PayloadStore>,
        counters: Arc<WorkerCounters>,
    ) -> Self {
        let mut forge = PacketForge::new();
        forge.set_destination(destination.0, destination.1);

        // A Fixed source with port 0 means "not yet chosen": draw the
        // ephemeral port once here, per spec.md §3's "ephemeral source
        // port chosen at worker start".
        let source = match source {
            SourceSpoof::Fixed { ip, port: 0 } => SourceSpoof::Fixed {
                ip,
                port: rand::thread_rng().gen_range(1024..=65535),
            },
            other => other,
        };

        Self {
            forge,
            tx,
            source,
            payload,
            counters,
            runtime: Duration::from_secs(10),
            timeout: Duration::from_secs(2),
            query_rate: 0,
            timeslice_ms: 1.0,
            dnssec_rate: 0,
            dnssec_accumulator: 0,
            state: WorkerState::Idle,
            duration: Duration::ZERO,
        }
    }

    pub fn set_runtime(&mut self, seconds: u64) {
        self.runtime = Duration::from_secs(seconds);
    }

    pub fn set_timeout(&mut self, seconds: u64) {
        self.timeout = Duration::from_secs(seconds);
    }

    pub fn set_query_rate(&mut self, qps: u64) {
        self.query_rate = qps;
    }

    pub fn set_timeslice(&mut self, millis: f64) {
        self.timeslice_ms = millis.clamp(f64::MIN_POSITIVE, 1000.0);
    }

    pub fn set_dnssec_rate(&mut self, percent: u8) {
        self.dnssec_rate = percent.min(100);
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Runs the worker to completion: send loop, then drain. Intended to be
    /// the body of the worker's dedicated OS thread.
    pub fn run(&mut self) {
        self.state = WorkerState::Armed;
        let start = Instant::now();
        self.state = WorkerState::Running;

        if self.query_rate == 0 {
            self.run_unlimited(start);
        } else {
            self.run_rate_limited(start);
        }
        self.duration = start.elapsed();

        self.state = WorkerState::Draining;
        self.drain();
        self.state = WorkerState::Stopped;
    }

    fn run_unlimited(&mut self, start: Instant) {
        let mut since_check: u32 = 0;
        loop {
            self.send_one();
            since_check += 1;
            if since_check >= UNLIMITED_CHECK_EVERY {
                since_check = 0;
                if INTERRUPTED.load(Ordering::Relaxed) {
                    return;
                }
                if start.elapsed() >= self.runtime {
                    return;
                }
            }
        }
    }

    fn run_rate_limited(&mut self, start: Instant) {
        let timeslice = Duration::from_secs_f64(self.timeslice_ms / 1000.0);
        let runtime_secs = self.runtime.as_secs_f64();
        let total_slices = ((runtime_secs * 1000.0) / self.timeslice_ms)
            .floor()
            .max(1.0) as u64;
        let mut queries_remaining = (self.query_rate as f64 * runtime_secs).round() as u64;

        let deadline = start + self.runtime;
        let mut next_boundary = start;

        for slice_idx in 0..total_slices {
            next_boundary += timeslice;
            let slices_remaining = total_slices - slice_idx;
            let queries_this_slice = if slices_remaining <= 1 {
                queries_remaining
            } else {
                queries_remaining / slices_remaining
            };
            for _ in 0..queries_this_slice {
                self.send_one();
            }
            queries_remaining = queries_remaining.saturating_sub(queries_this_slice);

            if self.sleep_until(next_boundary, deadline) {
                return;
            }
        }
    }

    /// Sleeps until `boundary`, polling for interrupt/deadline every
    /// [`RATE_LIMITED_POLL_INTERVAL`]. Returns `true` if the caller should
    /// stop early.
    fn sleep_until(&self, boundary: Instant, deadline: Instant) -> bool {
        loop {
            let now = Instant::now();
            if now >= boundary {
                return false;
            }
            let remaining = boundary - now;
            thread::sleep(remaining.min(RATE_LIMITED_POLL_INTERVAL));
            if remaining <= RATE_LIMITED_POLL_INTERVAL {
                continue; // next iteration's `now >= boundary` check settles it
            }
            if INTERRUPTED.load(Ordering::Relaxed) || Instant::now() >= deadline {
                return true;
            }
        }
    }

    /// Post-run settle window: stop sending, but let in-flight replies
    /// arrive for up to `timeout` seconds.
    fn drain(&self) {
        let deadline = Instant::now() + self.timeout;
        loop {
            if Instant::now() >= deadline || INTERRUPTED.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(DRAIN_POLL_INTERVAL);
        }
    }

    fn send_one(&mut self) {
        loop {
            let record = self.payload.next_query();
            if self.forge.set_payload(&record.dns_wire).is_err() {
                // Defensive: the store should never emit an oversized
                // record because compilation happens at load time.
                debug!("redrawing after an unexpected forge rejection");
                continue;
            }

            self.dnssec_accumulator += self.dnssec_rate as u32;
            if self.dnssec_accumulator >= 100 {
                if self.forge.add_dnssec_opt().is_ok() {
                    self.dnssec_accumulator -= 100;
                }
            }

            match &self.source {
                SourceSpoof::Fixed { ip, port } => self.forge.set_source(*ip, *port),
                SourceSpoof::Random {
                    net_start_host_order,
                    host_count,
                } => {
                    self.forge
                        .random_source_in_net(*net_start_host_order, *host_count);
                    self.forge.random_source_port();
                }
                SourceSpoof::FromPcap => {
                    if let Some(frame) = &record.captured_frame {
                        self.forge.use_source_from_pcap(frame);
                    }
                }
            }

            self.forge.set_dns_id(timestamp::encode());

            match self.tx.send(&mut self.forge) {
                Ok(SendOutcome::Sent(n)) => self.counters.record_sent(n),
                Ok(SendOutcome::ZeroBytes) => self.counters.record_zero_byte(),
                Ok(SendOutcome::Error(errno)) => self.counters.record_error(errno),
                Err(_) => self.counters.record_error(-1),
            }
            return;
        }
    }
}
