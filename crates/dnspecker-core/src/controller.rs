//! Sequences per-rate measurement runs over a worker pool and aggregates
//! their counters into a `RunResult`.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::counters::{ReceiverCounters, WorkerCounters};
use crate::error::SocketError;
use crate::payload::PayloadStore;
use crate::receiver_task::ReceiverTask;
use crate::rx::{self, RawRxSocket};
use crate::sampler::{SensorSnapshot, SystemSampler};
use crate::spoof::SourceSpoof;
use crate::tx::RawTxSocket;
use crate::worker::SenderWorker;

/// Process-wide interrupt flag, flipped by the SIGINT/SIGTERM handler and
/// polled cooperatively by the Controller and every worker/receiver
/// checkpoint. Mirrors the original program's single global `stopFlag`.
pub static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_interrupt_signal(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Installs handlers for SIGINT and SIGTERM. Call once at process start.
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_interrupt_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_interrupt_signal as libc::sighandler_t);
    }
}

/// Static configuration for an entire invocation (all rate-steps share it).
pub struct RunConfig {
    pub destination: (Ipv4Addr, u16),
    pub source: SourceSpoof,
    pub interface: Option<String>,
    pub worker_count: u32,
    pub runtime_secs: u64,
    pub timeout_secs: u64,
    pub dnssec_rate: u8,
    pub ignore_responses: bool,
    pub rates: Vec<u64>,
}

/// The delta between two snapshots of (worker-aggregate, receiver) counter
/// sets, augmented with the step's target rate and wall-clock duration.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub query_rate: u64,
    pub duration: Duration,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub zero_byte_sends: u64,
    pub send_errors: u64,
    pub errno_histogram: Vec<u64>,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub rcode_histogram: [u64; 16],
    pub truncated_count: u64,
    pub rtt_sum: f64,
    pub rtt_min: f64,
    pub rtt_max: f64,
    pub packets_lost: u64,
}

impl RunResult {
    fn delta(before: &AggregateSnapshot, after: &AggregateSnapshot, query_rate: u64, duration: Duration) -> Self {
        let packets_sent = after.packets_sent.saturating_sub(before.packets_sent);
        let packets_received = after.packets_received.saturating_sub(before.packets_received);
        let mut errno_histogram = vec![0u64; after.errno_histogram.len()];
        for i in 0..errno_histogram.len() {
            errno_histogram[i] = after.errno_histogram[i].saturating_sub(before.errno_histogram[i]);
        }
        let mut rcode_histogram = [0u64; 16];
        for i in 0..16 {
            rcode_histogram[i] = after.rcode_histogram[i].saturating_sub(before.rcode_histogram[i]);
        }
        Self {
            query_rate,
            duration,
            packets_sent,
            bytes_sent: after.bytes_sent.saturating_sub(before.bytes_sent),
            zero_byte_sends: after.zero_byte_sends.saturating_sub(before.zero_byte_sends),
            send_errors: after.send_errors.saturating_sub(before.send_errors),
            errno_histogram,
            packets_received,
            bytes_received: after.bytes_received.saturating_sub(before.bytes_received),
            rcode_histogram,
            truncated_count: after.truncated_count.saturating_sub(before.truncated_count),
            rtt_sum: after.rtt_sum - before.rtt_sum,
            rtt_min: after.rtt_min,
            rtt_max: after.rtt_max,
            packets_lost: packets_sent.saturating_sub(packets_received),
        }
    }

    pub fn rtt_avg(&self) -> f64 {
        if self.packets_received > 0 {
            self.rtt_sum / self.packets_received as f64
        } else {
            0.0
        }
    }
}

#[derive(Clone)]
struct AggregateSnapshot {
    packets_sent: u64,
    bytes_sent: u64,
    zero_byte_sends: u64,
    send_errors: u64,
    errno_histogram: Vec<u64>,
    packets_received: u64,
    bytes_received: u64,
    rcode_histogram: [u64; 16],
    truncated_count: u64,
    rtt_sum: f64,
    rtt_min: f64,
    rtt_max: f64,
}

fn snapshot(workers: &[Arc<WorkerCounters>], receiver: &Arc<ReceiverCounters>) -> AggregateSnapshot {
    let mut errno_histogram = vec![0u64; 255];
    let mut packets_sent = 0;
    let mut bytes_sent = 0;
    let mut zero_byte_sends = 0;
    let mut send_errors = 0;
    for w in workers {
        packets_sent += w.packets_sent.load(Ordering::Relaxed);
        bytes_sent += w.bytes_sent.load(Ordering::Relaxed);
        zero_byte_sends += w.zero_byte_sends.load(Ordering::Relaxed);
        send_errors += w.send_errors.load(Ordering::Relaxed);
        for (i, bin) in w.errno_histogram.iter().enumerate() {
            errno_histogram[i] += bin.load(Ordering::Relaxed);
        }
    }
    let mut rcode_histogram = [0u64; 16];
    for (i, bin) in receiver.rcode_histogram.iter().enumerate() {
        rcode_histogram[i] = bin.load(Ordering::Relaxed);
    }
    AggregateSnapshot {
        packets_sent,
        bytes_sent,
        zero_byte_sends,
        send_errors,
        errno_histogram,
        packets_received: receiver.packets_received.load(Ordering::Relaxed),
        bytes_received: receiver.bytes_received.load(Ordering::Relaxed),
        rcode_histogram,
        truncated_count: receiver.truncated_count.load(Ordering::Relaxed),
        rtt_sum: receiver.rtt_sum(),
        rtt_min: receiver.rtt_min(),
        rtt_max: receiver.rtt_max(),
    }
}

pub trait ProgressSink {
    fn on_tick(&mut self, delta: &RunResult, elapsed: Duration);
}

pub trait ResultSink {
    fn on_result(&mut self, result: &RunResult, before: &SensorSnapshot, after: &SensorSnapshot);
}

pub struct Controller {
    config: RunConfig,
    payload: Arc<PayloadStore>,
}

impl Controller {
    pub fn new(config: RunConfig, payload: Arc<PayloadStore>) -> Self {
        Self { config, payload }
    }

    fn open_rx_socket(&self) -> Result<Box<dyn RawRxSocket>, SocketError> {
        let mut socket: Box<dyn RawRxSocket> = Box::new(rx::PlatformRawRxSocket::open()?);
        if let Some(iface) = &self.config.interface {
            socket.bind_interface(iface)?;
        }
        socket.set_source(self.config.destination.0, self.config.destination.1)?;
        Ok(socket)
    }

    /// Runs every configured rate-step in order, emitting progress ticks
    /// and the final per-step result to the supplied collaborators.
    pub fn run(
        &self,
        progress: &mut dyn ProgressSink,
        results: &mut dyn ResultSink,
        sampler: &dyn SystemSampler,
    ) -> anyhow::Result<Vec<RunResult>> {
        let mut out = Vec::new();

        for &rate in &self.config.rates {
            let timeslice_ms = if rate > 0 {
                (1000.0 * self.config.worker_count as f64 / rate as f64).max(0.1)
            } else {
                1.0
            };

            let worker_counters: Vec<Arc<WorkerCounters>> = (0..self.config.worker_count)
                .map(|_| Arc::new(WorkerCounters::new()))
                .collect();
            let receiver_counters = Arc::new(ReceiverCounters::new());
            let receiver_stop = Arc::new(AtomicBool::new(false));

            let before = sampler.snapshot();
            let start_snapshot = snapshot(&worker_counters, &receiver_counters);

            let receiver_handle = if !self.config.ignore_responses {
                let socket = self.open_rx_socket()?;
                Some(ReceiverTask::spawn(
                    socket,
                    receiver_counters.clone(),
                    receiver_stop.clone(),
                )?)
            } else {
                None
            };

            let per_worker_rate = if rate > 0 {
                rate / self.config.worker_count as u64
            } else {
                0
            };

            info!(rate, workers = self.config.worker_count, "starting rate-step");

            let mut handles = Vec::with_capacity(self.config.worker_count as usize);
            for (i, counters) in worker_counters.iter().enumerate() {
                let tx = RawTxSocket::open()?;
                let mut worker = SenderWorker::new(
                    tx,
                    self.config.destination,
                    self.config.source.clone(),
                    self.payload.clone(),
                    counters.clone(),
                );
                worker.set_runtime(self.config.runtime_secs);
                worker.set_timeout(self.config.timeout_secs);
                worker.set_query_rate(per_worker_rate);
                worker.set_timeslice(timeslice_ms);
                worker.set_dnssec_rate(self.config.dnssec_rate);

                handles.push(
                    thread::Builder::new()
                        .name(format!("dns-sender-{i}"))
                        .spawn(move || worker.run())?,
                );
            }

            let run_start = Instant::now();
            let mut next_tick = Duration::from_secs(1);
            let mut last_progress_snapshot = start_snapshot.clone();
            loop {
                thread::sleep(Duration::from_millis(100));
                let elapsed = run_start.elapsed();
                if elapsed >= next_tick {
                    next_tick += Duration::from_secs(1);
                    let now_snapshot = snapshot(&worker_counters, &receiver_counters);
                    let delta = RunResult::delta(&last_progress_snapshot, &now_snapshot, rate, elapsed);
                    progress.on_tick(&delta, elapsed);
                    last_progress_snapshot = now_snapshot;
                }
                if handles.iter().all(|h| h.is_finished()) {
                    break;
                }
            }

            for handle in handles {
                let _ = handle.join();
            }

            receiver_stop.store(true, Ordering::Relaxed);
            if let Some(handle) = receiver_handle {
                let _ = handle.join();
            }

            let after = sampler.snapshot();
            let end_snapshot = snapshot(&worker_counters, &receiver_counters);
            let result = RunResult::delta(&start_snapshot, &end_snapshot, rate, run_start.elapsed());
            results.on_result(&result, &before, &after);
            out.push(result);

            if INTERRUPTED.load(Ordering::Relaxed) {
                info!("interrupted, stopping after the current rate-step");
                break;
            }
        }

        Ok(out)
    }
}
