//! Thread that loops read→parse→accumulate on a `RawRxSocket`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::info;

use crate::counters::ReceiverCounters;
use crate::rx::RawRxSocket;

pub struct ReceiverTask {
    socket: Box<dyn RawRxSocket>,
    counters: Arc<ReceiverCounters>,
    stop: Arc<AtomicBool>,
}

impl ReceiverTask {
    pub fn new(
        socket: Box<dyn RawRxSocket>,
        counters: Arc<ReceiverCounters>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            socket,
            counters,
            stop,
        }
    }

    /// Spawns the receiver on a dedicated, named OS thread.
    pub fn spawn(
        socket: Box<dyn RawRxSocket>,
        counters: Arc<ReceiverCounters>,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let task = Self::new(socket, counters, stop);
        thread::Builder::new()
            .name("dns-receiver".into())
            .spawn(move || task.run())
    }

    pub fn run(mut self) {
        info!("receiver started");
        loop {
            if self.socket.is_readable() {
                self.socket.recv(&self.counters);
            }
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
        }
        info!("receiver stopped");
    }
}
