//! Textual progress rendering: one line per second with deltas of sent and
//! received packets/KB plus elapsed `HH:MM:SS` (spec.md §6, "Progress sink
//! contract").

use std::time::Duration;

use chrono::NaiveTime;
use dnspecker_core::{ProgressSink, RunResult};

pub struct TerminalProgress;

fn format_elapsed(elapsed: Duration) -> String {
    let secs_in_day = (elapsed.as_secs() % 86_400) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs_in_day, 0)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "00:00:00".to_string())
}

impl ProgressSink for TerminalProgress {
    fn on_tick(&mut self, delta: &RunResult, elapsed: Duration) {
        println!(
            "{}  sent {:>6} pkts / {:>7.1} KB   recv {:>6} pkts / {:>7.1} KB",
            format_elapsed(elapsed),
            delta.packets_sent,
            delta.bytes_sent as f64 / 1024.0,
            delta.packets_received,
            delta.bytes_received as f64 / 1024.0,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_elapsed_as_hh_mm_ss() {
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "01:02:05");
    }
}
