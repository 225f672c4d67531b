//! CSV persistence of per-rate-step results (spec.md §6, "CSV output
//! format"). Appends one row per step; the header is written only the
//! first time the file is created or found empty.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use dnspecker_core::sampler::SensorSnapshot;
use dnspecker_core::{ResultSink, RunResult};

const HEADER: &str = "#QPS Send; QPS Received; QPS Errors; Lostrate; rtt_avg; rtt_min; rtt_max;\n";

pub struct CsvSink {
    file: std::fs::File,
}

impl CsvSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path.as_ref())
            .with_context(|| format!("opening CSV output file {}", path.as_ref().display()))?;

        let is_empty = file.seek(SeekFrom::End(0))? == 0;
        if is_empty {
            file.write_all(HEADER.as_bytes())?;
        }
        Ok(Self { file })
    }
}

impl ResultSink for CsvSink {
    fn on_result(&mut self, result: &RunResult, _before: &SensorSnapshot, _after: &SensorSnapshot) {
        let secs = result.duration.as_secs_f64().max(f64::MIN_POSITIVE);
        let send_qps = result.packets_sent as f64 / secs;
        let recv_qps = result.packets_received as f64 / secs;
        let error_qps = result.send_errors as f64 / secs;
        let lostrate_pct = if result.packets_sent > 0 {
            100.0 * result.packets_lost as f64 / result.packets_sent as f64
        } else {
            0.0
        };
        let row = format!(
            "{:.0};{:.0};{:.0};{:.3};{:.4};{:.4};{:.4};\n",
            send_qps,
            recv_qps,
            error_qps,
            lostrate_pct,
            result.rtt_avg() * 1000.0,
            result.rtt_min * 1000.0,
            result.rtt_max * 1000.0,
        );
        if let Err(e) = self.file.write_all(row.as_bytes()) {
            tracing::warn!("failed to write CSV row: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::Duration;

    fn sample_result() -> RunResult {
        RunResult {
            query_rate: 1000,
            duration: Duration::from_secs(1),
            packets_sent: 1000,
            packets_received: 950,
            packets_lost: 50,
            rtt_sum: 0.95,
            rtt_min: 0.0005,
            rtt_max: 0.0025,
            ..Default::default()
        }
    }

    #[test]
    fn writes_header_once_and_formats_row() {
        let mut path = std::env::temp_dir();
        path.push(format!("dnspecker-csv-test-{}.csv", std::process::id()));
        std::fs::remove_file(&path).ok();

        {
            let mut sink = CsvSink::open(&path).unwrap();
            let snap = SensorSnapshot::default();
            sink.on_result(&sample_result(), &snap, &snap);
        }
        {
            let mut sink = CsvSink::open(&path).unwrap();
            let snap = SensorSnapshot::default();
            sink.on_result(&sample_result(), &snap, &snap);
        }

        let mut contents = String::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents.matches('#').count(), 1);
        assert_eq!(contents.lines().count(), 3); // header + 2 rows
        std::fs::remove_file(&path).ok();
    }
}
