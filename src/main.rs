mod cli;
mod csv_sink;
mod progress;
mod rates;
mod sensor;

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dnspecker_core::controller::{install_signal_handlers, Controller, ResultSink, RunConfig};
use dnspecker_core::payload::PayloadStore;
use dnspecker_core::spoof::{parse_ipv4_cidr, SourceSpoof};
use dnspecker_core::ProgressSink;

use cli::Cli;
use csv_sink::CsvSink;
use progress::TerminalProgress;

/// Resolves a host (dotted-quad or hostname) to an IPv4 address, rejecting
/// IPv6 results per spec.md §7 ("Configuration error ... IPv6 source/target").
fn resolve_ipv4(host: &str) -> Result<Ipv4Addr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    let addrs = (host, 0u16)
        .to_socket_addrs()
        .with_context(|| format!("could not resolve host {host}"))?;
    for addr in addrs {
        if let IpAddr::V4(ip) = addr.ip() {
            return Ok(ip);
        }
    }
    bail!("host {host} did not resolve to an IPv4 address")
}

fn parse_target(spec: &str) -> Result<(Ipv4Addr, u16)> {
    let (host, port) = match spec.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().context("invalid target port")?),
        None => (spec, 53),
    };
    Ok((resolve_ipv4(host)?, port))
}

fn build_source_spoof(cli: &Cli) -> Result<SourceSpoof> {
    match (&cli.source_host, &cli.spoof) {
        (Some(_), Some(_)) => bail!("-q and -s are mutually exclusive"),
        (Some(host), None) => {
            let ip = resolve_ipv4(host)?;
            Ok(SourceSpoof::Fixed { ip, port: 0 })
        }
        (None, Some(spoof)) if spoof.eq_ignore_ascii_case("pcap") => Ok(SourceSpoof::FromPcap),
        (None, Some(cidr)) => {
            let (start, count) = parse_ipv4_cidr(cidr)?;
            Ok(SourceSpoof::Random {
                net_start_host_order: start,
                host_count: count,
            })
        }
        (None, None) => bail!("one of -q or -s is required"),
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    install_signal_handlers();

    let destination = parse_target(&cli.target)?;
    let source = build_source_spoof(&cli)?;

    let payload = Arc::new(PayloadStore::load(&cli.payload)?);
    if matches!(source, SourceSpoof::FromPcap) && !payload.is_pcap() {
        bail!("-s pcap requires a pcap payload file");
    }

    let rates = rates::parse_rate_spec(&cli.rate)?;

    let config = RunConfig {
        destination,
        source,
        interface: cli.interface.clone(),
        worker_count: cli.workers.max(1),
        runtime_secs: cli.runtime,
        timeout_secs: cli.timeout,
        dnssec_rate: cli.dnssec_rate.min(100),
        ignore_responses: cli.ignore,
        rates,
    };

    let controller = Controller::new(config, payload);
    let sampler = sensor::default_sampler();
    let mut progress = TerminalProgress;

    let mut csv_sink = match &cli.csv {
        Some(path) => Some(CsvSink::open(path)?),
        None => None,
    };
    let mut discard_sink = DiscardSink;
    let results_sink: &mut dyn ResultSink = match &mut csv_sink {
        Some(sink) => sink,
        None => &mut discard_sink,
    };

    controller.run(&mut progress as &mut dyn ProgressSink, results_sink, sampler.as_ref())?;

    Ok(0)
}

struct DiscardSink;
impl ResultSink for DiscardSink {
    fn on_result(
        &mut self,
        _result: &dnspecker_core::RunResult,
        _before: &dnspecker_core::SensorSnapshot,
        _after: &dnspecker_core::SensorSnapshot,
    ) {
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("dnspecker: {e:#}");
            std::process::exit(1);
        }
    }
}
