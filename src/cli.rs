//! Command-line surface. Flat (no subcommands), mirroring the original
//! tool's argv contract rather than the teacher's TOML config file — see
//! SPEC_FULL.md §3.3 for why.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "dnspecker", version, about = "DNS authoritative-server load generator")]
pub struct Cli {
    /// Source IPv4 address or resolvable hostname (no spoofing).
    #[arg(short = 'q', long = "source-host", value_name = "HOST")]
    pub source_host: Option<String>,

    /// Spoof mode: an IPv4 CIDR network, or "pcap" to reuse the per-packet
    /// source recorded in the payload pcap. Mutually exclusive with -q.
    #[arg(short = 's', long = "spoof", value_name = "NETWORK|pcap")]
    pub spoof: Option<String>,

    /// Interface name for the raw receive path (BPF platforms only).
    #[arg(short = 'e', long = "interface", value_name = "IFACE")]
    pub interface: Option<String>,

    /// Target host:port. Port defaults to 53 if omitted.
    #[arg(short = 'z', long = "target", value_name = "HOST[:PORT]")]
    pub target: String,

    /// Path to a text or pcap payload file.
    #[arg(short = 'p', long = "payload", value_name = "FILE")]
    pub payload: String,

    /// Runtime per rate-step, in seconds.
    #[arg(short = 'l', long = "runtime", default_value_t = 10)]
    pub runtime: u64,

    /// Drain timeout after each rate-step, in seconds.
    #[arg(short = 't', long = "timeout", default_value_t = 2)]
    pub timeout: u64,

    /// Number of sender worker threads.
    #[arg(short = 'n', long = "workers", default_value_t = 1)]
    pub workers: u32,

    /// Rate spec: a single integer, a comma-separated list, or
    /// `start-end,step`. Omit or pass 0 for unlimited.
    #[arg(short = 'r', long = "rate", default_value = "")]
    pub rate: String,

    /// DNSSEC OPT-augmentation percentage, 0-100.
    #[arg(short = 'd', long = "dnssec-rate", default_value_t = 0)]
    pub dnssec_rate: u8,

    /// CSV output path.
    #[arg(short = 'c', long = "csv", value_name = "FILE")]
    pub csv: Option<String>,

    /// Skip the receive path entirely (traffic-generation-only mode).
    #[arg(long = "ignore", default_value_t = false)]
    pub ignore: bool,
}
