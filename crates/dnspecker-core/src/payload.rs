//! Pre-compiles a bounded list of DNS query wire-images and hands them out
//! round-robin to sender workers.
//!
//! Compilation happens once at load time (from a plain-text query list or a
//! pcap capture, auto-detected by magic number); the hot path only ever
//! reads already-compiled records.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use pcap_file::pcap::PcapReader;

use crate::error::PayloadError;

/// Fixed table of RR-type mnemonics this store understands, mirroring the
/// subset the original query compiler accepts. Extending this list is safe;
/// unrecognised mnemonics are simply skipped.
const RR_TYPES: &[(&str, u16)] = &[
    ("A", 1),
    ("NS", 2),
    ("CNAME", 5),
    ("SOA", 6),
    ("PTR", 12),
    ("HINFO", 13),
    ("MX", 15),
    ("TXT", 16),
    ("AAAA", 28),
    ("SRV", 33),
    ("NAPTR", 35),
    ("DS", 43),
    ("RRSIG", 46),
    ("NSEC", 47),
    ("DNSKEY", 48),
    ("NSEC3", 50),
    ("NSEC3PARAM", 51),
    ("SPF", 99),
    ("AXFR", 252),
    ("ANY", 255),
];

fn rr_code(mnemonic: &str) -> Option<u16> {
    RR_TYPES
        .iter()
        .find(|(name, _)| *name == mnemonic)
        .map(|(_, code)| *code)
}

/// One pre-compiled query, ready to be copied into a packet buffer.
pub struct QueryRecord {
    /// DNS header + question, recursion-desired, no OPT record.
    pub dns_wire: Vec<u8>,
    /// Set only for pcap-sourced records: the full captured Ethernet frame,
    /// kept so from-pcap spoofing can recover the original L3/L4 source.
    pub captured_frame: Option<Vec<u8>>,
}

/// Encodes `<qname> <qtype>` as a standalone RFC 1035 query message: a
/// 12-byte header (RD=1, everything else zeroed; id is filled in by the
/// worker at send time) followed by one question RR.
fn compile_text_query(qname: &str, qtype: &str) -> Option<Vec<u8>> {
    let code = rr_code(&qtype.to_ascii_uppercase())?;
    let mut wire = Vec::with_capacity(12 + qname.len() + 6);

    // Header: id=0 (overwritten per-send), flags=RD, one question.
    wire.extend_from_slice(&[0x00, 0x00]); // id
    wire.push(0x01); // QR=0 OPCODE=0000 AA=0 TC=0 RD=1
    wire.push(0x00); // RA=0 Z=0 AD=0 CD=0 RCODE=0
    wire.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    wire.extend_from_slice(&0u16.to_be_bytes()); // ancount
    wire.extend_from_slice(&0u16.to_be_bytes()); // nscount
    wire.extend_from_slice(&0u16.to_be_bytes()); // arcount

    for label in qname.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            return None;
        }
        wire.push(label.len() as u8);
        wire.extend_from_slice(label.as_bytes());
    }
    wire.push(0x00);
    wire.extend_from_slice(&code.to_be_bytes());
    wire.extend_from_slice(&1u16.to_be_bytes()); // qclass IN

    Some(wire)
}

fn is_pcap_magic(head: &[u8]) -> bool {
    if head.len() < 4 {
        return false;
    }
    let magic = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    matches!(magic, 0xa1b2_c3d4 | 0xa1b2_3c4d | 0xd4c3_b2a1 | 0x4d3c_b2a1)
}

/// Thread-safe supplier of pre-compiled wire-form DNS queries.
pub struct PayloadStore {
    records: Vec<QueryRecord>,
    cursor: AtomicUsize,
    is_pcap: bool,
}

impl PayloadStore {
    /// Auto-detects `path` as text or pcap and compiles its contents.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PayloadError> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Err(PayloadError::Empty);
        }

        let (records, is_pcap) = if is_pcap_magic(&bytes[..bytes.len().min(8)]) {
            (Self::compile_pcap(&bytes)?, true)
        } else {
            (Self::compile_text(&bytes)?, false)
        };

        if records.is_empty() {
            return Err(PayloadError::InvalidQueryFile(format!(
                "no valid queries found in {}",
                path.display()
            )));
        }

        Ok(Self {
            records,
            cursor: AtomicUsize::new(0),
            is_pcap,
        })
    }

    fn compile_text(bytes: &[u8]) -> Result<Vec<QueryRecord>, PayloadError> {
        let text = String::from_utf8_lossy(bytes);
        let mut records = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((qname, qtype)) = line.split_once(' ') else {
                continue;
            };
            if let Some(dns_wire) = compile_text_query(qname.trim(), qtype.trim()) {
                records.push(QueryRecord {
                    dns_wire,
                    captured_frame: None,
                });
            }
        }
        Ok(records)
    }

    fn compile_pcap(bytes: &[u8]) -> Result<Vec<QueryRecord>, PayloadError> {
        let mut reader = PcapReader::new(bytes)
            .map_err(|e| PayloadError::InvalidQueryFile(e.to_string()))?;
        let mut records = Vec::new();

        while let Some(packet) = reader.next_packet() {
            let Ok(packet) = packet else { continue };
            let frame = packet.data.as_ref();
            if frame.len() > 4096 || frame.len() < 14 + 20 + 8 + 12 {
                continue;
            }
            if frame[12] != 0x08 || frame[13] != 0x00 {
                continue; // not IPv4 ethertype
            }
            let ip_start = 14;
            if (frame[ip_start] >> 4) != 4 {
                continue; // not IPv4
            }
            let ihl = (frame[ip_start] & 0x0f) as usize * 4;
            let udp_start = ip_start + ihl;
            if frame.len() < udp_start + 8 {
                continue;
            }
            let dst_port = u16::from_be_bytes([frame[udp_start + 2], frame[udp_start + 3]]);
            if dst_port != 53 {
                continue;
            }
            let dns_start = udp_start + 8;
            if frame.len() < dns_start + 12 {
                continue;
            }
            let qr_opcode = frame[dns_start + 2];
            if qr_opcode & 0xf8 != 0 {
                continue; // qr != 0 or opcode != 0
            }
            records.push(QueryRecord {
                dns_wire: frame[dns_start..].to_vec(),
                captured_frame: Some(frame.to_vec()),
            });
        }
        Ok(records)
    }

    /// Returns the next record, advancing the shared round-robin cursor.
    /// Never fails: the store is guaranteed non-empty once constructed.
    pub fn next_query(&self) -> &QueryRecord {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.records.len();
        &self.records[idx]
    }

    pub fn is_pcap(&self) -> bool {
        self.is_pcap
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Extracts the captured source IPv4 address and UDP source port from a
/// pcap-retained Ethernet frame, for from-pcap spoofing.
pub fn pcap_source(frame: &[u8]) -> Option<(Ipv4Addr, u16)> {
    if frame.len() < 14 + 20 + 8 {
        return None;
    }
    let ip_start = 14;
    let src_ip = Ipv4Addr::new(
        frame[ip_start + 12],
        frame[ip_start + 13],
        frame[ip_start + 14],
        frame[ip_start + 15],
    );
    let ihl = (frame[ip_start] & 0x0f) as usize * 4;
    let udp_start = ip_start + ihl;
    let src_port = u16::from_be_bytes([frame[udp_start], frame[udp_start + 1]]);
    Some((src_ip, src_port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &[u8]) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "dnspecker-test-{}-{}.txt",
            std::process::id(),
            RR_TYPES.len() // cheap per-test uniqueness without a clock call
        ));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn compiles_simple_text_queries() {
        let path = write_temp(b"example.com A\n# a comment\n\nexample.org AAAA\nbogus.example BOGUSTYPE\n");
        let store = PayloadStore::load(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(!store.is_pcap());
        fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_empty_file() {
        let path = write_temp(b"");
        let err = PayloadStore::load(&path).unwrap_err();
        assert!(matches!(err, PayloadError::Empty));
        fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_file_with_no_valid_lines() {
        let path = write_temp(b"# only comments\n\n   \n");
        let err = PayloadStore::load(&path).unwrap_err();
        assert!(matches!(err, PayloadError::InvalidQueryFile(_)));
        fs::remove_file(path).ok();
    }

    #[test]
    fn round_robin_wraps_after_full_cycle() {
        let path = write_temp(b"a.example A\nb.example A\nc.example A\n");
        let store = PayloadStore::load(&path).unwrap();
        let mut seen = Vec::new();
        for _ in 0..(3 * 2) {
            seen.push(store.next_query().dns_wire.clone());
        }
        assert_eq!(seen[0], seen[3]);
        assert_eq!(seen[1], seen[4]);
        assert_eq!(seen[2], seen[5]);
        fs::remove_file(path).ok();
    }

    #[test]
    fn compiled_query_has_recursion_desired_and_one_question() {
        let wire = compile_text_query("example.com", "A").unwrap();
        assert_eq!(wire[2], 0x01); // RD set, QR/OPCODE/AA/TC clear
        assert_eq!(u16::from_be_bytes([wire[4], wire[5]]), 1); // qdcount
    }
}
