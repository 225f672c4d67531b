//! Timestamp-fingerprint codec used to recover RTT from the DNS
//! transaction-id without keeping any per-query state on the sender side.
//!
//! `encode` packs the low bits of the wall clock into a 16-bit id at 50 µs
//! resolution; `decode` reverses the packing against the clock read at
//! receive time. The unambiguity window is `65536 * 50µs ≈ 3.2768s`.

use std::time::{SystemTime, UNIX_EPOCH};

const TICK_MICROS: u64 = 50;
const MODULUS: u32 = 1 << 16;

/// Upper bound past which a recovered RTT is treated as noise (an
/// unrelated reply or a clock discontinuity) rather than a real sample.
pub const MAX_PLAUSIBLE_RTT_SECS: f64 = 5.0;

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_micros() as u64
}

/// Returns the 16-bit fingerprint for the current wall clock.
pub fn encode() -> u16 {
    encode_at(now_micros())
}

/// Same as [`encode`] but against an explicit microsecond timestamp, for
/// testing and for receive-side recomputation.
pub fn encode_at(micros: u64) -> u16 {
    ((micros / TICK_MICROS) % MODULUS as u64) as u16
}

/// Recovers the RTT in seconds implied by `id`, measured against the
/// current wall clock.
pub fn decode(id: u16) -> f64 {
    decode_at(id, now_micros())
}

/// Same as [`decode`] but against an explicit receive-time microsecond
/// timestamp.
pub fn decode_at(id: u16, receive_micros: u64) -> f64 {
    let id_now = encode_at(receive_micros) as i64;
    let delta = (id_now - id as i64).rem_euclid(MODULUS as i64) as u64;
    delta as f64 * TICK_MICROS as f64 * 1e-6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_tick_resolution() {
        let emit_micros = 1_000_000_000u64;
        let id = encode_at(emit_micros);
        for elapsed_ms in [0u64, 1, 10, 100, 1000] {
            let receive_micros = emit_micros + elapsed_ms * 1000;
            let rtt = decode_at(id, receive_micros);
            let expected = elapsed_ms as f64 / 1000.0;
            assert!(
                (rtt - expected).abs() <= 5e-5,
                "elapsed_ms={elapsed_ms} rtt={rtt} expected={expected}"
            );
        }
    }

    #[test]
    fn decode_wraps_correctly_near_the_modulus_boundary() {
        let emit_micros = (MODULUS as u64 - 1) * TICK_MICROS;
        let id = encode_at(emit_micros);
        let receive_micros = emit_micros + 200;
        let rtt = decode_at(id, receive_micros);
        assert!(rtt < 1e-3);
    }

    #[test]
    fn same_instant_decodes_to_zero() {
        let now = 42_424_242u64;
        let id = encode_at(now);
        assert_eq!(decode_at(id, now), 0.0);
    }
}
