//! Parses the `-r` rate spec: a single integer, a comma-separated list, or
//! a `start-end,step` arithmetic progression. An empty spec means
//! unlimited (rate 0).

use anyhow::{bail, Result};

pub fn parse_rate_spec(spec: &str) -> Result<Vec<u64>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(vec![0]);
    }

    if let Some((range, step)) = spec.split_once(',') {
        if let Some((start, end)) = range.split_once('-') {
            if let (Ok(start), Ok(end), Ok(step)) =
                (start.trim().parse::<u64>(), end.trim().parse::<u64>(), step.trim().parse::<u64>())
            {
                if step == 0 {
                    bail!("rate step must be non-zero: {spec}");
                }
                if start > end {
                    bail!("rate range start must not exceed end: {spec}");
                }
                let mut rates = Vec::new();
                let mut r = start;
                loop {
                    rates.push(r);
                    if r == end {
                        break;
                    }
                    r = (r + step).min(end);
                }
                return Ok(rates);
            }
        }
    }

    let mut rates = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        let rate: u64 = part
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid rate value: {part}"))?;
        rates.push(rate);
    }
    Ok(rates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_spec_means_unlimited() {
        assert_eq!(parse_rate_spec("").unwrap(), vec![0]);
    }

    #[test]
    fn single_value() {
        assert_eq!(parse_rate_spec("1000").unwrap(), vec![1000]);
    }

    #[test]
    fn comma_separated_list() {
        assert_eq!(parse_rate_spec("100,500,1000").unwrap(), vec![100, 500, 1000]);
    }

    #[test]
    fn arithmetic_progression() {
        assert_eq!(
            parse_rate_spec("100-400,100").unwrap(),
            vec![100, 200, 300, 400]
        );
    }

    #[test]
    fn progression_clamps_final_step_to_end() {
        assert_eq!(parse_rate_spec("100-350,100").unwrap(), vec![100, 200, 300, 350]);
    }

    #[test]
    fn rejects_zero_step() {
        assert!(parse_rate_spec("100-400,0").is_err());
    }
}
