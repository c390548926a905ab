//! # Duration parsing
//!
//! Kubernetes-style duration strings (`<n><s|m|h|d>`), reused across
//! `--vm-ttl`, `--timeout`, `--dial-timeout` and `--max-age`.

use std::time::Duration;

use anyhow::{anyhow, Result};
use regex::Regex;

/// Parses a Kubernetes-style duration string such as `30s`, `10m`, `3h`
/// or `1d` into a `Duration`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let re = Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$")
        .expect("duration regex is a fixed valid pattern");

    let caps = re
        .captures(raw)
        .ok_or_else(|| anyhow!("invalid duration {raw:?}: expected format <n><s|m|h|d>"))?;

    let number: u64 = caps["number"]
        .parse()
        .map_err(|e| anyhow!("invalid duration {raw:?}: {e}"))?;

    let seconds = match &caps["unit"] {
        "s" => number,
        "m" => number * 60,
        "h" => number * 60 * 60,
        "d" => number * 60 * 60 * 24,
        unit => return Err(anyhow!("invalid duration unit {unit:?}")),
    };

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("3h").unwrap(), Duration::from_secs(3 * 3600));
        assert_eq!(
            parse_duration("1d").unwrap(),
            Duration::from_secs(24 * 3600)
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_duration("3").is_err());
        assert!(parse_duration("h3").is_err());
        assert!(parse_duration("3w").is_err());
        assert!(parse_duration("").is_err());
    }
}
