//! # Duration Parsing
//!
//! Kubernetes-style duration strings for `--timeout`: one or more
//! `<number><unit>` terms, e.g. `90s`, `10m`, `1h30m`.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)(ms|s|m|h|d)")
        .expect("Failed to compile duration regex - this should never happen")
});

fn unit_millis(unit: &str) -> u64 {
    match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => 86_400_000,
    }
}

/// Parse a duration such as `30s`, `10m` or `1h30m`
///
/// Units: `ms`, `s`, `m`, `h`, `d`, case-insensitive. The total must be non-zero.
pub fn parse_kubernetes_duration(input: &str) -> Result<Duration> {
    let text = input.trim().to_lowercase();
    if text.is_empty() {
        bail!("Duration cannot be empty");
    }

    let mut consumed = 0;
    let mut total_ms: u64 = 0;
    for term in TERM.captures_iter(&text) {
        let whole = term.get(0).context("regex match without a span")?;
        if whole.start() != consumed {
            break;
        }
        consumed = whole.end();

        let count: u64 = term[1]
            .parse()
            .with_context(|| format!("Number out of range in duration '{input}'"))?;
        total_ms = count
            .checked_mul(unit_millis(&term[2]))
            .and_then(|ms| total_ms.checked_add(ms))
            .with_context(|| format!("Duration '{input}' is out of range"))?;
    }

    if consumed != text.len() {
        bail!("Invalid duration '{input}'. Expected terms like '30s', '10m' or '1h30m'");
    }
    if total_ms == 0 {
        bail!("Duration '{input}' must be greater than zero");
    }
    Ok(Duration::from_millis(total_ms))
}
