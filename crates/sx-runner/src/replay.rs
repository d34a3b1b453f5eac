//! Tick file reader.
//!
//! One JSON object per line:
//!
//! ```json
//! {"market_id": "BTCUSDT", "timestamp": 1700000000.0, "bid": 37000.5, "ask": 37001.0}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tick {
    pub market_id: String,
    pub timestamp: f64,
    pub bid: f64,
    pub ask: f64,
}

pub fn load_ticks(path: &Path) -> Result<Vec<Tick>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_ticks(&text).with_context(|| format!("in {}", path.display()))
}

pub fn parse_ticks(text: &str) -> Result<Vec<Tick>> {
    let mut ticks = Vec::new();
    let mut last = f64::MIN;
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tick: Tick = serde_json::from_str(line).with_context(|| format!("line {}", n + 1))?;
        if tick.timestamp < last {
            bail!("line {}: timestamp {} goes backwards", n + 1, tick.timestamp);
        }
        last = tick.timestamp;
        ticks.push(tick);
    }
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lines() {
        let text = r#"
# header
{"market_id":"BTCUSDT","timestamp":1.0,"bid":100.0,"ask":100.5}

{"market_id":"BTCUSDT","timestamp":2.0,"bid":101.0,"ask":101.5}
"#;
        let ticks = parse_ticks(text).unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[1].bid, 101.0);
    }

    #[test]
    fn rejects_time_travel() {
        let text = "{\"market_id\":\"X\",\"timestamp\":5.0,\"bid\":1.0,\"ask\":1.0}\n\
                    {\"market_id\":\"X\",\"timestamp\":4.0,\"bid\":1.0,\"ask\":1.0}";
        let err = parse_ticks(text).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn reports_bad_line() {
        let err = parse_ticks("{\"market_id\":\"X\"}").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
