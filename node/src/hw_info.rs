//! Board hardware description written by the platform at boot.
//!
//! The file is a shell-style env file (`KEY=value` per line). The node only
//! runs on the Max carrier, which hosts the LoRa modem.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};

pub const DEFAULT_HW_INFO_PATH: &str = "/run/arduino_hw_info.env";

const REQUIRED_CARRIER: &str = "max";

/// Parse `KEY=value` lines. Comments, blank lines, an `export ` prefix and
/// surrounding quotes are tolerated.
pub fn parse_env(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// Fail unless the hardware-info file at `path` names the Max carrier.
pub fn require_max_carrier(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading hardware info {}", path.display()))?;
    match parse_env(&text).get("CARRIER_NAME").map(String::as_str) {
        Some(REQUIRED_CARRIER) => Ok(()),
        Some(other) => bail!("this program requires the Max carrier (found {other:?})"),
        None => bail!(
            "this program requires the Max carrier ({} has no CARRIER_NAME)",
            path.display()
        ),
    }
}
