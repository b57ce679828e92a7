//! Node configuration file.
//!
//! Every field is optional; a missing file or section yields the defaults of
//! the reference deployment (Portenta X8 on a Max carrier).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

use loranode_core::Band;
use loranode_transport::{DEFAULT_BAUD_RATE, DEFAULT_RESET_GPIO};
use loranode_telemetry::rpc::DEFAULT_M4_PROXY_ADDR;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub modem: ModemSection,
    pub credentials: CredentialsSection,
    pub sensor: SensorSection,
    pub uplink: UplinkSection,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ModemSection {
    pub port: String,
    pub baud_rate: u32,
    #[serde(deserialize_with = "deserialize_band")]
    pub band: Band,
    /// Sysfs GPIO number of the reset line; `None` disables the reset pulse.
    pub reset_gpio: Option<u32>,
    pub command_timeout_secs: u64,
    pub join_timeout_secs: u64,
}

impl Default for ModemSection {
    fn default() -> Self {
        Self {
            port: "/dev/ttymxc3".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            band: Band::Eu868,
            reset_gpio: Some(DEFAULT_RESET_GPIO),
            command_timeout_secs: 5,
            join_timeout_secs: 60,
        }
    }
}

fn deserialize_band<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Band, D::Error> {
    let name = String::deserialize(deserializer)?;
    name.parse().map_err(serde::de::Error::custom)
}

impl ModemSection {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialsSection {
    pub app_eui: Option<String>,
    pub app_key: Option<String>,
    pub dev_eui: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SensorKind {
    /// Always report the default reading.
    #[default]
    Emulated,
    /// Ask the sketch on the M4 core through the proxy.
    M4Proxy,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SensorSection {
    pub source: SensorKind,
    pub address: String,
    pub timeout_secs: u64,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            source: SensorKind::Emulated,
            address: DEFAULT_M4_PROXY_ADDR.to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UplinkSection {
    pub interval_secs: u64,
    pub confirmed: bool,
}

impl Default for UplinkSection {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            confirmed: false,
        }
    }
}

impl NodeConfig {
    /// Load the configuration from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config = NodeConfig::parse("").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.modem.port, "/dev/ttymxc3");
        assert_eq!(config.modem.baud_rate, 19_200);
        assert_eq!(config.modem.band, Band::Eu868);
        assert_eq!(config.modem.reset_gpio, Some(163));
        assert_eq!(config.sensor.source, SensorKind::Emulated);
        assert_eq!(config.sensor.address, "m4-proxy:5001");
        assert_eq!(config.uplink.interval_secs, 5);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = NodeConfig::parse(
            r#"
            [modem]
            port = "/dev/ttyUSB0"
            band = "us915"

            [credentials]
            app_eui = "70B3D57ED0000001"

            [sensor]
            source = "m4-proxy"
            "#,
        )
        .unwrap();
        assert_eq!(config.modem.port, "/dev/ttyUSB0");
        assert_eq!(config.modem.band, Band::Us915);
        assert_eq!(config.modem.baud_rate, 19_200);
        assert_eq!(config.credentials.app_eui.as_deref(), Some("70B3D57ED0000001"));
        assert_eq!(config.credentials.app_key, None);
        assert_eq!(config.sensor.source, SensorKind::M4Proxy);
        assert_eq!(config.sensor.timeout_secs, 10);
    }

    #[test]
    fn example_file_matches_defaults() {
        let text = include_str!("../lora-node.example.toml");
        assert_eq!(NodeConfig::parse(text).unwrap(), NodeConfig::default());
    }

    #[test]
    fn unknown_band_is_rejected() {
        let err = NodeConfig::parse("[modem]\nband = \"XX999\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("XX999"));
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(NodeConfig::parse("[modem]\nspeed = 9600\n").is_err());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[uplink]\ninterval_secs = 60\nconfirmed = true").unwrap();
        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.uplink.interval_secs, 60);
        assert!(config.uplink.confirmed);
    }

    #[test]
    fn load_missing_file_names_path() {
        let err = NodeConfig::load(Path::new("/nonexistent/lora-node.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/lora-node.toml"));
    }
}
