//! LoRaWAN regional frequency plans.
//!
//! The modem selects its channel plan with `AT+BAND=<n>`. [`Band`] maps the
//! regional plan names used in configuration files to those numeric codes.
//!
//! # Example
//!
//! ```
//! use loranode_core::Band;
//!
//! let band: Band = "EU868".parse().unwrap();
//! assert_eq!(band.code(), 5);
//! assert_eq!(band.to_string(), "EU868");
//! ```

use std::fmt;
use std::str::FromStr;

/// Regional frequency plan supported by the modem firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    /// Asia 923 MHz.
    As923,
    /// Australia 915 MHz.
    Au915,
    /// Europe 868 MHz.
    Eu868,
    /// Korea 920 MHz.
    Kr920,
    /// India 865 MHz.
    In865,
    /// United States 915 MHz.
    Us915,
    /// United States 915 MHz, hybrid (8-channel) sub-band operation.
    Us915Hybrid,
}

/// All bands in modem code order.
const ALL_BANDS: &[Band] = &[
    Band::As923,
    Band::Au915,
    Band::Eu868,
    Band::Kr920,
    Band::In865,
    Band::Us915,
    Band::Us915Hybrid,
];

impl Band {
    /// The numeric code sent in `AT+BAND=<n>`.
    pub fn code(&self) -> u8 {
        match self {
            Band::As923 => 0,
            Band::Au915 => 1,
            Band::Eu868 => 5,
            Band::Kr920 => 6,
            Band::In865 => 7,
            Band::Us915 => 8,
            Band::Us915Hybrid => 9,
        }
    }

    /// Returns the band for a modem code, if it is one the firmware knows.
    pub fn from_code(code: u8) -> Option<Band> {
        ALL_BANDS.iter().copied().find(|band| band.code() == code)
    }

    /// Returns the regional plan name (e.g. "EU868", "US915_HYBRID").
    pub fn name(&self) -> &'static str {
        match self {
            Band::As923 => "AS923",
            Band::Au915 => "AU915",
            Band::Eu868 => "EU868",
            Band::Kr920 => "KR920",
            Band::In865 => "IN865",
            Band::Us915 => "US915",
            Band::Us915Hybrid => "US915_HYBRID",
        }
    }

    /// Returns a slice of all bands in code order.
    pub fn all() -> &'static [Band] {
        ALL_BANDS
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Error returned when a string cannot be parsed into a [`Band`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBandError(String);

impl fmt::Display for ParseBandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown band: '{}'", self.0)
    }
}

impl std::error::Error for ParseBandError {}

impl FromStr for Band {
    type Err = ParseBandError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        ALL_BANDS
            .iter()
            .copied()
            .find(|band| band.name() == normalized)
            .ok_or_else(|| ParseBandError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_firmware_table() {
        assert_eq!(Band::As923.code(), 0);
        assert_eq!(Band::Au915.code(), 1);
        assert_eq!(Band::Eu868.code(), 5);
        assert_eq!(Band::Kr920.code(), 6);
        assert_eq!(Band::In865.code(), 7);
        assert_eq!(Band::Us915.code(), 8);
        assert_eq!(Band::Us915Hybrid.code(), 9);
    }

    #[test]
    fn from_code_unknown() {
        assert_eq!(Band::from_code(2), None);
        assert_eq!(Band::from_code(10), None);
    }

    #[test]
    fn from_str_case_insensitive() {
        assert_eq!("eu868".parse::<Band>().unwrap(), Band::Eu868);
        assert_eq!("US915_hybrid".parse::<Band>().unwrap(), Band::Us915Hybrid);
        assert_eq!("us915-hybrid".parse::<Band>().unwrap(), Band::Us915Hybrid);
    }

    #[test]
    fn from_str_invalid() {
        assert!("EU433".parse::<Band>().is_err());
        assert!("".parse::<Band>().is_err());
    }

    #[test]
    fn display_round_trip() {
        for &band in Band::all() {
            let parsed: Band = band.to_string().parse().expect("should round-trip");
            assert_eq!(band, parsed);
            assert_eq!(Band::from_code(band.code()), Some(band));
        }
    }
}
