//! Modem session types: activation modes, credential properties, join
//! state, and the uplink request.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::band::Band;
use crate::error::{Error, Result};

/// Error returned when a configuration string names no known value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseValueError {
    kind: &'static str,
    value: String,
}

impl fmt::Display for ParseValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseValueError {}

// ---------------------------------------------------------------------------
// Activation mode
// ---------------------------------------------------------------------------

/// How the device obtains its network session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationMode {
    /// Activation by personalization: session keys are provisioned up front.
    Abp,
    /// Over-the-air activation: session keys are negotiated by joining.
    Otaa,
}

impl ActivationMode {
    /// The numeric code sent in `AT+MODE=<n>`.
    pub fn code(&self) -> u8 {
        match self {
            ActivationMode::Abp => 0,
            ActivationMode::Otaa => 1,
        }
    }
}

impl fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationMode::Abp => write!(f, "ABP"),
            ActivationMode::Otaa => write!(f, "OTAA"),
        }
    }
}

impl FromStr for ActivationMode {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ABP" => Ok(ActivationMode::Abp),
            "OTAA" => Ok(ActivationMode::Otaa),
            _ => Err(ParseValueError {
                kind: "activation mode",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Credential properties
// ---------------------------------------------------------------------------

/// A writable device credential or network parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Property {
    /// Application (join) EUI.
    AppEui,
    /// Application root key.
    AppKey,
    /// Device EUI.
    DevEui,
    /// Device address (ABP).
    DevAddr,
    /// Network session key (ABP).
    NwkSKey,
    /// Network identifier.
    NwkId,
    /// Application session key (ABP).
    AppSKey,
}

const ALL_PROPERTIES: &[Property] = &[
    Property::AppEui,
    Property::AppKey,
    Property::DevEui,
    Property::DevAddr,
    Property::NwkSKey,
    Property::NwkId,
    Property::AppSKey,
];

impl Property {
    /// The write command prefix; the value is appended directly.
    pub fn command_prefix(&self) -> &'static str {
        match self {
            Property::AppEui => "AT+APPEUI=",
            Property::AppKey => "AT+APPKEY=",
            Property::DevEui => "AT+DEVEUI=",
            Property::DevAddr => "AT+DEVADDR=",
            Property::NwkSKey => "AT+NWKSKEY=",
            Property::NwkId => "AT+IDNWK=",
            Property::AppSKey => "AT+APPSKEY=",
        }
    }

    /// Configuration name (e.g. "APP_EUI").
    pub fn name(&self) -> &'static str {
        match self {
            Property::AppEui => "APP_EUI",
            Property::AppKey => "APP_KEY",
            Property::DevEui => "DEV_EUI",
            Property::DevAddr => "DEV_ADDR",
            Property::NwkSKey => "NWKS_KEY",
            Property::NwkId => "NWK_ID",
            Property::AppSKey => "APPS_KEY",
        }
    }

    /// Number of hex digits the value must have, if the format is fixed.
    pub fn hex_width(&self) -> Option<usize> {
        match self {
            Property::AppEui | Property::DevEui => Some(16),
            Property::AppKey | Property::NwkSKey | Property::AppSKey => Some(32),
            Property::DevAddr => Some(8),
            Property::NwkId => None,
        }
    }

    /// Check that `value` can be written for this property.
    ///
    /// Rejects empty values and anything containing control characters
    /// (which would split the command line), and enforces the hex width
    /// of EUIs, keys and addresses.
    pub fn validate(&self, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(Error::InvalidParameter(format!("{} is empty", self.name())));
        }
        if value.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(Error::InvalidParameter(format!(
                "{} contains whitespace or control characters",
                self.name()
            )));
        }
        if let Some(width) = self.hex_width() {
            if value.len() != width || !value.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::InvalidParameter(format!(
                    "{} must be {width} hex digits, got '{value}'",
                    self.name()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Property {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        ALL_PROPERTIES
            .iter()
            .copied()
            .find(|p| p.name() == normalized)
            .ok_or_else(|| ParseValueError {
                kind: "property",
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Join handshake
// ---------------------------------------------------------------------------

/// Progress of the OTAA join handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinState {
    /// Nothing done yet (or a fresh attempt was started).
    #[default]
    Idle,
    /// The modem is in OTAA mode.
    ModeSet,
    /// At least one credential has been written.
    CredentialsSet,
    /// `AT+JOIN` issued, waiting for the network.
    Joining,
    /// The network accepted the join.
    Joined,
    /// A step of the handshake failed; a new attempt restarts from `Idle`.
    JoinFailed,
}

impl JoinState {
    /// Whether the handshake has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JoinState::Joined | JoinState::JoinFailed)
    }
}

/// One command of the join sequence, used to report where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStep {
    /// `AT+MODE=1`.
    SetMode,
    /// A credential write.
    SetProperty(Property),
    /// `AT+JOIN`.
    Join,
}

impl fmt::Display for JoinStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinStep::SetMode => write!(f, "mode switch"),
            JoinStep::SetProperty(p) => write!(f, "writing {p}"),
            JoinStep::Join => write!(f, "join"),
        }
    }
}

/// Credentials for an OTAA join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaaCredentials {
    /// Application (join) EUI, 16 hex digits.
    pub app_eui: String,
    /// Application root key, 32 hex digits.
    pub app_key: String,
    /// Device EUI override; the modem's built-in EUI is used when `None`.
    pub dev_eui: Option<String>,
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// What the session controller knows about the modem's configuration.
///
/// Updated only after the corresponding command has been acknowledged.
/// Not persisted; a new session starts empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Frequency plan, once configured.
    pub band: Option<Band>,
    /// Activation mode, once configured.
    pub mode: Option<ActivationMode>,
    /// Credentials written in this session.
    pub credentials: BTreeMap<Property, String>,
    /// Join handshake progress.
    pub join: JoinState,
}

impl SessionState {
    /// Whether the device may transmit under OTAA.
    pub fn is_joined(&self) -> bool {
        self.join == JoinState::Joined
    }
}

/// Identification strings read from the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Reply to `AT`.
    pub ping: String,
    /// Device (hardware) version.
    pub device_version: String,
    /// Firmware version.
    pub firmware_version: String,
    /// Device EUI, 16 hex digits.
    pub dev_eui: String,
}

// ---------------------------------------------------------------------------
// Uplink
// ---------------------------------------------------------------------------

/// One binary uplink transmission.
///
/// The declared size is always the payload length; the request is consumed
/// by the uplink framer and not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkRequest {
    payload: Vec<u8>,
    confirmed: bool,
}

impl UplinkRequest {
    /// Create an uplink request. Empty payloads are rejected.
    pub fn new(payload: impl Into<Vec<u8>>, confirmed: bool) -> Result<Self> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(Error::InvalidParameter("uplink payload is empty".into()));
        }
        Ok(UplinkRequest { payload, confirmed })
    }

    /// The bytes to transmit.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Declared size, always `payload().len()`.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Whether the network must acknowledge the uplink.
    pub fn confirmed(&self) -> bool {
        self.confirmed
    }
}
