//! AT command builders and the uplink framer.
//!
//! All functions are pure: they produce command text (without the `\r`
//! terminator, which the IO task appends) and never perform I/O.
//!
//! # Command reference
//!
//! `AT` ping, `AT+DEV?` device version, `AT+VER?` firmware version,
//! `AT+DEVEUI?` EUI query, `AT+BAND=<n>` frequency plan, `AT+MODE=<n>`
//! activation mode, `AT+<PROPERTY>=<value>` credential writes, `AT+JOIN`,
//! `AT+JRBD` radio MAC address, and `AT+CTX <n>` / `AT+UTX <n>` followed by
//! `n` raw bytes for confirmed / unconfirmed uplinks.

use loranode_core::{ActivationMode, Band, Property, Result, UplinkRequest};

/// Build the ping command (`AT`).
pub fn cmd_ping() -> String {
    "AT".to_string()
}

/// Build the "read device version" command (`AT+DEV?`).
pub fn cmd_device_version() -> String {
    "AT+DEV?".to_string()
}

/// Build the "read firmware version" command (`AT+VER?`).
pub fn cmd_firmware_version() -> String {
    "AT+VER?".to_string()
}

/// Build the "read device EUI" command (`AT+DEVEUI?`).
pub fn cmd_device_eui() -> String {
    "AT+DEVEUI?".to_string()
}

/// Build the "read radio MAC address" command (`AT+JRBD`).
pub fn cmd_mac_address() -> String {
    "AT+JRBD".to_string()
}

/// Build a "set frequency plan" command (`AT+BAND=<code>`).
pub fn cmd_set_band(band: Band) -> String {
    format!("AT+BAND={}", band.code())
}

/// Build a "set activation mode" command (`AT+MODE=<code>`).
pub fn cmd_set_mode(mode: ActivationMode) -> String {
    format!("AT+MODE={}", mode.code())
}

/// Build a credential write, e.g. `AT+APPEUI=70B3D57ED0000000`.
///
/// The value is validated first; see [`Property::validate`].
pub fn cmd_set_property(property: Property, value: &str) -> Result<String> {
    property.validate(value)?;
    Ok(format!("{}{}", property.command_prefix(), value))
}

/// Build the join command (`AT+JOIN`).
pub fn cmd_join() -> String {
    "AT+JOIN".to_string()
}

/// Frame an uplink: the size-prefixed command line and the raw body that
/// follows it.
///
/// The declared size is always the payload length. No fragmentation is
/// done; a payload too large for one frame is rejected by the modem itself.
pub fn build_uplink(request: &UplinkRequest) -> (String, &[u8]) {
    let verb = if request.confirmed() {
        "AT+CTX"
    } else {
        "AT+UTX"
    };
    (format!("{} {}", verb, request.size()), request.payload())
}
