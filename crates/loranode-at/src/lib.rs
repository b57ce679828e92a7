//! AT command engine for serial LoRa modems.
//!
//! This crate drives a LoRa modem that speaks a `\r`-terminated AT dialect
//! and reports status through unsolicited `+...` lines. It provides:
//!
//! - **Line framing** ([`protocol`]) -- split the inbound byte stream into
//!   lines and encode outbound command lines.
//! - **Classifier** ([`classify`]) -- an ordered rule table deciding, for each
//!   inbound line and the command awaiting a reply, whether the line answers
//!   that command, rejects it, acknowledges it, or is unhandled.
//! - **IO task and correlator** ([`io`]) -- one task owns the transport;
//!   [`ModemIo`] serializes command round-trips so at most one command is
//!   ever pending, and never waits past its timeout.
//! - **Command builders** ([`commands`]) -- AT command text, including the
//!   uplink framer.
//! - **Session controller** ([`modem`]) -- [`LoraModem`] sequences band
//!   setup, credential provisioning, the OTAA join, and uplinks.
//! - **Builder** ([`builder`]) -- [`ModemBuilder`] resets the modem and opens
//!   the session.
//!
//! # Example
//!
//! ```
//! use loranode_at::classify::{classify, Classified};
//! use loranode_at::commands::build_uplink;
//! use loranode_core::UplinkRequest;
//!
//! // `+OK` answers a ping...
//! assert_eq!(classify("+OK", Some("AT")), Classified::Matched(b"+OK".to_vec()));
//! // ...but not a pending join.
//! assert_eq!(classify("+OK", Some("AT+JOIN")), Classified::Unhandled);
//!
//! let request = UplinkRequest::new(vec![0x01, 0x67, 0x00, 0xFF], false).unwrap();
//! let (command, body) = build_uplink(&request);
//! assert_eq!(command, "AT+UTX 4");
//! assert_eq!(body.len(), 4);
//! ```

pub mod builder;
pub mod classify;
pub mod commands;
pub mod io;
pub mod modem;
pub mod protocol;

// Re-export the primary types for ergonomic `use loranode_at::*`.
pub use builder::ModemBuilder;
pub use io::{IoConfig, ModemIo};
pub use modem::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_JOIN_TIMEOUT, LoraModem};
