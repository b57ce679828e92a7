//! loranode-core: Core traits, types, and error definitions for loranode.
//!
//! This crate defines the modem-agnostic pieces that the AT driver, the
//! transports, and the node application share. Applications depend on these
//! types without pulling in a serial stack.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to the modem
//! - [`ResetLine`] -- the modem's hardware reset control, and [`pulse_reset`]
//! - [`ModemEvent`] -- asynchronous notifications from a modem session
//! - [`Error`] / [`Result`] -- error handling

pub mod band;
pub mod error;
pub mod events;
pub mod reset;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use loranode_core::*`.
pub use band::{Band, ParseBandError};
pub use error::{Error, Result};
pub use events::ModemEvent;
pub use reset::{ResetLine, pulse_reset};
pub use transport::Transport;
pub use types::*;
