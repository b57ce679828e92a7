//! Asynchronous modem event types.
//!
//! Events are emitted by a modem session through a [`tokio::sync::broadcast`]
//! channel. They are diagnostics and progress notifications only; command
//! replies are never delivered this way.

use crate::band::Band;
use crate::types::{ActivationMode, JoinState};

/// An event emitted by a modem session.
///
/// Delivered on a best-effort basis through a bounded broadcast channel;
/// slow consumers may miss events.
#[derive(Debug, Clone)]
pub enum ModemEvent {
    /// The modem was reset and the session is ready for commands.
    Connected,

    /// An inbound line matched no classification rule and was dropped.
    Unhandled {
        /// The raw line as received.
        line: String,
    },

    /// The modem answered the pending command with `+ERR`.
    ModemError {
        /// The command that was pending.
        command: String,
        /// The raw error line.
        response: String,
    },

    /// The join handshake moved to a new state.
    JoinStateChanged {
        /// The state just entered.
        state: JoinState,
    },

    /// An uplink was accepted by the modem.
    UplinkSent {
        /// Payload size in bytes.
        size: usize,
        /// Whether delivery was requested as confirmed.
        confirmed: bool,
    },

    /// The modem accepted a new frequency plan.
    BandConfigured {
        /// The band now in use.
        band: Band,
    },

    /// The modem accepted a new activation mode.
    ModeChanged {
        /// The mode now in use.
        mode: ActivationMode,
    },

    /// The connection to the modem was lost.
    Disconnected,
}
