//! Error types for loranode.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, modem rejections,
//! timeouts and sequence aborts are all captured here.

use crate::types::JoinStep;

/// The error type for all loranode operations.
///
/// The variants split into two groups. Transport-level failures
/// ([`Transport`](Error::Transport), [`ConnectionLost`](Error::ConnectionLost),
/// [`Io`](Error::Io)) mean the serial link is unusable and the process
/// cannot continue. Everything else affects a single command or sequence
/// and can be retried with a fresh attempt; see [`Error::is_fatal`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open/read/write, GPIO).
    #[error("transport error: {0}")]
    Transport(String),

    /// The modem sent something that could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the reply to a command.
    ///
    /// This typically means the modem is still booting, the baud rate is
    /// wrong, or the network never answered a join request.
    #[error("timeout waiting for response")]
    Timeout,

    /// The modem answered the pending command with `+ERR`.
    #[error("modem rejected {command}: {response}")]
    Modem {
        /// The command that was rejected.
        command: String,
        /// The raw `+ERR...` line.
        response: String,
    },

    /// An invalid parameter was passed to a modem command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A multi-step sequence (e.g. the OTAA join) aborted at `step`.
    #[error("{step} failed: {source}")]
    StepFailed {
        /// The step that failed.
        step: JoinStep,
        /// Why it failed.
        #[source]
        source: Box<Error>,
    },

    /// The remote sensor process could not be reached or answered badly.
    #[error("sensor RPC unavailable: {0}")]
    RpcUnavailable(String),

    /// No connection to the modem has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the modem was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error leaves the modem link unusable.
    ///
    /// Fatal errors should terminate the process; all other errors abandon
    /// only the operation that produced them.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Transport(_) | Error::ConnectionLost | Error::NotConnected | Error::Io(_) => {
                true
            }
            Error::StepFailed { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_modem() {
        let e = Error::Modem {
            command: "AT+JOIN".into(),
            response: "+ERR=-1".into(),
        };
        assert_eq!(e.to_string(), "modem rejected AT+JOIN: +ERR=-1");
    }

    #[test]
    fn error_display_step_failed() {
        let e = Error::StepFailed {
            step: JoinStep::Join,
            source: Box::new(Error::Timeout),
        };
        assert_eq!(e.to_string(), "join failed: timeout waiting for response");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn fatal_classification() {
        assert!(Error::Transport("x".into()).is_fatal());
        assert!(Error::ConnectionLost.is_fatal());
        assert!(!Error::Timeout.is_fatal());
        assert!(!Error::RpcUnavailable("down".into()).is_fatal());
        assert!(
            !Error::Modem {
                command: "AT".into(),
                response: "+ERR".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn step_failed_inherits_fatality() {
        let timeout = Error::StepFailed {
            step: JoinStep::SetMode,
            source: Box::new(Error::Timeout),
        };
        assert!(!timeout.is_fatal());

        let lost = Error::StepFailed {
            step: JoinStep::SetMode,
            source: Box::new(Error::ConnectionLost),
        };
        assert!(lost.is_fatal());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
