//! Transport implementations for loranode.
//!
//! This crate provides concrete implementations of the traits in
//! `loranode-core`:
//!
//! - [`SerialTransport`]: the UART link to the modem, implementing
//!   [`Transport`](loranode_core::Transport)
//! - [`SysfsGpio`]: the modem reset line driven through the Linux sysfs GPIO
//!   interface, implementing [`ResetLine`](loranode_core::ResetLine)
//!
//! # Example
//!
//! ```no_run
//! use loranode_transport::{SerialConfig, SerialTransport};
//! use loranode_core::transport::Transport;
//!
//! # async fn example() -> loranode_core::Result<()> {
//! // 19200 baud, 8 data bits, no parity, 2 stop bits.
//! let mut transport =
//!     SerialTransport::open_with_config("/dev/ttymxc3", SerialConfig::default()).await?;
//! transport.send(b"AT\r").await?;
//! # Ok(())
//! # }
//! ```

pub mod gpio;
pub mod serial;

pub use gpio::{DEFAULT_RESET_GPIO, SysfsGpio};
pub use serial::{
    DEFAULT_BAUD_RATE, DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits,
};
