//! ModemBuilder -- fluent builder for opening a [`LoraModem`] session.
//!
//! Opening a session is an explicit step with a documented side effect: the
//! modem is reset through its reset line and everything it printed while
//! booting is discarded before the first command is sent.
//!
//! # Example
//!
//! ```no_run
//! use loranode_at::ModemBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> loranode_core::Result<()> {
//! let modem = ModemBuilder::new()
//!     .serial_port("/dev/ttymxc3")
//!     .command_timeout(Duration::from_secs(5))
//!     .open()
//!     .await?;
//! println!("EUI: {}", modem.device_eui().await?);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use loranode_core::error::{Error, Result};
use loranode_core::events::ModemEvent;
use loranode_core::reset::{ResetLine, pulse_reset};
use loranode_core::transport::Transport;
use loranode_transport::{DEFAULT_RESET_GPIO, SerialConfig, SerialTransport, SysfsGpio};

use crate::io::{IoConfig, spawn_io_task};
use crate::modem::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_JOIN_TIMEOUT, LoraModem};

/// Fluent builder for [`LoraModem`].
///
/// Defaults match the modem on the Max carrier: 19200 baud 8N2, reset on
/// GPIO 163, 5 s command timeout, 60 s join timeout, 1 s raw read timeout.
pub struct ModemBuilder {
    serial_port: Option<String>,
    serial_config: SerialConfig,
    command_timeout: Duration,
    join_timeout: Duration,
    read_timeout: Duration,
    reset_gpio: Option<u32>,
    reset_line: Option<Box<dyn ResetLine>>,
    event_capacity: usize,
}

impl ModemBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        ModemBuilder {
            serial_port: None,
            serial_config: SerialConfig::default(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            read_timeout: IoConfig::default().read_timeout,
            reset_gpio: Some(DEFAULT_RESET_GPIO),
            reset_line: None,
            event_capacity: 64,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttymxc3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the baud rate (default: 19200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.serial_config.baud_rate = baud;
        self
    }

    /// Replace the whole serial configuration.
    pub fn serial_config(mut self, config: SerialConfig) -> Self {
        self.serial_config = config;
        self
    }

    /// Set the timeout for a single command (default: 5 s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the timeout for the join handshake (default: 60 s).
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Set how long one raw transport read may block (default: 1 s).
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Use sysfs GPIO `number` as the reset line when opening a serial
    /// session (default: 163).
    pub fn reset_gpio(mut self, number: u32) -> Self {
        self.reset_gpio = Some(number);
        self
    }

    /// Skip the hardware reset. The input buffer is still discarded.
    pub fn without_reset(mut self) -> Self {
        self.reset_gpio = None;
        self.reset_line = None;
        self
    }

    /// Use a caller-provided reset line; takes precedence over
    /// [`reset_gpio`](Self::reset_gpio).
    pub fn reset_line(mut self, line: Box<dyn ResetLine>) -> Self {
        self.reset_line = Some(line);
        self
    }

    /// Capacity of the event broadcast channel (default: 64).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Open a session on a caller-provided transport.
    ///
    /// This is the entry point for testing (pass a `MockTransport` from
    /// `loranode-test-harness`). Only an explicit
    /// [`reset_line`](Self::reset_line) is pulsed here; the GPIO number is
    /// used by [`open`](Self::open).
    pub async fn open_with_transport(self, mut transport: Box<dyn Transport>) -> Result<LoraModem> {
        match self.reset_line {
            Some(mut line) => pulse_reset(line.as_mut()).await?,
            None => info!("no reset line configured, modem not reset"),
        }
        transport.clear_input().await?;

        let (event_tx, first_events) = broadcast::channel(self.event_capacity);
        let config = IoConfig {
            read_timeout: self.read_timeout,
            ..IoConfig::default()
        };
        let io = spawn_io_task(transport, config, event_tx.clone());
        let _ = event_tx.send(ModemEvent::Connected);
        info!("modem session open");

        Ok(LoraModem::new(
            io,
            event_tx,
            first_events,
            self.command_timeout,
            self.join_timeout,
        ))
    }

    /// Open the serial port, reset the modem, and start the session.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub async fn open(mut self) -> Result<LoraModem> {
        let port = self
            .serial_port
            .take()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for open()".into()))?;

        let transport = SerialTransport::open_with_config(&port, self.serial_config.clone()).await?;

        if self.reset_line.is_none() {
            if let Some(number) = self.reset_gpio {
                let gpio = SysfsGpio::open(number).await?;
                self.reset_line = Some(Box::new(gpio));
            }
        }

        self.open_with_transport(Box::new(transport)).await
    }
}

impl Default for ModemBuilder {
    fn default() -> Self {
        Self::new()
    }
}
