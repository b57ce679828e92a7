//! loranode-test-harness: Test utilities and mock collaborators for loranode.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the AT
//! engine without a modem attached, [`MockResetLine`] for observing the
//! reset sequence, and [`MockTcpServer`] for testing the sensor RPC client.

pub mod mock_reset;
pub mod mock_serial;
pub mod mock_tcp;

pub use mock_reset::MockResetLine;
pub use mock_serial::{MockEvent, MockHandle, MockTransport};
pub use mock_tcp::MockTcpServer;
