//! Telemetry collaborators for the LoRa node.
//!
//! - [`sensor`] -- the [`SensorSource`] trait, a fixed (emulated) source, and
//!   [`read_or_default`], which falls back to a default reading when the
//!   sensor cannot be reached.
//! - [`rpc`] -- [`M4ProxyClient`], a MessagePack-RPC client for the sensor
//!   sketch running on the companion microcontroller.
//! - [`lpp`] -- [`LppFrame`], a Cayenne LPP encoder producing the uplink
//!   payload.

pub mod lpp;
pub mod rpc;
pub mod sensor;

pub use lpp::LppFrame;
pub use rpc::M4ProxyClient;
pub use sensor::{DEFAULT_READING, FixedSensor, Reading, SensorSource, read_or_default};
