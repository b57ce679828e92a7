//! Cayenne LPP payload encoding.
//!
//! Only the two data types the node reports are supported. Each entry is
//! `channel, type, value` with the value in big-endian fixed point.

use bytes::{BufMut, BytesMut};

use loranode_core::error::{Error, Result};

/// Temperature, 0.1 degC per bit, signed 16-bit.
pub const LPP_TEMPERATURE: u8 = 0x67;
/// Relative humidity, 0.5 % per bit, unsigned 8-bit.
pub const LPP_RELATIVE_HUMIDITY: u8 = 0x68;

/// A Cayenne LPP frame under construction.
#[derive(Debug, Clone, Default)]
pub struct LppFrame {
    buf: BytesMut,
}

impl LppFrame {
    /// An empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a temperature in degrees Celsius on `channel`.
    ///
    /// The value is scaled by 10 and truncated toward zero.
    pub fn add_temperature(&mut self, channel: u8, celsius: f64) -> Result<&mut Self> {
        let scaled = (celsius * 10.0).trunc();
        if !scaled.is_finite() || scaled < f64::from(i16::MIN) || scaled > f64::from(i16::MAX) {
            return Err(Error::InvalidParameter(format!(
                "temperature {celsius} outside the LPP range"
            )));
        }
        self.buf.put_u8(channel);
        self.buf.put_u8(LPP_TEMPERATURE);
        self.buf.put_i16(scaled as i16);
        Ok(self)
    }

    /// Append a relative humidity in percent on `channel`.
    ///
    /// The value is scaled by 2 and truncated toward zero.
    pub fn add_humidity(&mut self, channel: u8, percent: f64) -> Result<&mut Self> {
        let scaled = (percent * 2.0).trunc();
        if !scaled.is_finite() || scaled < 0.0 || scaled > f64::from(u8::MAX) {
            return Err(Error::InvalidParameter(format!(
                "humidity {percent} outside the LPP range"
            )));
        }
        self.buf.put_u8(channel);
        self.buf.put_u8(LPP_RELATIVE_HUMIDITY);
        self.buf.put_u8(scaled as u8);
        Ok(self)
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether no entry has been added.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The encoded payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the frame, returning the encoded payload.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}
