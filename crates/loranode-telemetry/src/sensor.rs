//! Temperature and humidity sources.

use async_trait::async_trait;
use tracing::{debug, warn};

use loranode_core::error::Result;

/// One temperature / relative humidity sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Degrees Celsius.
    pub temperature: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
}

/// Reading used when the sensor cannot be reached.
pub const DEFAULT_READING: Reading = Reading {
    temperature: 25.57,
    humidity: 60.05,
};

/// A source of temperature and humidity values.
///
/// Each call is independent and may fail on its own; implementations are
/// responsible for bounding how long a call can take.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Current temperature in degrees Celsius.
    async fn temperature(&self) -> Result<f64>;

    /// Current relative humidity in percent.
    async fn humidity(&self) -> Result<f64>;
}

/// A source that always returns the same reading. Used when no sensor is
/// attached.
#[derive(Debug, Clone)]
pub struct FixedSensor {
    reading: Reading,
}

impl FixedSensor {
    /// A source that always reports `reading`.
    pub fn new(reading: Reading) -> Self {
        Self { reading }
    }
}

impl Default for FixedSensor {
    fn default() -> Self {
        Self::new(DEFAULT_READING)
    }
}

#[async_trait]
impl SensorSource for FixedSensor {
    async fn temperature(&self) -> Result<f64> {
        Ok(self.reading.temperature)
    }

    async fn humidity(&self) -> Result<f64> {
        Ok(self.reading.humidity)
    }
}

/// Read both values from `source`, substituting [`DEFAULT_READING`] if
/// either call fails.
///
/// A sensor outage never aborts an uplink; it is logged and the default
/// values are sent instead.
pub async fn read_or_default(source: &dyn SensorSource) -> Reading {
    let reading = async {
        Ok::<_, loranode_core::Error>(Reading {
            temperature: source.temperature().await?,
            humidity: source.humidity().await?,
        })
    }
    .await;

    match reading {
        Ok(reading) => {
            debug!(
                temperature = reading.temperature,
                humidity = reading.humidity,
                "sensor read"
            );
            reading
        }
        Err(e) => {
            warn!(error = %e, "unable to read the sensor, using default values");
            DEFAULT_READING
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loranode_core::Error;

    struct BrokenHumidity;

    #[async_trait]
    impl SensorSource for BrokenHumidity {
        async fn temperature(&self) -> Result<f64> {
            Ok(19.0)
        }

        async fn humidity(&self) -> Result<f64> {
            Err(Error::RpcUnavailable("humidity timed out".into()))
        }
    }

    #[tokio::test]
    async fn fixed_sensor_returns_its_reading() {
        let sensor = FixedSensor::new(Reading {
            temperature: -4.5,
            humidity: 80.0,
        });
        let reading = read_or_default(&sensor).await;
        assert_eq!(reading.temperature, -4.5);
        assert_eq!(reading.humidity, 80.0);
    }

    #[tokio::test]
    async fn default_fixed_sensor_uses_default_reading() {
        assert_eq!(read_or_default(&FixedSensor::default()).await, DEFAULT_READING);
    }

    #[tokio::test]
    async fn any_failure_substitutes_both_values() {
        let reading = read_or_default(&BrokenHumidity).await;
        assert_eq!(reading, DEFAULT_READING);
    }
}
