//! Modem reset line driven through the Linux sysfs GPIO interface.
//!
//! On the carrier board the modem's reset input is GPIO 163 (`PF4` on the
//! companion microcontroller). [`SysfsGpio::open`] exports the pin if
//! needed, configures it as an output, and then drives it by writing `1` or
//! `0` to its `value` file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use loranode_core::error::{Error, Result};
use loranode_core::reset::ResetLine;

/// GPIO number wired to the modem's reset input.
pub const DEFAULT_RESET_GPIO: u32 = 163;

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// After an export the kernel creates the pin's attribute files, and udev
/// adjusts their permissions, asynchronously.
const EXPORT_SETTLE_ATTEMPTS: u32 = 10;
const EXPORT_SETTLE_DELAY: Duration = Duration::from_millis(50);

/// A sysfs GPIO configured as an output.
#[derive(Debug)]
pub struct SysfsGpio {
    number: u32,
    value_path: PathBuf,
}

impl SysfsGpio {
    /// Export and configure GPIO `number` under `/sys/class/gpio`.
    pub async fn open(number: u32) -> Result<Self> {
        Self::open_at(SYSFS_GPIO_ROOT, number).await
    }

    /// Export and configure GPIO `number` under an arbitrary sysfs root.
    pub async fn open_at(root: impl AsRef<Path>, number: u32) -> Result<Self> {
        let root = root.as_ref();
        let pin_dir = root.join(format!("gpio{number}"));

        let exported = tokio::fs::metadata(&pin_dir).await.is_err();
        if exported {
            tracing::debug!(gpio = number, "exporting GPIO");
            write_attr(&root.join("export"), &number.to_string()).await?;
        }

        let direction = pin_dir.join("direction");
        let mut attempt = 1;
        loop {
            match write_attr(&direction, "out").await {
                Ok(()) => break,
                Err(e) if exported && attempt < EXPORT_SETTLE_ATTEMPTS => {
                    tracing::trace!(gpio = number, attempt, error = %e, "direction not writable yet");
                    attempt += 1;
                    tokio::time::sleep(EXPORT_SETTLE_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(gpio = number, "GPIO configured as output");

        Ok(Self {
            number,
            value_path: pin_dir.join("value"),
        })
    }

    /// The GPIO number.
    pub fn number(&self) -> u32 {
        self.number
    }
}

async fn write_attr(path: &Path, value: &str) -> Result<()> {
    tokio::fs::write(path, value)
        .await
        .map_err(|e| Error::Transport(format!("failed to write {}: {}", path.display(), e)))
}

#[async_trait]
impl ResetLine for SysfsGpio {
    async fn set(&mut self, asserted: bool) -> Result<()> {
        let level = if asserted { "1" } else { "0" };
        tracing::trace!(gpio = self.number, level, "driving reset line");
        write_attr(&self.value_path, level).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exports_missing_pin() {
        let root = tempfile::tempdir().unwrap();

        let result = SysfsGpio::open_at(root.path(), 163).await;
        // Without a kernel behind the export file, the pin directory never
        // appears and configuring the direction fails once retries run out.
        assert!(matches!(result, Err(Error::Transport(_))));
        let exported = std::fs::read_to_string(root.path().join("export")).unwrap();
        assert_eq!(exported, "163");
    }

    #[tokio::test]
    async fn waits_for_pin_directory_after_export() {
        let root = tempfile::tempdir().unwrap();
        let pin = root.path().join("gpio163");

        // Stands in for the kernel creating the pin directory a little
        // after the export write.
        let late_pin = pin.clone();
        let kernel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            std::fs::create_dir(&late_pin).unwrap();
        });

        let gpio = SysfsGpio::open_at(root.path(), 163).await.unwrap();
        kernel.await.unwrap();
        assert_eq!(gpio.number(), 163);
        assert_eq!(std::fs::read_to_string(root.path().join("export")).unwrap(), "163");
        assert_eq!(std::fs::read_to_string(pin.join("direction")).unwrap(), "out");
    }

    #[tokio::test]
    async fn already_exported_pin_is_configured() {
        let root = tempfile::tempdir().unwrap();
        let pin = root.path().join("gpio163");
        std::fs::create_dir(&pin).unwrap();

        let gpio = SysfsGpio::open_at(root.path(), 163).await.unwrap();
        assert_eq!(gpio.number(), 163);
        assert_eq!(std::fs::read_to_string(pin.join("direction")).unwrap(), "out");
        assert!(!root.path().join("export").exists());
    }

    #[tokio::test]
    async fn set_writes_level() {
        let root = tempfile::tempdir().unwrap();
        let pin = root.path().join("gpio7");
        std::fs::create_dir(&pin).unwrap();

        let mut gpio = SysfsGpio::open_at(root.path(), 7).await.unwrap();
        gpio.set(false).await.unwrap();
        assert_eq!(std::fs::read_to_string(pin.join("value")).unwrap(), "0");
        gpio.set(true).await.unwrap();
        assert_eq!(std::fs::read_to_string(pin.join("value")).unwrap(), "1");
    }

    #[tokio::test]
    async fn missing_root_is_transport_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("absent");
        let result = SysfsGpio::open_at(&missing, 163).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
