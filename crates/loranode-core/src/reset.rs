//! Hardware reset control for the modem.
//!
//! The modem's reset input is wired to a GPIO on the host. Before a session
//! is trusted the line is pulsed with a fixed timing sequence that brings
//! the modem to a known state; [`pulse_reset`] implements that sequence on
//! top of any [`ResetLine`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;

/// How long the line is held asserted before the reset pulse.
pub const RESET_ASSERT_HOLD: Duration = Duration::from_millis(100);
/// How long the line is held deasserted (the reset pulse itself).
pub const RESET_PULSE_HOLD: Duration = Duration::from_millis(100);
/// How long the modem needs after release before it accepts commands.
pub const RESET_BOOT_WAIT: Duration = Duration::from_millis(300);

/// A digital output driving the modem's reset input.
#[async_trait]
pub trait ResetLine: Send + Sync {
    /// Drive the line: `true` asserts it (modem running), `false`
    /// deasserts it (modem held in reset).
    async fn set(&mut self, asserted: bool) -> Result<()>;
}

/// Run the reset sequence: assert, hold, deassert, hold, assert, wait for
/// the modem to boot.
///
/// Bytes the modem prints while booting are still sitting in the input
/// buffer afterwards; the caller is expected to discard them.
pub async fn pulse_reset(line: &mut dyn ResetLine) -> Result<()> {
    debug!("resetting the modem");
    line.set(true).await?;
    tokio::time::sleep(RESET_ASSERT_HOLD).await;
    line.set(false).await?;
    tokio::time::sleep(RESET_PULSE_HOLD).await;
    line.set(true).await?;
    tokio::time::sleep(RESET_BOOT_WAIT).await;
    debug!("modem is alive");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    struct RecordingLine {
        started: Instant,
        log: Vec<(Duration, bool)>,
    }

    #[async_trait]
    impl ResetLine for RecordingLine {
        async fn set(&mut self, asserted: bool) -> Result<()> {
            self.log.push((self.started.elapsed(), asserted));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_follows_timing_sequence() {
        let mut line = RecordingLine {
            started: Instant::now(),
            log: Vec::new(),
        };
        pulse_reset(&mut line).await.unwrap();

        let levels: Vec<bool> = line.log.iter().map(|(_, level)| *level).collect();
        assert_eq!(levels, vec![true, false, true]);

        assert!(line.log[1].0 - line.log[0].0 >= RESET_ASSERT_HOLD);
        assert!(line.log[2].0 - line.log[1].0 >= RESET_PULSE_HOLD);
        assert!(line.started.elapsed() - line.log[2].0 >= RESET_BOOT_WAIT);
    }
}
