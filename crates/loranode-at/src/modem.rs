//! LoraModem -- the session controller for an AT-command LoRa modem.
//!
//! This module ties the command builders ([`commands`]) to the correlator
//! ([`ModemIo`]) and sequences the multi-step protocols: band setup, mode
//! switch, credential provisioning, the OTAA join handshake, and uplinks.
//!
//! [`SessionState`] is updated only after the modem has acknowledged the
//! corresponding command; inbound lines never touch it directly.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use loranode_core::error::{Error, Result};
use loranode_core::events::ModemEvent;
use loranode_core::types::*;
use loranode_core::Band;

use crate::commands;
use crate::io::ModemIo;

/// Default timeout for a single command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
/// Default timeout for the join handshake.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(60);

/// A connected LoRa modem session.
///
/// Constructed via [`ModemBuilder`](crate::builder::ModemBuilder), which
/// resets the modem and discards its boot output before the session is
/// handed out. Queries take `&self`; operations that change the session
/// state take `&mut self`.
pub struct LoraModem {
    io: ModemIo,
    event_tx: broadcast::Sender<ModemEvent>,
    /// Receiver created with the channel; handed to the first subscriber so
    /// events emitted while opening are not lost.
    first_subscriber: Mutex<Option<broadcast::Receiver<ModemEvent>>>,
    state: SessionState,
    command_timeout: Duration,
    join_timeout: Duration,
}

impl LoraModem {
    /// Create a session on top of a running IO task.
    ///
    /// Called by [`ModemBuilder`](crate::builder::ModemBuilder); callers
    /// should use the builder API instead.
    pub(crate) fn new(
        io: ModemIo,
        event_tx: broadcast::Sender<ModemEvent>,
        first_subscriber: broadcast::Receiver<ModemEvent>,
        command_timeout: Duration,
        join_timeout: Duration,
    ) -> Self {
        LoraModem {
            io,
            event_tx,
            first_subscriber: Mutex::new(Some(first_subscriber)),
            state: SessionState::default(),
            command_timeout,
            join_timeout,
        }
    }

    /// Subscribe to session events.
    ///
    /// The first subscriber also sees what was emitted while the session was
    /// opened, starting with [`ModemEvent::Connected`]; later subscribers see
    /// only events sent after they subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        let first = self
            .first_subscriber
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        first.unwrap_or_else(|| self.event_tx.subscribe())
    }

    /// What the session knows about the modem's configuration.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The underlying correlator, for commands this type does not wrap.
    pub fn io(&self) -> &ModemIo {
        &self.io
    }

    /// The per-command timeout in use.
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Ping the modem. Returns the raw reply (`+OK`).
    pub async fn ping(&self) -> Result<Vec<u8>> {
        self.io
            .command(&commands::cmd_ping(), self.command_timeout)
            .await
    }

    /// Read the device (hardware) version.
    pub async fn device_version(&self) -> Result<String> {
        self.query_text(&commands::cmd_device_version()).await
    }

    /// Read the firmware version.
    pub async fn firmware_version(&self) -> Result<String> {
        self.query_text(&commands::cmd_firmware_version()).await
    }

    /// Read the device EUI (16 hex digits).
    pub async fn device_eui(&self) -> Result<String> {
        self.query_text(&commands::cmd_device_eui()).await
    }

    /// Read the radio MAC address, formatted `AA:BB:CC:DD:EE:FF`.
    pub async fn mac_address(&self) -> Result<String> {
        self.query_text(&commands::cmd_mac_address()).await
    }

    /// Read everything needed to register the device with a network server.
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        let ping = String::from_utf8_lossy(&self.ping().await?).into_owned();
        let device_version = self.device_version().await?;
        let firmware_version = self.firmware_version().await?;
        let dev_eui = self.device_eui().await?;
        Ok(DeviceInfo {
            ping,
            device_version,
            firmware_version,
            dev_eui,
        })
    }

    async fn query_text(&self, command: &str) -> Result<String> {
        let payload = self.io.command(command, self.command_timeout).await?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    // -----------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------

    /// Select the frequency plan.
    pub async fn configure_band(&mut self, band: Band) -> Result<()> {
        self.io
            .command(&commands::cmd_set_band(band), self.command_timeout)
            .await?;
        info!(%band, "band configured");
        self.state.band = Some(band);
        let _ = self.event_tx.send(ModemEvent::BandConfigured { band });
        Ok(())
    }

    /// Switch the activation mode.
    ///
    /// Switching to OTAA moves the join handshake to
    /// [`JoinState::ModeSet`]; switching to ABP leaves it idle.
    pub async fn change_mode(&mut self, mode: ActivationMode) -> Result<()> {
        self.io
            .command(&commands::cmd_set_mode(mode), self.command_timeout)
            .await?;
        info!(%mode, "activation mode changed");
        self.state.mode = Some(mode);
        let _ = self.event_tx.send(ModemEvent::ModeChanged { mode });
        match mode {
            ActivationMode::Otaa => self.set_join_state(JoinState::ModeSet),
            ActivationMode::Abp => self.set_join_state(JoinState::Idle),
        }
        Ok(())
    }

    /// Write one credential or network parameter.
    ///
    /// The value is validated before anything is sent.
    pub async fn change_property(&mut self, property: Property, value: &str) -> Result<()> {
        let command = commands::cmd_set_property(property, value)?;
        self.io.command(&command, self.command_timeout).await?;
        debug!(%property, "property written");
        self.state.credentials.insert(property, value.to_string());
        if matches!(
            self.state.join,
            JoinState::ModeSet | JoinState::CredentialsSet
        ) {
            self.set_join_state(JoinState::CredentialsSet);
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Join
    // -----------------------------------------------------------------

    /// Issue `AT+JOIN` and wait up to `timeout` for the network to accept.
    ///
    /// Ends in [`JoinState::Joined`] or [`JoinState::JoinFailed`].
    pub async fn join(&mut self, timeout: Duration) -> Result<()> {
        self.set_join_state(JoinState::Joining);
        match self.io.command(&commands::cmd_join(), timeout).await {
            Ok(_) => {
                self.set_join_state(JoinState::Joined);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "join failed");
                self.set_join_state(JoinState::JoinFailed);
                Err(e)
            }
        }
    }

    /// Run the full OTAA handshake: mode switch, credential writes, join.
    ///
    /// Every attempt starts from [`JoinState::Idle`]. Nothing is retried; the
    /// first failing step aborts the sequence and is reported as
    /// [`Error::StepFailed`]. Credentials are validated up front, so a
    /// malformed key never reaches the modem.
    pub async fn join_otaa(&mut self, credentials: &OtaaCredentials) -> Result<()> {
        let mut writes = vec![
            (Property::AppEui, credentials.app_eui.as_str()),
            (Property::AppKey, credentials.app_key.as_str()),
        ];
        if let Some(dev_eui) = credentials.dev_eui.as_deref() {
            writes.push((Property::DevEui, dev_eui));
        }
        for (property, value) in &writes {
            property.validate(value)?;
        }

        self.set_join_state(JoinState::Idle);

        if let Err(e) = self.change_mode(ActivationMode::Otaa).await {
            return Err(self.abort_join(JoinStep::SetMode, e));
        }
        for (property, value) in writes {
            if let Err(e) = self.change_property(property, value).await {
                return Err(self.abort_join(JoinStep::SetProperty(property), e));
            }
        }

        info!("joining network");
        let timeout = self.join_timeout;
        self.join(timeout).await.map_err(|e| Error::StepFailed {
            step: JoinStep::Join,
            source: Box::new(e),
        })?;
        info!("joined network");
        Ok(())
    }

    fn abort_join(&mut self, step: JoinStep, source: Error) -> Error {
        warn!(%step, error = %source, "join sequence aborted");
        self.set_join_state(JoinState::JoinFailed);
        Error::StepFailed {
            step,
            source: Box::new(source),
        }
    }

    fn set_join_state(&mut self, state: JoinState) {
        if self.state.join != state {
            debug!(from = ?self.state.join, to = ?state, "join state changed");
            self.state.join = state;
            let _ = self.event_tx.send(ModemEvent::JoinStateChanged { state });
        }
    }

    // -----------------------------------------------------------------
    // Uplink
    // -----------------------------------------------------------------

    /// Transmit one uplink and wait for the modem to accept it.
    pub async fn send_uplink(&mut self, request: UplinkRequest) -> Result<()> {
        if self.state.mode == Some(ActivationMode::Otaa) && !self.state.is_joined() {
            warn!("sending uplink before the join completed");
        }
        let (command, body) = commands::build_uplink(&request);
        self.io
            .command_with_binary(&command, body, self.command_timeout)
            .await?;
        info!(
            size = request.size(),
            confirmed = request.confirmed(),
            "uplink sent"
        );
        let _ = self.event_tx.send(ModemEvent::UplinkSent {
            size: request.size(),
            confirmed: request.confirmed(),
        });
        Ok(())
    }

    /// End the session: stop the IO task and close the transport.
    pub async fn close(self) -> Result<()> {
        let mut transport = self.io.shutdown().await?;
        transport.close().await?;
        let _ = self.event_tx.send(ModemEvent::Disconnected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{IoConfig, spawn_io_task};
    use loranode_test_harness::{MockHandle, MockTransport};
    use tokio::time::Instant;

    const APP_EUI: &str = "70B3D57ED0000000";
    const APP_KEY: &str = "000102030405060708090A0B0C0D0E0F";

    fn make_test_modem(mock: MockTransport) -> LoraModem {
        let (event_tx, first_events) = broadcast::channel(64);
        let io = spawn_io_task(Box::new(mock), IoConfig::default(), event_tx.clone());
        LoraModem::new(
            io,
            event_tx,
            first_events,
            DEFAULT_COMMAND_TIMEOUT,
            DEFAULT_JOIN_TIMEOUT,
        )
    }

    fn credentials() -> OtaaCredentials {
        OtaaCredentials {
            app_eui: APP_EUI.into(),
            app_key: APP_KEY.into(),
            dev_eui: None,
        }
    }

    fn script_join_prelude(mock: &mut MockTransport) {
        mock.expect(b"AT+MODE=1\r", b"+OK\r");
        mock.expect(format!("AT+APPEUI={APP_EUI}\r").as_bytes(), b"+OK\r");
        mock.expect(format!("AT+APPKEY={APP_KEY}\r").as_bytes(), b"+OK\r");
    }

    fn join_states(events: &mut broadcast::Receiver<ModemEvent>) -> Vec<JoinState> {
        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ModemEvent::JoinStateChanged { state } = event {
                states.push(state);
            }
        }
        states
    }

    #[tokio::test(start_paused = true)]
    async fn device_info_runs_four_queries() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r", b"+OK\r");
        mock.expect(b"AT+DEV?\r", b"+OK=ARD-078\r");
        mock.expect(b"AT+VER?\r", b"+OK=1.2.1\r");
        mock.expect(b"AT+DEVEUI?\r", b"+OK=a8610a3233258909\r");
        let modem = make_test_modem(mock);

        let info = modem.device_info().await.unwrap();
        assert_eq!(
            info,
            DeviceInfo {
                ping: "+OK".into(),
                device_version: "ARD-078".into(),
                firmware_version: "1.2.1".into(),
                dev_eui: "a8610a3233258909".into(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mac_address_is_decoded() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+JRBD\r", b"+RRBDRES=0A1B2C3D4E5F\r");
        let modem = make_test_modem(mock);

        assert_eq!(modem.mac_address().await.unwrap(), "5F:4E:3D:2C:1B:0A");
    }

    #[tokio::test(start_paused = true)]
    async fn configure_band_updates_state() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+BAND=5\r", b"+OK\r");
        let mut modem = make_test_modem(mock);
        let mut events = modem.subscribe();

        modem.configure_band(Band::Eu868).await.unwrap();
        assert_eq!(modem.state().band, Some(Band::Eu868));
        assert!(matches!(
            events.try_recv().unwrap(),
            ModemEvent::BandConfigured { band: Band::Eu868 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_band_leaves_state_untouched() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+BAND=8\r", b"+ERR=-1\r");
        let mut modem = make_test_modem(mock);

        let result = modem.configure_band(Band::Us915).await;
        assert!(matches!(result, Err(Error::Modem { .. })));
        assert_eq!(modem.state().band, None);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_property_is_not_sent() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let mut modem = make_test_modem(mock);

        let result = modem.change_property(Property::AppKey, "tooshort").await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
        assert!(handle.sent_data().is_empty());
        assert!(modem.state().credentials.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn join_sequence_reaches_joined() {
        let mut mock = MockTransport::new();
        script_join_prelude(&mut mock);
        mock.expect_delayed(b"AT+JOIN\r", Duration::from_secs(2), b"+EVENT=1,1\r");
        let mut modem = make_test_modem(mock);
        let mut events = modem.subscribe();

        let start = Instant::now();
        modem.join_otaa(&credentials()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));

        assert_eq!(modem.state().join, JoinState::Joined);
        assert!(modem.state().is_joined());
        assert_eq!(modem.state().mode, Some(ActivationMode::Otaa));
        assert_eq!(
            modem.state().credentials.get(&Property::AppKey).map(String::as_str),
            Some(APP_KEY)
        );
        assert_eq!(
            join_states(&mut events),
            vec![
                JoinState::ModeSet,
                JoinState::CredentialsSet,
                JoinState::Joining,
                JoinState::Joined
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn join_with_device_eui_override() {
        let mut mock = MockTransport::new();
        script_join_prelude(&mut mock);
        mock.expect(b"AT+DEVEUI=0011223344556677\r", b"+OK\r");
        mock.expect_replies(
            b"AT+JOIN\r",
            &[
                (Duration::from_millis(100), b"+ACK\r"),
                (Duration::from_secs(5), b"+EVENT=1,1\r"),
            ],
        );
        let mut modem = make_test_modem(mock);

        let mut creds = credentials();
        creds.dev_eui = Some("0011223344556677".into());
        modem.join_otaa(&creds).await.unwrap();
        assert!(modem.state().is_joined());
        assert!(modem.state().credentials.contains_key(&Property::DevEui));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_step_is_reported() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+MODE=1\r", b"+OK\r");
        mock.expect(format!("AT+APPEUI={APP_EUI}\r").as_bytes(), b"+OK\r");
        mock.expect(format!("AT+APPKEY={APP_KEY}\r").as_bytes(), b"+ERR=-3\r");
        let handle = mock.handle();
        let mut modem = make_test_modem(mock);

        let err = modem.join_otaa(&credentials()).await.unwrap_err();
        match err {
            Error::StepFailed { step, source } => {
                assert_eq!(step, JoinStep::SetProperty(Property::AppKey));
                assert!(matches!(*source, Error::Modem { .. }));
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }
        assert_eq!(modem.state().join, JoinState::JoinFailed);
        // The join itself was never attempted.
        assert_eq!(handle.sent_data().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn join_timeout_fails_handshake() {
        let mut mock = MockTransport::new();
        script_join_prelude(&mut mock);
        mock.expect(b"AT+JOIN\r", b"+ACK\r");
        let mut modem = make_test_modem(mock);

        let start = Instant::now();
        let err = modem.join_otaa(&credentials()).await.unwrap_err();
        assert!(start.elapsed() >= DEFAULT_JOIN_TIMEOUT);
        assert!(matches!(
            err,
            Error::StepFailed {
                step: JoinStep::Join,
                ..
            }
        ));
        assert!(!err.is_fatal());
        assert_eq!(modem.state().join, JoinState::JoinFailed);
        assert_eq!(modem.io().pending_command(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_attempt_restarts_from_idle() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+MODE=1\r", b"+ERR\r");
        script_join_prelude(&mut mock);
        mock.expect(b"AT+JOIN\r", b"+EVENT=1,1\r");
        let mut modem = make_test_modem(mock);
        let mut events = modem.subscribe();

        assert!(modem.join_otaa(&credentials()).await.is_err());
        assert_eq!(modem.state().join, JoinState::JoinFailed);

        modem.join_otaa(&credentials()).await.unwrap();
        assert_eq!(
            join_states(&mut events),
            vec![
                JoinState::JoinFailed,
                JoinState::Idle,
                JoinState::ModeSet,
                JoinState::CredentialsSet,
                JoinState::Joining,
                JoinState::Joined
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unsolicited_lines_do_not_change_state() {
        let mock = MockTransport::new();
        let handle: MockHandle = mock.handle();
        let modem = make_test_modem(mock);
        let mut events = modem.subscribe();

        handle.push_inbound(b"+EVENT=1,1\r+OK\r");
        for _ in 0..2 {
            assert!(matches!(
                events.recv().await.unwrap(),
                ModemEvent::Unhandled { .. }
            ));
        }
        assert_eq!(modem.state(), &SessionState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn uplink_is_framed_and_reported() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+UTX 4\r", b"");
        mock.expect(&[0x00, 0x67, 0x00, 0xFF], b"+OK\r");
        let mut modem = make_test_modem(mock);
        let mut events = modem.subscribe();

        let request = UplinkRequest::new(vec![0x00, 0x67, 0x00, 0xFF], false).unwrap();
        modem.send_uplink(request).await.unwrap();
        assert!(matches!(
            events.try_recv().unwrap(),
            ModemEvent::UplinkSent {
                size: 4,
                confirmed: false
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_uplink_times_out() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+UTX 4\r", b"");
        mock.expect(&[1, 2, 3, 4], b"");
        let mut modem = make_test_modem(mock);

        let request = UplinkRequest::new(vec![1, 2, 3, 4], false).unwrap();
        let result = modem.send_uplink(request).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(modem.io().pending_command(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn close_shuts_down() {
        let mock = MockTransport::new();
        let modem = make_test_modem(mock);
        let mut events = modem.subscribe();

        modem.close().await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            ModemEvent::Disconnected
        ));
    }
}
