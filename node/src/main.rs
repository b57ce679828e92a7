// lora-node -- reads temperature and humidity and publishes them as Cayenne
// LPP uplinks through the LoRa modem on a Portenta Max carrier.
//
// Usage:
//   lora-node device-info
//   lora-node --port /dev/ttymxc3 ping
//   LORA_APP_EUI=... LORA_APP_KEY=... lora-node join
//   lora-node --config /etc/lora-node.toml run --count 0 --interval 300
//   lora-node                      (same as `run`, one uplink)

mod config;
mod hw_info;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use loranode_at::{LoraModem, ModemBuilder};
use loranode_core::{Band, OtaaCredentials, UplinkRequest};
use loranode_telemetry::{
    FixedSensor, LppFrame, M4ProxyClient, Reading, SensorSource, read_or_default,
};

use crate::config::{NodeConfig, SensorKind};
use crate::hw_info::{DEFAULT_HW_INFO_PATH, require_max_carrier};

/// Wait between band configuration and the join request.
const SETTLE_DELAY: Duration = Duration::from_secs(5);

const TEMPERATURE_CHANNEL: u8 = 0;
const HUMIDITY_CHANNEL: u8 = 1;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// LoRaWAN telemetry node for AT-command modems.
#[derive(Parser)]
#[command(name = "lora-node", version, about)]
struct Cli {
    /// TOML configuration file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port of the modem (default /dev/ttymxc3).
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate (default 19200).
    #[arg(long)]
    baud: Option<u32>,

    /// Frequency plan, e.g. EU868, US915, US915_HYBRID.
    #[arg(long)]
    band: Option<Band>,

    /// Sysfs GPIO number of the modem reset line (default 163).
    #[arg(long, conflicts_with = "no_reset")]
    reset_gpio: Option<u32>,

    /// Do not pulse the reset line before opening the session.
    #[arg(long)]
    no_reset: bool,

    /// Where readings come from.
    #[arg(long, value_enum)]
    sensor: Option<SensorKind>,

    /// Application (join) EUI, 16 hex digits.
    #[arg(long, env = "LORA_APP_EUI", hide_env_values = true)]
    app_eui: Option<String>,

    /// Application key, 32 hex digits.
    #[arg(long, env = "LORA_APP_KEY", hide_env_values = true)]
    app_key: Option<String>,

    /// Board hardware-info file checked for the Max carrier.
    #[arg(long, default_value = DEFAULT_HW_INFO_PATH)]
    hw_info: PathBuf,

    /// Skip the carrier check (bench setups with the modem on another board).
    #[arg(long)]
    skip_carrier_check: bool,

    /// Log at debug level. `RUST_LOG` takes precedence.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print ping reply, versions and device EUI (needed to register the node).
    DeviceInfo,

    /// Send `AT` and print the reply.
    Ping,

    /// Configure the band and perform an OTAA join.
    Join,

    /// Join, then publish readings.
    Run {
        /// Number of publish cycles (0 = until Ctrl-C). A cycle whose join
        /// or uplink fails is logged and still counts.
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Seconds between uplinks (default from the configuration, 5).
        #[arg(long)]
        interval: Option<u64>,

        /// Request confirmed delivery.
        #[arg(long)]
        confirmed: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    if cli.skip_carrier_check {
        warn!("carrier check skipped");
    } else {
        require_max_carrier(&cli.hw_info)?;
    }

    match cli.command.unwrap_or(Command::Run {
        count: 1,
        interval: None,
        confirmed: false,
    }) {
        Command::DeviceInfo => {
            let modem = open_modem(&config).await?;
            print_device_info(&modem).await?;
            modem.close().await?;
        }
        Command::Ping => {
            let modem = open_modem(&config).await?;
            let reply = modem.ping().await.context("pinging modem")?;
            println!("{}", String::from_utf8_lossy(&reply));
            modem.close().await?;
        }
        Command::Join => {
            let credentials = credentials(&config)?;
            let mut modem = open_modem(&config).await?;
            modem
                .configure_band(config.modem.band)
                .await
                .context("configuring band")?;
            modem
                .join_otaa(&credentials)
                .await
                .context("joining network")?;
            println!("joined");
            modem.close().await?;
        }
        Command::Run {
            count,
            interval,
            confirmed,
        } => {
            let interval =
                Duration::from_secs(interval.unwrap_or(config.uplink.interval_secs));
            let confirmed = confirmed || config.uplink.confirmed;
            publish(&config, count, interval, confirmed).await?;
        }
    }
    Ok(())
}

fn apply_overrides(config: &mut NodeConfig, cli: &Cli) {
    if let Some(port) = &cli.port {
        config.modem.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.modem.baud_rate = baud;
    }
    if let Some(band) = cli.band {
        config.modem.band = band;
    }
    if let Some(gpio) = cli.reset_gpio {
        config.modem.reset_gpio = Some(gpio);
    }
    if cli.no_reset {
        config.modem.reset_gpio = None;
    }
    if let Some(sensor) = cli.sensor {
        config.sensor.source = sensor;
    }
    if let Some(app_eui) = &cli.app_eui {
        config.credentials.app_eui = Some(app_eui.clone());
    }
    if let Some(app_key) = &cli.app_key {
        config.credentials.app_key = Some(app_key.clone());
    }
}

fn credentials(config: &NodeConfig) -> Result<OtaaCredentials> {
    let (Some(app_eui), Some(app_key)) = (
        config.credentials.app_eui.clone(),
        config.credentials.app_key.clone(),
    ) else {
        bail!("OTAA join needs an application EUI and key (--app-eui/--app-key or [credentials])");
    };
    Ok(OtaaCredentials {
        app_eui,
        app_key,
        dev_eui: config.credentials.dev_eui.clone(),
    })
}

fn sensor_source(config: &NodeConfig) -> Box<dyn SensorSource> {
    match config.sensor.source {
        SensorKind::Emulated => Box::new(FixedSensor::default()),
        SensorKind::M4Proxy => Box::new(M4ProxyClient::new(
            config.sensor.address.clone(),
            Duration::from_secs(config.sensor.timeout_secs),
        )),
    }
}

async fn open_modem(config: &NodeConfig) -> Result<LoraModem> {
    let mut builder = ModemBuilder::new()
        .serial_port(&config.modem.port)
        .baud_rate(config.modem.baud_rate)
        .command_timeout(config.modem.command_timeout())
        .join_timeout(config.modem.join_timeout());
    builder = match config.modem.reset_gpio {
        Some(number) => builder.reset_gpio(number),
        None => builder.without_reset(),
    };
    let modem = builder
        .open()
        .await
        .with_context(|| format!("opening modem on {}", config.modem.port))?;

    let mut events = modem.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!(?event, "modem event");
        }
    });
    Ok(modem)
}

async fn print_device_info(modem: &LoraModem) -> Result<()> {
    let info = modem.device_info().await.context("reading device info")?;
    println!("Pinging modem: {}", info.ping);
    println!("Device version: {}", info.device_version);
    println!("Firmware version: {}", info.firmware_version);
    println!("Device EUI: {}", info.dev_eui);
    Ok(())
}

fn encode_reading(reading: &Reading) -> Result<Vec<u8>> {
    let mut frame = LppFrame::new();
    frame
        .add_temperature(TEMPERATURE_CHANNEL, reading.temperature)?
        .add_humidity(HUMIDITY_CHANNEL, reading.humidity)?;
    Ok(frame.into_vec())
}

/// Treat a non-fatal modem error as logged and handled.
fn tolerate(result: loranode_core::Result<()>, what: &str) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_fatal() => Err(anyhow::Error::new(e).context(what.to_string())),
        Err(e) => {
            warn!(error = %e, "{what} failed");
            Ok(false)
        }
    }
}

async fn publish(config: &NodeConfig, count: u32, interval: Duration, confirmed: bool) -> Result<()> {
    let credentials = credentials(config)?;
    let sensor = sensor_source(config);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping");
            ctrl_c.cancel();
        }
    });

    let reading = read_or_default(sensor.as_ref()).await;
    println!("Temperature: {}", reading.temperature);
    println!("Humidity [%]: {}", reading.humidity);

    let mut modem = open_modem(config).await?;
    print_device_info(&modem).await?;
    modem
        .configure_band(config.modem.band)
        .await
        .context("configuring band")?;
    println!("Band set to {}", config.modem.band);

    tokio::select! {
        _ = cancel.cancelled() => return modem.close().await.context("closing modem"),
        _ = tokio::time::sleep(SETTLE_DELAY) => {}
    }

    let mut cycles = 0u32;
    let mut sent = 0u32;
    let mut next_reading = Some(reading);
    while count == 0 || cycles < count {
        cycles = cycles.saturating_add(1);

        if !modem.state().is_joined() && tolerate(modem.join_otaa(&credentials).await, "join")? {
            println!("Joined the network");
        }

        if modem.state().is_joined() {
            let reading = match next_reading.take() {
                Some(reading) => reading,
                None => read_or_default(sensor.as_ref()).await,
            };
            let payload = encode_reading(&reading)?;
            let request = UplinkRequest::new(payload, confirmed)?;
            if tolerate(modem.send_uplink(request).await, "uplink")? {
                sent += 1;
            }
        }

        if count != 0 && cycles >= count {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!(sent, "done");
    modem.close().await.context("closing modem")
}
