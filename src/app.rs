use std::collections::HashSet;
use std::path::PathBuf;
use clap::{Parser, Subcommand};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use log::{info, warn};
use tokio::spawn;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::btle::BtleTransport;
use crate::device::client::DeepBreath;
use crate::device::types::{ConnectionState, DeviceEvent, DeviceHandle};
use crate::error::AppRunError;

/**
 * How long (milliseconds) to give the radio to release the device before the process exits.
 */
const DISCONNECT_GRACE: u64 = 500;

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Connects to a DeepBreath breathing trainer and streams its telemetry", long_about = None)]
pub struct Cli {
    /// Path to the JSON config file (default: next to the executable, or the OS config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Also log debug messages
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List nearby devices
    Scan {
        /// How long to scan
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Connect to a device and print every telemetry sample as a JSON line
    Monitor {
        /// Id or name of the device to connect to (default: the first one found)
        #[arg(long)]
        device: Option<String>,

        /// Seconds between telemetry reads, at least 0.06
        #[arg(long)]
        interval: Option<f64>,

        /// Stop after this many seconds (default: run until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Write the default configuration if the config file is empty
    InitConfig,
}

type CliClient = DeepBreath<BtleTransport, UnboundedSender<DeviceEvent>>;

async fn start_client(cancel: &CancellationToken) -> Result<(CliClient, UnboundedReceiver<DeviceEvent>), AppRunError> {
    let (transport, transport_events) = BtleTransport::new(cancel.clone()).await?;
    let (sink, device_events) = unbounded::<DeviceEvent>();
    let client = DeepBreath::new(transport, sink);

    let pump_client = client.clone();
    let pump_cancel = cancel.clone();
    spawn(async move {
        pump_client.run_events(transport_events, pump_cancel).await
    });

    Ok((client, device_events))
}

async fn wait_for(duration: Option<u64>) {
    match duration {
        Some(seconds) => sleep(Duration::from_secs(seconds)).await,
        None => futures::future::pending().await,
    }
}

async fn scan(config: Config) -> Result<(), AppRunError> {
    let cancel = CancellationToken::new();
    let (client, mut device_events) = start_client(&cancel).await?;

    if !client.is_bluetooth_available() {
        warn!("Bluetooth is not available");
    }
    client.scan_for_devices();

    let mut latest: Vec<DeviceHandle> = Vec::new();
    let deadline = sleep(Duration::from_secs(config.scan_seconds));
    tokio::pin!(deadline);

    'mainloop: loop {
        tokio::select! {
            _ = &mut deadline => break 'mainloop,
            Some(event) = device_events.next() => {
                if let DeviceEvent::DevicesUpdated(devices) = event {
                    latest = devices;
                }
            },
        }
    }

    client.stop_scan();
    cancel.cancel();

    // the scan list repeats devices that advertise more than once
    let mut seen = HashSet::new();
    for device in latest.iter().filter(|device| seen.insert(device.id.clone())) {
        println!("{}\t{}", device.id, device.display_name());
    }

    Ok(())
}

fn print_item(event: &DeviceEvent) {
    if let DeviceEvent::DataItem(item) = event {
        match serde_json::to_string(item) {
            Ok(line) => println!("{}", line),
            Err(err) => warn!("Failed to encode telemetry item: {}", err),
        }
    }
}

async fn monitor(config: Config) -> Result<(), AppRunError> {
    let cancel = CancellationToken::new();
    let (client, mut device_events) = start_client(&cancel).await?;

    client.scan_for_devices();
    let mut was_connected = false;

    let deadline = wait_for(config.duration_seconds);
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    'mainloop: loop {
        tokio::select! {
            _ = &mut deadline => break 'mainloop,
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break 'mainloop;
            },
            event = device_events.next() => {
                let Some(event) = event else { break 'mainloop };

                match &event {
                    DeviceEvent::DevicesUpdated(devices) => {
                        if client.connected_device().is_none() {
                            if let Some(device) = devices.iter().find(|device| config.matches_device(device)) {
                                client.connect(device);
                            }
                        }
                    },
                    DeviceEvent::ConnectionChanged(Some(device)) => {
                        info!("Connected to {} {}", device.id, device.display_name());
                        was_connected = true;
                    },
                    DeviceEvent::ConnectionChanged(None) => {
                        if was_connected {
                            warn!("No device connected anymore");
                            break 'mainloop;
                        }
                    },
                    DeviceEvent::StateChange(ConnectionState::Ready) => {
                        if client.read_data(config.poll_interval_seconds).is_none() {
                            warn!("Device has no telemetry characteristic");
                        }
                    },
                    DeviceEvent::BatteryUpdated(Some(percent)) => info!("Battery: {:.0}%", percent),
                    _ => print_item(&event),
                }
            },
        }
    }

    client.disconnect();
    sleep(Duration::from_millis(DISCONNECT_GRACE)).await;
    cancel.cancel();
    Ok(())
}

async fn init_config(config_io: &ConfigIO) -> Result<(), AppRunError> {
    let config = config_io.read().await?;
    config_io.save(&config).await?;
    println!("{}", config_io.path().to_string_lossy());
    Ok(())
}

async fn run_command(command: Command, config_io: ConfigIO) -> Result<(), AppRunError> {
    let mut config = config_io.read().await?;

    match command {
        Command::Scan { seconds } => {
            if let Some(seconds) = seconds {
                config.scan_seconds = seconds;
            }
            scan(config).await
        },
        Command::Monitor { device, interval, duration } => {
            config.device_name = device.or(config.device_name);
            config.poll_interval_seconds = interval.unwrap_or(config.poll_interval_seconds);
            config.duration_seconds = duration.or(config.duration_seconds);
            monitor(config).await
        },
        Command::InitConfig => init_config(&config_io).await,
    }
}

pub fn run_application(cli: Cli) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync(cli.config.as_deref())?;
    let mut config_locker = config_io.locker()?;
    // one process per sensor
    let _lock_guard = config_locker.lock()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_command(cli.command, config_io))
}
