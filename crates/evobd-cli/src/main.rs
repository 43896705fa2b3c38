//! evobd - Command-line diagnostics for ELM327-connected HKMC EVs
//!
//! Talks to the vehicle through a serial or BLE ELM327 adapter and exposes
//! battery diagnostics plus raw UDS reads.

mod commands;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use evobd_driver::{
    create_connection, BleConfig, ConnectionConfig, Elm327, KiaNiroEv, MockConfig, SerialConfig,
    UdsClient,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "evobd")]
#[command(author, version, about = "EV battery diagnostics over ELM327")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "EVOBD_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device to use (overrides config)
    #[arg(long, conflicts_with_all = ["ble", "mock"])]
    port: Option<String>,

    /// Baud rate for --port
    #[arg(long, default_value_t = 38400)]
    baud: u32,

    /// BLE adapter MAC address (overrides config)
    #[arg(long, conflicts_with = "mock")]
    ble: Option<String>,

    /// Use the built-in mock adapter (no hardware required)
    #[arg(long)]
    mock: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for BLE OBD adapters
    Scan {
        /// Scan duration in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },

    /// List serial ports
    Ports,

    /// Read the battery state of charge
    Soc,

    /// Print a full battery report
    Battery,

    /// Read a single cell voltage (1-98)
    Cell { cell: u8 },

    /// Raw ReadDataByIdentifier: evobd read 7E4 0101
    Read {
        /// Target CAN request ID (hex)
        can_id: String,
        /// Data identifier (hex)
        did: String,
    },

    /// Poll the state of charge at a fixed interval
    Monitor {
        /// Poll interval in seconds
        #[arg(long, default_value_t = 10)]
        interval: u64,

        /// Keep the diagnostic session alive with TesterPresent
        #[arg(long)]
        keep_alive: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Commands that need no adapter connection
    match &cli.command {
        Commands::Scan { timeout } => {
            return commands::scan(Duration::from_secs(*timeout));
        }
        Commands::Ports => {
            return commands::ports();
        }
        _ => {}
    }

    let connection_config = resolve_connection(&cli)?;
    let connection = create_connection(&connection_config)?;
    let engine = Elm327::new(connection);
    engine
        .initialize()
        .context("Adapter initialization failed")?;

    let engine = Arc::new(engine);
    let client = UdsClient::new(engine.clone());
    let kia = KiaNiroEv::new(client.clone());

    match &cli.command {
        Commands::Soc => commands::soc(&kia)?,
        Commands::Battery => commands::battery(&kia)?,
        Commands::Cell { cell } => commands::cell(&kia, *cell)?,
        Commands::Read { can_id, did } => commands::read(&client, can_id, did)?,
        Commands::Monitor {
            interval,
            keep_alive,
        } => {
            if *keep_alive {
                engine.start_tester_present(Duration::from_secs(2));
            }
            commands::monitor(&kia, Duration::from_secs(*interval))?;
        }
        Commands::Scan { .. } | Commands::Ports => unreachable!("handled above"),
    }

    engine.close().ok();
    Ok(())
}

/// Pick the adapter connection: CLI overrides beat the config file.
fn resolve_connection(cli: &Cli) -> Result<ConnectionConfig> {
    if cli.mock {
        return Ok(ConnectionConfig::Mock(MockConfig::default()));
    }
    if let Some(port) = &cli.port {
        return Ok(ConnectionConfig::Serial(SerialConfig {
            port: port.clone(),
            baud_rate: cli.baud,
            timeout_ms: 1000,
        }));
    }
    if let Some(address) = &cli.ble {
        return Ok(ConnectionConfig::Ble(BleConfig {
            address: address.clone(),
            timeout_ms: 10_000,
            service_uuid: None,
            notify_uuid: None,
            write_uuid: None,
            write_chunk: 20,
        }));
    }

    let config = if let Some(path) = &cli.config {
        Config::load_from(path)?
    } else {
        Config::load().unwrap_or_default()
    };
    match config.connection {
        Some(connection) => Ok(connection),
        None => bail!(
            "No adapter configured. Pass --port, --ble or --mock, or add a \
             [connection] table to {}",
            Config::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "the config file".to_string())
        ),
    }
}
