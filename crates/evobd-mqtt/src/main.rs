//! evobd-mqtt - periodic EV state-of-charge publisher
//!
//! Polls the vehicle's SOC through an ELM327 adapter and publishes it to an
//! MQTT broker. The value and its timestamp are only updated on successful
//! reads, so consumers (e.g. Home Assistant) keep the last known state
//! while the car is out of range. An optional trigger topic can pause and
//! resume polling remotely.
//!
//! SIGINT/SIGTERM stop the poll loop and run an orderly teardown: the
//! availability topic flips to "offline", the broker sees a proper
//! disconnect instead of the last-will timeout, and the adapter
//! connection is closed.

mod config;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use evobd_driver::{create_connection, Elm327, KiaNiroEv, UdsClient};
use rumqttc::{Client, Event, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::PublisherConfig;

#[derive(Parser)]
#[command(name = "evobd-mqtt")]
#[command(author, version, about = "Publish EV state of charge to MQTT")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "EVOBD_MQTT_CONFIG", default_value = "evobd-mqtt.toml")]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = PublisherConfig::load(&cli.config)?;

    // Vehicle side
    let connection = create_connection(&config.connection)?;
    let engine = Elm327::new(connection);
    engine
        .initialize()
        .context("Adapter initialization failed")?;
    let engine = Arc::new(engine);
    let kia = KiaNiroEv::new(UdsClient::new(engine.clone()));

    // SIGINT/SIGTERM flip the running flag; the poll loop notices and
    // falls through to the teardown below.
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown signal received");
            running.store(false, Ordering::Relaxed);
        })
        .context("Failed to install signal handler")?;
    }

    // Broker side
    let mqtt = &config.mqtt;
    let mut options = MqttOptions::new(mqtt.client_id.as_str(), mqtt.broker.as_str(), mqtt.port);
    options.set_keep_alive(Duration::from_secs(30));
    if let Some(username) = &mqtt.username {
        options.set_credentials(
            username.as_str(),
            mqtt.password.clone().unwrap_or_default(),
        );
    }
    options.set_last_will(LastWill::new(
        mqtt.availability_topic.as_str(),
        "offline",
        QoS::AtLeastOnce,
        true,
    ));

    let (client, mut mqtt_connection) = Client::new(options, 16);
    info!(broker = %mqtt.broker, port = mqtt.port, "Connecting to MQTT broker");

    let polling_enabled = Arc::new(AtomicBool::new(config.polling.start_enabled));

    // Event loop thread: drives the MQTT connection, announces
    // availability, and reacts to trigger messages.
    {
        let client = client.clone();
        let polling_enabled = polling_enabled.clone();
        let availability_topic = mqtt.availability_topic.clone();
        let trigger_topic = mqtt.trigger_topic.clone();
        std::thread::Builder::new()
            .name("evobd-mqtt-events".to_string())
            .spawn(move || {
                for event in mqtt_connection.iter() {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("MQTT connected");
                            if let Err(e) = client.publish(
                                availability_topic.as_str(),
                                QoS::AtLeastOnce,
                                true,
                                "online",
                            ) {
                                warn!(%e, "Failed to publish availability");
                            }
                            if let Some(topic) = &trigger_topic {
                                if let Err(e) = client.subscribe(topic.as_str(), QoS::AtLeastOnce)
                                {
                                    warn!(%e, "Failed to subscribe to trigger topic");
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            if trigger_topic.as_deref() == Some(publish.topic.as_str()) {
                                let payload =
                                    String::from_utf8_lossy(&publish.payload).to_lowercase();
                                let enable =
                                    matches!(payload.trim(), "on" | "1" | "true" | "enable");
                                polling_enabled.store(enable, Ordering::Relaxed);
                                info!(enable, "Polling toggled via trigger topic");
                            }
                        }
                        Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                            debug!("MQTT disconnect sent, event loop stopping");
                            break;
                        }
                        Ok(event) => debug!(?event, "MQTT event"),
                        Err(e) => {
                            warn!(%e, "MQTT connection error, retrying");
                            std::thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
            })
            .context("Failed to spawn MQTT event thread")?;
    }

    let interval = Duration::from_secs(config.polling.interval_secs);
    info!(interval_secs = config.polling.interval_secs, "Publisher running");

    while running.load(Ordering::Relaxed) {
        if polling_enabled.load(Ordering::Relaxed) {
            match kia.soc() {
                Ok(soc) => {
                    let now = Utc::now().to_rfc3339();
                    if let Err(e) = client.publish(
                        mqtt.soc_topic.as_str(),
                        QoS::AtLeastOnce,
                        true,
                        format!("{soc:.1}"),
                    ) {
                        warn!(%e, "Failed to publish SOC");
                    } else if let Err(e) =
                        client.publish(mqtt.timestamp_topic.as_str(), QoS::AtLeastOnce, true, now)
                    {
                        warn!(%e, "Failed to publish timestamp");
                    } else {
                        info!(soc, "Published SOC");
                    }
                }
                // Keep the last published value; the car may simply be
                // asleep or out of range.
                Err(e) => warn!(%e, "SOC read failed"),
            }
        } else {
            debug!("Polling disabled, skipping cycle");
        }

        // Interruptible sleep so a signal ends the loop promptly.
        let deadline = Instant::now() + interval;
        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(200).min(deadline - now));
        }
    }

    // Orderly teardown: announce offline, let the event loop flush the
    // publish, disconnect from the broker, release the adapter.
    info!("Shutting down");
    if let Err(e) = client.publish(
        mqtt.availability_topic.as_str(),
        QoS::AtLeastOnce,
        true,
        "offline",
    ) {
        warn!(%e, "Failed to publish offline availability");
    }
    std::thread::sleep(Duration::from_millis(200));
    if let Err(e) = client.disconnect() {
        warn!(%e, "MQTT disconnect failed");
    }
    if let Err(e) = engine.close() {
        warn!(%e, "Adapter close failed");
    }
    Ok(())
}
