use std::cmp::{max, min};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use tracing::{debug, info, warn};

use marstek_mqtt_rs::config::Config;
use marstek_mqtt_rs::marstek::{validate_device, Coordinator, DeviceIdentity, MarstekClient};
use marstek_mqtt_rs::mqtt::{DeviceInfo, MqttPublisher, SensorState};

/// Marstek MQTT Bridge - Publishes Marstek battery data to MQTT
#[derive(Parser)]
#[command(name = "marstek-mqtt-rs")]
#[command(version)]
#[command(about = "Marstek MQTT Bridge - Publishes Marstek battery data to MQTT", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

/// Align to the next multiple of `interval` since the epoch
fn next_interval(time: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let duration_since_last_interval = Duration::seconds(time.timestamp() % interval.num_seconds());
    time - duration_since_last_interval + interval
}

/// Last values sent to the broker, for change detection
#[derive(Default)]
struct Published {
    state: Option<SensorState>,
    online: Option<bool>,
    info: bool,
}

impl Published {
    fn update(
        &mut self,
        publisher: &MqttPublisher,
        coordinator: &Coordinator,
        identity: &DeviceIdentity,
        host: &str,
    ) -> anyhow::Result<()> {
        let online = coordinator.last_update_success();

        if online {
            if let Some(snapshot) = coordinator.data() {
                if !self.info {
                    publisher.publish_device_info(&DeviceInfo::new(identity, host, Some(snapshot)))?;
                    self.info = true;
                }

                let state = SensorState::from_snapshot(snapshot, Utc::now());
                publisher.publish_state(&state, self.state.as_ref())?;
                debug!(
                    "Status: SOC={:?}% Mode={:?} Grid={:?}W",
                    state.battery_soc, state.es_mode, state.grid_power
                );
                self.state = Some(state);
            }
        }

        if self.online != Some(online) {
            publisher.publish_online_status(online)?;
            self.online = Some(online);
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration first (to get log level)
    let config_path = cli.config;
    let config = Config::from_file(&config_path)?;

    // Initialize tracing with log level from config
    let app_log_level = config.default.log_level.as_str();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("marstek_mqtt_rs={}", app_log_level).parse()?)
                .add_directive("rumqttc=warn".parse()?),
        )
        .init();

    let interval = Duration::from_std(config.marstek.interval)?;
    let interval = max(interval, Duration::seconds(1));

    info!("Configuration loaded from: {}", config_path);
    info!("  Marstek Host: {}:{}", config.marstek.host, config.marstek.port);
    info!("  Local Port: {}", config.marstek.local_port());
    info!("  MQTT Root: {}", config.mqtt.root);
    info!("  Interval: {:?}", config.marstek.interval);

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })?;

    info!("Validating Marstek device...");
    let identity = validate_device(
        &config.marstek.host,
        config.marstek.port,
        config.marstek.timeout,
    )?;
    info!("Device ID: {} ({})", identity.serial, identity.model);

    let client = MarstekClient::new(
        config.marstek.host.clone(),
        config.marstek.port,
        config.marstek.local_port(),
    )?
    .with_timeout(config.marstek.timeout)?;
    info!("  Request timeout: {:?}", client.timeout());
    let mut coordinator = Coordinator::new(client);

    info!("Creating MQTT publisher...");
    let (command_tx, command_rx) = mpsc::channel();
    let publisher = MqttPublisher::new(&config, identity.serial.clone(), command_tx)?;
    info!("✓ MQTT publisher created, listening on {}", publisher.command_topic());

    // Give MQTT a moment to connect
    std::thread::sleep(Duration::milliseconds(500).to_std()?);

    let mut published = Published::default();
    let mut next_poll = Utc::now();
    info!("Starting main loop...");

    while running.load(Ordering::SeqCst) {
        let now = Utc::now();
        if now >= next_poll {
            next_poll = next_interval(now, interval);

            if let Err(e) = coordinator.refresh() {
                warn!("Polling cycle failed: {}", e);
            }
            published.update(&publisher, &coordinator, &identity, &config.marstek.host)?;
        }

        // Wait for a mode command until the next poll, waking up at least
        // once per second to notice Ctrl-C
        let wait = min(
            max(next_poll - Utc::now(), Duration::milliseconds(100)),
            Duration::seconds(1),
        );

        match command_rx.recv_timeout(wait.to_std()?) {
            Ok(mode) => {
                if coordinator.select_mode(&mode) {
                    published.update(&publisher, &coordinator, &identity, &config.marstek.host)?;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                anyhow::bail!("MQTT event loop stopped");
            }
        }
    }

    info!("Shutting down...");
    publisher.publish_online_status(false)?;
    coordinator.shutdown();
    Ok(())
}
