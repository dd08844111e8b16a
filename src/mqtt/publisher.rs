use crate::config::Config;
use crate::errors::MqttError;
use crate::mqtt::context::PublishContext;
use crate::mqtt::{DeviceInfo, SensorState};
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

pub struct MqttPublisher {
    client: Client,
    root_topic: String,
}

macro_rules! publish_if_changed {
    ($context:expr, $src:ident , $old:ident, $field:ident) => {
        if $old.map_or(true, |o| o.$field != $src.$field) {
            $context.publish(stringify!($field), &$src.$field)?;
        }
    };
}

impl MqttPublisher {
    /// Connect to the broker and forward ES mode commands to `commands`.
    pub fn new(
        config: &Config,
        device_id: String,
        commands: Sender<String>,
    ) -> Result<Self, MqttError> {
        let client_id = format!("marstek-mqtt-rs-{}", device_id);

        let mut mqtt_options = if let Some(socket_path) = &config.mqtt.socket {
            // Unix domain socket connection
            tracing::info!("Using MQTT Unix socket: {}", socket_path);
            MqttOptions::new(client_id, socket_path, 0)
        } else {
            // TCP connection
            let host = config.mqtt.host.as_ref().ok_or_else(|| {
                MqttError::ClientError("MQTT host or socket must be configured".to_string())
            })?;

            tracing::info!("Using MQTT TCP connection: {}:{}", host, config.mqtt.port);
            MqttOptions::new(client_id, host, config.mqtt.port)
        };

        if !config.mqtt.username.is_empty() {
            mqtt_options.set_credentials(&config.mqtt.username, &config.mqtt.password);
        }

        mqtt_options.set_keep_alive(Duration::from_secs(60));

        let root_topic = format!("{}/{}", config.mqtt.root, device_id);

        // Last Will: mark the device offline when the bridge drops off
        mqtt_options.set_last_will(rumqttc::LastWill {
            topic: format!("{}/online", root_topic),
            message: b"false".to_vec().into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        let (client, mut connection) = Client::new(mqtt_options, 10);

        let command_topic = Self::command_topic_for(&root_topic);
        let subscriber = client.clone();
        thread::spawn(move || {
            for notification in connection.iter() {
                match notification {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("MQTT connected");
                        // Subscriptions do not survive a reconnect with a clean session
                        if let Err(e) = subscriber.try_subscribe(&command_topic, QoS::AtLeastOnce)
                        {
                            let err = MqttError::SubscribeFailed {
                                topic: command_topic.clone(),
                                reason: e.to_string(),
                            };
                            tracing::error!("{}", err);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if publish.topic != command_topic {
                            continue;
                        }
                        let payload = String::from_utf8_lossy(&publish.payload).trim().to_string();
                        tracing::debug!("Received ES mode command: {}", payload);
                        if commands.send(payload).is_err() {
                            tracing::warn!("Command receiver gone, stopping MQTT loop");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // On connection error, crash the process (let it crash philosophy)
                        tracing::error!("MQTT connection error: {:?}", e);
                        std::process::exit(1);
                    }
                }
            }
        });

        Ok(Self { client, root_topic })
    }

    fn command_topic_for(root_topic: &str) -> String {
        format!("{}/es_mode/set", root_topic)
    }

    /// Topic accepting an ES mode name
    pub fn command_topic(&self) -> String {
        Self::command_topic_for(&self.root_topic)
    }

    pub fn context(&'_ self, topic: &str) -> PublishContext<'_> {
        let full_topic = if topic.is_empty() {
            self.root_topic.clone()
        } else {
            format!("{}/{}", self.root_topic, topic)
        };
        PublishContext::new(&self.client, full_topic)
    }

    pub fn publish_online_status(&self, online: bool) -> Result<(), MqttError> {
        let context = self.context("");
        context.publish("online", &online)
    }

    /// Publish device info as JSON
    pub fn publish_device_info(&self, info: &DeviceInfo) -> Result<(), MqttError> {
        let context = self.context("");
        let json =
            serde_json::to_string(info).map_err(|error| MqttError::SerializationError { error })?;

        context.publish("info", &json)
    }

    /// Publish sensor values
    /// Only publishes fields that have changed compared to `old`
    pub fn publish_state(
        &self,
        state: &SensorState,
        old: Option<&SensorState>,
    ) -> Result<(), MqttError> {
        let context = self.context("status");
        publish_if_changed!(context, state, old, time);
        publish_if_changed!(context, state, old, battery_soc);
        publish_if_changed!(context, state, old, battery_temperature);
        publish_if_changed!(context, state, old, battery_capacity);
        publish_if_changed!(context, state, old, battery_rated_capacity);
        publish_if_changed!(context, state, old, battery_charging_allowed);
        publish_if_changed!(context, state, old, battery_discharging_allowed);
        publish_if_changed!(context, state, old, es_mode);
        publish_if_changed!(context, state, old, grid_power);
        publish_if_changed!(context, state, old, battery_charging_power);
        publish_if_changed!(context, state, old, battery_discharging_power);
        publish_if_changed!(context, state, old, offgrid_power);
        publish_if_changed!(context, state, old, phase_a_power);
        publish_if_changed!(context, state, old, phase_b_power);
        publish_if_changed!(context, state, old, phase_c_power);
        publish_if_changed!(context, state, old, total_power);
        publish_if_changed!(context, state, old, firmware_version);
        publish_if_changed!(context, state, old, wifi_ssid);

        Ok(())
    }
}
