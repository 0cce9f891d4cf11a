use anyhow::{bail, Context, Result};
use easytouch_lib::protocol::FeatureId;
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::mpsc;
use std::time::Duration;

/// Smallest keep alive interval the MQTT client accepts.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    host: String,
    #[serde(default = "MqttConfig::default_port")]
    port: u16,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "MqttConfig::default_topic")]
    topic: String,
    #[serde(default = "MqttConfig::default_qos")]
    qos: u8,
    #[serde(default = "MqttConfig::default_client_id")]
    client_id: String,
    #[serde(
        default = "MqttConfig::default_keep_alive_interval",
        with = "humantime_serde"
    )]
    keep_alive_interval: Duration,
}

impl MqttConfig {
    fn default_port() -> u16 {
        1883
    }

    fn default_topic() -> String {
        "easytouch".into()
    }

    fn default_qos() -> u8 {
        0
    }

    fn generate_random_string(len: usize) -> String {
        use rand::distributions::Alphanumeric;
        use rand::Rng;

        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn default_client_id() -> String {
        format!("easytouch-{}", Self::generate_random_string(8))
    }

    fn default_keep_alive_interval() -> Duration {
        Duration::from_secs(30)
    }

    pub const DEFAULT_CONFIG_FILE: &str = "mqtt.yaml";

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open MQTT config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read MQTT config from file: {config_file_path:?}"))?;
        config.quality_of_service()?;
        config.keep_alive()?;
        Ok(config)
    }

    fn keep_alive(&self) -> Result<Duration> {
        if self.keep_alive_interval < MIN_KEEP_ALIVE {
            bail!(
                "Invalid MQTT keep alive interval {:?}, expected at least {MIN_KEEP_ALIVE:?}",
                self.keep_alive_interval
            );
        }
        Ok(self.keep_alive_interval)
    }

    fn quality_of_service(&self) -> Result<QoS> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            qos => bail!("Invalid MQTT QoS {qos}, expected 0, 1 or 2"),
        }
    }

    fn options(&self) -> Result<MqttOptions> {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive()?);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        Ok(options)
    }
}

/// Feature switch request received on `<topic>/feature/<name>/set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureCommand {
    pub feature: FeatureId,
    pub on: bool,
}

fn parse_switch(payload: &[u8]) -> Option<bool> {
    let payload = std::str::from_utf8(payload).ok()?.trim();
    match payload.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Subscription covering every feature's set topic.
fn command_filter(base_topic: &str) -> String {
    format!("{base_topic}/feature/+/set")
}

/// Parses a publish on `<base_topic>/feature/<name>/set`.
pub fn parse_command(base_topic: &str, topic: &str, payload: &[u8]) -> Option<FeatureCommand> {
    let name = topic
        .strip_prefix(base_topic)?
        .strip_prefix("/feature/")?
        .strip_suffix("/set")?;
    let Ok(feature) = name.parse::<FeatureId>() else {
        log::warn!("Ignore command for unknown feature {name:?}");
        return None;
    };
    let Some(on) = parse_switch(payload) else {
        log::warn!(
            "Ignore command for {feature} with invalid payload {:?}",
            String::from_utf8_lossy(payload)
        );
        return None;
    };
    Some(FeatureCommand { feature, on })
}

pub struct MqttPublisher {
    client: Client,
    config: MqttConfig,
    qos: QoS,
    commands: mpsc::Receiver<FeatureCommand>,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig) -> Result<Self> {
        let qos = config.quality_of_service()?;
        log::info!(
            "Attempting to connect to MQTT broker: {}:{} with client_id: {}",
            config.host,
            config.port,
            config.client_id
        );
        let (client, mut connection) = Client::new(config.options()?, 10);

        // the session is clean, so every (re)connect has to subscribe again
        let mut subscriber = client.clone();
        let filter = command_filter(&config.topic);
        let (sender, commands) = mpsc::channel();
        let base_topic = config.topic.clone();
        std::thread::Builder::new()
            .name("mqtt".into())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            log::debug!("MQTT message on {}", publish.topic);
                            if let Some(command) =
                                parse_command(&base_topic, &publish.topic, &publish.payload)
                            {
                                if sender.send(command).is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            log::info!("Connected to MQTT broker.");
                            if let Err(e) = subscriber.try_subscribe(filter.as_str(), qos) {
                                log::error!("Failed to subscribe to MQTT topic {filter}: {e}");
                            }
                        }
                        Ok(event) => log::trace!("MQTT event: {event:?}"),
                        Err(e) => {
                            log::warn!("MQTT connection error: {e}");
                            std::thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
            })
            .with_context(|| "Cannot start MQTT connection thread")?;

        Ok(Self {
            client,
            config,
            qos,
            commands,
        })
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        log::debug!(
            "Publishing to MQTT: Topic='{}', Payload='{payload}', QoS={:?}",
            topic,
            self.qos
        );
        self.client
            .publish(topic, self.qos, retain, payload.as_bytes().to_vec())
            .with_context(|| format!("Failed to publish message to MQTT topic: {}", topic))?;
        Ok(())
    }

    /// Next queued feature command, without waiting.
    pub fn try_command(&self) -> Option<FeatureCommand> {
        self.commands.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_config_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"host: broker.local\n").unwrap();
        let config = MqttConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 1883);
        assert_eq!(config.topic, "easytouch");
        assert_eq!(config.quality_of_service().unwrap(), QoS::AtMostOnce);
        assert!(config.client_id.starts_with("easytouch-"));
        assert_eq!(config.client_id.len(), "easytouch-".len() + 8);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(30));
    }

    #[test]
    fn load_config_rejects_short_keep_alive() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"host: broker.local\nkeep_alive_interval: 2s\n")
            .unwrap();
        assert!(MqttConfig::load(file.path().to_str().unwrap()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"host: broker.local\nkeep_alive_interval: 5s\n")
            .unwrap();
        let config = MqttConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.keep_alive().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn load_config_rejects_invalid_qos() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"host: broker.local\nqos: 3\n").unwrap();
        assert!(MqttConfig::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn load_config_full() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"host: 10.0.0.2\nport: 8883\nusername: pool\npassword: secret\ntopic: backyard/pool\nqos: 1\nclient_id: panel\nkeep_alive_interval: 1m\n",
        )
        .unwrap();
        let config = MqttConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.port, 8883);
        assert_eq!(config.username.as_deref(), Some("pool"));
        assert_eq!(config.topic, "backyard/pool");
        assert_eq!(config.quality_of_service().unwrap(), QoS::AtLeastOnce);
        assert_eq!(config.client_id, "panel");
        assert_eq!(config.keep_alive_interval, Duration::from_secs(60));
    }

    #[test]
    fn parse_feature_commands() {
        assert_eq!(
            parse_command("easytouch", "easytouch/feature/pool_light/set", b"ON"),
            Some(FeatureCommand {
                feature: FeatureId::PoolLight,
                on: true
            })
        );
        assert_eq!(
            parse_command("easytouch", "easytouch/feature/spa/set", b"false"),
            Some(FeatureCommand {
                feature: FeatureId::Spa,
                on: false
            })
        );
        assert_eq!(
            parse_command("easytouch", "easytouch/feature/7/set", b" 1\n"),
            Some(FeatureCommand {
                feature: FeatureId::WaterFeature,
                on: true
            })
        );
    }

    #[test]
    fn command_filter_covers_set_topics() {
        let filter = command_filter("backyard/pool");
        assert_eq!(filter, "backyard/pool/feature/+/set");
        let topic = filter.replace('+', "spa_light");
        assert_eq!(
            parse_command("backyard/pool", &topic, b"OFF"),
            Some(FeatureCommand {
                feature: FeatureId::SpaLight,
                on: false
            })
        );
    }

    #[test]
    fn ignore_other_topics_and_payloads() {
        assert_eq!(parse_command("easytouch", "easytouch/feature/pool", b"ON"), None);
        assert_eq!(parse_command("easytouch", "other/feature/pool/set", b"ON"), None);
        assert_eq!(parse_command("easytouch", "easytouch/feature/hot_tub/set", b"ON"), None);
        assert_eq!(parse_command("easytouch", "easytouch/feature/pool/set", b"toggle"), None);
    }
}
