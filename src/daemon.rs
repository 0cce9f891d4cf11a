use anyhow::{Context, Result};
use easytouch_lib::interpreter::{StatusReport, StatusSink, TemperatureSensor};
use easytouch_lib::protocol::FeatureId;
use easytouch_lib::serialport::EasyTouch;
use log::{error, info};
use serde_json::json;
use std::time::{Duration, Instant};

use crate::{commandline, mqtt};

fn switch_payload(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Values pushed by the controller during one loop iteration.
#[derive(Debug, Default, PartialEq)]
struct Collected {
    temperatures: Vec<(TemperatureSensor, u8)>,
    features: Vec<(FeatureId, bool)>,
}

impl Collected {
    fn is_empty(&self) -> bool {
        self.temperatures.is_empty() && self.features.is_empty()
    }

    /// Complete state for periodic republishing.
    fn snapshot(report: &StatusReport, panel: &EasyTouch) -> Self {
        Self {
            temperatures: report.temperatures().to_vec(),
            features: panel
                .controller()
                .registry()
                .iter()
                .map(|(feature, state)| (feature, state.on))
                .collect(),
        }
    }
}

impl StatusSink for Collected {
    fn temperature(&mut self, sensor: TemperatureSensor, value: u8) {
        self.temperatures.push((sensor, value));
    }

    fn feature(&mut self, feature: FeatureId, on: bool) {
        self.features.push((feature, on));
    }
}

fn print_console(collected: &Collected) {
    let timestamp = chrono::Local::now().to_rfc3339();
    for (sensor, value) in &collected.temperatures {
        println!("{timestamp} temperature/{sensor}: {value}");
    }
    for (feature, on) in &collected.features {
        println!(
            "{timestamp} feature/{}: {}",
            feature.key(),
            switch_payload(*on)
        );
    }
}

fn publish_simple_format(publisher: &mut mqtt::MqttPublisher, collected: &Collected) {
    let base_topic = publisher.topic().to_string();
    for (sensor, value) in &collected.temperatures {
        let topic = format!("{base_topic}/temperature/{sensor}");
        if let Err(e) = publisher.publish(&topic, &value.to_string(), false) {
            error!("Failed to publish message to topic {topic}: {e}");
        }
    }
    for (feature, on) in &collected.features {
        let topic = format!("{base_topic}/feature/{}", feature.key());
        if let Err(e) = publisher.publish(&topic, switch_payload(*on), true) {
            error!("Failed to publish message to topic {topic}: {e}");
        }
    }
}

fn json_document(collected: &Collected, report: Option<&StatusReport>) -> serde_json::Value {
    let mut data = serde_json::Map::new();
    data.insert(
        "timestamp".to_string(),
        json!(chrono::Utc::now().to_rfc3339()),
    );
    if let Some(report) = report {
        let (hour, minute) = report.clock();
        data.insert("clock".to_string(), json!(format!("{hour:02}:{minute:02}")));
        data.insert("unit".to_string(), json!(report.unit));
        data.insert("pool_heater".to_string(), json!(report.pool_heater));
        data.insert("spa_heater".to_string(), json!(report.spa_heater));
    }
    let temperatures: serde_json::Map<_, _> = collected
        .temperatures
        .iter()
        .map(|(sensor, value)| (sensor.key().to_string(), json!(value)))
        .collect();
    if !temperatures.is_empty() {
        data.insert("temperature".to_string(), temperatures.into());
    }
    let features: serde_json::Map<_, _> = collected
        .features
        .iter()
        .map(|(feature, on)| (feature.key().to_string(), json!(on)))
        .collect();
    if !features.is_empty() {
        data.insert("feature".to_string(), features.into());
    }
    data.into()
}

/// Serial errors are logged, the daemon keeps polling.
fn report_or_log(
    polled: std::result::Result<Option<StatusReport>, easytouch_lib::Error>,
) -> Option<StatusReport> {
    polled.unwrap_or_else(|e| {
        error!("Error polling panel: {e}");
        None
    })
}

enum Output {
    Console,
    Mqtt {
        publisher: mqtt::MqttPublisher,
        format: commandline::MqttFormat,
    },
}

impl Output {
    fn emit(&mut self, collected: &Collected, report: Option<&StatusReport>) {
        match self {
            Output::Console => print_console(collected),
            Output::Mqtt { publisher, format } => match format {
                commandline::MqttFormat::Simple => publish_simple_format(publisher, collected),
                commandline::MqttFormat::Json => {
                    let payload = json_document(collected, report).to_string();
                    let topic = publisher.topic().to_string();
                    if let Err(e) = publisher.publish(&topic, &payload, false) {
                        error!("Failed to publish data to MQTT: {e:?}");
                    }
                }
            },
        }
    }

    fn next_command(&self) -> Option<mqtt::FeatureCommand> {
        match self {
            Output::Console => None,
            Output::Mqtt { publisher, .. } => publisher.try_command(),
        }
    }
}

pub fn run(
    mut panel: EasyTouch,
    output: commandline::DaemonOutput,
    interval: Duration,
    retries: u8,
) -> Result<()> {
    info!("Starting daemon mode: output={output:?}, interval={interval:?}");

    let mut output = match output {
        commandline::DaemonOutput::Console => Output::Console,
        commandline::DaemonOutput::Mqtt {
            config_file,
            format,
        } => {
            let config = mqtt::MqttConfig::load(&config_file)
                .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
            info!("Successfully loaded MQTT config from {config_file}: {config:?}");
            let publisher = mqtt::MqttPublisher::new(config)
                .with_context(|| "Failed to create MQTT publisher")?;
            Output::Mqtt { publisher, format }
        }
    };

    let mut last_report: Option<StatusReport> = None;
    let mut last_snapshot: Option<Instant> = None;
    loop {
        let mut collected = Collected::default();

        if let Some(report) = report_or_log(panel.poll(&mut collected)) {
            last_report = Some(report);
        }

        while let Some(command) = output.next_command() {
            info!("Switch {} {}", command.feature, switch_payload(command.on));
            if let Err(e) = panel.set_feature_with_retry(
                &mut collected,
                command.feature.into(),
                command.on,
                retries,
            ) {
                error!("Cannot switch {}: {e}", command.feature);
            }
        }

        let snapshot_due = last_snapshot.map_or(true, |at| at.elapsed() >= interval);
        match &last_report {
            Some(report) if snapshot_due => {
                output.emit(&Collected::snapshot(report, &panel), Some(report));
                last_snapshot = Some(Instant::now());
            }
            report if !collected.is_empty() => output.emit(&collected, report.as_ref()),
            _ => {}
        }

        std::thread::sleep(panel.poll_interval());
    }
}
