use crate::protocol::{Dialect, FeatureId, Frame, StatusPayload, TemperatureUnit};
use crate::registry::FeatureRegistry;
use crate::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TemperatureSensor {
    Pool,
    Water,
    Air,
    Solar,
}

impl TemperatureSensor {
    pub fn key(self) -> &'static str {
        match self {
            TemperatureSensor::Pool => "pool",
            TemperatureSensor::Water => "water",
            TemperatureSensor::Air => "air",
            TemperatureSensor::Solar => "solar",
        }
    }
}

impl fmt::Display for TemperatureSensor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Observer for decoded telemetry and feature changes.
///
/// Temperatures are raw bytes in the unit the panel is configured for.
pub trait StatusSink {
    fn temperature(&mut self, _sensor: TemperatureSensor, _value: u8) {}
    fn feature(&mut self, _feature: FeatureId, _on: bool) {}
}

impl StatusSink for () {}

/// Everything learned from one status broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatusReport {
    pub payload: StatusPayload,
    pub unit: TemperatureUnit,
    pub air_temperature: u8,
    pub water_temperature: u8,
    pub pool_heater: bool,
    pub spa_heater: bool,
    /// State of every feature the broadcast covers.
    pub features: Vec<(FeatureId, bool)>,
    /// Features whose registry value changed because of this broadcast.
    pub changes: Vec<(FeatureId, bool)>,
}

impl StatusReport {
    pub fn temperatures(&self) -> [(TemperatureSensor, u8); 4] {
        [
            (TemperatureSensor::Pool, self.payload.pool_temp),
            (TemperatureSensor::Water, self.water_temperature),
            (TemperatureSensor::Air, self.air_temperature),
            (TemperatureSensor::Solar, self.payload.solar_temp),
        ]
    }

    pub fn clock(&self) -> (u8, u8) {
        (self.payload.hour, self.payload.minute)
    }
}

/// Turns status frames into registry updates and telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusInterpreter {
    dialect: Dialect,
}

impl StatusInterpreter {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Validates and decodes `frame`. The registry is only touched when the frame is a
    /// well formed status broadcast.
    pub fn interpret(
        &self,
        frame: &Frame,
        registry: &mut FeatureRegistry,
    ) -> Result<StatusReport, Error> {
        let header = &frame.header;
        if !header.is_status_broadcast(self.dialect) {
            return Err(Error::UnexpectedHeader {
                kind: header.kind,
                destination: header.destination,
                src: header.source,
            });
        }
        if header.command != self.dialect.table().status_command {
            return Err(Error::UnexpectedCommand(header.command));
        }
        let payload = StatusPayload::decode(&frame.body)?;
        log::trace!(
            "Status {:02}:{:02} air={} water={} equip1={:#010b} equip2={:#010b}",
            payload.hour,
            payload.minute,
            payload.air_temp,
            payload.water_temp,
            payload.equip1,
            payload.equip2
        );

        let features = payload.feature_states().to_vec();
        let mut changes = Vec::new();
        for (feature, on) in &features {
            if registry.confirm(*feature, *on) {
                changes.push((*feature, *on));
            }
        }

        Ok(StatusReport {
            unit: payload.temperature_unit(),
            air_temperature: payload.air_temp,
            water_temperature: payload.water_temp,
            pool_heater: payload.pool_heater_active(),
            spa_heater: payload.spa_heater_active(),
            features,
            changes,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameHeader, START_BYTE, STATUS_LENGTH};

    fn status_frame(command: u8, body: Vec<u8>) -> Frame {
        Frame {
            header: FrameHeader {
                leading: START_BYTE,
                kind: 0x02,
                destination: 0x0f,
                source: 0x10,
                command,
                length: body.len() as u8,
            },
            body,
        }
    }

    fn status_body(equip1: u8, equip2: u8) -> Vec<u8> {
        StatusPayload {
            hour: 14,
            minute: 30,
            equip1,
            equip2,
            water_temp: 78,
            air_temp: 65,
            pool_temp: 77,
            solar_temp: 90,
            heater_active: 0b01,
            ..Default::default()
        }
        .encode()
        .to_vec()
    }

    #[test]
    fn full_status_frame() {
        let interpreter = StatusInterpreter::new(Dialect::Current);
        let mut registry = FeatureRegistry::new();
        let report = interpreter
            .interpret(&status_frame(0x02, status_body(0b0000_0011, 0b01)), &mut registry)
            .unwrap();
        assert_eq!(report.clock(), (14, 30));
        assert_eq!(report.air_temperature, 65);
        assert_eq!(report.water_temperature, 78);
        assert_eq!(report.unit, TemperatureUnit::Fahrenheit);
        assert!(report.pool_heater);
        assert!(!report.spa_heater);
        assert_eq!(
            report.changes,
            vec![
                (FeatureId::Pool, true),
                (FeatureId::Spa, true),
                (FeatureId::WaterFeature, true)
            ]
        );
        assert_eq!(report.features.len(), 8);
        assert_eq!(
            report.temperatures(),
            [
                (TemperatureSensor::Pool, 77),
                (TemperatureSensor::Water, 78),
                (TemperatureSensor::Air, 65),
                (TemperatureSensor::Solar, 90)
            ]
        );
        assert!(registry.is_on(FeatureId::Pool));
        assert!(registry.is_on(FeatureId::Spa));
        assert!(!registry.is_on(FeatureId::Cleaner));
        assert!(registry.is_on(FeatureId::WaterFeature));

        // same broadcast again, nothing changes
        let report = interpreter
            .interpret(&status_frame(0x02, status_body(0b0000_0011, 0b01)), &mut registry)
            .unwrap();
        assert!(report.changes.is_empty());
    }

    #[test]
    fn short_body_is_discarded() {
        let interpreter = StatusInterpreter::new(Dialect::Current);
        let mut registry = FeatureRegistry::new();
        registry.set_optimistic(FeatureId::Pool, true);
        let err = interpreter
            .interpret(&status_frame(0x02, vec![0x48, 0x1e]), &mut registry)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::StatusSize {
                expected: STATUS_LENGTH,
                actual: 2
            }
        ));
        assert!(registry.is_pending(FeatureId::Pool));
    }

    #[test]
    fn unexpected_command_leaves_registry_alone() {
        let interpreter = StatusInterpreter::new(Dialect::Current);
        let mut registry = FeatureRegistry::new();
        let err = interpreter
            .interpret(&status_frame(0x05, status_body(0xff, 0xff)), &mut registry)
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedCommand(0x05)));
        assert_eq!(registry, FeatureRegistry::new());
    }

    #[test]
    fn foreign_header_is_discarded() {
        let interpreter = StatusInterpreter::new(Dialect::Legacy);
        let mut registry = FeatureRegistry::new();
        let err = interpreter
            .interpret(&status_frame(0x02, status_body(0xff, 0xff)), &mut registry)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedHeader {
                kind: 0x02,
                destination: 0x0f,
                src: 0x10
            }
        ));
        assert_eq!(registry, FeatureRegistry::new());
    }

    #[test]
    fn uncovered_features_keep_commanded_state() {
        let interpreter = StatusInterpreter::new(Dialect::Current);
        let mut registry = FeatureRegistry::new();
        registry.set_optimistic(FeatureId::Aux, true);
        registry.set_optimistic(FeatureId::Cleaner, true);
        interpreter
            .interpret(&status_frame(0x02, status_body(0, 0)), &mut registry)
            .unwrap();
        assert!(registry.is_on(FeatureId::Aux));
        assert!(registry.is_pending(FeatureId::Aux));
        assert!(!registry.is_on(FeatureId::Cleaner));
        assert!(!registry.is_pending(FeatureId::Cleaner));
    }
}
