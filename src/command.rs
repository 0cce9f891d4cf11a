use crate::protocol::{
    calc_checksum, Dialect, FeatureId, FILLER_BYTE, PREAMBLE_BYTE, START_BYTE,
};
use crate::Error;
use std::collections::HashMap;

pub const COMMAND_FRAME_LENGTH: usize = 10;
const COMMAND_BODY_LENGTH: u8 = 0x02;

/// Who a circuit command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Resolved through the feature bindings, falling back to the main panel.
    Feature(FeatureId),
    /// Raw device address, as used by older installations.
    Address(u8),
}

impl From<FeatureId> for Target {
    fn from(feature: FeatureId) -> Self {
        Target::Feature(feature)
    }
}

/// Builds circuit on/off frames.
#[derive(Debug, Clone, Default)]
pub struct CommandEncoder {
    dialect: Dialect,
    bindings: HashMap<FeatureId, u8>,
}

impl CommandEncoder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            bindings: HashMap::new(),
        }
    }

    /// Routes commands for `feature` to `address` instead of the main panel.
    pub fn bind(&mut self, feature: FeatureId, address: u8) {
        self.bindings.insert(feature, address);
    }

    pub fn destination(&self, target: Target) -> Result<u8, Error> {
        match target {
            Target::Feature(FeatureId::Unknown) => {
                Err(Error::UnaddressableFeature(FeatureId::Unknown))
            }
            Target::Feature(feature) => Ok(self
                .bindings
                .get(&feature)
                .copied()
                .unwrap_or(self.dialect.table().panel)),
            Target::Address(address) => Ok(address),
        }
    }

    pub fn encode(&self, target: Target, on: bool) -> Result<[u8; COMMAND_FRAME_LENGTH], Error> {
        let table = self.dialect.table();
        let mut tx_buffer = [
            PREAMBLE_BYTE,
            FILLER_BYTE,
            START_BYTE,
            table.command_type,
            self.destination(target)?,
            table.remote,
            table.circuit_command,
            COMMAND_BODY_LENGTH,
            u8::from(on),
            0,
        ];
        tx_buffer[COMMAND_FRAME_LENGTH - 1] = calc_checksum(&tx_buffer[..COMMAND_FRAME_LENGTH - 1]);
        log::trace!("Command {target:?} on={on}: {tx_buffer:02X?}");
        Ok(tx_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_on() {
        let encoder = CommandEncoder::new(Dialect::Current);
        assert_eq!(
            encoder.encode(FeatureId::Pool.into(), true).unwrap(),
            [0xff, 0x00, 0xa5, 0x10, 0x10, 0x20, 0x86, 0x02, 0x01, 0x6d]
        );
    }

    #[test]
    fn checksum_and_state_byte() {
        let encoder = CommandEncoder::new(Dialect::Current);
        for feature in FeatureId::ALL.into_iter().skip(1) {
            let on = encoder.encode(Target::Feature(feature), true).unwrap();
            let off = encoder.encode(Target::Feature(feature), false).unwrap();
            for frame in [on, off] {
                assert_eq!(frame[9], calc_checksum(&frame[..9]));
            }
            assert_eq!(on[8], 0x01);
            assert_eq!(off[8], 0x00);
            assert_eq!(on[..8], off[..8]);
            assert_eq!(on[9], off[9].wrapping_add(1));
        }
    }

    #[test]
    fn raw_address() {
        let encoder = CommandEncoder::new(Dialect::Legacy);
        let frame = encoder.encode(Target::Address(0x11), false).unwrap();
        assert_eq!(frame[4], 0x11);
        assert_eq!(frame[5], 0x20);
        assert_eq!(frame[9], calc_checksum(&frame[..9]));
    }

    #[test]
    fn bound_feature_uses_its_address() {
        let mut encoder = CommandEncoder::new(Dialect::Current);
        encoder.bind(FeatureId::Spillway, 0x11);
        assert_eq!(encoder.destination(FeatureId::Spillway.into()).unwrap(), 0x11);
        assert_eq!(encoder.destination(FeatureId::Spa.into()).unwrap(), 0x10);
    }

    #[test]
    fn unknown_feature_is_rejected() {
        let encoder = CommandEncoder::new(Dialect::Current);
        assert!(matches!(
            encoder.encode(FeatureId::Unknown.into(), true),
            Err(Error::UnaddressableFeature(FeatureId::Unknown))
        ));
    }
}
