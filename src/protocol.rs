use crate::Error;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// The panel prefixes every frame with 0xFF, an optional 0x00 filler and the 0xA5 start byte.
pub const PREAMBLE_BYTE: u8 = 0xff;
pub const FILLER_BYTE: u8 = 0x00;
pub const START_BYTE: u8 = 0xa5;

/// Start byte plus type, destination, source, command and length.
pub const HEADER_LENGTH: usize = 6;
/// Largest body the decoder accepts; longer frames are discarded.
pub const BODY_CAPACITY: usize = 128;
pub const STATUS_LENGTH: usize = 27;
pub const FEATURE_SLOTS: usize = 16;

macro_rules! read_bit {
    ($byte:expr,$position:expr) => {
        ($byte >> $position) & 1 != 0
    };
}

/// Wrapping byte sum used as the frame checksum.
pub fn calc_checksum(buffer: &[u8]) -> u8 {
    let mut checksum: u8 = 0;
    for b in buffer {
        checksum = checksum.wrapping_add(*b);
    }
    checksum
}

/// Devices commonly seen on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Address {
    Chlorinator = 0x02,
    Broadcast = 0x0f,
    Main = 0x10,
    Secondary = 0x11,
    Remote = 0x20,
    ScreenLogic = 0x22,
    Pump1 = 0x60,
    Pump2 = 0x61,
    Pump3 = 0x62,
    Pump4 = 0x63,
}

impl Address {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Self::Chlorinator),
            0x0f => Some(Self::Broadcast),
            0x10 => Some(Self::Main),
            0x11 => Some(Self::Secondary),
            0x20 => Some(Self::Remote),
            0x22 => Some(Self::ScreenLogic),
            0x60 => Some(Self::Pump1),
            0x61 => Some(Self::Pump2),
            0x62 => Some(Self::Pump3),
            0x63 => Some(Self::Pump4),
            _ => None,
        }
    }
}

struct DisplayAddress(u8);

impl fmt::Display for DisplayAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match Address::from_u8(self.0) {
            Some(address) => write!(f, "{:?}({:#04X})", address, self.0),
            None => write!(f, "{:#04X}", self.0),
        }
    }
}

/// Protocol generation spoken by the panel.
///
/// Two incompatible numbering schemes exist for the status broadcast. Which panel
/// firmware uses which is undocumented, so the dialect has to be chosen explicitly.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Dialect {
    #[default]
    Current,
    Legacy,
}

/// Constants of one [`Dialect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectTable {
    pub status_type: u8,
    pub command_type: u8,
    pub pump_type: u8,
    pub heater_type: u8,
    pub broadcast: u8,
    /// Source address of status broadcasts.
    pub controller: u8,
    /// Destination of circuit commands.
    pub panel: u8,
    /// Source address used for outbound commands.
    pub remote: u8,
    /// Command code carried by status broadcasts.
    pub status_command: u8,
    pub circuit_command: u8,
}

const CURRENT_TABLE: DialectTable = DialectTable {
    status_type: 0x02,
    command_type: 0x10,
    pump_type: 0x0f,
    heater_type: 0x20,
    broadcast: Address::Broadcast as u8,
    controller: Address::Main as u8,
    panel: Address::Main as u8,
    remote: Address::Remote as u8,
    status_command: 0x02,
    circuit_command: 0x86,
};

const LEGACY_TABLE: DialectTable = DialectTable {
    status_type: 0x14,
    ..CURRENT_TABLE
};

impl Dialect {
    pub const fn table(self) -> DialectTable {
        match self {
            Dialect::Current => CURRENT_TABLE,
            Dialect::Legacy => LEGACY_TABLE,
        }
    }

    pub fn frame_type(self, kind: u8) -> Option<FrameType> {
        let table = self.table();
        if kind == table.status_type {
            Some(FrameType::Status)
        } else if kind == table.command_type {
            Some(FrameType::Command)
        } else if kind == table.pump_type {
            Some(FrameType::Pump)
        } else if kind == table.heater_type {
            Some(FrameType::Heater)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Status,
    Command,
    Pump,
    Heater,
}

/// Logical circuit identifier as used by the panel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum FeatureId {
    Unknown = 0,
    Spa = 1,
    Cleaner = 2,
    AirBlower = 3,
    SpaLight = 4,
    PoolLight = 5,
    Pool = 6,
    WaterFeature = 7,
    Spillway = 8,
    Aux = 9,
}

impl FeatureId {
    pub const ALL: [FeatureId; 10] = [
        FeatureId::Unknown,
        FeatureId::Spa,
        FeatureId::Cleaner,
        FeatureId::AirBlower,
        FeatureId::SpaLight,
        FeatureId::PoolLight,
        FeatureId::Pool,
        FeatureId::WaterFeature,
        FeatureId::Spillway,
        FeatureId::Aux,
    ];

    pub fn slot(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            FeatureId::Unknown => "Unknown",
            FeatureId::Spa => "Spa",
            FeatureId::Cleaner => "Cleaner",
            FeatureId::AirBlower => "Air Blower",
            FeatureId::SpaLight => "Spa Light",
            FeatureId::PoolLight => "Pool Light",
            FeatureId::Pool => "Pool",
            FeatureId::WaterFeature => "Water Feature",
            FeatureId::Spillway => "Spillway",
            FeatureId::Aux => "Aux",
        }
    }

    /// Lower snake case name, used in topics and on the command line.
    pub fn key(self) -> &'static str {
        match self {
            FeatureId::Unknown => "unknown",
            FeatureId::Spa => "spa",
            FeatureId::Cleaner => "cleaner",
            FeatureId::AirBlower => "air_blower",
            FeatureId::SpaLight => "spa_light",
            FeatureId::PoolLight => "pool_light",
            FeatureId::Pool => "pool",
            FeatureId::WaterFeature => "water_feature",
            FeatureId::Spillway => "spillway",
            FeatureId::Aux => "aux",
        }
    }
}

impl TryFrom<u8> for FeatureId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        FeatureId::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(Error::InvalidFeature(value))
    }
}

impl FromStr for FeatureId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['-', ' '], "_");
        if let Ok(value) = key.parse::<u8>() {
            return FeatureId::try_from(value).map_err(|e| e.to_string());
        }
        FeatureId::ALL
            .into_iter()
            .find(|feature| feature.key() == key)
            .ok_or_else(|| format!("Unknown feature '{s}'"))
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameHeader {
    pub leading: u8,
    pub kind: u8,
    pub destination: u8,
    pub source: u8,
    pub command: u8,
    pub length: u8,
}

impl FrameHeader {
    pub fn decode(bytes: &[u8; HEADER_LENGTH]) -> Self {
        Self {
            leading: bytes[0],
            kind: bytes[1],
            destination: bytes[2],
            source: bytes[3],
            command: bytes[4],
            length: bytes[5],
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LENGTH] {
        [
            self.leading,
            self.kind,
            self.destination,
            self.source,
            self.command,
            self.length,
        ]
    }

    pub fn frame_type(&self, dialect: Dialect) -> Option<FrameType> {
        dialect.frame_type(self.kind)
    }

    /// True for a status frame sent by the controller to everyone.
    pub fn is_status_broadcast(&self, dialect: Dialect) -> bool {
        let table = dialect.table();
        self.kind == table.status_type
            && self.source == table.controller
            && self.destination == table.broadcast
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "type={:#04X} dest={} src={} command={:#04X} length={}",
            self.kind,
            DisplayAddress(self.destination),
            DisplayAddress(self.source),
            self.command,
            self.length
        )
    }
}

/// One complete inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TemperatureUnit {
    Fahrenheit,
    Celsius,
}

// (feature, equip byte, bit)
const STATUS_FEATURE_BITS: [(FeatureId, usize, u8); 8] = [
    (FeatureId::Pool, 1, 0),
    (FeatureId::Spa, 1, 1),
    (FeatureId::Cleaner, 1, 2),
    (FeatureId::AirBlower, 1, 3),
    (FeatureId::SpaLight, 1, 4),
    (FeatureId::PoolLight, 1, 5),
    (FeatureId::WaterFeature, 2, 0),
    (FeatureId::Spillway, 2, 1),
];

/// Body of the periodic status broadcast.
///
/// Only the equipment bits and temperatures carry a known meaning, every other byte is
/// kept so that [`StatusPayload::encode`] reproduces the received body exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatusPayload {
    pub hour: u8,
    pub minute: u8,
    pub equip1: u8,
    pub equip2: u8,
    pub equip3: u8,
    pub reserved1: u8,
    pub reserved2: u8,
    pub reserved3: u8,
    pub reserved4: u8,
    pub uom: u8, // 0 == Fahrenheit, 4 == Celsius
    pub valve: u8,
    pub reserved5: u8,
    pub delay: u8,
    pub unknown: u8,
    pub pool_temp: u8,
    pub water_temp: u8,
    pub heater_active: u8, // bit 0: pool heater, bit 1: spa heater
    pub reserved6: u8,
    pub air_temp: u8,
    pub solar_temp: u8,
    pub reserved7: u8,
    pub reserved8: u8,
    pub heater_mode: u8,
    pub reserved9: u8,
    pub reserved10: u8,
    pub reserved11: u8,
    pub misc2: u8, // DST flag
}

impl StatusPayload {
    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        if body.len() != STATUS_LENGTH {
            log::debug!(
                "Invalid status body size - required={} received={}",
                STATUS_LENGTH,
                body.len()
            );
            return Err(Error::StatusSize {
                expected: STATUS_LENGTH,
                actual: body.len(),
            });
        }
        Ok(Self {
            hour: body[0],
            minute: body[1],
            equip1: body[2],
            equip2: body[3],
            equip3: body[4],
            reserved1: body[5],
            reserved2: body[6],
            reserved3: body[7],
            reserved4: body[8],
            uom: body[9],
            valve: body[10],
            reserved5: body[11],
            delay: body[12],
            unknown: body[13],
            pool_temp: body[14],
            water_temp: body[15],
            heater_active: body[16],
            reserved6: body[17],
            air_temp: body[18],
            solar_temp: body[19],
            reserved7: body[20],
            reserved8: body[21],
            heater_mode: body[22],
            reserved9: body[23],
            reserved10: body[24],
            reserved11: body[25],
            misc2: body[26],
        })
    }

    pub fn encode(&self) -> [u8; STATUS_LENGTH] {
        [
            self.hour,
            self.minute,
            self.equip1,
            self.equip2,
            self.equip3,
            self.reserved1,
            self.reserved2,
            self.reserved3,
            self.reserved4,
            self.uom,
            self.valve,
            self.reserved5,
            self.delay,
            self.unknown,
            self.pool_temp,
            self.water_temp,
            self.heater_active,
            self.reserved6,
            self.air_temp,
            self.solar_temp,
            self.reserved7,
            self.reserved8,
            self.heater_mode,
            self.reserved9,
            self.reserved10,
            self.reserved11,
            self.misc2,
        ]
    }

    /// States of the features whose circuit bits are part of the broadcast.
    pub fn feature_states(&self) -> [(FeatureId, bool); 8] {
        STATUS_FEATURE_BITS.map(|(feature, equip, bit)| {
            let byte = if equip == 1 { self.equip1 } else { self.equip2 };
            (feature, read_bit!(byte, bit))
        })
    }

    pub fn temperature_unit(&self) -> TemperatureUnit {
        if read_bit!(self.uom, 2) {
            TemperatureUnit::Celsius
        } else {
            TemperatureUnit::Fahrenheit
        }
    }

    pub fn pool_heater_active(&self) -> bool {
        read_bit!(self.heater_active, 0)
    }

    pub fn spa_heater_active(&self) -> bool {
        read_bit!(self.heater_active, 1)
    }
}
