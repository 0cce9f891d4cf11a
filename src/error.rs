use crate::protocol::FeatureId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Raised when opening or configuring the serial port fails.
    #[cfg(feature = "serialport")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("Value {0} is not a known feature")]
    InvalidFeature(u8),
    #[error("Feature {0} cannot be addressed by a command")]
    UnaddressableFeature(FeatureId),
    #[error(
        "Unexpected frame header - type={kind:#04X} dest={destination:#04X} src={src:#04X}"
    )]
    UnexpectedHeader {
        kind: u8,
        destination: u8,
        src: u8,
    },
    #[error("Unexpected command {0:#04X} in status frame")]
    UnexpectedCommand(u8),
    #[error("Invalid status body size - required={expected} received={actual}")]
    StatusSize { expected: usize, actual: usize },
    /// A frame is being received; transmitting now would collide on the half-duplex bus.
    #[error("Link is busy receiving a frame")]
    LinkBusy,
}
