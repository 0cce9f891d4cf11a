use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use easytouch_lib::controller::DirectionLine;
use easytouch_lib::protocol::{Dialect, FeatureId};
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum DialectArg {
    /// Status broadcasts use frame type 0x02
    Current,
    /// Status broadcasts use frame type 0x14
    Legacy,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Current => Dialect::Current,
            DialectArg::Legacy => Dialect::Legacy,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum DirectionArg {
    /// The adapter switches between receive and transmit by itself
    None,
    /// RTS enables the transmitter
    Rts,
    /// DTR enables the transmitter
    Dtr,
}

impl From<DirectionArg> for DirectionLine {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::None => DirectionLine::None,
            DirectionArg::Rts => DirectionLine::Rts,
            DirectionArg::Dtr => DirectionLine::Dtr,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn is_on(self) -> bool {
        self == SwitchState::On
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Wait for one status broadcast and show clock, temperatures, heaters and circuits
    Status {
        /// How long to wait for a broadcast (e.g., "5s")
        #[arg(value_parser = humantime::parse_duration, long, default_value = "5s")]
        wait: Duration,
    },
    /// Continuously show every status broadcast
    Monitor,
    /// List the known features and their ids
    Features,
    /// Switch a feature on or off (e.g., "pool on", "spa-light off")
    Set {
        /// Feature name or id
        feature: FeatureId,
        #[arg(value_enum)]
        state: SwitchState,
    },
    /// Switch a circuit on or off by raw device address (older installations)
    SetAddress {
        /// Device address, decimal or hex (e.g., 0x10)
        #[arg(value_parser = maybe_hex::<u8>)]
        address: u8,
        #[arg(value_enum)]
        state: SwitchState,
    },
    /// Print the command frame for a feature without sending it
    Encode {
        /// Feature name or id
        feature: FeatureId,
        #[arg(value_enum)]
        state: SwitchState,
    },
    /// Run in daemon mode, publishing status broadcasts and accepting feature commands
    Daemon {
        /// Output destination for metrics
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval for republishing the complete state (e.g., "60s", "5m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "60s")]
        interval: Duration,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously print decoded values to the standard output (console).
    Console,
    /// Continuously publish decoded values to an MQTT broker and accept feature commands.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Simple)]
        format: MqttFormat,
    },
}

const fn about_text() -> &'static str {
    "pentair easytouch command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    /// Serial baud rate of the panel's RS-485 bus
    #[arg(long, default_value = "9600")]
    pub baud_rate: u32,

    /// Protocol generation spoken by the panel [default: current]
    #[arg(long, value_enum)]
    pub dialect: Option<DialectArg>,

    /// Modem control line driving the RS-485 transceiver direction
    #[arg(long, value_enum, default_value_t = DirectionArg::None)]
    pub direction_line: DirectionArg,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Timeout for serial write operations (e.g., "100ms", "1s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "100ms")]
    pub timeout: Duration,

    /// Interval between polls of the serial port (e.g., "50ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "50ms")]
    pub poll_interval: Duration,

    /// Abandon a partially received frame after this much silence (e.g., "500ms")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub frame_timeout: Option<Duration>,

    /// Number of retries when a command collides with an incoming frame
    #[arg(long, default_value = "3")]
    pub retries: u8,

    /// Optional link configuration file with feature address bindings
    #[arg(long)]
    pub config: Option<String>,
}
