//! Provides an asynchronous client for an EasyTouch panel using Tokio and the
//! `tokio-serial` crate for serial communication.
//!
//! This module is suitable for applications built on the Tokio runtime.
//!
//! # Example
//!
//! ```ignore
//! use easytouch_lib::protocol::{Dialect, FeatureId};
//! use easytouch_lib::tokio_serial_async::{EasyTouch, Error};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut panel = EasyTouch::new("/dev/ttyUSB0", Dialect::Current)?;
//!
//!     if let Some(report) = panel.wait_for_status(&mut (), Duration::from_secs(5)).await? {
//!         println!("Water: {}", report.water_temperature);
//!     }
//!
//!     panel.set_feature(&mut (), FeatureId::PoolLight.into(), true).await?;
//!     Ok(())
//! }
//! ```

use crate::command::Target;
use crate::controller::{Controller, DirectionLine};
use crate::interpreter::{StatusReport, StatusSink};
use crate::protocol::Dialect;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_CHUNK: usize = 64;

/// Errors specific to the asynchronous Tokio serial port client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error originating from the protocol library.
    #[error("EasyTouch error: {0}")]
    EasyTouchError(#[from] crate::Error),
    /// An I/O error, typically from the serial port communication.
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    /// An error from the `tokio-serial` crate.
    #[error("Tokio serial error: {0}")]
    TokioSerial(#[from] tokio_serial::Error),
    /// An error indicating that a Tokio timeout elapsed during an I/O operation.
    #[error("Tokio timeout elapsed: {0}")]
    TokioElapsed(#[from] tokio::time::error::Elapsed),
}

/// A specialized `Result` type for operations within the `tokio_serial_async` module.
type Result<T> = std::result::Result<T, Error>;

/// Asynchronous client for an EasyTouch panel.
///
/// Bytes read from the port are buffered and handed to the [`Controller`] one poll at a
/// time, so a poll that stops after a header leaves the body for the next call.
#[derive(Debug)]
pub struct EasyTouch {
    serial: tokio_serial::SerialStream,
    controller: Controller,
    pending: VecDeque<u8>,
    direction: DirectionLine,
    io_timeout: Duration,
    poll_interval: Duration,
}

impl EasyTouch {
    /// Opens `port` at the panel's default 9600 baud, 8N1.
    pub fn new(port: &str, dialect: Dialect) -> Result<Self> {
        Ok(Self {
            serial: tokio_serial::new(port, DEFAULT_BAUD_RATE)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()?,
            controller: Controller::new(dialect),
            pending: VecDeque::new(),
            direction: DirectionLine::None,
            io_timeout: Duration::from_secs(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    /// Sets the timeout for individual write operations on the serial port.
    pub fn set_timeout(&mut self, timeout: Duration) {
        log::trace!("set timeout to {timeout:?}");
        self.io_timeout = timeout;
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        log::trace!("set poll interval to {interval:?}");
        self.poll_interval = interval;
    }

    pub fn set_direction_line(&mut self, line: DirectionLine) -> Result<()> {
        log::trace!("set direction line to {line:?}");
        self.direction = line;
        self.drive(false)
    }

    fn drive(&mut self, transmit: bool) -> Result<()> {
        match self.direction {
            DirectionLine::None => {}
            DirectionLine::Rts => self.serial.write_request_to_send(transmit)?,
            DirectionLine::Dtr => self.serial.write_data_terminal_ready(transmit)?,
        }
        Ok(())
    }

    /// Moves whatever the driver buffered into the pending queue without waiting.
    async fn fill_pending(&mut self) -> Result<()> {
        let available = self.serial.bytes_to_read()? as usize;
        if available > 0 {
            let mut rx_buffer = vec![0; available.min(READ_CHUNK)];
            let received =
                tokio::time::timeout(self.io_timeout, self.serial.read(&mut rx_buffer)).await??;
            log::trace!("receive_bytes: {:02X?}", &rx_buffer[..received]);
            self.pending.extend(&rx_buffer[..received]);
        }
        Ok(())
    }

    /// Runs one poll of the controller over the currently available input.
    pub async fn poll<S: StatusSink + ?Sized>(
        &mut self,
        sink: &mut S,
    ) -> Result<Option<StatusReport>> {
        self.fill_pending().await?;
        Ok(self.controller.poll(&mut self.pending, sink)?)
    }

    /// Polls every poll interval until a status broadcast was decoded or `timeout` passed.
    pub async fn wait_for_status<S: StatusSink + ?Sized>(
        &mut self,
        sink: &mut S,
        timeout: Duration,
    ) -> Result<Option<StatusReport>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(report) = self.poll(sink).await? {
                return Ok(Some(report));
            }
            if Instant::now() >= deadline {
                log::debug!("No status broadcast within {timeout:?}");
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Sends a circuit command and records the commanded state.
    ///
    /// Fails with [`crate::Error::LinkBusy`] while a frame is being received.
    pub async fn set_feature<S: StatusSink + ?Sized>(
        &mut self,
        sink: &mut S,
        target: Target,
        on: bool,
    ) -> Result<()> {
        let frame = self.controller.prepare_command(target, on)?;
        log::trace!("write bytes: {frame:02X?}");
        self.drive(true)?;
        let written = tokio::time::timeout(self.io_timeout, async {
            self.serial.write_all(&frame).await?;
            self.serial.flush().await
        })
        .await;
        self.drive(false)?;
        written??;
        self.controller.commit_command(target, on, sink);
        Ok(())
    }
}
