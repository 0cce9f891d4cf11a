use crate::command::Target;
use crate::controller::{ByteSource, Controller, DirectionLine, Transmitter};
use crate::interpreter::{StatusReport, StatusSink};
use crate::protocol::Dialect;
use crate::Error;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_CHUNK: usize = 64;

/// Half-duplex RS-485 port.
///
/// Reads never block: only the bytes the driver already buffered are consumed.
pub struct SerialBus {
    serial: Box<dyn serialport::SerialPort>,
    direction: DirectionLine,
    pending: VecDeque<u8>,
}

impl std::fmt::Debug for SerialBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialBus")
            .field("port", &self.serial.name())
            .field("direction", &self.direction)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl SerialBus {
    pub fn open(port: &str, baud_rate: u32) -> Result<Self, Error> {
        let serial = serialport::new(port, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;
        Ok(Self {
            serial,
            direction: DirectionLine::None,
            pending: VecDeque::new(),
        })
    }

    pub fn set_direction_line(&mut self, line: DirectionLine) -> Result<(), Error> {
        self.direction = line;
        self.drive(false)?;
        Ok(())
    }

    /// Timeout for a blocking write.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.serial.set_timeout(timeout)?;
        Ok(())
    }

    fn drive(&mut self, transmit: bool) -> io::Result<()> {
        match self.direction {
            DirectionLine::None => Ok(()),
            DirectionLine::Rts => Ok(self.serial.write_request_to_send(transmit)?),
            DirectionLine::Dtr => Ok(self.serial.write_data_terminal_ready(transmit)?),
        }
    }
}

impl ByteSource for SerialBus {
    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if self.pending.is_empty() {
            let available = self.serial.bytes_to_read()? as usize;
            if available == 0 {
                return Ok(None);
            }
            let mut rx_buffer = vec![0; available.min(READ_CHUNK)];
            let received = self.serial.read(&mut rx_buffer)?;
            log::trace!("receive_bytes: {:02X?}", &rx_buffer[..received]);
            self.pending.extend(&rx_buffer[..received]);
        }
        Ok(self.pending.pop_front())
    }
}

impl Transmitter for SerialBus {
    fn transmit(&mut self, frame: &[u8]) -> io::Result<()> {
        log::trace!("write bytes: {frame:02X?}");
        self.drive(true)?;
        let written = self
            .serial
            .write_all(frame)
            .and_then(|()| self.serial.flush());
        let released = self.drive(false);
        written?;
        released
    }
}

/// Synchronous client: a [`Controller`] on a [`SerialBus`].
#[derive(Debug)]
pub struct EasyTouch {
    bus: SerialBus,
    controller: Controller,
    poll_interval: Duration,
}

impl EasyTouch {
    pub fn new(port: &str, dialect: Dialect) -> Result<Self, Error> {
        Self::with_baud_rate(port, DEFAULT_BAUD_RATE, dialect)
    }

    pub fn with_baud_rate(port: &str, baud_rate: u32, dialect: Dialect) -> Result<Self, Error> {
        Ok(Self {
            bus: SerialBus::open(port, baud_rate)?,
            controller: Controller::new(dialect),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    pub fn set_direction_line(&mut self, line: DirectionLine) -> Result<(), Error> {
        log::trace!("set direction line to {line:?}");
        self.bus.set_direction_line(line)
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        log::trace!("set timeout to {timeout:?}");
        self.bus.set_timeout(timeout)
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        log::trace!("set poll interval to {interval:?}");
        self.poll_interval = interval;
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn poll<S: StatusSink + ?Sized>(
        &mut self,
        sink: &mut S,
    ) -> Result<Option<StatusReport>, Error> {
        self.controller.poll(&mut self.bus, sink)
    }

    /// Polls every poll interval until a status broadcast was decoded or `timeout` passed.
    pub fn wait_for_status<S: StatusSink + ?Sized>(
        &mut self,
        sink: &mut S,
        timeout: Duration,
    ) -> Result<Option<StatusReport>, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(report) = self.poll(sink)? {
                return Ok(Some(report));
            }
            if Instant::now() >= deadline {
                log::debug!("No status broadcast within {timeout:?}");
                return Ok(None);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    pub fn set_feature<S: StatusSink + ?Sized>(
        &mut self,
        sink: &mut S,
        target: Target,
        on: bool,
    ) -> Result<(), Error> {
        self.controller.set_feature(&mut self.bus, sink, target, on)
    }

    /// Like [`EasyTouch::set_feature`], but keeps receiving and tries again while the
    /// bus is busy.
    pub fn set_feature_with_retry<S: StatusSink + ?Sized>(
        &mut self,
        sink: &mut S,
        target: Target,
        on: bool,
        retries: u8,
    ) -> Result<(), Error> {
        for t in 0..retries {
            match self.set_feature(sink, target, on) {
                Err(Error::LinkBusy) => {
                    log::trace!("Failed try {} of {}, repeating (link busy)", t + 1, retries);
                    self.poll(sink)?;
                    std::thread::sleep(self.poll_interval);
                }
                result => return result,
            }
        }
        self.set_feature(sink, target, on)
    }
}
