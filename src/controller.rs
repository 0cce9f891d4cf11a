//! Poll-driven link to the panel.
//!
//! The [`Controller`] owns the decoder state, the feature registry and the command
//! encoder. A host calls [`Controller::poll`] periodically with whatever bytes the UART has
//! buffered; the call never waits for input and resumes where the previous one stopped.

use crate::command::{CommandEncoder, Target, COMMAND_FRAME_LENGTH};
use crate::decoder::{DecodeEvent, FrameDecoder, Phase};
use crate::interpreter::{StatusInterpreter, StatusReport, StatusSink, TemperatureSensor};
use crate::protocol::{Dialect, FeatureId};
use crate::registry::FeatureRegistry;
use crate::Error;
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

/// Non-blocking byte input.
pub trait ByteSource {
    /// Returns the next byte, or `None` when nothing is buffered right now.
    fn next_byte(&mut self) -> io::Result<Option<u8>>;
}

impl ByteSource for VecDeque<u8> {
    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.pop_front())
    }
}

/// Blocking frame output on the half-duplex bus.
///
/// Implementations enable the transceiver driver, write and flush the frame and release
/// the driver again before returning.
pub trait Transmitter {
    fn transmit(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Modem control line wired to the transceiver's driver-enable input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum DirectionLine {
    /// The adapter switches direction by itself.
    #[default]
    None,
    Rts,
    Dtr,
}

#[derive(Debug)]
pub struct Controller {
    decoder: FrameDecoder,
    interpreter: StatusInterpreter,
    encoder: CommandEncoder,
    registry: FeatureRegistry,
    frame_timeout: Option<Duration>,
    send_guard: bool,
    last_byte: Instant,
}

impl Controller {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            decoder: FrameDecoder::new(dialect),
            interpreter: StatusInterpreter::new(dialect),
            encoder: CommandEncoder::new(dialect),
            registry: FeatureRegistry::new(),
            frame_timeout: None,
            send_guard: true,
            last_byte: Instant::now(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.decoder.dialect()
    }

    /// Abandons a partially received frame when no byte arrived for `timeout`.
    pub fn set_frame_timeout(&mut self, timeout: Option<Duration>) {
        log::trace!("set frame timeout to {timeout:?}");
        self.frame_timeout = timeout;
    }

    /// When enabled (the default) commands are refused while a frame is being received.
    pub fn set_send_guard(&mut self, enabled: bool) {
        self.send_guard = enabled;
    }

    pub fn bind_feature(&mut self, feature: FeatureId, address: u8) {
        log::debug!("bind feature {feature} to address {address:#04X}");
        self.encoder.bind(feature, address);
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn feature_state(&self, feature: FeatureId) -> bool {
        self.registry.is_on(feature)
    }

    pub fn is_busy(&self) -> bool {
        self.decoder.in_frame()
    }

    pub fn poll<B, S>(&mut self, source: &mut B, sink: &mut S) -> Result<Option<StatusReport>, Error>
    where
        B: ByteSource + ?Sized,
        S: StatusSink + ?Sized,
    {
        self.poll_at(source, sink, Instant::now())
    }

    /// Drains `source` until it runs dry, a header was accepted or a status frame decoded.
    ///
    /// After an accepted header the call returns so the body is consumed by the next poll.
    /// At most one report is produced per call. The frame timeout is only checked once the
    /// source runs dry, so input buffered during a yield is never dropped.
    pub fn poll_at<B, S>(
        &mut self,
        source: &mut B,
        sink: &mut S,
        now: Instant,
    ) -> Result<Option<StatusReport>, Error>
    where
        B: ByteSource + ?Sized,
        S: StatusSink + ?Sized,
    {
        loop {
            let Some(byte) = source.next_byte()? else {
                self.expire_partial_frame(now);
                return Ok(None);
            };
            self.last_byte = now;
            let was = self.decoder.phase();
            match self.decoder.feed(byte) {
                DecodeEvent::NeedMoreInput => {
                    if was == Phase::ReadingHeader && self.decoder.phase() == Phase::ReadingBody {
                        return Ok(None);
                    }
                }
                DecodeEvent::FrameDiscarded(_) => {}
                DecodeEvent::FrameReady(frame) => {
                    match self.interpreter.interpret(&frame, &mut self.registry) {
                        Ok(report) => {
                            Self::publish(&report, sink);
                            return Ok(Some(report));
                        }
                        Err(err) => log::debug!("Discard status frame: {err}"),
                    }
                }
            }
        }
    }

    fn expire_partial_frame(&mut self, now: Instant) {
        if let Some(timeout) = self.frame_timeout {
            let idle = now.duration_since(self.last_byte);
            if self.decoder.in_frame() && idle >= timeout {
                log::warn!(
                    "No data for {idle:?} while in {:?}, resynchronizing",
                    self.decoder.phase()
                );
                self.decoder.reset();
            }
        }
    }

    fn publish<S: StatusSink + ?Sized>(report: &StatusReport, sink: &mut S) {
        sink.temperature(TemperatureSensor::Air, report.air_temperature);
        sink.temperature(TemperatureSensor::Water, report.water_temperature);
        for (feature, on) in &report.changes {
            sink.feature(*feature, *on);
        }
    }

    /// Encodes a command without touching the registry.
    pub fn prepare_command(
        &self,
        target: Target,
        on: bool,
    ) -> Result<[u8; COMMAND_FRAME_LENGTH], Error> {
        if self.send_guard && self.decoder.in_frame() {
            log::debug!("Refuse command while in {:?}", self.decoder.phase());
            return Err(Error::LinkBusy);
        }
        self.encoder.encode(target, on)
    }

    /// Records the commanded state of a sent command until a broadcast confirms it.
    pub fn commit_command<S: StatusSink + ?Sized>(&mut self, target: Target, on: bool, sink: &mut S) {
        if let Target::Feature(feature) = target {
            self.registry.set_optimistic(feature, on);
            sink.feature(feature, on);
        }
    }

    pub fn set_feature<T, S>(
        &mut self,
        transmitter: &mut T,
        sink: &mut S,
        target: Target,
        on: bool,
    ) -> Result<(), Error>
    where
        T: Transmitter + ?Sized,
        S: StatusSink + ?Sized,
    {
        let frame = self.prepare_command(target, on)?;
        transmitter.transmit(&frame)?;
        self.commit_command(target, on, sink);
        Ok(())
    }
}
