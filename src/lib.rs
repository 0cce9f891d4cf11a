#![cfg_attr(docsrs, feature(doc_cfg))]
//! # easytouch_lib
//!
//! This crate decodes and encodes the RS-485 protocol of Pentair EasyTouch pool/spa
//! control panels. The panel periodically broadcasts a status frame with circuit states
//! and temperatures and accepts commands that switch a circuit (feature) on or off.
//!
//! The protocol core is transport agnostic: a [`controller::Controller`] is fed from any
//! [`controller::ByteSource`] and sends through any [`controller::Transmitter`].
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `easytouch` command-line tool.
//!
//! ### Client Features
//! - `serialport`: Enables the **synchronous** client using the `serialport` crate.
//! - `tokio-serial-async`: Enables the **asynchronous** client using `tokio` and `tokio-serial`.
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for serializing/deserializing data structures.
//! - `bin-dependencies`: Enables all features required by the `easytouch` binary executable.

/// Contains error types for the library.
mod error;
/// Builds circuit on/off commands.
pub mod command;
/// Poll-driven link combining decoder, interpreter and registry.
pub mod controller;
/// Frame synchronizer state machine.
pub mod decoder;
/// Status broadcast interpretation.
pub mod interpreter;
/// Wire constants, headers and the status payload.
pub mod protocol;
/// Last known feature states.
pub mod registry;

pub use error::Error;

/// Synchronous client for the panel's RS-485 bus.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

/// Asynchronous client for the panel's RS-485 bus.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;
