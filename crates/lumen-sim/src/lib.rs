//! # Lumen Sim: host-side platform for the bulb firmware
//!
//! Everything the firmware core expects from hardware, reimplemented as
//! inspectable in-memory devices: a scripted clock and temperature ADC, a
//! frame-capturing radio, NOR-semantics flash with power-loss injection,
//! and a PWM recorder. The [`harness`] module wires whole nodes together
//! and shuttles frames between them.
//!
//! The devices double as contract checkers: out-of-range flash access,
//! program operations that would need an erase first, and frames over the
//! mesh MTU are recorded as [`SimError`]s for tests to assert on.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod harness;
pub mod platform;

pub use error::SimError;
pub use harness::{deliver_frames, run_slices, SimNode, SimPlatform};
pub use platform::{SimClock, SimFlash, SimPwm, SimRadio, SimTempSensor};
