//! chitu-rs: host-side support for ChiTu-based resin printers.
//!
//! - [`translator`] rewrites the board's serial dialect into what a
//!   Marlin-style host expects.
//! - [`analysis`] measures sliced files in an isolated worker process.
//! - [`worker`] is that worker.
//! - [`communication`] wires the translator to a serial port.

pub mod analysis;
pub mod communication;
pub mod host;
pub mod translator;
pub mod worker;

pub use chitu_shared::config;
pub use host::{HostAction, SessionHost, apply_actions};
pub use translator::{FirmwareTranslator, Translation};
