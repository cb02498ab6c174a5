//! Poll an EPEVER Tracer MPPT charge controller over Modbus RTU, classify its
//! charge state and faults, and keep daily and all-time statistics.
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate serde_derive;

pub mod config;
pub mod error;
pub mod registers;
pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod status;
pub mod telemetry;
pub mod tracer;

pub use error::{Error, Result};
