//! Register-addressed SPI bus driver.
//!
//! A [`Registry`] owns every SPI port of the process. Callers initialise a
//! port by index and then run single, burst or command-strobe transactions
//! against the register file of the peripheral behind it. The byte-level
//! work is done by the [`Backend`] selected at build time: a simulated
//! register-file peripheral by default, Linux spidev with the `hardware`
//! feature.

pub mod backend;
pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod frame;
pub mod port;
pub mod registry;

pub use backend::{ActiveBackend, Backend};
pub use config::{Config, PortConfig};
pub use error::{BackendError, BusError, InitError};
pub use frame::{Address, FrameFormat, WideCommand};
pub use port::{Port, PortState};
pub use registry::Registry;
