//! Byte-shifting backends behind the transaction engine.
//!
//! Exactly one backend is active per build: the simulated register-file
//! peripheral by default, the spidev controller with `--features hardware`.

use crate::config::PortConfig;
use crate::error::BackendError;

pub mod sim;
#[cfg(feature = "hardware")]
pub mod spidev;

/// The capability set the engine drives: chip-select framing and
/// full-duplex single-byte shifts.
pub trait Backend: Send {
    /// Creates an unconfigured backend for a port. Nothing is opened yet.
    fn from_config(config: &PortConfig) -> Self
    where
        Self: Sized;

    /// (Re)configures clock rate and mode, leaving chip select deasserted.
    fn configure(&mut self, config: &PortConfig) -> Result<(), BackendError>;

    fn select(&mut self) -> Result<(), BackendError>;

    /// Shifts one byte out and returns the byte shifted in.
    fn shift(&mut self, byte: u8) -> Result<u8, BackendError>;

    fn deselect(&mut self) -> Result<(), BackendError>;
}

#[cfg(not(feature = "hardware"))]
pub type ActiveBackend = sim::SimBackend;

#[cfg(feature = "hardware")]
pub type ActiveBackend = self::spidev::SpidevBackend;
