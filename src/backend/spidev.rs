//! Linux spidev controller with a GPIO-driven chip select.
//!
//! The kernel's own chip select is disabled (`SPI_NO_CS`) so the line can
//! stay asserted across the separate byte transfers of one frame.
//! Ports with `wait_miso` set also sample the MISO line after asserting
//! chip select, until the peripheral signals it is ready by pulling it low.

use std::time::{Duration, Instant};

use embedded_hal::spi::SpiBus;
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::SpidevBus;
use log::{debug, info};
use rppal::gpio::{Gpio, Level, OutputPin, Pin};

use super::Backend;
use crate::config::PortConfig;
use crate::error::BackendError;

pub struct SpidevBackend {
    device: String,
    chip_select: u8,
    bus: Option<SpidevBus>,
    cs: Option<OutputPin>,
    wait_miso: Option<u8>,
    miso: Option<Pin>,
}

const MISO_READY_TIMEOUT: Duration = Duration::from_millis(50);

fn fault<E: std::fmt::Debug>(context: &str) -> impl FnOnce(E) -> BackendError + '_ {
    move |e| BackendError::Fault(format!("{}: {:?}", context, e))
}

fn mode_flags(mode: u8) -> SpiModeFlags {
    match mode {
        1 => SpiModeFlags::SPI_MODE_1,
        2 => SpiModeFlags::SPI_MODE_2,
        3 => SpiModeFlags::SPI_MODE_3,
        _ => SpiModeFlags::SPI_MODE_0,
    }
}

impl SpidevBackend {
    fn bus(&mut self) -> Result<&mut SpidevBus, BackendError> {
        self.bus
            .as_mut()
            .ok_or_else(|| BackendError::Fault(format!("{} is not open", self.device)))
    }

    fn cs(&mut self) -> Result<&mut OutputPin, BackendError> {
        let line = self.chip_select;
        self.cs
            .as_mut()
            .ok_or_else(|| BackendError::Fault(format!("chip select GPIO {} is not claimed", line)))
    }
}

impl Backend for SpidevBackend {
    fn from_config(config: &PortConfig) -> Self {
        SpidevBackend {
            device: config.device.clone(),
            chip_select: config.chip_select,
            bus: None,
            cs: None,
            wait_miso: config.wait_miso,
            miso: None,
        }
    }

    fn configure(&mut self, config: &PortConfig) -> Result<(), BackendError> {
        if self.cs.is_none() {
            let pin = Gpio::new()
                .and_then(|gpio| gpio.get(self.chip_select))
                .map_err(fault("Failed to claim chip select GPIO"))?;
            self.cs = Some(pin.into_output_high());
        }
        // Deassert before touching the clock configuration.
        self.cs()?.set_high();

        // Pin is only sampled; the SPI controller keeps its function.
        if let Some(line) = self.wait_miso.filter(|_| self.miso.is_none()) {
            let pin = Gpio::new()
                .and_then(|gpio| gpio.get(line))
                .map_err(fault("Failed to claim MISO GPIO"))?;
            self.miso = Some(pin);
        }

        if self.bus.is_none() {
            let bus = SpidevBus::open(&self.device).map_err(fault("Failed to open SPI device"))?;
            self.bus = Some(bus);
        }

        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(config.speed_hz)
            .mode(mode_flags(config.mode) | SpiModeFlags::SPI_NO_CS)
            .build();
        self.bus()?.configure(&options)?;

        info!(
            "SPI device {} configured: {} Hz, mode {}, CS GPIO {}",
            self.device, config.speed_hz, config.mode, self.chip_select
        );
        Ok(())
    }

    fn select(&mut self) -> Result<(), BackendError> {
        self.cs()?.set_low();
        if let Some(miso) = self.miso.as_ref() {
            let started = Instant::now();
            while miso.read() != Level::Low {
                if started.elapsed() > MISO_READY_TIMEOUT {
                    return Err(BackendError::Fault(format!(
                        "{}: MISO stayed high {:?} after chip select",
                        self.device, MISO_READY_TIMEOUT
                    )));
                }
                std::hint::spin_loop();
            }
        }
        Ok(())
    }

    fn shift(&mut self, byte: u8) -> Result<u8, BackendError> {
        let mut buffer = [byte];
        SpiBus::transfer_in_place(self.bus()?, &mut buffer).map_err(fault("SPI transfer failed"))?;
        debug!("spidev: 0x{:02x} -> 0x{:02x}", byte, buffer[0]);
        Ok(buffer[0])
    }

    fn deselect(&mut self) -> Result<(), BackendError> {
        // Release the line even when the bus is gone.
        let flushed = match self.bus.as_mut() {
            Some(bus) => SpiBus::flush(bus).map_err(fault("SPI flush failed")),
            None => Ok(()),
        };
        self.cs()?.set_high();
        flushed
    }
}
