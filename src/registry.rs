//! Port registry: the process-wide table of SPI ports.
//!
//! Every port lives in its own mutex-guarded slot together with its
//! backend, so transactions on one port are serialised while different
//! ports never contend.

use log::{info, warn};
use parking_lot::Mutex;

use crate::backend::Backend;
use crate::config::{Config, PortConfig};
use crate::error::{BusError, InitError};
use crate::port::{Port, PortState};

struct Slot<B> {
    port: Port,
    backend: B,
}

pub struct Registry<B> {
    slots: Vec<Mutex<Slot<B>>>,
}

impl<B: Backend> Registry<B> {
    /// Builds a registry from explicit backends; port `i` is the `i`-th entry.
    ///
    /// # Panics
    ///
    /// Panics if more than 256 ports are given, since port indices are `u8`.
    pub fn new(ports: Vec<(PortConfig, B)>) -> Self {
        assert!(
            ports.len() <= usize::from(u8::MAX) + 1,
            "{} ports given, at most 256 are addressable",
            ports.len()
        );
        let slots = ports
            .into_iter()
            .zip(0..=u8::MAX)
            .map(|((config, backend), index)| {
                Mutex::new(Slot {
                    port: Port::new(index, config),
                    backend,
                })
            })
            .collect();
        Registry { slots }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config
                .ports
                .iter()
                .map(|port| (port.clone(), B::from_config(port)))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Configures the controller behind `index` and marks the port ready.
    /// Calling it again on a ready port reconfigures it.
    pub fn init(&self, index: u8) -> Result<(), InitError> {
        let slot = self.slots.get(index as usize).ok_or(InitError::InvalidPort(index))?;
        let mut slot = slot.lock();
        let Slot { port, backend } = &mut *slot;

        match backend.configure(port.config()) {
            Ok(()) => {
                port.set_state(PortState::Ready);
                info!(
                    "SPI port {} ({}) ready: {} Hz, mode {}",
                    index,
                    port.name(),
                    port.config().speed_hz,
                    port.config().mode
                );
                Ok(())
            }
            Err(source) => {
                port.set_state(PortState::Faulted);
                warn!("SPI port {} ({}) failed to configure: {}", index, port.name(), source);
                Err(InitError::HardwareFault { port: index, source })
            }
        }
    }

    /// Re-initialises a port at a new clock rate.
    pub fn init_at(&self, index: u8, speed_hz: u32) -> Result<(), InitError> {
        let slot = self.slots.get(index as usize).ok_or(InitError::InvalidPort(index))?;
        slot.lock().port.config_mut().speed_hz = speed_hz;
        self.init(index)
    }

    /// Snapshot of a ready port.
    pub fn lookup(&self, index: u8) -> Result<Port, BusError> {
        let slot = self.slots.get(index as usize).ok_or(BusError::InvalidPort(index))?;
        let slot = slot.lock();
        if !slot.port.is_ready() {
            return Err(BusError::NotInitialized(index));
        }
        Ok(slot.port.clone())
    }

    /// Snapshot of any known port, whatever its state.
    pub fn port(&self, index: u8) -> Option<Port> {
        self.slots.get(index as usize).map(|slot| slot.lock().port.clone())
    }

    /// Runs `f` with exclusive access to a ready port and its backend.
    pub(crate) fn with_ready<T>(
        &self,
        index: u8,
        f: impl FnOnce(&mut Port, &mut B) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        let slot = self.slots.get(index as usize).ok_or(BusError::InvalidPort(index))?;
        let mut slot = slot.lock();
        let Slot { port, backend } = &mut *slot;
        if !port.is_ready() {
            return Err(BusError::NotInitialized(index));
        }
        f(port, backend)
    }

    /// Tears the registry down, leaving chip select deasserted on every
    /// ready port.
    pub fn shutdown(self) {
        for slot in self.slots {
            let Slot { port, mut backend } = slot.into_inner();
            if !port.is_ready() {
                continue;
            }
            if let Err(e) = backend.deselect() {
                warn!("SPI port {} ({}) release failed: {}", port.index(), port.name(), e);
            }
            info!(
                "SPI port {} ({}) released after {} transactions, {} faults",
                port.index(),
                port.name(),
                port.transactions(),
                port.faults()
            );
        }
    }
}
