//! Transaction engine: one chip-select framed access per call.
//!
//! Each operation takes the port's lock for its whole frame, so at most one
//! transaction is in flight per port. Chip select is released on every
//! path, including backend failures.

use log::{debug, warn};

use crate::backend::Backend;
use crate::error::{BackendError, BusError};
use crate::frame::{Address, Direction};
use crate::port::Port;
use crate::registry::Registry;

const DUMMY: u8 = 0x00;

enum Payload<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl Payload<'_> {
    fn direction(&self) -> Direction {
        match self {
            Payload::Read(_) => Direction::Read,
            Payload::Write(_) => Direction::Write,
        }
    }

    fn len(&self) -> usize {
        match self {
            Payload::Read(buffer) => buffer.len(),
            Payload::Write(buffer) => buffer.len(),
        }
    }
}

/// Runs `body` between select and deselect. Deselect runs even when
/// select or the body fails; the first error wins.
fn framed<B, T>(
    backend: &mut B,
    body: impl FnOnce(&mut B) -> Result<T, BackendError>,
) -> Result<T, BackendError>
where
    B: Backend,
{
    if let Err(e) = backend.select() {
        if let Err(release) = backend.deselect() {
            warn!("chip select release after failed select: {}", release);
        }
        return Err(e);
    }
    let result = body(backend);
    let released = backend.deselect();
    let value = result?;
    released?;
    Ok(value)
}

fn finish(port: &mut Port, result: Result<u8, BackendError>) -> Result<(), BusError> {
    match result {
        Ok(status) => {
            port.record_success(status);
            Ok(())
        }
        Err(source) => {
            port.record_fault();
            warn!("SPI port {} ({}): transaction aborted: {}", port.index(), port.name(), source);
            Err(BusError::IoFailure {
                port: port.index(),
                source,
            })
        }
    }
}

impl<B: Backend> Registry<B> {
    fn access(&self, index: u8, address: Address, payload: Payload<'_>, burst: bool) -> Result<(), BusError> {
        self.with_ready(index, |port, backend| {
            let direction = payload.direction();
            let header = port
                .config()
                .frame
                .header(address, direction, burst)
                .ok_or(BusError::InvalidAddress { port: index, address })?;

            if payload.len() == 0 {
                debug!("SPI port {}: empty burst at {}, no bus activity", index, address);
                return Ok(());
            }
            debug!(
                "SPI port {}: {:?} {} byte(s) at {} (header 0x{:02x})",
                index,
                direction,
                payload.len(),
                address,
                header.command
            );

            let result = framed(backend, |bus| {
                let status = bus.shift(header.command)?;
                for byte in header.address_phase() {
                    bus.shift(*byte)?;
                }
                match payload {
                    Payload::Read(buffer) => {
                        for byte in buffer.iter_mut() {
                            *byte = bus.shift(DUMMY)?;
                        }
                    }
                    Payload::Write(buffer) => {
                        for byte in buffer {
                            bus.shift(*byte)?;
                        }
                    }
                }
                Ok(status)
            });
            finish(port, result)
        })
    }

    /// Reads one register.
    pub fn read(&self, index: u8, address: impl Into<Address>) -> Result<u8, BusError> {
        let mut value = [0u8; 1];
        self.access(index, address.into(), Payload::Read(&mut value), false)?;
        Ok(value[0])
    }

    /// Writes one register.
    pub fn write(&self, index: u8, address: impl Into<Address>, value: u8) -> Result<(), BusError> {
        self.access(index, address.into(), Payload::Write(&[value]), false)
    }

    /// Reads `buffer.len()` consecutive registers in a single frame, relying
    /// on the peripheral to auto-increment its register pointer. An empty
    /// buffer performs no bus activity.
    pub fn burst_read(&self, index: u8, address: impl Into<Address>, buffer: &mut [u8]) -> Result<(), BusError> {
        self.access(index, address.into(), Payload::Read(buffer), true)
    }

    /// Writes `data` to consecutive registers in a single frame.
    pub fn burst_write(&self, index: u8, address: impl Into<Address>, data: &[u8]) -> Result<(), BusError> {
        self.access(index, address.into(), Payload::Write(data), true)
    }

    /// Sends an address-less command byte.
    pub fn cmd_strobe(&self, index: u8, command: u8) -> Result<(), BusError> {
        self.with_ready(index, |port, backend| {
            debug!("SPI port {}: strobe 0x{:02x}", index, command);
            let result = framed(backend, |bus| bus.shift(command));
            finish(port, result)
        })
    }

    /// Chip status byte returned during the last completed transaction.
    pub fn last_status(&self, index: u8) -> Result<Option<u8>, BusError> {
        Ok(self.lookup(index)?.last_status())
    }
}
