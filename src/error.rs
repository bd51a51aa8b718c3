use thiserror::Error;

use crate::frame::Address;

/// Failure reported by a backend while configuring or shifting bytes.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("controller fault: {0}")]
    Fault(String),
    #[error("injected fault")]
    Injected,
}

/// Errors from [`Registry::init`](crate::Registry::init).
#[derive(Debug, Error)]
pub enum InitError {
    #[error("no SPI port with index {0}")]
    InvalidPort(u8),
    #[error("SPI port {port} could not be configured")]
    HardwareFault {
        port: u8,
        #[source]
        source: BackendError,
    },
}

/// Errors from a bus transaction or a port lookup.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("no SPI port with index {0}")]
    InvalidPort(u8),
    #[error("SPI port {0} is not initialised")]
    NotInitialized(u8),
    #[error("address {address} is not valid on SPI port {port}")]
    InvalidAddress { port: u8, address: Address },
    #[error("transaction on SPI port {port} aborted")]
    IoFailure {
        port: u8,
        #[source]
        source: BackendError,
    },
}

impl BusError {
    /// Port the error refers to.
    pub fn port(&self) -> u8 {
        match self {
            BusError::InvalidPort(port) | BusError::NotInitialized(port) => *port,
            BusError::InvalidAddress { port, .. } | BusError::IoFailure { port, .. } => *port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_io_failure_keeps_source() {
        let err = BusError::IoFailure {
            port: 1,
            source: BackendError::Fault("timeout".to_string()),
        };
        assert_eq!(err.port(), 1);
        assert_eq!(err.to_string(), "transaction on SPI port 1 aborted");
        let source = err.source().expect("source is chained");
        assert_eq!(source.to_string(), "controller fault: timeout");
    }

    #[test]
    fn test_invalid_address_message() {
        let err = BusError::InvalidAddress {
            port: 0,
            address: Address::Long(0x1234),
        };
        assert_eq!(err.to_string(), "address 0x1234 is not valid on SPI port 0");
    }
}
