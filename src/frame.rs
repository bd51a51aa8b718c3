//! Register addressing and the header-byte convention of the attached
//! peripheral.
//!
//! Register-file peripherals such as CC112x transceivers expect every
//! access to start with a header byte: the read flag, the burst flag and
//! the register address share that byte. A 16-bit address is sent as an
//! extended page in the header followed by the register within the page,
//! or, for memory-style parts, as an opcode followed by the address MSB and
//! LSB.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// A peripheral register address, 8-bit or 16-bit wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    Short(u8),
    Long(u16),
}

impl Address {
    /// Picks the narrowest width for a register number: anything whose
    /// high byte is zero lives in the 8-bit register space.
    pub fn from_register(register: u16) -> Self {
        if register & 0xFF00 == 0 {
            Address::Short(register as u8)
        } else {
            Address::Long(register)
        }
    }
}

impl From<u8> for Address {
    fn from(address: u8) -> Self {
        Address::Short(address)
    }
}

impl From<u16> for Address {
    fn from(address: u16) -> Self {
        Address::Long(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Short(address) => write!(f, "0x{:02x}", address),
            Address::Long(address) => write!(f, "0x{:04x}", address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Address phase of one access: the header byte and the address bytes
/// that follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command: u8,
    address: [u8; 2],
    address_len: usize,
}

impl Header {
    fn new(command: u8, address: &[u8]) -> Self {
        let mut bytes = [0u8; 2];
        bytes[..address.len()].copy_from_slice(address);
        Header {
            command,
            address: bytes,
            address_len: address.len(),
        }
    }

    /// Bytes shifted out after the header byte.
    pub fn address_phase(&self) -> &[u8] {
        &self.address[..self.address_len]
    }
}

/// Opcodes of a command + 16-bit address peripheral (FRAM, EEPROM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WideCommand {
    pub read: u8,
    pub write: u8,
}

/// Header-byte layout of a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameFormat {
    /// Set in the header byte for reads
    pub read_flag: u8,
    /// Set in the header byte when the peripheral should auto-increment
    pub burst_flag: u8,
    /// Address-field values that announce a 16-bit access
    pub extended_pages: Vec<u8>,
    /// When set, 16-bit addresses are sent as an opcode followed by the
    /// address MSB and LSB unchanged, instead of through an extended page
    pub wide_command: Option<WideCommand>,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            read_flag: 0x80,
            burst_flag: 0x40,
            extended_pages: vec![0x2F, 0x3E],
            wide_command: None,
        }
    }
}

impl FrameFormat {
    pub fn address_mask(&self) -> u8 {
        !(self.read_flag | self.burst_flag)
    }

    /// Number of registers in the 8-bit register space.
    pub fn short_space_len(&self) -> usize {
        self.address_mask() as usize + 1
    }

    pub fn is_extended_page(&self, field: u8) -> bool {
        self.extended_pages.contains(&field)
    }

    /// Direction of a 16-bit access announced by `byte`, if it is one of the
    /// wide opcodes.
    pub fn wide_direction(&self, byte: u8) -> Option<Direction> {
        match self.wide_command {
            Some(wide) if byte == wide.read => Some(Direction::Read),
            Some(wide) if byte == wide.write => Some(Direction::Write),
            _ => None,
        }
    }

    /// Builds the address phase for an access, or `None` when the address
    /// cannot be expressed in this format.
    pub fn header(&self, address: Address, direction: Direction, burst: bool) -> Option<Header> {
        let mut flags = 0;
        if direction == Direction::Read {
            flags |= self.read_flag;
        }
        if burst {
            flags |= self.burst_flag;
        }

        match address {
            Address::Short(register) => {
                let command = flags | register;
                if register & !self.address_mask() != 0
                    || self.is_extended_page(register)
                    || self.wide_direction(command).is_some()
                {
                    return None;
                }
                Some(Header::new(command, &[]))
            }
            Address::Long(address) => match self.wide_command {
                // The peripheral always auto-increments; no burst marker.
                Some(wide) => {
                    let opcode = match direction {
                        Direction::Read => wide.read,
                        Direction::Write => wide.write,
                    };
                    Some(Header::new(opcode, &address.to_be_bytes()))
                }
                None => {
                    let [page, register] = address.to_be_bytes();
                    if !self.is_extended_page(page) {
                        return None;
                    }
                    Some(Header::new(flags | page, &[register]))
                }
            },
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.read_flag == 0 || self.burst_flag == 0 {
            bail!("read_flag and burst_flag must both be non-zero");
        }
        if self.read_flag & self.burst_flag != 0 {
            bail!(
                "read_flag 0x{:02x} overlaps burst_flag 0x{:02x}",
                self.read_flag,
                self.burst_flag
            );
        }
        let mask = self.address_mask() as u16;
        if !(mask + 1).is_power_of_two() {
            bail!("address field 0x{:02x} is not a contiguous low-bit run", mask);
        }
        for page in &self.extended_pages {
            if u16::from(*page) > mask {
                bail!("extended page 0x{:02x} does not fit the address field", page);
            }
        }
        if let Some(wide) = self.wide_command {
            if wide.read == wide.write {
                bail!("wide read and write opcodes are both 0x{:02x}", wide.read);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_headers() {
        let format = FrameFormat::default();
        assert_eq!(format.address_mask(), 0x3F);
        assert_eq!(format.short_space_len(), 64);

        let read = format.header(Address::Short(0x0A), Direction::Read, false).unwrap();
        assert_eq!(read.command, 0x8A);
        assert!(read.address_phase().is_empty());

        let write = format.header(Address::Short(0x0A), Direction::Write, true).unwrap();
        assert_eq!(write.command, 0x4A);
    }

    #[test]
    fn test_long_header_uses_extended_page() {
        let format = FrameFormat::default();
        let header = format.header(Address::Long(0x2F12), Direction::Read, true).unwrap();
        assert_eq!(header.command, 0xEF);
        assert_eq!(header.address_phase(), &[0x12]);
    }

    #[test]
    fn test_wide_command_sends_full_address() {
        let format = FrameFormat {
            wide_command: Some(WideCommand { read: 0x03, write: 0x02 }),
            ..FrameFormat::default()
        };
        for address in [0x0010u16, 0x1234, 0x8000, 0xFFFF] {
            let read = format.header(Address::Long(address), Direction::Read, true).unwrap();
            assert_eq!(read.command, 0x03);
            assert_eq!(read.address_phase(), &address.to_be_bytes());
            let write = format.header(Address::Long(address), Direction::Write, false).unwrap();
            assert_eq!(write.command, 0x02);
        }
        assert_eq!(format.wide_direction(0x03), Some(Direction::Read));
        assert_eq!(format.wide_direction(0x04), None);
        // 8-bit writes to 0x02/0x03 would look like the opcodes
        assert!(format.header(Address::Short(0x02), Direction::Write, false).is_none());
        assert!(format.header(Address::Short(0x02), Direction::Read, false).is_some());
    }

    #[test]
    fn test_rejects_unrepresentable_addresses() {
        let format = FrameFormat::default();
        assert!(format.header(Address::Short(0x40), Direction::Read, false).is_none());
        assert!(format.header(Address::Short(0x2F), Direction::Write, false).is_none());
        assert!(format.header(Address::Long(0x1000), Direction::Read, false).is_none());
    }

    #[test]
    fn test_from_register_narrows() {
        assert_eq!(Address::from_register(0x000A), Address::Short(0x0A));
        assert_eq!(Address::from_register(0x2F0A), Address::Long(0x2F0A));
        assert_eq!(Address::Short(0x0A).to_string(), "0x0a");
    }

    #[test]
    fn test_check() {
        assert!(FrameFormat::default().check().is_ok());

        let overlapping = FrameFormat {
            read_flag: 0x80,
            burst_flag: 0x80,
            ..FrameFormat::default()
        };
        assert!(overlapping.check().is_err());

        let split_mask = FrameFormat {
            read_flag: 0x01,
            burst_flag: 0x40,
            extended_pages: vec![],
            wide_command: None,
        };
        assert!(split_mask.check().is_err());

        let page_outside = FrameFormat {
            extended_pages: vec![0x7F],
            ..FrameFormat::default()
        };
        assert!(page_outside.check().is_err());

        let same_opcode = FrameFormat {
            wide_command: Some(WideCommand { read: 0x03, write: 0x03 }),
            ..FrameFormat::default()
        };
        assert!(same_opcode.check().is_err());
    }
}
