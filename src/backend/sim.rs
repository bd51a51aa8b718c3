//! Simulated register-file peripheral for hosted builds and tests.
//!
//! The peripheral decodes every chip-select frame with the port's
//! [`FrameFormat`]: a header byte, an optional extended register byte (or
//! two address bytes after a wide opcode) and then data bytes. Burst
//! accesses auto-increment the register pointer, wrapping at the end of the
//! 8-bit space, of the extended page or of the 16-bit space.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::Backend;
use crate::config::PortConfig;
use crate::error::BackendError;
use crate::frame::{Address, Direction, FrameFormat};

const PAGE_LEN: usize = 256;
const DEFAULT_STATUS: u8 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Space {
    Short,
    Page(u8),
    Wide,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Header,
    Extended { page: u8, read: bool, burst: bool },
    WideHigh { read: bool },
    WideLow { high: u8, read: bool },
    Data { space: Space, pointer: u16, read: bool, burst: bool },
    Done,
}

/// Clock settings applied by the last successful `configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSettings {
    pub speed_hz: u32,
    pub mode: u8,
}

#[derive(Debug)]
struct SimState {
    format: FrameFormat,
    short: Vec<u8>,
    pages: BTreeMap<u8, Vec<u8>>,
    wide: BTreeMap<u16, u8>,
    status: u8,
    settings: Option<BusSettings>,
    selected: bool,
    phase: Phase,
    current: Vec<u8>,
    frames: Vec<Vec<u8>>,
    strobes: Vec<u8>,
    touches: usize,
    collisions: usize,
    fail_configure: bool,
    fail_select: bool,
    fail_deselect: bool,
    fail_after: Option<usize>,
}

impl SimState {
    fn new(format: FrameFormat) -> Self {
        let pages = format
            .extended_pages
            .iter()
            .map(|page| (*page, vec![0u8; PAGE_LEN]))
            .collect();
        SimState {
            short: vec![0u8; format.short_space_len()],
            pages,
            wide: BTreeMap::new(),
            format,
            status: DEFAULT_STATUS,
            settings: None,
            selected: false,
            phase: Phase::Header,
            current: Vec::new(),
            frames: Vec::new(),
            strobes: Vec::new(),
            touches: 0,
            collisions: 0,
            fail_configure: false,
            fail_select: false,
            fail_deselect: false,
            fail_after: None,
        }
    }

    fn cell(&mut self, space: Space, pointer: u16) -> &mut u8 {
        match space {
            Space::Short => &mut self.short[pointer as usize],
            Space::Wide => self.wide.entry(pointer).or_insert(0),
            Space::Page(page) => {
                let cells = self
                    .pages
                    .entry(page)
                    .or_insert_with(|| vec![0u8; PAGE_LEN]);
                &mut cells[pointer as usize]
            }
        }
    }

    fn next_pointer(&self, space: Space, pointer: u16) -> u16 {
        match space {
            Space::Short => ((pointer as usize + 1) % self.short.len()) as u16,
            Space::Page(_) => u16::from((pointer as u8).wrapping_add(1)),
            Space::Wide => pointer.wrapping_add(1),
        }
    }

    fn locate(&self, address: Address) -> (Space, u16) {
        match address {
            Address::Short(register) => (
                Space::Short,
                u16::from(register & self.format.address_mask()),
            ),
            Address::Long(address) if self.format.wide_command.is_some() => (Space::Wide, address),
            Address::Long(address) => {
                let [page, register] = address.to_be_bytes();
                (Space::Page(page), u16::from(register))
            }
        }
    }

    fn shift(&mut self, byte: u8) -> Result<u8, BackendError> {
        if !self.selected {
            return Err(BackendError::Fault("shift with chip select deasserted".to_string()));
        }
        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                self.fail_after = None;
                return Err(BackendError::Injected);
            }
            *remaining -= 1;
        }
        self.current.push(byte);

        let status = self.status;
        let phase = self.phase;
        match phase {
            Phase::Header => {
                if let Some(direction) = self.format.wide_direction(byte) {
                    self.phase = Phase::WideHigh { read: direction == Direction::Read };
                    return Ok(status);
                }
                let read = byte & self.format.read_flag != 0;
                let burst = byte & self.format.burst_flag != 0;
                let field = byte & self.format.address_mask();
                self.phase = if self.format.is_extended_page(field) {
                    Phase::Extended { page: field, read, burst }
                } else {
                    Phase::Data { space: Space::Short, pointer: u16::from(field), read, burst }
                };
                Ok(status)
            }
            Phase::Extended { page, read, burst } => {
                let pointer = u16::from(byte);
                self.phase = Phase::Data { space: Space::Page(page), pointer, read, burst };
                Ok(status)
            }
            Phase::WideHigh { read } => {
                self.phase = Phase::WideLow { high: byte, read };
                Ok(status)
            }
            Phase::WideLow { high, read } => {
                let pointer = u16::from_be_bytes([high, byte]);
                self.phase = Phase::Data { space: Space::Wide, pointer, read, burst: true };
                Ok(status)
            }
            Phase::Data { space, pointer, read, burst } => {
                self.touches += 1;
                let cell = self.cell(space, pointer);
                let out = if read {
                    *cell
                } else {
                    *cell = byte;
                    status
                };
                self.phase = if burst {
                    Phase::Data { space, pointer: self.next_pointer(space, pointer), read, burst }
                } else {
                    Phase::Done
                };
                Ok(out)
            }
            Phase::Done => Ok(status),
        }
    }

    fn end_frame(&mut self) {
        if !self.selected {
            return;
        }
        let frame = std::mem::take(&mut self.current);
        if let [command] = frame.as_slice() {
            debug!("sim: command strobe 0x{:02x}", command);
            self.strobes.push(*command);
        }
        self.frames.push(frame);
        self.selected = false;
        self.phase = Phase::Header;
    }
}

/// Handle to a simulated peripheral. Clones share the same peripheral, so
/// a test can keep one clone for inspection while the registry owns another.
#[derive(Debug, Clone)]
pub struct SimBackend {
    state: Arc<Mutex<SimState>>,
}

impl SimBackend {
    pub fn new(format: FrameFormat) -> Self {
        SimBackend {
            state: Arc::new(Mutex::new(SimState::new(format))),
        }
    }

    pub fn register(&self, address: Address) -> u8 {
        let mut state = self.state.lock();
        let (space, pointer) = state.locate(address);
        *state.cell(space, pointer)
    }

    /// Presets a register without going through the bus.
    pub fn set_register(&self, address: Address, value: u8) {
        let mut state = self.state.lock();
        let (space, pointer) = state.locate(address);
        *state.cell(space, pointer) = value;
    }

    pub fn set_status(&self, status: u8) {
        self.state.lock().status = status;
    }

    pub fn settings(&self) -> Option<BusSettings> {
        self.state.lock().settings
    }

    pub fn is_selected(&self) -> bool {
        self.state.lock().selected
    }

    /// MOSI bytes of every completed chip-select frame, oldest first.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().frames.clone()
    }

    pub fn strobes(&self) -> Vec<u8> {
        self.state.lock().strobes.clone()
    }

    /// Register cells read or written through the bus.
    pub fn register_touches(&self) -> usize {
        self.state.lock().touches
    }

    /// Times chip select was asserted while a frame was already open.
    pub fn collisions(&self) -> usize {
        self.state.lock().collisions
    }

    pub fn fail_next_configure(&self) {
        self.state.lock().fail_configure = true;
    }

    /// Fails the next `select` without asserting chip select.
    pub fn fail_next_select(&self) {
        self.state.lock().fail_select = true;
    }

    /// Fails the next `deselect` after the line has been released.
    pub fn fail_next_deselect(&self) {
        self.state.lock().fail_deselect = true;
    }

    /// Lets `shifts` more bytes through, then fails the next one.
    pub fn fail_after_shifts(&self, shifts: usize) {
        self.state.lock().fail_after = Some(shifts);
    }

    pub fn clear_trace(&self) {
        let mut state = self.state.lock();
        state.frames.clear();
        state.strobes.clear();
        state.touches = 0;
        state.collisions = 0;
    }
}

impl Backend for SimBackend {
    fn from_config(config: &PortConfig) -> Self {
        SimBackend::new(config.frame.clone())
    }

    fn configure(&mut self, config: &PortConfig) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.fail_configure {
            state.fail_configure = false;
            return Err(BackendError::Fault(format!(
                "controller for {} did not accept mode {}",
                config.name, config.mode
            )));
        }
        state.end_frame();
        state.settings = Some(BusSettings {
            speed_hz: config.speed_hz,
            mode: config.mode,
        });
        Ok(())
    }

    fn select(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.fail_select {
            state.fail_select = false;
            return Err(BackendError::Injected);
        }
        if state.selected {
            state.collisions += 1;
        }
        state.selected = true;
        state.phase = Phase::Header;
        state.current.clear();
        Ok(())
    }

    fn shift(&mut self, byte: u8) -> Result<u8, BackendError> {
        self.state.lock().shift(byte)
    }

    fn deselect(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.end_frame();
        if state.fail_deselect {
            state.fail_deselect = false;
            return Err(BackendError::Injected);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::WideCommand;

    fn frame(sim: &mut SimBackend, bytes: &[u8]) -> Vec<u8> {
        sim.select().unwrap();
        let out = bytes.iter().map(|b| sim.shift(*b).unwrap()).collect();
        sim.deselect().unwrap();
        out
    }

    #[test]
    fn test_single_write_then_read() {
        let mut sim = SimBackend::new(FrameFormat::default());
        frame(&mut sim, &[0x05, 0xA5]);
        assert_eq!(sim.register(Address::Short(0x05)), 0xA5);

        let out = frame(&mut sim, &[0x85, 0x00]);
        assert_eq!(out, vec![DEFAULT_STATUS, 0xA5]);
        assert_eq!(sim.register_touches(), 2);
    }

    #[test]
    fn test_single_access_does_not_increment() {
        let mut sim = SimBackend::new(FrameFormat::default());
        frame(&mut sim, &[0x05, 0x11, 0x22]);
        assert_eq!(sim.register(Address::Short(0x05)), 0x11);
        assert_eq!(sim.register(Address::Short(0x06)), 0x00);
    }

    #[test]
    fn test_burst_wraps_short_space() {
        let mut sim = SimBackend::new(FrameFormat::default());
        frame(&mut sim, &[0x40 | 0x3E, 1, 2, 3]);
        assert_eq!(sim.register(Address::Short(0x3E)), 1);
        assert_eq!(sim.register(Address::Short(0x3F)), 2);
        assert_eq!(sim.register(Address::Short(0x00)), 3);
    }

    #[test]
    fn test_extended_page_wraps_within_page() {
        let mut sim = SimBackend::new(FrameFormat::default());
        frame(&mut sim, &[0x40 | 0x2F, 0xFF, 7, 8]);
        assert_eq!(sim.register(Address::Long(0x2FFF)), 7);
        assert_eq!(sim.register(Address::Long(0x2F00)), 8);
        assert_eq!(sim.register(Address::Short(0x2F)), 0);
    }

    #[test]
    fn test_wide_command_addresses_full_space() {
        let format = FrameFormat {
            wide_command: Some(WideCommand { read: 0x03, write: 0x02 }),
            ..FrameFormat::default()
        };
        let mut sim = SimBackend::new(format);
        frame(&mut sim, &[0x02, 0xFF, 0xFF, 9, 10]);
        assert_eq!(sim.register(Address::Long(0xFFFF)), 9);
        assert_eq!(sim.register(Address::Long(0x0000)), 10);

        let out = frame(&mut sim, &[0x03, 0xFF, 0xFF, 0x00, 0x00]);
        assert_eq!(out, vec![DEFAULT_STATUS, DEFAULT_STATUS, DEFAULT_STATUS, 9, 10]);

        // Other header bytes still decode as 8-bit registers
        frame(&mut sim, &[0x05, 0x44]);
        assert_eq!(sim.register(Address::Short(0x05)), 0x44);
    }

    #[test]
    fn test_strobe_is_single_byte_frame() {
        let mut sim = SimBackend::new(FrameFormat::default());
        sim.set_status(0x1F);
        assert_eq!(frame(&mut sim, &[0x36]), vec![0x1F]);
        assert_eq!(sim.strobes(), vec![0x36]);
        assert_eq!(sim.register_touches(), 0);
    }

    #[test]
    fn test_shift_requires_select() {
        let mut sim = SimBackend::new(FrameFormat::default());
        assert!(sim.shift(0x00).is_err());
    }

    #[test]
    fn test_fault_injection() {
        let mut sim = SimBackend::new(FrameFormat::default());
        sim.fail_after_shifts(1);
        sim.select().unwrap();
        assert!(sim.shift(0x05).is_ok());
        assert!(matches!(sim.shift(0x01), Err(BackendError::Injected)));
        sim.deselect().unwrap();
        assert!(!sim.is_selected());

        sim.fail_next_select();
        assert!(matches!(sim.select(), Err(BackendError::Injected)));
        assert!(!sim.is_selected());

        sim.fail_next_deselect();
        sim.select().unwrap();
        assert!(sim.deselect().is_err());
        assert!(!sim.is_selected());
        sim.select().unwrap();
        sim.deselect().unwrap();

        sim.fail_next_configure();
        let config = PortConfig::new("sim", 0);
        assert!(sim.configure(&config).is_err());
        assert!(sim.configure(&config).is_ok());
        assert_eq!(
            sim.settings(),
            Some(BusSettings { speed_hz: 1_000_000, mode: 0 })
        );
    }
}
