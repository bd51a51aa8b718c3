use crate::config::PortConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Uninitialized,
    Ready,
    /// The last `init` could not configure the controller
    Faulted,
}

/// One physical SPI controller as seen by callers.
#[derive(Debug, Clone)]
pub struct Port {
    index: u8,
    config: PortConfig,
    state: PortState,
    last_status: Option<u8>,
    transactions: u64,
    faults: u64,
}

impl Port {
    pub(crate) fn new(index: u8, config: PortConfig) -> Self {
        Port {
            index,
            config,
            state: PortState::Uninitialized,
            last_status: None,
            transactions: 0,
            faults: 0,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == PortState::Ready
    }

    /// Chip status byte clocked back during the last address phase.
    pub fn last_status(&self) -> Option<u8> {
        self.last_status
    }

    /// Completed transactions since the port was created.
    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    /// Transactions aborted by a backend failure.
    pub fn faults(&self) -> u64 {
        self.faults
    }

    pub(crate) fn config_mut(&mut self) -> &mut PortConfig {
        &mut self.config
    }

    pub(crate) fn set_state(&mut self, state: PortState) {
        self.state = state;
    }

    pub(crate) fn record_success(&mut self, status: u8) {
        self.last_status = Some(status);
        self.transactions += 1;
    }

    pub(crate) fn record_fault(&mut self) {
        self.faults += 1;
    }
}
