use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::frame::FrameFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub polling: PollingConfig,
    pub ports: Vec<PortConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 500 }
    }
}

/// One physical SPI controller and the chip-select line of its peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub name: String,
    /// spidev node, e.g. `/dev/spidev1.0`
    #[serde(default)]
    pub device: String,
    /// GPIO line driving the active-low chip select
    pub chip_select: u8,
    #[serde(default = "default_speed_hz")]
    pub speed_hz: u32,
    /// Clock polarity/phase, SPI mode 0 to 3
    #[serde(default)]
    pub mode: u8,
    #[serde(default)]
    pub frame: FrameFormat,
    /// GPIO number of the MISO line. When set, `select` waits for the
    /// peripheral to pull MISO low (CHIP_RDYn) before the first shift.
    #[serde(default)]
    pub wait_miso: Option<u8>,
}

fn default_speed_hz() -> u32 {
    1_000_000
}

impl PortConfig {
    pub fn new(name: &str, chip_select: u8) -> Self {
        Self {
            name: name.to_string(),
            device: String::new(),
            chip_select,
            speed_hz: default_speed_hz(),
            mode: 0,
            frame: FrameFormat::default(),
            wait_miso: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(content).context("Failed to parse configuration file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ports.is_empty() {
            bail!("Configuration error: at least one SPI port is required");
        }
        if self.ports.len() > usize::from(u8::MAX) + 1 {
            bail!("Configuration error: at most 256 SPI ports are supported");
        }

        let mut names = HashSet::new();
        for (index, port) in self.ports.iter().enumerate() {
            if !names.insert(port.name.as_str()) {
                bail!("Configuration error: duplicate port name {:?}", port.name);
            }
            if port.mode > 3 {
                bail!("Configuration error: port {} has invalid SPI mode {}", index, port.mode);
            }
            if port.speed_hz == 0 {
                bail!("Configuration error: port {} has a zero clock rate", index);
            }
            port.frame
                .check()
                .context(format!("Configuration error: port {} frame format", index))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::WideCommand;

    const SAMPLE: &str = r#"
polling:
  interval_ms: 250
ports:
  - name: radio-tx
    device: /dev/spidev1.0
    chip_select: 17
    speed_hz: 2000000
    mode: 0
  - name: radio-rx
    device: /dev/spidev1.1
    chip_select: 27
    wait_miso: 9
    frame:
      read_flag: 128
      burst_flag: 64
      extended_pages: [47]
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.polling.interval_ms, 250);
        assert_eq!(config.ports.len(), 2);
        assert_eq!(config.ports[0].speed_hz, 2_000_000);
        assert_eq!(config.ports[0].frame, FrameFormat::default());
        assert_eq!(config.ports[1].speed_hz, 1_000_000);
        assert_eq!(config.ports[1].frame.extended_pages, vec![0x2F]);
        assert_eq!(config.ports[0].wait_miso, None);
        assert_eq!(config.ports[1].wait_miso, Some(9));
    }

    #[test]
    fn test_parse_wide_command_port() {
        let config = Config::parse(
            "ports:\n  - name: fram\n    chip_select: 5\n    frame:\n      wide_command: { read: 3, write: 2 }\n",
        )
        .unwrap();
        let frame = &config.ports[0].frame;
        assert_eq!(frame.wide_command, Some(WideCommand { read: 0x03, write: 0x02 }));
        assert_eq!(frame.read_flag, 0x80);

        let mut bad = config.clone();
        bad.ports[0].frame.wide_command = Some(WideCommand { read: 2, write: 2 });
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_mode() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.ports[1].mode = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_names_and_empty() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.ports[1].name = "radio-tx".to_string();
        assert!(config.validate().is_err());

        config.ports.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/spi-regbus.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_from_disk() {
        let path = std::env::temp_dir().join(format!("spi-regbus-{}.yaml", std::process::id()));
        fs::write(&path, SAMPLE).unwrap();
        let config = Config::load(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.ports[1].chip_select, 27);
    }
}
