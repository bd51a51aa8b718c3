use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::{error, info};
use tokio::signal::unix::{signal, SignalKind};

use spi_regbus::digest;
use spi_regbus::{ActiveBackend, Address, Config, Registry};

const USAGE: &str = "usage: spi-regbus <config.yaml> <command> <port> [args]

commands:
  read   <port> <addr>
  write  <port> <addr> <value>
  dump   <port> <addr> <len>
  load   <port> <addr> <hex bytes>
  strobe <port> <cmd>
  watch  <port> <addr> <len>";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Read { port: u8, address: Address },
    Write { port: u8, address: Address, value: u8 },
    Dump { port: u8, address: Address, len: usize },
    Load { port: u8, address: Address, data: Vec<u8> },
    Strobe { port: u8, command: u8 },
    Watch { port: u8, address: Address, len: usize },
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let arg = |i: usize| nth_arg(args, i);
        let port = parse_u8(arg(1)?)?;

        let command = match arg(0)? {
            "read" => Command::Read { port, address: parse_address(arg(2)?)? },
            "write" => Command::Write {
                port,
                address: parse_address(arg(2)?)?,
                value: parse_u8(arg(3)?)?,
            },
            "dump" => Command::Dump {
                port,
                address: parse_address(arg(2)?)?,
                len: parse_number(arg(3)?)? as usize,
            },
            "load" => Command::Load {
                port,
                address: parse_address(arg(2)?)?,
                data: hex::decode(arg(3)?).context("Invalid hex data")?,
            },
            "strobe" => Command::Strobe { port, command: parse_u8(arg(2)?)? },
            "watch" => Command::Watch {
                port,
                address: parse_address(arg(2)?)?,
                len: parse_number(arg(3)?)? as usize,
            },
            other => bail!("Unknown command: {}\n{}", other, USAGE),
        };
        Ok(command)
    }

    fn port(&self) -> u8 {
        match self {
            Command::Read { port, .. }
            | Command::Write { port, .. }
            | Command::Dump { port, .. }
            | Command::Load { port, .. }
            | Command::Strobe { port, .. }
            | Command::Watch { port, .. } => *port,
        }
    }
}

fn nth_arg(args: &[String], i: usize) -> Result<&str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing argument\n{}", USAGE))
}

fn parse_number(text: &str) -> Result<u32> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(digits) => u32::from_str_radix(digits, 16),
        None => text.parse::<u32>(),
    };
    parsed.context(format!("Invalid number: {}", text))
}

fn parse_u8(text: &str) -> Result<u8> {
    u8::try_from(parse_number(text)?).map_err(|_| anyhow!("Value does not fit in a byte: {}", text))
}

/// Addresses above 0xff select the 16-bit register space.
fn parse_address(text: &str) -> Result<Address> {
    let register = u16::try_from(parse_number(text)?)
        .map_err(|_| anyhow!("Address out of range: {}", text))?;
    Ok(Address::from_register(register))
}

fn run_once(registry: &Registry<ActiveBackend>, command: &Command) -> Result<()> {
    match command {
        Command::Read { port, address } => {
            let value = registry.read(*port, *address)?;
            println!("{} = 0x{:02x}", address, value);
        }
        Command::Write { port, address, value } => {
            registry.write(*port, *address, *value)?;
            println!("{} <- 0x{:02x}", address, value);
        }
        Command::Dump { port, address, len } => {
            let mut buffer = vec![0u8; *len];
            registry.burst_read(*port, *address, &mut buffer)?;
            println!("{}: {}", address, hex::encode(&buffer));
            println!("shake128: {}", hex::encode(digest::shake128(&buffer)));
        }
        Command::Load { port, address, data } => {
            registry.burst_write(*port, *address, data)?;
            println!("{} <- {} byte(s)", address, data.len());
        }
        Command::Strobe { port, command } => {
            registry.cmd_strobe(*port, *command)?;
            if let Some(status) = registry.last_status(*port)? {
                println!("status 0x{:02x}", status);
            }
        }
        Command::Watch { .. } => bail!("watch runs on the event loop"),
    }
    Ok(())
}

async fn watch(
    registry: Arc<Registry<ActiveBackend>>,
    port: u8,
    address: Address,
    len: usize,
    interval: Duration,
) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;
    let mut ticker = tokio::time::interval(interval);
    let mut last: Option<Vec<u8>> = None;

    info!("Watching {} byte(s) at {} on port {} every {:?}", len, address, port, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let bus = Arc::clone(&registry);
                let snapshot = tokio::task::spawn_blocking(move || {
                    let mut buffer = vec![0u8; len];
                    bus.burst_read(port, address, &mut buffer).map(|_| buffer)
                })
                .await
                .context("Poll task failed")?;

                match snapshot {
                    Ok(snapshot) => {
                        if last.as_ref() != Some(&snapshot) {
                            info!("{}: {}", address, hex::encode(&snapshot));
                            last = Some(snapshot);
                        }
                    }
                    Err(e) => {
                        let name = registry.port(e.port()).map(|p| p.name().to_string()).unwrap_or_default();
                        error!("Poll error on {:?}: {}", name, e);
                    }
                }
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully");
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = args.first().ok_or_else(|| anyhow!("{}", USAGE))?;
    let command = Command::parse(&args[1..])?;

    info!("Loading configuration from: {}", config_path);
    let config = Config::load(config_path)?;

    let registry: Registry<ActiveBackend> = Registry::from_config(&config);
    let port = command.port();
    registry
        .init(port)
        .context(format!("Failed to initialise SPI port {}", port))?;

    let registry = Arc::new(registry);
    match command {
        Command::Watch { port, address, len } => {
            let interval = Duration::from_millis(config.polling.interval_ms);
            watch(Arc::clone(&registry), port, address, len, interval).await?;
        }
        ref other => run_once(&registry, other)?,
    }

    if let Ok(registry) = Arc::try_unwrap(registry) {
        registry.shutdown();
    }
    Ok(())
}

fn init_logger() {
    // Use `env_logger` for logging; default to info when RUST_LOG is unset.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42").unwrap(), 42);
        assert_eq!(parse_number("0x2f").unwrap(), 0x2F);
        assert!(parse_number("zz").is_err());
        assert!(parse_u8("0x100").is_err());
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse(&args("read 0 0x0a")).unwrap(),
            Command::Read { port: 0, address: Address::Short(0x0A) }
        );
        assert_eq!(
            Command::parse(&args("write 1 0x2f10 0xff")).unwrap(),
            Command::Write { port: 1, address: Address::Long(0x2F10), value: 0xFF }
        );
        assert_eq!(
            Command::parse(&args("load 0 0 a55a")).unwrap(),
            Command::Load { port: 0, address: Address::Short(0), data: vec![0xA5, 0x5A] }
        );
        assert_eq!(Command::parse(&args("strobe 2 0x36")).unwrap().port(), 2);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse(&args("read 0")).is_err());
        assert!(Command::parse(&args("erase 0 0")).is_err());
        assert!(Command::parse(&args("read 0 0x10000")).is_err());
    }
}
