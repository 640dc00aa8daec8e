//! hopprog-serial - line protocol driver for identity programmers
//!
//! This crate talks to the microcontroller that burns identity records into
//! a device EEPROM. The programmer is driven over a serial port (or a TCP
//! bridge to one) with a small half-duplex ASCII protocol, see [`protocol`].
//!
//! # Layers
//!
//! - [`transport`]: byte streams with line reads ([`SerialTransport`],
//!   [`TcpTransport`])
//! - [`Connection`]: owns the open transport and its state
//! - [`ProgrammerSession`]: the info/load/burn/verify exchanges
//! - [`ProgrammerHandle`]: serialized access for concurrent callers, with
//!   published state
//!
//! # Example
//!
//! ```no_run
//! use hopprog_core::{encode, IdentityRecord};
//! use hopprog_serial::{ProgrammerHandle, SessionConfig, SystemConnector};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let record = IdentityRecord::from_file("board.toml")?;
//! let image = encode(&record)?;
//!
//! let programmer = ProgrammerHandle::new(SystemConnector, SessionConfig::default())?;
//! programmer.connect("/dev/ttyUSB0", 115200).await?;
//! let info = programmer.query_info().await?;
//! println!("Programmer firmware {}", info.version);
//! programmer.program(&image, true).await?;
//! programmer.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod facade;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

use async_trait::async_trait;

// Re-exports
pub use connection::{Connection, ConnectionState};
pub use error::{ErrorKind, ProgrammerError, Result};
pub use facade::{ProgrammerHandle, SessionSnapshot, TransferProgress};
pub use protocol::{LoadPhase, ProgrammerInfo, Step};
pub use session::{ProgrammerSession, SessionConfig};
pub use transport::serial::SerialTransport;
pub use transport::tcp::TcpTransport;
pub use transport::{Connector, Transport};

/// Baud rate used when none is given
pub const DEFAULT_BAUD: u32 = 115200;

/// Where the programmer is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    /// Serial port connection
    Serial {
        /// Device path (e.g., "/dev/ttyUSB0" or "COM1")
        device: String,
        /// Baud rate given with the device, if any
        baud: Option<u32>,
    },
    /// TCP bridge to a serial port
    Tcp {
        /// Hostname or IP address
        host: String,
        /// Port number
        port: u16,
    },
}

impl PortSpec {
    /// Parse a port string
    ///
    /// Formats:
    /// - `dev=/dev/ttyUSB0` or `dev=/dev/ttyUSB0:115200`
    /// - `ip=192.168.1.50:2000`
    /// - a bare device path such as `/dev/ttyACM0` or `COM3`
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        if let Some(dev) = s.strip_prefix("dev=") {
            let (device, baud) = match dev.rsplit_once(':') {
                Some((device, baud_str)) => {
                    let baud = baud_str
                        .parse()
                        .map_err(|_| format!("Invalid baud rate: {}", baud_str))?;
                    (device, Some(baud))
                }
                None => (dev, None),
            };
            if device.is_empty() {
                return Err("Missing device in dev= parameter".to_string());
            }
            Ok(PortSpec::Serial {
                device: device.to_string(),
                baud,
            })
        } else if let Some(ip) = s.strip_prefix("ip=") {
            let (host, port_str) = ip
                .rsplit_once(':')
                .ok_or_else(|| "Missing port in ip= parameter".to_string())?;
            if host.is_empty() {
                return Err("Missing host in ip= parameter".to_string());
            }
            let port = port_str
                .parse()
                .map_err(|_| format!("Invalid port: {}", port_str))?;
            Ok(PortSpec::Tcp {
                host: host.to_string(),
                port,
            })
        } else if s.is_empty() || s.contains('=') {
            Err(format!(
                "Invalid port: {:?}. Use a device path, dev=... or ip=...",
                s
            ))
        } else {
            Ok(PortSpec::Serial {
                device: s.to_string(),
                baud: None,
            })
        }
    }
}

impl std::str::FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        Self::parse(s)
    }
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortSpec::Serial { device, baud: None } => write!(f, "{}", device),
            PortSpec::Serial {
                device,
                baud: Some(baud),
            } => write!(f, "{}:{}", device, baud),
            PortSpec::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

/// Opens real serial ports and TCP bridges from a [`PortSpec`] string
///
/// A baud rate embedded in the port string (`dev=...:<baud>`) overrides the
/// one passed to `open`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConnector;

#[async_trait]
impl Connector for SystemConnector {
    type Transport = Box<dyn Transport>;

    async fn open(&self, port: &str, baud: u32) -> Result<Box<dyn Transport>> {
        match PortSpec::parse(port).map_err(ProgrammerError::InvalidParameter)? {
            PortSpec::Serial { device, baud: own } => {
                let transport = SerialTransport::open(&device, own.unwrap_or(baud)).await?;
                Ok(Box::new(transport))
            }
            PortSpec::Tcp { host, port } => {
                let transport = TcpTransport::connect(&host, port).await?;
                Ok(Box::new(transport))
            }
        }
    }
}
