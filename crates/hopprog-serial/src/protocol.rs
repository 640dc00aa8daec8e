//! Line protocol constants and types
//!
//! The programmer speaks a half-duplex, line-oriented ASCII protocol with
//! exactly one outstanding command at a time:
//!
//! | Command   | Response(s)                                  |
//! |-----------|----------------------------------------------|
//! | `I\n`     | one JSON line `{"version","free_heap","uptime"}` |
//! | `L<N>\n`  | `GO_AHEAD\n`, then N raw bytes, then `OK\n`  |
//! | `B\n`     | `OK\n`                                       |
//! | `V\n`     | `OK\n`                                       |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProgrammerError, Result};

/// Query programmer status
pub const CMD_INFO: &str = "I";
/// Prefix of the load command; followed by the decimal byte count
pub const CMD_LOAD: char = 'L';
/// Burn the uploaded image into the EEPROM
pub const CMD_BURN: &str = "B";
/// Verify the EEPROM against the uploaded image
pub const CMD_VERIFY: &str = "V";

/// Device is ready to receive the image
pub const RESP_GO_AHEAD: &str = "GO_AHEAD";
/// Command completed
pub const RESP_OK: &str = "OK";

/// Build the load command for an image of `len` bytes
pub fn load_command(len: usize) -> String {
    format!("{}{}", CMD_LOAD, len)
}

/// Status reported by the programmer in response to `I`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgrammerInfo {
    /// Firmware version string
    pub version: String,
    /// Free heap in bytes
    pub free_heap: u32,
    /// Seconds since boot
    pub uptime: u32,
}

impl ProgrammerInfo {
    /// Uptime as a duration
    pub fn uptime_duration(&self) -> Duration {
        Duration::from_secs(self.uptime as u64)
    }
}

/// Result of interpreting one line received after `I`
#[derive(Debug)]
pub(crate) enum InfoLine {
    /// A well-formed info object
    Info(ProgrammerInfo),
    /// Not JSON at all (boot chatter, debug prints); keep waiting
    Noise,
}

/// Interpret a line received while waiting for the info response
///
/// Lines that are not JSON are noise. JSON that does not have the expected
/// shape is a [`ProgrammerError::DecodeError`].
pub(crate) fn parse_info_line(line: &str) -> Result<InfoLine> {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Ok(InfoLine::Noise),
    };
    serde_json::from_value(value)
        .map(InfoLine::Info)
        .map_err(|e| ProgrammerError::DecodeError(format!("{}: {:?}", e, line)))
}

/// Progress of a `load_data` exchange
///
/// Every wait point accepts exactly one line; anything else aborts the
/// transfer with [`ProgrammerError::UnexpectedResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Nothing sent yet
    Idle,
    /// `L<N>` sent, waiting for `GO_AHEAD`
    AwaitingGoAhead,
    /// Writing chunks
    Transferring,
    /// All chunks written, waiting for `OK`
    AwaitingOk,
    /// Transfer confirmed
    Done,
    /// Transfer aborted
    Failed,
}

impl LoadPhase {
    /// Advance on a received line
    pub fn on_line(self, line: &str) -> Result<LoadPhase> {
        match (self, line) {
            (Self::AwaitingGoAhead, RESP_GO_AHEAD) => Ok(Self::Transferring),
            (Self::AwaitingOk, RESP_OK) => Ok(Self::Done),
            _ => Err(ProgrammerError::UnexpectedResponse(line.to_string())),
        }
    }

    /// Whether the exchange is over
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// A step of the load/burn/verify workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Upload the image
    Load,
    /// Burn the EEPROM
    Burn,
    /// Verify the EEPROM
    Verify,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "Load"),
            Self::Burn => write!(f, "Burn"),
            Self::Verify => write!(f, "Verify"),
        }
    }
}
