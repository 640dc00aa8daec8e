//! Error types for hopprog-core
//!
//! The codec error is `no_std` compatible and `Copy`; it carries enough
//! context (field, offset) to report a failure without the source buffer.

use core::fmt;

/// A field of the identity record, used to attribute codec failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// USB vendor ID
    UsbVendorId,
    /// USB product ID
    UsbProductId,
    /// Major version component
    VersionMajor,
    /// Minor version component
    VersionMinor,
    /// Logging level
    LoggingLevel,
    /// Serial number string
    SerialNumber,
    /// Product name string
    ProductName,
    /// Manufacturer string
    Manufacturer,
    /// Custom string at the given index
    CustomString(usize),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsbVendorId => write!(f, "USB vendor ID"),
            Self::UsbProductId => write!(f, "USB product ID"),
            Self::VersionMajor => write!(f, "major version"),
            Self::VersionMinor => write!(f, "minor version"),
            Self::LoggingLevel => write!(f, "logging level"),
            Self::SerialNumber => write!(f, "serial number"),
            Self::ProductName => write!(f, "product name"),
            Self::Manufacturer => write!(f, "manufacturer"),
            Self::CustomString(i) => write!(f, "custom string #{}", i),
        }
    }
}

/// Why a field was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Text is not a 16-bit hexadecimal number
    NotHex,
    /// String is longer than a one-byte length prefix allows
    TooLong {
        /// UTF-8 length of the rejected string
        len: usize,
    },
    /// Numeric value outside the permitted range
    OutOfRange {
        /// The rejected value
        value: u8,
        /// Largest accepted value
        max: u8,
    },
    /// Byte is not a valid packed BCD digit pair
    NotBcd(u8),
    /// String payload is not valid UTF-8
    NotUtf8,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotHex => write!(f, "not a 16-bit hexadecimal value"),
            Self::TooLong { len } => write!(f, "{} bytes long (maximum 255)", len),
            Self::OutOfRange { value, max } => write!(f, "{} is out of range 0-{}", value, max),
            Self::NotBcd(b) => write!(f, "0x{:02X} is not valid BCD", b),
            Self::NotUtf8 => write!(f, "not valid UTF-8"),
        }
    }
}

/// Wire image encode/decode errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer is shorter than the fixed header
    TooShort {
        /// Length of the rejected buffer
        len: usize,
    },
    /// Buffer does not start with `HOP!`
    BadMagic([u8; 4]),
    /// A field or length prefix runs past the end of the buffer
    Truncated {
        /// Offset at which the read started
        offset: usize,
        /// Bytes the read needed
        needed: usize,
        /// Bytes that were left
        available: usize,
    },
    /// A record field cannot be represented on the wire
    InvalidField {
        /// The offending field
        field: Field,
        /// What is wrong with it
        reason: InvalidReason,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => {
                write!(f, "image too short: {} bytes (header needs 8)", len)
            }
            Self::BadMagic(m) => write!(
                f,
                "bad magic: {:02X} {:02X} {:02X} {:02X} (expected \"HOP!\")",
                m[0], m[1], m[2], m[3]
            ),
            Self::Truncated {
                offset,
                needed,
                available,
            } => write!(
                f,
                "image truncated at offset {}: need {} bytes, {} available",
                offset, needed, available
            ),
            Self::InvalidField { field, reason } => write!(f, "invalid {}: {}", field, reason),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CodecError {}

impl CodecError {
    pub(crate) fn invalid(field: Field, reason: InvalidReason) -> Self {
        Self::InvalidField { field, reason }
    }
}

/// Result type alias using [`CodecError`]
pub type Result<T> = core::result::Result<T, CodecError>;
