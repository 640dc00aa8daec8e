//! Identity record model
//!
//! An [`IdentityRecord`] is a plain value: the caller builds it, hands it to
//! the codec, and the codec never mutates it.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::error::{CodecError, Field, InvalidReason, Result};

/// Maximum UTF-8 length of any string field (one-byte length prefix)
pub const MAX_STRING_LEN: usize = 255;

/// Largest version component that fits in one BCD byte
pub const MAX_VERSION_COMPONENT: u8 = 99;

/// Firmware logging verbosity stored in the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum LoggingLevel {
    /// Only fatal errors
    Fatal = 0,
    /// Errors
    Error = 1,
    /// Warnings and errors
    Warning = 2,
    /// Informational messages
    #[default]
    Info = 3,
    /// Debug output
    Debug = 4,
    /// Everything
    Verbose = 5,
}

impl LoggingLevel {
    /// All levels, ordered by wire value
    pub const ALL: [LoggingLevel; 6] = [
        Self::Fatal,
        Self::Error,
        Self::Warning,
        Self::Info,
        Self::Debug,
        Self::Verbose,
    ];

    /// Decode a wire value (0-5)
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Wire value of this level
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Lowercase name, as used in record files
    pub fn name(self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Verbose => "verbose",
        }
    }

    /// Look up a level by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|level| level.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for LoggingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u8())
    }
}

/// Firmware version, each component 0-99
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    /// Major component
    pub major: u8,
    /// Minor component
    pub minor: u8,
}

impl Version {
    /// Create a version
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Parse `"<major>.<minor>"`
    pub fn parse(s: &str) -> Option<Self> {
        let (major, minor) = s.trim().split_once('.')?;
        Some(Self::new(major.parse().ok()?, minor.parse().ok()?))
    }

    /// Check that both components fit in a BCD byte
    pub fn is_valid(&self) -> bool {
        self.major <= MAX_VERSION_COMPONENT && self.minor <= MAX_VERSION_COMPONENT
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Device identity written to the EEPROM
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityRecord {
    /// USB vendor ID
    pub usb_vendor_id: u16,
    /// USB product ID
    pub usb_product_id: u16,
    /// Firmware version
    pub version: Version,
    /// Firmware logging level
    pub logging_level: LoggingLevel,
    /// Serial number (at most 255 UTF-8 bytes)
    pub serial_number: String,
    /// Product name (at most 255 UTF-8 bytes)
    pub product_name: String,
    /// Manufacturer (at most 255 UTF-8 bytes)
    pub manufacturer: String,
    /// Additional strings, each at most 255 UTF-8 bytes
    pub custom_strings: Vec<String>,
}

impl IdentityRecord {
    /// Check every field against the wire format limits
    ///
    /// This is the same check [`crate::codec::encode`] performs, without
    /// producing an image.
    pub fn validate(&self) -> Result<()> {
        bcd_field(Field::VersionMajor, self.version.major)?;
        bcd_field(Field::VersionMinor, self.version.minor)?;
        for (field, s) in self.strings() {
            string_len(field, s)?;
        }
        Ok(())
    }

    /// Size of the encoded wire image in bytes
    pub fn encoded_len(&self) -> usize {
        crate::codec::FIXED_LEN + self.strings().map(|(_, s)| 1 + s.len()).sum::<usize>()
    }

    /// All string fields in wire order, paired with their field tag
    pub fn strings(&self) -> impl Iterator<Item = (Field, &str)> + '_ {
        [
            (Field::SerialNumber, self.serial_number.as_str()),
            (Field::ProductName, self.product_name.as_str()),
            (Field::Manufacturer, self.manufacturer.as_str()),
        ]
        .into_iter()
        .chain(
            self.custom_strings
                .iter()
                .enumerate()
                .map(|(i, s)| (Field::CustomString(i), s.as_str())),
        )
    }
}

/// Parse a USB ID entered as hexadecimal text
///
/// Accepts one to four hex digits with an optional `0x` prefix, e.g.
/// `2E8A`, `0x2e8a` or `1`.
pub fn parse_usb_id(field: Field, text: &str) -> Result<u16> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);

    if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CodecError::invalid(field, InvalidReason::NotHex));
    }

    u16::from_str_radix(digits, 16).map_err(|_| CodecError::invalid(field, InvalidReason::NotHex))
}

/// Pack a 0-99 value into one BCD byte
pub fn bcd_encode(value: u8) -> Option<u8> {
    if value > MAX_VERSION_COMPONENT {
        return None;
    }
    Some(((value / 10) << 4) | (value % 10))
}

/// Unpack a BCD byte, rejecting nibbles above 9
pub fn bcd_decode(byte: u8) -> Option<u8> {
    let (hi, lo) = (byte >> 4, byte & 0x0F);
    if hi > 9 || lo > 9 {
        return None;
    }
    Some(hi * 10 + lo)
}

pub(crate) fn bcd_field(field: Field, value: u8) -> Result<u8> {
    bcd_encode(value).ok_or(CodecError::invalid(
        field,
        InvalidReason::OutOfRange {
            value,
            max: MAX_VERSION_COMPONENT,
        },
    ))
}

pub(crate) fn string_len(field: Field, s: &str) -> Result<u8> {
    u8::try_from(s.len()).map_err(|_| CodecError::invalid(field, InvalidReason::TooLong { len: s.len() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn test_bcd() {
        assert_eq!(bcd_encode(0), Some(0x00));
        assert_eq!(bcd_encode(7), Some(0x07));
        assert_eq!(bcd_encode(42), Some(0x42));
        assert_eq!(bcd_encode(99), Some(0x99));
        assert_eq!(bcd_encode(100), None);

        assert_eq!(bcd_decode(0x42), Some(42));
        assert_eq!(bcd_decode(0x1A), None);
        assert_eq!(bcd_decode(0xA1), None);
    }

    #[test]
    fn test_parse_usb_id() {
        assert_eq!(parse_usb_id(Field::UsbVendorId, "2E8A"), Ok(0x2E8A));
        assert_eq!(parse_usb_id(Field::UsbVendorId, "0x2e8a"), Ok(0x2E8A));
        assert_eq!(parse_usb_id(Field::UsbProductId, " 1 "), Ok(0x0001));

        for bad in ["", "0x", "12345", "G123", "-1", "+1"] {
            assert_eq!(
                parse_usb_id(Field::UsbProductId, bad),
                Err(CodecError::InvalidField {
                    field: Field::UsbProductId,
                    reason: InvalidReason::NotHex,
                }),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_logging_level_names() {
        for level in LoggingLevel::ALL {
            assert_eq!(LoggingLevel::from_name(level.name()), Some(level));
            assert_eq!(LoggingLevel::from_u8(level.as_u8()), Some(level));
        }
        assert_eq!(LoggingLevel::from_name("WARNING"), Some(LoggingLevel::Warning));
        assert_eq!(LoggingLevel::from_u8(6), None);
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(Version::parse("1.0"), Some(Version::new(1, 0)));
        assert_eq!(Version::parse("12.34"), Some(Version::new(12, 34)));
        assert_eq!(Version::parse("1"), None);
        assert!(!Version::new(100, 0).is_valid());
    }

    #[test]
    fn test_validate_rejects_long_custom_string() {
        let record = IdentityRecord {
            custom_strings: vec!["ok".to_string(), "x".repeat(256)],
            ..Default::default()
        };
        assert_eq!(
            record.validate(),
            Err(CodecError::InvalidField {
                field: Field::CustomString(1),
                reason: InvalidReason::TooLong { len: 256 },
            })
        );
    }

    #[test]
    fn test_encoded_len() {
        let record = IdentityRecord {
            serial_number: "SN1".to_string(),
            product_name: "Widget".to_string(),
            manufacturer: "Acme".to_string(),
            custom_strings: vec!["a".to_string()],
            ..Default::default()
        };
        // 11 fixed + (1+3) + (1+6) + (1+4) + (1+1)
        assert_eq!(record.encoded_len(), 29);
    }
}
