//! Record files
//!
//! Identity records can be kept on disk as TOML (the default) or RON:
//!
//! ```toml
//! usb_vendor_id = "2E8A"
//! usb_product_id = "0x0001"
//! version_major = 1
//! version_minor = 0
//! logging_level = "info"
//! serial_number = "SN1"
//! product_name = "Widget"
//! manufacturer = "Acme"
//! custom_strings = ["board=rev3"]
//! ```
//!
//! USB IDs may be hex strings or plain integers; the logging level may be a
//! name or its numeric value.

use std::format;
use std::fs;
use std::path::Path;
use std::string::{String, ToString};
use std::vec::Vec;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::error::{CodecError, Field};
use crate::record::{parse_usb_id, IdentityRecord, LoggingLevel, Version};

/// Errors loading or saving a record file
#[derive(Debug, Error)]
pub enum RecordFileError {
    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents are not a valid record
    #[error("parse error: {0}")]
    Parse(String),

    /// Record could not be rendered as TOML
    #[error("serialize error: {0}")]
    Serialize(String),

    /// Record does not fit the wire format
    #[error("invalid record: {0}")]
    Codec(#[from] CodecError),
}

/// On-disk representation of a record
#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    #[serde(
        deserialize_with = "deserialize_vendor_id",
        serialize_with = "serialize_usb_id"
    )]
    usb_vendor_id: u16,
    #[serde(
        deserialize_with = "deserialize_product_id",
        serialize_with = "serialize_usb_id"
    )]
    usb_product_id: u16,
    version_major: u8,
    version_minor: u8,
    #[serde(default, with = "level")]
    logging_level: LoggingLevel,
    #[serde(default)]
    serial_number: String,
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    manufacturer: String,
    #[serde(default)]
    custom_strings: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u16),
    Str(String),
}

fn deserialize_usb_id<'de, D>(deserializer: D, field: Field) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_usb_id(field, &s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_vendor_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    deserialize_usb_id(deserializer, Field::UsbVendorId)
}

fn deserialize_product_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    deserialize_usb_id(deserializer, Field::UsbProductId)
}

fn serialize_usb_id<S: Serializer>(id: &u16, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:04X}", id))
}

mod level {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NameOrInt {
        Int(u8),
        Name(String),
    }

    pub fn serialize<S: Serializer>(level: &LoggingLevel, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(level.name())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LoggingLevel, D::Error> {
        let parsed = match NameOrInt::deserialize(deserializer)? {
            NameOrInt::Int(n) => LoggingLevel::from_u8(n),
            NameOrInt::Name(s) => LoggingLevel::from_name(&s),
        };
        parsed.ok_or_else(|| {
            serde::de::Error::custom("logging level must be 0-5 or a level name such as \"info\"")
        })
    }
}

impl From<RecordFile> for IdentityRecord {
    fn from(f: RecordFile) -> Self {
        Self {
            usb_vendor_id: f.usb_vendor_id,
            usb_product_id: f.usb_product_id,
            version: Version::new(f.version_major, f.version_minor),
            logging_level: f.logging_level,
            serial_number: f.serial_number,
            product_name: f.product_name,
            manufacturer: f.manufacturer,
            custom_strings: f.custom_strings,
        }
    }
}

impl From<&IdentityRecord> for RecordFile {
    fn from(r: &IdentityRecord) -> Self {
        Self {
            usb_vendor_id: r.usb_vendor_id,
            usb_product_id: r.usb_product_id,
            version_major: r.version.major,
            version_minor: r.version.minor,
            logging_level: r.logging_level,
            serial_number: r.serial_number.clone(),
            product_name: r.product_name.clone(),
            manufacturer: r.manufacturer.clone(),
            custom_strings: r.custom_strings.clone(),
        }
    }
}

impl IdentityRecord {
    /// Parse a record from TOML text
    ///
    /// The record is validated against the wire format before it is returned.
    pub fn from_toml_str(s: &str) -> Result<Self, RecordFileError> {
        let file: RecordFile =
            toml::from_str(s).map_err(|e| RecordFileError::Parse(e.to_string()))?;
        Self::checked(file)
    }

    /// Parse a record from RON text
    pub fn from_ron_str(s: &str) -> Result<Self, RecordFileError> {
        let file: RecordFile =
            ron::from_str(s).map_err(|e| RecordFileError::Parse(e.to_string()))?;
        Self::checked(file)
    }

    /// Load a record file, choosing the format from the extension
    ///
    /// `.ron` files are parsed as RON, everything else as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RecordFileError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let record = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ron") => Self::from_ron_str(&text)?,
            _ => Self::from_toml_str(&text)?,
        };
        log::debug!("Loaded identity record from {}", path.display());
        Ok(record)
    }

    /// Render the record as TOML
    pub fn to_toml_string(&self) -> Result<String, RecordFileError> {
        toml::to_string(&RecordFile::from(self))
            .map_err(|e| RecordFileError::Serialize(e.to_string()))
    }

    /// Save the record as a TOML file
    pub fn save_toml(&self, path: impl AsRef<Path>) -> Result<(), RecordFileError> {
        self.validate()?;
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    fn checked(file: RecordFile) -> Result<Self, RecordFileError> {
        let record = Self::from(file);
        record.validate()?;
        Ok(record)
    }
}
