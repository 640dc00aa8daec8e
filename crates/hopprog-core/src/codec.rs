//! Wire image encoding and decoding
//!
//! Layout (all multi-byte integers big-endian):
//!
//! | Offset | Size | Field                                     |
//! |--------|------|-------------------------------------------|
//! | 0      | 4    | Magic `"HOP!"`                            |
//! | 4      | 2    | USB vendor ID                             |
//! | 6      | 2    | USB product ID                            |
//! | 8      | 1    | Version major (BCD)                       |
//! | 9      | 1    | Version minor (BCD)                       |
//! | 10     | 1    | Logging level (0-5)                       |
//! | 11     | 1+N  | Serial number, length-prefixed            |
//! | ...    | 1+M  | Product name, length-prefixed             |
//! | ...    | 1+L  | Manufacturer, length-prefixed             |
//! | ...    | 1+k  | Custom strings, repeated until end of data |
//!
//! There is no count for the custom strings: the end of the buffer is the
//! only terminator. A trailing length byte without its payload therefore
//! decodes as [`CodecError::Truncated`], never as an empty string.

use alloc::string::String;
use alloc::vec::Vec;
use core::ops::Deref;

use crate::error::{CodecError, Field, InvalidReason, Result};
use crate::record::{bcd_decode, bcd_field, string_len, IdentityRecord, LoggingLevel, Version};

/// Magic bytes at the start of every image
pub const MAGIC: [u8; 4] = *b"HOP!";

/// Minimum buffer length accepted by [`decode`] (magic + VID + PID)
pub const HEADER_LEN: usize = 8;

/// Length of all fixed-size fields (through the logging level)
pub const FIXED_LEN: usize = 11;

/// An encoded identity record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WireImage(Vec<u8>);

impl WireImage {
    /// Wrap raw bytes, e.g. read back from a file
    ///
    /// No validation is performed; use [`decode`] to check the contents.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take ownership of the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Decode this image back into a record
    pub fn decode(&self) -> Result<IdentityRecord> {
        decode(&self.0)
    }
}

impl Deref for WireImage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for WireImage {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<WireImage> for Vec<u8> {
    fn from(image: WireImage) -> Self {
        image.0
    }
}

/// Encode a record into its wire image
///
/// Fails with [`CodecError::InvalidField`] if a version component is above
/// 99 or any string is longer than 255 bytes. Nothing is ever truncated.
pub fn encode(record: &IdentityRecord) -> Result<WireImage> {
    let mut out = Vec::with_capacity(record.encoded_len());

    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&record.usb_vendor_id.to_be_bytes());
    out.extend_from_slice(&record.usb_product_id.to_be_bytes());
    out.push(bcd_field(Field::VersionMajor, record.version.major)?);
    out.push(bcd_field(Field::VersionMinor, record.version.minor)?);
    out.push(record.logging_level.as_u8());

    for (field, s) in record.strings() {
        out.push(string_len(field, s)?);
        out.extend_from_slice(s.as_bytes());
    }

    log::trace!("Encoded identity record into {} bytes", out.len());
    Ok(WireImage(out))
}

/// Decode a wire image into a record
///
/// Either returns a complete record or an error; no partial record is ever
/// produced.
pub fn decode(data: &[u8]) -> Result<IdentityRecord> {
    if data.len() < HEADER_LEN {
        return Err(CodecError::TooShort { len: data.len() });
    }

    let mut r = Reader::new(data);

    let magic = r.array::<4>()?;
    if magic != MAGIC {
        return Err(CodecError::BadMagic(magic));
    }

    let usb_vendor_id = u16::from_be_bytes(r.array()?);
    let usb_product_id = u16::from_be_bytes(r.array()?);
    let major = r.bcd(Field::VersionMajor)?;
    let minor = r.bcd(Field::VersionMinor)?;

    let level = r.u8()?;
    let logging_level = LoggingLevel::from_u8(level).ok_or(CodecError::InvalidField {
        field: Field::LoggingLevel,
        reason: InvalidReason::OutOfRange { value: level, max: 5 },
    })?;

    let serial_number = r.string(Field::SerialNumber)?;
    let product_name = r.string(Field::ProductName)?;
    let manufacturer = r.string(Field::Manufacturer)?;

    let mut custom_strings = Vec::new();
    while !r.is_empty() {
        custom_strings.push(r.string(Field::CustomString(custom_strings.len()))?);
    }

    Ok(IdentityRecord {
        usb_vendor_id,
        usb_product_id,
        version: Version::new(major, minor),
        logging_level,
        serial_number,
        product_name,
        manufacturer,
        custom_strings,
    })
}

/// Bounds-checked cursor over the image
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.data.len() - self.pos;
        if n > available {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n,
                available,
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn bcd(&mut self, field: Field) -> Result<u8> {
        let byte = self.u8()?;
        bcd_decode(byte).ok_or(CodecError::InvalidField {
            field,
            reason: InvalidReason::NotBcd(byte),
        })
    }

    fn string(&mut self, field: Field) -> Result<String> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;
        core::str::from_utf8(bytes)
            .map(String::from)
            .map_err(|_| CodecError::InvalidField {
                field,
                reason: InvalidReason::NotUtf8,
            })
    }
}
