//! hopprog-core - Identity record model and wire image codec
//!
//! This crate defines the device-identity record that hopprog writes to an
//! EEPROM and the binary "wire image" it is transferred as. Everything here
//! is pure: no I/O, no state, so it is usable in `no_std` environments with
//! an allocator.
//!
//! # Features
//!
//! - `std` - Record files (TOML/RON) and `std::error::Error` impls
//!
//! # Example
//!
//! ```
//! use hopprog_core::{codec, IdentityRecord, LoggingLevel, Version};
//!
//! let record = IdentityRecord {
//!     usb_vendor_id: 0x2E8A,
//!     usb_product_id: 0x0001,
//!     version: Version::new(1, 0),
//!     logging_level: LoggingLevel::Warning,
//!     serial_number: "SN1".into(),
//!     product_name: "Widget".into(),
//!     manufacturer: "Acme".into(),
//!     custom_strings: Vec::new(),
//! };
//!
//! let image = codec::encode(&record)?;
//! assert_eq!(&image[..4], b"HOP!");
//! assert_eq!(codec::decode(&image)?, record);
//! # Ok::<(), hopprog_core::CodecError>(())
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod codec;
pub mod error;
#[cfg(feature = "std")]
pub mod file;
pub mod record;

pub use codec::{decode, encode, WireImage};
pub use error::{CodecError, Field, InvalidReason, Result};
pub use record::{parse_usb_id, IdentityRecord, LoggingLevel, Version};
