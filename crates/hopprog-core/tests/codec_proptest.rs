//! Property-based tests for wire image encode/decode.
//!
//! Uses `proptest` to generate arbitrary valid identity records and
//! arbitrary byte buffers, checking that decode inverts encode and that
//! decode never panics on garbage.

use hopprog_core::{codec, CodecError, IdentityRecord, LoggingLevel, Version};
use proptest::prelude::*;

/// Printable Unicode text; 63 chars of at most 4 bytes each always fit the
/// one-byte length prefix.
fn wire_string() -> impl Strategy<Value = String> {
    "\\PC{0,63}"
}

fn logging_level() -> impl Strategy<Value = LoggingLevel> {
    (0u8..=5).prop_map(|v| LoggingLevel::from_u8(v).unwrap())
}

prop_compose! {
    fn identity_record()(
        usb_vendor_id in any::<u16>(),
        usb_product_id in any::<u16>(),
        major in 0u8..=99,
        minor in 0u8..=99,
        logging_level in logging_level(),
        serial_number in wire_string(),
        product_name in wire_string(),
        manufacturer in wire_string(),
        custom_strings in prop::collection::vec(wire_string(), 0..8),
    ) -> IdentityRecord {
        IdentityRecord {
            usb_vendor_id,
            usb_product_id,
            version: Version::new(major, minor),
            logging_level,
            serial_number,
            product_name,
            manufacturer,
            custom_strings,
        }
    }
}

proptest! {
    /// decode(encode(r)) == r for every record encode accepts.
    #[test]
    fn round_trip(record in identity_record()) {
        let image = codec::encode(&record).unwrap();
        prop_assert_eq!(image.len(), record.encoded_len());
        prop_assert_eq!(codec::decode(&image).unwrap(), record);
    }

    /// Anything shorter than the header is TooShort, never a panic.
    #[test]
    fn short_buffers_are_too_short(data in prop::collection::vec(any::<u8>(), 0..8)) {
        prop_assert_eq!(codec::decode(&data), Err(CodecError::TooShort { len: data.len() }));
    }

    /// A wrong magic is reported regardless of what follows it.
    #[test]
    fn wrong_magic_is_bad_magic(
        magic in any::<[u8; 4]>().prop_filter("not HOP!", |m| m != b"HOP!"),
        rest in prop::collection::vec(any::<u8>(), 4..64),
    ) {
        let mut data = magic.to_vec();
        data.extend_from_slice(&rest);
        prop_assert_eq!(codec::decode(&data), Err(CodecError::BadMagic(magic)));
    }

    /// A dangling non-zero length byte after a valid image is Truncated.
    #[test]
    fn dangling_length_is_truncated(record in identity_record(), len in 1u8..=255) {
        let mut data = codec::encode(&record).unwrap().into_bytes();
        data.push(len);
        let is_truncated = matches!(codec::decode(&data), Err(CodecError::Truncated { .. }));
        prop_assert!(is_truncated);
    }

    /// Decoding random bytes behind a valid magic never panics.
    #[test]
    fn decode_arbitrary_does_not_panic(rest in prop::collection::vec(any::<u8>(), 0..300)) {
        let mut data = b"HOP!".to_vec();
        data.extend_from_slice(&rest);
        let _ = codec::decode(&data);
    }
}
