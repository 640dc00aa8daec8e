//! Record file and wire image commands

use crate::cli::ImageSource;
use hopprog_core::{decode, encode, IdentityRecord};
use std::fs;
use std::path::Path;

/// Print a record in a human-readable form
pub fn print_record(record: &IdentityRecord) {
    println!(
        "USB ID:        {:04X}:{:04X}",
        record.usb_vendor_id, record.usb_product_id
    );
    println!("Version:       {}", record.version);
    println!("Logging level: {}", record.logging_level);
    println!("Serial number: {:?}", record.serial_number);
    println!("Product:       {:?}", record.product_name);
    println!("Manufacturer:  {:?}", record.manufacturer);
    for (i, s) in record.custom_strings.iter().enumerate() {
        println!("Custom [{}]:    {:?}", i, s);
    }
}

/// Produce the wire image for a device command
///
/// A record file is encoded; an image file is decoded first so that a
/// corrupt image is rejected before it reaches the programmer.
pub fn load_image(source: &ImageSource) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match (&source.record, &source.image) {
        (Some(path), _) => {
            let record = IdentityRecord::from_file(path)?;
            let image = encode(&record)?;
            log::info!("Encoded {:?} into {} bytes", path, image.len());
            Ok(image.into_bytes())
        }
        (None, Some(path)) => {
            let data = fs::read(path)?;
            let record = decode(&data)?;
            log::info!(
                "Read {} byte image {:?} (serial {:?})",
                data.len(),
                path,
                record.serial_number
            );
            Ok(data)
        }
        (None, None) => Err("No record or image given".into()),
    }
}

/// Encode a record file into a wire image file
pub fn run_encode(record_path: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let record = IdentityRecord::from_file(record_path)?;
    let image = encode(&record)?;
    fs::write(output, image.as_bytes())?;
    println!("Wrote {} bytes to {:?}", image.len(), output);
    Ok(())
}

/// Decode a wire image, print it and optionally save it as TOML
pub fn run_decode(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let record = decode(&data)?;
    print_record(&record);
    if let Some(output) = output {
        record.save_toml(output)?;
        println!("Saved record to {:?}", output);
    }
    Ok(())
}
