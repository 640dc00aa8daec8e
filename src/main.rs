//! hopprog - identity record programmer
//!
//! Encodes identity records (USB IDs, version, logging level and strings)
//! into the `HOP!` wire image and drives the serial programmer that burns
//! them into a device EEPROM.
//!
//! # Architecture
//!
//! - `hopprog-core` holds the record model and the wire codec; it is
//!   `no_std` and never touches I/O.
//! - `hopprog-serial` speaks the programmer's line protocol over a serial
//!   port or TCP bridge.
//!
//! Offline commands (`encode`, `decode`) only use the codec. Device commands
//! open one connection, run their steps through a `ProgrammerHandle` and
//! disconnect again.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::Encode { record, output } => commands::image::run_encode(&record, &output),
        Commands::Decode { input, output } => {
            commands::image::run_decode(&input, output.as_deref())
        }
        device_command => {
            // Protocol waits are cooperative; one thread is plenty
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_device_command(device_command))
        }
    }
}

async fn run_device_command(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Info { port } => {
            let programmer = commands::device::open(&port, None).await?;
            let result = commands::device::run_info(&programmer).await;
            commands::device::close(&programmer, result).await
        }
        Commands::Burn {
            port,
            source,
            transfer,
            no_verify,
        } => {
            let image = commands::image::load_image(&source)?;
            let programmer = commands::device::open(&port, Some(&transfer)).await?;
            let result = commands::device::run_program(&programmer, &image, !no_verify).await;
            commands::device::close(&programmer, result).await
        }
        Commands::Load {
            port,
            source,
            transfer,
        } => {
            let image = commands::image::load_image(&source)?;
            let programmer = commands::device::open(&port, Some(&transfer)).await?;
            let result = commands::device::run_load(&programmer, &image).await;
            commands::device::close(&programmer, result).await
        }
        Commands::BurnOnly { port } => {
            let programmer = commands::device::open(&port, None).await?;
            let result = commands::device::run_burn(&programmer).await;
            commands::device::close(&programmer, result).await
        }
        Commands::Verify { port } => {
            let programmer = commands::device::open(&port, None).await?;
            let result = commands::device::run_verify(&programmer).await;
            commands::device::close(&programmer, result).await
        }
        Commands::Encode { .. } | Commands::Decode { .. } => {
            Err("offline command dispatched to the device runner".into())
        }
    }
}
