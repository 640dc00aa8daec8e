//! Programmer commands

use crate::cli::{PortArgs, TransferArgs};
use hopprog_serial::{ProgrammerHandle, SessionConfig, SystemConnector};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::time::Duration;

type Programmer = ProgrammerHandle<SystemConnector>;

/// Create the upload progress bar style
fn create_progress_bar_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")?
        .progress_chars("#>-"))
}

/// Build the session configuration from command-line flags
pub fn session_config(port: &PortArgs, transfer: Option<&TransferArgs>) -> SessionConfig {
    let mut config = SessionConfig {
        response_timeout: Duration::from_millis(port.timeout_ms),
        ..SessionConfig::default()
    };
    if let Some(transfer) = transfer {
        config.chunk_size = transfer.chunk_size;
        config.chunk_delay = Duration::from_millis(transfer.chunk_delay_ms);
    }
    config
}

/// Connect to the programmer
pub async fn open(
    port: &PortArgs,
    transfer: Option<&TransferArgs>,
) -> Result<Programmer, Box<dyn std::error::Error>> {
    let programmer = ProgrammerHandle::new(SystemConnector, session_config(port, transfer))?;
    programmer.connect(&port.port, port.baud).await?;
    Ok(programmer)
}

/// Disconnect, keeping the command's own error if it failed
pub async fn close(
    programmer: &Programmer,
    result: Result<(), Box<dyn std::error::Error>>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = programmer.disconnect().await {
        log::warn!("Disconnect failed: {}", e);
    }
    result
}

/// Print programmer firmware information
pub async fn run_info(programmer: &Programmer) -> Result<(), Box<dyn std::error::Error>> {
    let info = programmer.query_info().await?;
    println!("Firmware version: {}", info.version);
    println!("Free heap:        {} bytes", info.free_heap);
    println!("Uptime:           {:?}", info.uptime_duration());
    Ok(())
}

/// Upload, burn and optionally verify an image
pub async fn run_program(
    programmer: &Programmer,
    image: &[u8],
    verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    with_progress(programmer, image.len(), programmer.program(image, verify)).await?;
    if verify {
        println!("Programmed and verified {} bytes", image.len());
    } else {
        println!("Programmed {} bytes", image.len());
    }
    Ok(())
}

/// Upload an image without burning it
pub async fn run_load(programmer: &Programmer, image: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    with_progress(programmer, image.len(), programmer.load_data(image)).await?;
    println!("Uploaded {} bytes", image.len());
    Ok(())
}

/// Burn the previously uploaded image
pub async fn run_burn(programmer: &Programmer) -> Result<(), Box<dyn std::error::Error>> {
    programmer.burn_eeprom().await?;
    println!("EEPROM burned");
    Ok(())
}

/// Verify the EEPROM
pub async fn run_verify(programmer: &Programmer) -> Result<(), Box<dyn std::error::Error>> {
    programmer.verify_eeprom().await?;
    println!("EEPROM verified");
    Ok(())
}

/// Drive a progress bar from the programmer's snapshot while `op` runs
async fn with_progress<T, F>(
    programmer: &Programmer,
    total: usize,
    op: F,
) -> Result<T, Box<dyn std::error::Error>>
where
    F: Future<Output = hopprog_serial::Result<T>>,
{
    let pb = ProgressBar::new(total as u64);
    pb.set_style(create_progress_bar_style()?);
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut updates = programmer.subscribe();
    let watcher = async {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if let Some(progress) = snapshot.progress {
                pb.set_position(progress.sent as u64);
            }
            pb.set_message(snapshot.status);
        }
    };

    tokio::pin!(op);
    let result = tokio::select! {
        result = &mut op => result,
        // Only ends if the handle goes away
        _ = watcher => op.await,
    };

    match &result {
        Ok(_) => pb.finish_with_message("done"),
        Err(_) => pb.abandon_with_message("failed"),
    }
    Ok(result?)
}
