//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

const PORT_HELP: &str =
    "Programmer port: a device path, dev=<path>[:baud] or ip=<host>:<port> for a TCP bridge";

#[derive(Parser)]
#[command(name = "hopprog")]
#[command(author, version, about = "Identity record programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the programmer is attached
#[derive(clap::Args, Debug, Clone)]
pub struct PortArgs {
    #[arg(short, long, help = PORT_HELP)]
    pub port: String,

    /// Baud rate (ignored for ip= ports and when the port string names one)
    #[arg(short, long, default_value_t = hopprog_serial::DEFAULT_BAUD)]
    pub baud: u32,

    /// Response timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,
}

/// Upload tuning
#[derive(clap::Args, Debug, Clone)]
pub struct TransferArgs {
    /// Bytes per upload write
    #[arg(long, default_value_t = 6)]
    pub chunk_size: usize,

    /// Pause between upload writes in milliseconds
    #[arg(long, default_value_t = 30)]
    pub chunk_delay_ms: u64,
}

/// The image to program: a record file or a pre-encoded wire image
#[derive(clap::Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct ImageSource {
    /// Identity record file (.toml or .ron)
    #[arg(short, long)]
    pub record: Option<PathBuf>,

    /// Encoded wire image
    #[arg(short, long)]
    pub image: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Encode a record file into a wire image
    Encode {
        /// Identity record file (.toml or .ron)
        #[arg(short, long)]
        record: PathBuf,

        /// Output image path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Decode a wire image and print the record
    Decode {
        /// Encoded wire image
        #[arg(short, long)]
        input: PathBuf,

        /// Also save the record as TOML
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show programmer firmware information
    Info {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Upload, burn and verify an identity record
    Burn {
        #[command(flatten)]
        port: PortArgs,

        #[command(flatten)]
        source: ImageSource,

        #[command(flatten)]
        transfer: TransferArgs,

        /// Skip verification after burning
        #[arg(long)]
        no_verify: bool,
    },

    /// Upload an image to the programmer without burning it
    Load {
        #[command(flatten)]
        port: PortArgs,

        #[command(flatten)]
        source: ImageSource,

        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Burn the image previously uploaded with `load`
    BurnOnly {
        #[command(flatten)]
        port: PortArgs,
    },

    /// Verify the EEPROM against the uploaded image
    Verify {
        #[command(flatten)]
        port: PortArgs,
    },
}
