// Command line interface
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Drive the rotation chair over its serial controller
#[derive(Debug, Parser)]
#[command(name = "rotation-chair", version)]
pub struct Cli {
    /// Serial port of the controller (overrides the config file)
    #[arg(long, global = true)]
    pub port: Option<String>,

    /// Baud rate (overrides the config file)
    #[arg(long, global = true)]
    pub baud: Option<u32>,

    /// JSON config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log commands instead of writing them to a port
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Publish run status and accept stop requests over zenoh
    #[arg(long, global = true)]
    pub zenoh: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the Keshner stimulus, record it and return home
    Keshner {
        /// Sampling interval in seconds
        #[arg(long)]
        dt: Option<f64>,
        /// Run length in seconds
        #[arg(long)]
        duration: Option<f64>,
        /// Directory for recorded data
        #[arg(long)]
        record_dir: Option<PathBuf>,
    },
    /// Move back to 0°
    Home {
        /// Switch the controller to position control and enable it first
        #[arg(long)]
        ensure_mode: bool,
    },
    /// One full revolution
    OneTour {
        /// Switch the controller to position control and enable it first
        #[arg(long)]
        ensure_mode: bool,
    },
    /// Send one raw controller command
    Send {
        /// Command line, sent as typed
        line: String,
    },
    /// Play a file of controller commands
    Script {
        file: PathBuf,
    },
    /// Print controller output for a while
    Listen {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Write the sampled stimulus as CSV
    Profile {
        #[arg(long)]
        dt: Option<f64>,
        #[arg(long)]
        duration: Option<f64>,
        /// Output file, stdout if omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}
