//! Command line argument parsing for the fan control daemon

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// HP OMEN fan control
///
/// Drives the laptop fans from a temperature curve. Run `daemon` as root; the
/// other commands talk to the running daemon over the system bus.
#[derive(Parser, Debug)]
#[command(name = "omen-fan")]
#[command(about = "Fan curve control daemon for HP OMEN laptops")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file [default: $OMEN_FAN_CONFIG or /etc/omen-fan/config.json]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the fan control daemon
    Daemon {
        /// Report temperatures without touching the fans
        #[arg(long)]
        monitor_only: bool,
        /// Append one CSV row per tick to this file
        #[arg(long, value_name = "PATH")]
        csv: Option<PathBuf>,
        /// Also write log output to this file
        #[arg(long, value_name = "PATH")]
        log_file: Option<PathBuf>,
    },
    /// Show the daemon's latest tick
    Status,
    /// Fan curve management
    Curve {
        #[command(subcommand)]
        command: CurveCommands,
    },
    /// Change control options on the running daemon
    Options {
        /// Hysteresis band in °C
        #[arg(long)]
        hysteresis: Option<u32>,
        /// Enable or disable duty smoothing
        #[arg(long)]
        smoothing: Option<bool>,
        /// Largest duty change per tick when smoothing
        #[arg(long)]
        max_step: Option<u8>,
        /// Seconds between forced reapplications
        #[arg(long)]
        reapply: Option<u64>,
        /// Poll interval in milliseconds
        #[arg(long)]
        poll: Option<u64>,
    },
    /// Ask the daemon to restore BIOS control and exit
    Stop,
    /// Evaluate the configured curve offline
    Preview {
        /// Temperature in Celsius
        temp: i32,
        /// Apply the battery policy as if unplugged
        #[arg(long)]
        battery: bool,
    },
    /// Take one temperature sample from the local sensors
    Sensors,
}

#[derive(Subcommand, Debug)]
pub enum CurveCommands {
    /// Print the active curve
    Show,
    /// Replace the active curve, e.g. `40:20 60:50 80:85 90:100`
    Set {
        /// Points as TEMP:DUTY pairs
        #[arg(required = true, value_parser = parse_point)]
        points: Vec<(i32, u8)>,
    },
    /// Switch to a named preset
    Preset {
        /// Name of the preset
        name: String,
    },
    /// List available presets
    Presets,
}

/// Parse a `TEMP:DUTY` pair.
pub fn parse_point(s: &str) -> Result<(i32, u8), String> {
    let (temp, duty) = s
        .split_once(':')
        .ok_or_else(|| format!("expected TEMP:DUTY, got '{}'", s))?;
    let temp = temp
        .trim()
        .parse()
        .map_err(|e| format!("bad temperature '{}': {}", temp, e))?;
    let duty = duty
        .trim()
        .parse()
        .map_err(|e| format!("bad duty '{}': {}", duty, e))?;
    Ok((temp, duty))
}
