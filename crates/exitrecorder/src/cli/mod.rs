//! Command-line interface for exitrecorder.
//!
//! This module provides the CLI structure for the `exitrec` binary; the
//! handlers live in the binary itself.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AirportsCommand, ConfigCommand, DirectionArg, OutputFormat, TallyCommand, TrackCommand,
};

use crate::logging::Verbosity;

/// exitrec - Find out which runway exits aircraft actually use
///
/// Tracks arriving and departing flights around an airport from position
/// telemetry, records each completed ground track, and tallies exit usage.
#[derive(Debug, Parser)]
#[command(name = "exitrec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Track flights from a position feed and record their exits
    Track(TrackCommand),

    /// Tally exit usage from stored records
    Tally(TallyCommand),

    /// List airports with known exit geometry
    Airports(AirportsCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}
