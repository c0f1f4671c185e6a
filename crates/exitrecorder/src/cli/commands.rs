//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::record::Direction;

/// Airport tracked when none is given.
const DEFAULT_AIRPORT: &str = "SAN";

/// Track command arguments.
#[derive(Debug, Args)]
pub struct TrackCommand {
    /// Airport code to track
    #[arg(short, long, default_value = DEFAULT_AIRPORT)]
    pub airport: String,

    /// Captured feed to replay (one JSON array of snapshots per line)
    #[arg(short, long, value_name = "FILE")]
    pub replay: PathBuf,

    /// Stop after this many cycles
    #[arg(short, long)]
    pub max_cycles: Option<u64>,

    /// Seconds between polls (overrides configuration)
    #[arg(short, long, conflicts_with = "no_wait")]
    pub interval: Option<u64>,

    /// Poll as fast as the feed delivers
    #[arg(long)]
    pub no_wait: bool,

    /// Output format of the run summary
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Tally command arguments.
#[derive(Debug, Args)]
pub struct TallyCommand {
    /// Airport code to tally
    #[arg(short, long, default_value = DEFAULT_AIRPORT)]
    pub airport: String,

    /// Only tally one direction
    #[arg(short, long, value_enum)]
    pub direction: Option<DirectionArg>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Airports command arguments.
#[derive(Debug, Args)]
pub struct AirportsCommand {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Direction argument for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DirectionArg {
    /// Arrivals only
    Arrival,
    /// Departures only
    Departure,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Arrival => Self::Arrival,
            DirectionArg::Departure => Self::Departure,
        }
    }
}

impl DirectionArg {
    /// The directions selected by an optional filter.
    #[must_use]
    pub fn selected(filter: Option<Self>) -> Vec<Direction> {
        filter.map_or_else(|| Direction::ALL.to_vec(), |arg| vec![arg.into()])
    }
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Formatted table
    #[default]
    Table,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_arg_conversion() {
        assert_eq!(Direction::from(DirectionArg::Arrival), Direction::Arrival);
        assert_eq!(Direction::from(DirectionArg::Departure), Direction::Departure);
    }

    #[test]
    fn test_selected_directions() {
        assert_eq!(
            DirectionArg::selected(None),
            vec![Direction::Arrival, Direction::Departure]
        );
        assert_eq!(
            DirectionArg::selected(Some(DirectionArg::Departure)),
            vec![Direction::Departure]
        );
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Table);
    }
}
