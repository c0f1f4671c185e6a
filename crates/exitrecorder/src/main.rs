//! `exitrec` - CLI for exitrecorder
//!
//! Tracks flights from a position feed, tallies stored records, and shows
//! the airport catalog and configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use exitrecorder::cli::{
    AirportsCommand, Cli, Command, ConfigCommand, DirectionArg, OutputFormat, TallyCommand,
    TrackCommand,
};
use exitrecorder::{
    init_logging, open_store, AirportCatalog, Aggregator, Config, ExitUsageTally, Monitor,
    MonitorOptions, ReplayFeed,
};

/// Poll interval used with `--no-wait`.
const NO_WAIT_INTERVAL: Duration = Duration::from_millis(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config_path = cli.config;
    let load = || Config::load_from(config_path.clone()).context("loading configuration");

    match cli.command {
        Command::Track(cmd) => handle_track(&load()?, cmd).await,
        Command::Tally(cmd) => handle_tally(&load()?, &cmd),
        Command::Airports(cmd) => handle_airports(&load()?, &cmd),
        // Validation reports load errors itself instead of failing on them.
        Command::Config(ConfigCommand::Validate { file }) => {
            handle_validate(file.or_else(|| config_path.clone()));
            Ok(())
        }
        Command::Config(cmd) => handle_config(&load()?, config_path.as_deref(), cmd),
    }
}

fn load_catalog(config: &Config) -> anyhow::Result<AirportCatalog> {
    AirportCatalog::load(config.airports.catalog_path.as_deref())
        .context("loading airport catalog")
}

async fn handle_track(config: &Config, cmd: TrackCommand) -> anyhow::Result<()> {
    let geometry = load_catalog(config)?.get(&cmd.airport)?;
    let store = open_store(config).with_context(|| {
        format!(
            "opening record store at {}",
            config.storage_location().display()
        )
    })?;
    let feed = ReplayFeed::open(&cmd.replay)
        .await
        .with_context(|| format!("opening replay {}", cmd.replay.display()))?;

    let mut options = MonitorOptions::from_config(config).with_max_cycles(cmd.max_cycles);
    if cmd.no_wait {
        options = options.with_poll_interval(NO_WAIT_INTERVAL);
    } else if let Some(secs) = cmd.interval.filter(|secs| *secs > 0) {
        options = options.with_poll_interval(Duration::from_secs(secs));
    }

    let monitor = Monitor::new(geometry, options);
    let handle = monitor.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing current cycle");
            handle.stop();
        }
    });

    let summary = monitor.run(feed, store).await?;
    match cmd.format {
        OutputFormat::Table => print!("{}", summary.to_text()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }
    Ok(())
}

fn handle_tally(config: &Config, cmd: &TallyCommand) -> anyhow::Result<()> {
    let geometry = load_catalog(config)?.get(&cmd.airport)?;
    let store = open_store(config).with_context(|| {
        format!(
            "opening record store at {}",
            config.storage_location().display()
        )
    })?;

    let mut tallies = Vec::new();
    for direction in DirectionArg::selected(cmd.direction) {
        let records = store.records(geometry.code(), direction)?;
        tallies.push(Aggregator::aggregate_stored(records, &geometry, direction));
    }

    match cmd.format {
        OutputFormat::Table => {
            let tables: Vec<String> = tallies.iter().map(ExitUsageTally::to_table).collect();
            print!("{}", tables.join("\n"));
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tallies)?),
    }
    Ok(())
}

fn handle_airports(config: &Config, cmd: &AirportsCommand) -> anyhow::Result<()> {
    let catalog = load_catalog(config)?;
    match cmd.format {
        OutputFormat::Table => {
            println!(
                "{:<6} {:>7} {:>6} {:>26} {:>10}",
                "code", "runways", "exits", "center", "tolerance"
            );
            for airport in catalog.iter() {
                println!(
                    "{:<6} {:>7} {:>6} {:>26} {:>10}",
                    airport.code(),
                    airport.runway_count(),
                    airport.exit_regions().len(),
                    airport.center().to_string(),
                    airport.proximity_tolerance()
                );
            }
        }
        OutputFormat::Json => {
            let airports: Vec<_> = catalog.iter().collect();
            println!("{}", serde_json::to_string_pretty(&airports)?);
        }
    }
    Ok(())
}

fn handle_config(
    config: &Config,
    config_path: Option<&Path>,
    cmd: ConfigCommand,
) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", config.to_json_pretty()?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[storage]");
                println!("  Backend:            {}", config.storage.backend);
                println!("  Location:           {}", config.storage_location().display());
                println!();
                println!("[tracker]");
                println!("  Poll interval (s):  {}", config.tracker.poll_interval_secs);
                println!("  Stale after:        {} cycles", config.tracker.stale_after_cycles);
                println!("  Channel capacity:   {}", config.tracker.channel_capacity);
                println!();
                println!("[persistence]");
                println!("  Max attempts:       {}", config.persistence.max_attempts);
                println!("  Initial backoff:    {} ms", config.persistence.initial_backoff_ms);
                println!();
                println!("[airports]");
                match &config.airports.catalog_path {
                    Some(path) => println!("  Catalog:            {}", path.display()),
                    None => println!("  Catalog:            built-in"),
                }
            }
        }
        ConfigCommand::Path => match config_path {
            Some(path) => println!("{}", path.display()),
            None => println!("{}", Config::default_config_path().display()),
        },
        ConfigCommand::Validate { file } => {
            handle_validate(file.or_else(|| config_path.map(Path::to_path_buf)));
        }
    }
    Ok(())
}

fn handle_validate(file: Option<PathBuf>) {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    let loaded = Config::load_from(Some(path)).and_then(|config| {
        AirportCatalog::load(config.airports.catalog_path.as_deref()).map(|catalog| catalog.len())
    });
    match loaded {
        Ok(airports) => println!("Configuration is valid ({airports} airports)."),
        Err(e) => println!("Configuration error: {e}"),
    }
}
