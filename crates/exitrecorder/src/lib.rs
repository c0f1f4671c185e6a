//! `exitrecorder` - empirical runway exit usage from flight position telemetry
//!
//! Flights around an airport are followed across polling cycles until their
//! ground track is complete, the track is matched against the airport's
//! catalog of exit regions, and the finalized records are stored and tallied
//! into per-exit usage frequencies.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod aggregate;
pub mod catalog;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod feed;
pub mod geometry;
pub mod logging;
pub mod monitor;
pub mod record;
pub mod storage;
pub mod tracker;

pub use aggregate::{Aggregator, ExitCount, ExitUsageTally};
pub use catalog::AirportCatalog;
pub use classify::Classification;
pub use config::Config;
pub use error::{Error, Result};
pub use feed::{FlightSnapshot, PositionFeed, ReplayFeed, SnapshotBatch};
pub use geometry::{AirportGeometry, AirportSpec, ExitRegion, Position};
pub use logging::init_logging;
pub use monitor::{Monitor, MonitorHandle, MonitorOptions, RunSummary};
pub use record::{Direction, FlightRecord, RecordKey};
pub use storage::{open_store, RecordSink, RecordSource, RecordStore};
pub use tracker::{FlightTracker, Phase};
