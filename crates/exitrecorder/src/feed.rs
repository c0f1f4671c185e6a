//! Position feed abstraction.
//!
//! A feed delivers one [`SnapshotBatch`] per polling cycle: every flight the
//! provider currently reports around the airport. Raw provider payloads are
//! decoded here, and snapshots missing required fields are set aside as
//! [`FeedDecodeError`]s instead of failing the whole batch.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::Position;

/// Route placeholders some providers send instead of omitting the field.
const UNKNOWN_ROUTE_MARKERS: &[&str] = &["", "N/A", "-"];

/// One position in a provider's history buffer or in a tracked trail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailPoint {
    /// Where the aircraft was.
    #[serde(flatten)]
    pub position: Position,
    /// When it was there (unix seconds), if the provider says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

impl TrailPoint {
    /// Create a trail point.
    #[must_use]
    pub const fn new(position: Position, ts: Option<i64>) -> Self {
        Self { position, ts }
    }
}

impl AsRef<Position> for TrailPoint {
    fn as_ref(&self) -> &Position {
        &self.position
    }
}

/// One flight as reported in one polling cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightSnapshot {
    /// Provider-assigned identity of this physical flight.
    pub flight_id: String,
    /// Origin airport code, if known.
    pub origin: Option<String>,
    /// Destination airport code, if known.
    pub destination: Option<String>,
    /// Current position.
    pub position: Position,
    /// Time of the current position (unix seconds), if reported.
    pub timestamp: Option<i64>,
    /// Whether the provider reports the aircraft on the ground.
    pub on_ground: bool,
    /// The provider's own history buffer, oldest first.
    pub trail_so_far: Vec<TrailPoint>,
}

impl FlightSnapshot {
    /// The current position as a trail point.
    #[must_use]
    pub fn current_point(&self) -> TrailPoint {
        TrailPoint::new(self.position, self.timestamp)
    }
}

/// A snapshot that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedDecodeError {
    /// A required field was absent.
    #[error("snapshot {index} is missing required field '{field}'")]
    MissingField {
        /// Position of the snapshot within its batch.
        index: usize,
        /// Name of the missing field.
        field: &'static str,
    },

    /// The payload did not have the expected shape.
    #[error("snapshot {index} is malformed: {message}")]
    Malformed {
        /// Position of the snapshot within its batch.
        index: usize,
        /// Decoder message.
        message: String,
    },
}

/// Everything one polling cycle produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotBatch {
    /// Successfully decoded snapshots, in provider order.
    pub snapshots: Vec<FlightSnapshot>,
    /// Snapshots that were rejected.
    pub rejected: Vec<FeedDecodeError>,
}

impl SnapshotBatch {
    /// A batch with no rejected entries.
    #[must_use]
    pub fn new(snapshots: Vec<FlightSnapshot>) -> Self {
        Self {
            snapshots,
            rejected: Vec::new(),
        }
    }

    /// Decode raw provider values, setting aside the ones that fail.
    #[must_use]
    pub fn decode(values: Vec<serde_json::Value>) -> Self {
        let mut batch = Self::default();
        for (index, value) in values.into_iter().enumerate() {
            match decode_snapshot(index, value) {
                Ok(snapshot) => batch.snapshots.push(snapshot),
                Err(err) => batch.rejected.push(err),
            }
        }
        batch
    }
}

#[derive(Debug, Deserialize)]
struct RawTrailPoint {
    #[serde(alias = "lng", alias = "longitude")]
    lon: f64,
    #[serde(alias = "latitude")]
    lat: f64,
    #[serde(default, alias = "timestamp")]
    ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(default, alias = "flight_id")]
    id: Option<String>,
    #[serde(default, alias = "origin_airport_iata")]
    origin: Option<String>,
    #[serde(default, alias = "destination_airport_iata")]
    destination: Option<String>,
    #[serde(default, alias = "longitude")]
    lon: Option<f64>,
    #[serde(default, alias = "latitude")]
    lat: Option<f64>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    on_ground: OnGround,
    #[serde(default)]
    trail: Vec<RawTrailPoint>,
}

/// Providers report the ground flag either as a bool or as 0/1.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum OnGround {
    Flag(bool),
    Int(i64),
    #[default]
    Missing,
}

impl OnGround {
    fn is_set(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Int(value) => *value != 0,
            Self::Missing => false,
        }
    }
}

fn route_code(raw: Option<String>) -> Option<String> {
    raw.map(|code| code.trim().to_string())
        .filter(|code| !UNKNOWN_ROUTE_MARKERS.contains(&code.as_str()))
}

fn decode_snapshot(
    index: usize,
    value: serde_json::Value,
) -> std::result::Result<FlightSnapshot, FeedDecodeError> {
    let raw: RawSnapshot =
        serde_json::from_value(value).map_err(|err| FeedDecodeError::Malformed {
            index,
            message: err.to_string(),
        })?;

    let flight_id = raw
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(FeedDecodeError::MissingField {
            index,
            field: "flight_id",
        })?;
    let (Some(lon), Some(lat)) = (raw.lon, raw.lat) else {
        return Err(FeedDecodeError::MissingField {
            index,
            field: "position",
        });
    };

    let mut trail_so_far: Vec<TrailPoint> = raw
        .trail
        .into_iter()
        .map(|point| TrailPoint::new(Position::new(point.lon, point.lat), point.ts))
        .collect();
    // Some providers list history newest first.
    trail_so_far.sort_by_key(|point| point.ts);

    Ok(FlightSnapshot {
        flight_id,
        origin: route_code(raw.origin),
        destination: route_code(raw.destination),
        position: Position::new(lon, lat),
        timestamp: raw.timestamp,
        on_ground: raw.on_ground.is_set(),
        trail_so_far,
    })
}

/// A source of snapshot batches.
///
/// Implementations are polled once per cycle by the monitor's fetch task.
#[async_trait::async_trait]
pub trait PositionFeed: Send {
    /// Name of this feed (for logging).
    fn name(&self) -> &'static str;

    /// Fetch the next batch.
    ///
    /// Returns `Ok(None)` once the feed has nothing more to deliver.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider could not be reached or its response
    /// could not be read as a batch at all. The monitor skips that cycle.
    async fn fetch(&mut self) -> Result<Option<SnapshotBatch>>;
}

/// Replays a captured feed: one JSON array of raw snapshots per line.
#[derive(Debug)]
pub struct ReplayFeed {
    path: PathBuf,
    lines: Lines<BufReader<tokio::fs::File>>,
    line_number: usize,
}

impl ReplayFeed {
    /// Open a capture file for replay.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await?;
        debug!("Replaying position feed from {}", path.display());
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }

    /// Path of the capture being replayed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl PositionFeed for ReplayFeed {
    fn name(&self) -> &'static str {
        "replay"
    }

    async fn fetch(&mut self) -> Result<Option<SnapshotBatch>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let values: Vec<serde_json::Value> = serde_json::from_str(&line).map_err(|err| {
                Error::feed(format!(
                    "{} line {}: {err}",
                    self.path.display(),
                    self.line_number
                ))
            })?;
            return Ok(Some(SnapshotBatch::decode(values)));
        }
    }
}

/// An in-memory feed that hands out prepared batches in order.
#[derive(Debug, Default)]
pub struct ScriptedFeed {
    batches: VecDeque<Result<SnapshotBatch>>,
}

impl ScriptedFeed {
    /// Create a feed from prepared fetch results.
    #[must_use]
    pub fn new(batches: impl IntoIterator<Item = Result<SnapshotBatch>>) -> Self {
        Self {
            batches: batches.into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl PositionFeed for ScriptedFeed {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch(&mut self) -> Result<Option<SnapshotBatch>> {
        self.batches.pop_front().transpose()
    }
}
