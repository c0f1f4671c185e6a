//! Finalized flight records.
//!
//! A [`FlightRecord`] is what the tracker hands off once a flight's
//! lifecycle is complete, and what the stores persist and give back for
//! aggregation.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::feed::TrailPoint;
use crate::geometry::Position;
use crate::tracker::Phase;

/// Whether a flight arrived at or departed from the studied airport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Landed at the airport.
    Arrival,
    /// Took off from the airport.
    Departure,
}

impl Direction {
    /// Both directions, arrivals first.
    pub const ALL: [Self; 2] = [Self::Arrival, Self::Departure];

    /// Directory-style name used in record keys.
    #[must_use]
    pub const fn key_segment(self) -> &'static str {
        match self {
            Self::Arrival => "arrivals",
            Self::Departure => "departures",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arrival => write!(f, "arrival"),
            Self::Departure => write!(f, "departure"),
        }
    }
}

/// A finalized flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightRecord {
    /// Provider-assigned flight identity.
    pub flight_id: String,
    /// Code of the airport the flight was tracked at.
    pub airport: String,
    /// Arrival or departure.
    pub direction: Direction,
    /// Origin airport code, if known.
    #[serde(default)]
    pub origin: Option<String>,
    /// Destination airport code, if known.
    #[serde(default)]
    pub destination: Option<String>,
    /// Phase the flight finalized in.
    pub phase: Phase,
    /// Positions accumulated near the airport, oldest first.
    pub trail: Vec<TrailPoint>,
    /// Cycle the flight was first tracked in.
    pub first_seen_cycle: u64,
    /// Cycle the flight was last reported in.
    pub last_seen_cycle: u64,
    /// When the record was produced.
    pub saved_at: DateTime<Utc>,
}

impl FlightRecord {
    /// The storage key of this record.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.airport, self.direction, &self.flight_id)
    }

    /// Iterate over the trail positions.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.trail.iter().map(|point| &point.position)
    }

    /// BLAKE3 hash of the record's serialized form.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized.
    pub fn content_hash(&self) -> serde_json::Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// The `{airport}/{direction}/{flight}` address of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Airport code.
    pub airport: String,
    /// Arrival or departure.
    pub direction: Direction,
    /// Flight identity.
    pub flight_id: String,
}

fn path_safe_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9_.-]{0,127}$").expect("record key pattern is valid")
    })
}

impl RecordKey {
    /// Create a key.
    #[must_use]
    pub fn new(airport: &str, direction: Direction, flight_id: &str) -> Self {
        Self {
            airport: airport.to_string(),
            direction,
            flight_id: flight_id.to_string(),
        }
    }

    /// A file-name-safe form of the flight id.
    ///
    /// Ids that could escape a directory or collide with hidden files are
    /// replaced by a digest.
    #[must_use]
    pub fn flight_stem(&self) -> String {
        if path_safe_pattern().is_match(&self.flight_id) {
            self.flight_id.clone()
        } else {
            let digest = blake3::hash(self.flight_id.as_bytes()).to_hex();
            format!("id-{}", &digest[..32])
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.airport,
            self.direction.key_segment(),
            self.flight_id
        )
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_display_and_segment() {
        assert_eq!(Direction::Arrival.to_string(), "arrival");
        assert_eq!(Direction::Departure.key_segment(), "departures");
        assert_eq!(Direction::ALL, [Direction::Arrival, Direction::Departure]);
    }

    #[test]
    fn test_record_key_display() {
        let record = fixtures::record("2f9a1c", Direction::Arrival, &[(0.0, 0.0)]);
        assert_eq!(record.key().to_string(), "TST/arrivals/2f9a1c");
        assert_eq!(record.key().flight_stem(), "2f9a1c");
    }

    #[test]
    fn test_unsafe_flight_ids_are_digested() {
        for id in ["../escape", ".hidden", "a/b", ""] {
            let stem = RecordKey::new("TST", Direction::Departure, id).flight_stem();
            assert!(stem.starts_with("id-"), "{id} -> {stem}");
            assert_eq!(stem.len(), 35);
        }
        let a = RecordKey::new("TST", Direction::Departure, "a/b").flight_stem();
        let b = RecordKey::new("TST", Direction::Departure, "a/c").flight_stem();
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_hash_is_stable() {
        let record = fixtures::record("x", Direction::Arrival, &[(1.0, 2.0), (1.5, 2.5)]);
        assert_eq!(
            record.content_hash().unwrap(),
            record.clone().content_hash().unwrap()
        );

        let mut other = record.clone();
        other.trail.pop();
        assert_ne!(record.content_hash().unwrap(), other.content_hash().unwrap());
    }

    #[test]
    fn test_record_serialization() {
        let record = fixtures::record("x", Direction::Departure, &[(1.0, 2.0)]);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"direction\":\"departure\""));
        assert!(json.contains("\"phase\":\"departed\""));

        let back: FlightRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_positions() {
        let record = fixtures::record("x", Direction::Arrival, &[(1.0, 2.0), (3.0, 4.0)]);
        let lons: Vec<f64> = record.positions().map(|p| p.lon).collect();
        assert_eq!(lons, vec![1.0, 3.0]);
    }
}
