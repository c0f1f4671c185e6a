//! Exit usage aggregation.
//!
//! Records are re-classified here rather than trusting anything decided
//! while the flight was live, so a tally can be recomputed whenever the exit
//! catalog or the tie-break rules change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::Classification;
use crate::error::Result;
use crate::geometry::AirportGeometry;
use crate::record::{Direction, FlightRecord};

/// Count and share of records for one outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitCount {
    /// Exit label, or `unmatched`.
    pub label: String,
    /// Number of records classified to it.
    pub count: u64,
    /// `count / total`, or 0 when there are no records.
    pub frequency: f64,
}

/// Exit usage for one airport and direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitUsageTally {
    /// Airport code.
    pub airport: String,
    /// Arrival or departure.
    pub direction: Direction,
    /// Number of records classified.
    pub total: u64,
    /// One entry per exit region, in catalog order.
    pub exits: Vec<ExitCount>,
    /// Records that passed through no exit.
    pub unmatched: ExitCount,
    /// Stored records that could not be read back (not part of `total`).
    pub unreadable: u64,
}

impl ExitUsageTally {
    /// Count for one label, if the label exists.
    #[must_use]
    pub fn count(&self, label: &str) -> Option<u64> {
        self.exits
            .iter()
            .find(|exit| exit.label == label)
            .map(|exit| exit.count)
    }

    /// Sum of all frequencies, including unmatched.
    #[must_use]
    pub fn frequency_sum(&self) -> f64 {
        self.exits.iter().map(|exit| exit.frequency).sum::<f64>() + self.unmatched.frequency
    }

    /// Render as a plain-text table.
    #[must_use]
    pub fn to_table(&self) -> String {
        let mut out = format!(
            "Exit usage for {} {}s ({} records)\n",
            self.airport, self.direction, self.total
        );
        out.push_str(&format!("{:<12} {:>8} {:>10}\n", "exit", "count", "share"));
        for entry in self.exits.iter().chain(std::iter::once(&self.unmatched)) {
            out.push_str(&format!(
                "{:<12} {:>8} {:>9.1}%\n",
                entry.label,
                entry.count,
                entry.frequency * 100.0
            ));
        }
        if self.unreadable > 0 {
            out.push_str(&format!("({} unreadable records skipped)\n", self.unreadable));
        }
        out
    }
}

/// Accumulates exit classifications for one airport and direction.
#[derive(Debug)]
pub struct Aggregator<'g> {
    geometry: &'g AirportGeometry,
    direction: Direction,
    counts: HashMap<String, u64>,
    unmatched: u64,
    unreadable: u64,
}

impl<'g> Aggregator<'g> {
    /// Start an empty tally.
    #[must_use]
    pub fn new(geometry: &'g AirportGeometry, direction: Direction) -> Self {
        Self {
            geometry,
            direction,
            counts: HashMap::new(),
            unmatched: 0,
            unreadable: 0,
        }
    }

    /// Classify one record and count it.
    pub fn add(&mut self, record: &FlightRecord) -> Classification {
        if record.direction != self.direction {
            debug!(
                flight = %record.flight_id,
                expected = %self.direction,
                found = %record.direction,
                "Tallying record filed under another direction"
            );
        }
        let classification = self.geometry.match_exit(record.positions());
        match &classification {
            Classification::Exit(label) => *self.counts.entry(label.clone()).or_default() += 1,
            Classification::Unmatched => self.unmatched += 1,
        }
        classification
    }

    /// Count a stored record that could not be read.
    pub fn add_unreadable(&mut self) {
        self.unreadable += 1;
    }

    /// Number of records classified so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum::<u64>() + self.unmatched
    }

    /// Produce the tally.
    #[must_use]
    pub fn finish(&self) -> ExitUsageTally {
        let total = self.total();
        #[allow(clippy::cast_precision_loss)]
        let share = |count: u64| {
            if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            }
        };

        let exits = self
            .geometry
            .exit_regions()
            .iter()
            .map(|region| {
                let count = self.counts.get(&region.label).copied().unwrap_or(0);
                ExitCount {
                    label: region.label.clone(),
                    count,
                    frequency: share(count),
                }
            })
            .collect();

        ExitUsageTally {
            airport: self.geometry.code().to_string(),
            direction: self.direction,
            total,
            exits,
            unmatched: ExitCount {
                label: Classification::Unmatched.to_string(),
                count: self.unmatched,
                frequency: share(self.unmatched),
            },
            unreadable: self.unreadable,
        }
    }

    /// Tally a whole sequence of records.
    pub fn aggregate<I>(records: I, geometry: &'g AirportGeometry, direction: Direction) -> ExitUsageTally
    where
        I: IntoIterator<Item = FlightRecord>,
    {
        let mut aggregator = Self::new(geometry, direction);
        for record in records {
            aggregator.add(&record);
        }
        aggregator.finish()
    }

    /// Tally records read back from storage, counting failed reads apart.
    pub fn aggregate_stored<I>(
        records: I,
        geometry: &'g AirportGeometry,
        direction: Direction,
    ) -> ExitUsageTally
    where
        I: IntoIterator<Item = Result<FlightRecord>>,
    {
        let mut aggregator = Self::new(geometry, direction);
        for record in records {
            match record {
                Ok(record) => {
                    aggregator.add(&record);
                }
                Err(err) => {
                    warn!("Skipping unreadable record: {err}");
                    aggregator.add_unreadable();
                }
            }
        }
        aggregator.finish()
    }
}
