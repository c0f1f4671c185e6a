//! Per-flight lifecycle tracking.
//!
//! The [`FlightTracker`] owns the table of live flights. Each cycle it takes
//! one [`SnapshotBatch`], updates every flight in it, and reports what
//! happened: flights that finalized (with their records), flights dropped for
//! staleness, and snapshots it had to skip.
//!
//! Arrivals move `Airborne → GroundApproach → Exited`; departures move
//! `Grounded → Departed`. An arrival finalizes once its trail has entered an
//! exit region and then left it; a departure finalizes on the first cycle it
//! is reported airborne.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::classify;
use crate::feed::{FlightSnapshot, SnapshotBatch, TrailPoint};
use crate::geometry::AirportGeometry;
use crate::record::{Direction, FlightRecord};

/// Provider points remembered per flight for overlap detection.
const MAX_REPORTED: usize = 1024;

/// Lifecycle phase of a tracked flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Arrival seen near the airport, not yet on the ground.
    Airborne,
    /// Arrival on the ground, not yet clear of an exit.
    GroundApproach,
    /// Arrival has passed through an exit. Final.
    Exited,
    /// Departure on the ground.
    Grounded,
    /// Departure has left the ground. Final.
    Departed,
}

impl Phase {
    /// Whether the flight's lifecycle is complete.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Exited | Self::Departed)
    }

    /// The phase a newly tracked flight starts in.
    #[must_use]
    pub const fn initial(direction: Direction) -> Self {
        match direction {
            Direction::Arrival => Self::Airborne,
            Direction::Departure => Self::Grounded,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Airborne => write!(f, "airborne"),
            Self::GroundApproach => write!(f, "ground_approach"),
            Self::Exited => write!(f, "exited"),
            Self::Grounded => write!(f, "grounded"),
            Self::Departed => write!(f, "departed"),
        }
    }
}

/// A flight being followed across cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFlight {
    /// Provider-assigned identity.
    pub flight_id: String,
    /// Arrival or departure.
    pub direction: Direction,
    /// Origin airport code, if known.
    pub origin: Option<String>,
    /// Destination airport code, if known.
    pub destination: Option<String>,
    /// Positions near the airport, oldest first, without duplicates.
    pub trail: Vec<TrailPoint>,
    /// Current phase.
    pub phase: Phase,
    /// Cycle the flight was first tracked in.
    pub first_seen_cycle: u64,
    /// Cycle the flight was last reported in.
    pub last_seen_cycle: u64,
    newest_ts: Option<i64>,
    /// Every point the provider has reported, near or not, oldest first.
    reported: Vec<TrailPoint>,
}

impl TrackedFlight {
    fn new(snapshot: &FlightSnapshot, direction: Direction, cycle: u64) -> Self {
        Self {
            flight_id: snapshot.flight_id.clone(),
            direction,
            origin: snapshot.origin.clone(),
            destination: snapshot.destination.clone(),
            trail: Vec::new(),
            phase: Phase::initial(direction),
            first_seen_cycle: cycle,
            last_seen_cycle: cycle,
            newest_ts: None,
            reported: Vec::new(),
        }
    }

    /// Merge this cycle's provider history and current point.
    ///
    /// Provider history may replay points from earlier cycles. The longest
    /// tail of what was already reported that matches the head of `incoming`
    /// is skipped; only the remainder can reach the trail.
    fn merge(&mut self, incoming: Vec<TrailPoint>, geometry: &AirportGeometry) {
        let overlap = overlap_len(&self.reported, &incoming);
        for point in incoming.into_iter().skip(overlap) {
            self.reported.push(point);
            if geometry.is_near(point.position) {
                self.absorb(point);
            }
        }
        if self.reported.len() > MAX_REPORTED {
            let excess = self.reported.len() - MAX_REPORTED;
            self.reported.drain(..excess);
        }
    }

    /// Append a point unless it repeats what the trail already holds.
    ///
    /// Timestamped points must be newer than the newest timestamped point so
    /// far; untimestamped points must differ from the last point.
    fn absorb(&mut self, point: TrailPoint) {
        let fresh = match point.ts {
            Some(ts) => self.newest_ts.map_or(true, |newest| ts > newest),
            None => self
                .trail
                .last()
                .map_or(true, |last| last.position != point.position),
        };
        if fresh {
            if point.ts.is_some() {
                self.newest_ts = point.ts;
            }
            self.trail.push(point);
        }
    }

    fn take_record(&mut self, airport: &str) -> FlightRecord {
        FlightRecord {
            flight_id: self.flight_id.clone(),
            airport: airport.to_string(),
            direction: self.direction,
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            phase: self.phase,
            trail: std::mem::take(&mut self.trail),
            first_seen_cycle: self.first_seen_cycle,
            last_seen_cycle: self.last_seen_cycle,
            saved_at: Utc::now(),
        }
    }
}

/// A flight dropped after going silent for too long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleFlight {
    /// Provider-assigned identity.
    pub flight_id: String,
    /// Arrival or departure.
    pub direction: Direction,
    /// Phase the flight was in when it went silent.
    pub phase: Phase,
    /// Cycle it was last reported in.
    pub last_seen_cycle: u64,
    /// Number of trail points discarded with it.
    pub trail_len: usize,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Cycle number, starting at 1.
    pub cycle: u64,
    /// Flights that started being tracked.
    pub started: usize,
    /// Records of flights that finalized this cycle.
    pub finalized: Vec<FlightRecord>,
    /// Flights dropped for staleness.
    pub dropped: Vec<StaleFlight>,
    /// Snapshots that could not be decoded.
    pub decode_errors: usize,
    /// Snapshots that did not concern any trackable flight.
    pub ignored: usize,
}

/// Tracks flights around one airport across polling cycles.
#[derive(Debug)]
pub struct FlightTracker {
    geometry: Arc<AirportGeometry>,
    stale_after_cycles: u64,
    cycle: u64,
    flights: HashMap<String, TrackedFlight>,
    finalized_ids: HashSet<String>,
}

impl FlightTracker {
    /// Create a tracker for the given airport.
    ///
    /// A flight missing from more than `stale_after_cycles` consecutive
    /// cycles is dropped.
    #[must_use]
    pub fn new(geometry: Arc<AirportGeometry>, stale_after_cycles: u64) -> Self {
        Self {
            geometry,
            stale_after_cycles,
            cycle: 0,
            flights: HashMap::new(),
            finalized_ids: HashSet::new(),
        }
    }

    /// The airport being tracked.
    #[must_use]
    pub fn geometry(&self) -> &AirportGeometry {
        &self.geometry
    }

    /// Number of cycles processed so far.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Number of flights currently held, including ones finalized this cycle.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.flights.len()
    }

    /// Number of flights still short of a final phase.
    #[must_use]
    pub fn unfinished_count(&self) -> usize {
        self.flights
            .values()
            .filter(|flight| !flight.phase.is_final())
            .count()
    }

    /// Look up a live flight.
    #[must_use]
    pub fn get(&self, flight_id: &str) -> Option<&TrackedFlight> {
        self.flights.get(flight_id)
    }

    /// Process one polling cycle.
    pub fn process_cycle(&mut self, batch: SnapshotBatch) -> CycleReport {
        self.cycle += 1;
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };

        // Flights finalized last cycle leave the table now.
        let finalized_ids = &mut self.finalized_ids;
        self.flights.retain(|id, flight| {
            if flight.phase.is_final() {
                finalized_ids.insert(id.clone());
                false
            } else {
                true
            }
        });

        for err in &batch.rejected {
            warn!(cycle = self.cycle, "Skipping snapshot: {err}");
        }
        report.decode_errors = batch.rejected.len();

        for snapshot in batch.snapshots {
            self.observe(snapshot, &mut report);
        }

        self.drop_stale(&mut report);

        debug!(
            cycle = report.cycle,
            active = self.flights.len(),
            started = report.started,
            finalized = report.finalized.len(),
            dropped = report.dropped.len(),
            ignored = report.ignored,
            decode_errors = report.decode_errors,
            "Cycle processed"
        );
        report
    }

    fn resolve_direction(&self, snapshot: &FlightSnapshot) -> Direction {
        let code = self.geometry.code();
        if snapshot.destination.as_deref() == Some(code) {
            Direction::Arrival
        } else if snapshot.origin.as_deref() == Some(code) {
            Direction::Departure
        } else if snapshot.on_ground {
            Direction::Departure
        } else {
            Direction::Arrival
        }
    }

    fn observe(&mut self, snapshot: FlightSnapshot, report: &mut CycleReport) {
        let cycle = self.cycle;

        if self.finalized_ids.contains(&snapshot.flight_id) {
            trace!(flight = %snapshot.flight_id, "Ignoring already finalized flight");
            report.ignored += 1;
            return;
        }

        if !self.flights.contains_key(&snapshot.flight_id) {
            if !self.geometry.is_near(snapshot.position) {
                report.ignored += 1;
                return;
            }
            let direction = self.resolve_direction(&snapshot);
            let expected_on_ground = direction == Direction::Departure;
            if snapshot.on_ground != expected_on_ground {
                trace!(
                    flight = %snapshot.flight_id,
                    %direction,
                    on_ground = snapshot.on_ground,
                    "Not tracking flight first seen mid-lifecycle"
                );
                report.ignored += 1;
                return;
            }
            debug!(flight = %snapshot.flight_id, %direction, cycle, "Tracking new flight");
            self.flights.insert(
                snapshot.flight_id.clone(),
                TrackedFlight::new(&snapshot, direction, cycle),
            );
            report.started += 1;
        }

        let geometry = Arc::clone(&self.geometry);
        let Some(flight) = self.flights.get_mut(&snapshot.flight_id) else {
            return;
        };
        if flight.phase.is_final() {
            report.ignored += 1;
            return;
        }

        flight.last_seen_cycle = cycle;
        if flight.origin.is_none() {
            flight.origin.clone_from(&snapshot.origin);
        }
        if flight.destination.is_none() {
            flight.destination.clone_from(&snapshot.destination);
        }

        let current = snapshot.current_point();
        let mut incoming = snapshot.trail_so_far;
        incoming.push(current);
        flight.merge(incoming, &geometry);

        flight.phase = next_phase(flight, snapshot.on_ground, &geometry);
        if flight.phase.is_final() {
            let record = flight.take_record(geometry.code());
            info!(
                flight = %record.flight_id,
                direction = %record.direction,
                exit = %geometry.match_exit(record.positions()),
                trail_points = record.trail.len(),
                cycle,
                "Flight finalized"
            );
            report.finalized.push(record);
        }
    }

    fn drop_stale(&mut self, report: &mut CycleReport) {
        let cycle = self.cycle;
        let limit = self.stale_after_cycles;
        let stale: Vec<String> = self
            .flights
            .iter()
            .filter(|(_, flight)| {
                !flight.phase.is_final() && cycle - flight.last_seen_cycle > limit
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in stale {
            if let Some(flight) = self.flights.remove(&id) {
                info!(
                    flight = %flight.flight_id,
                    direction = %flight.direction,
                    phase = %flight.phase,
                    last_seen = flight.last_seen_cycle,
                    "Dropping stale flight"
                );
                report.dropped.push(StaleFlight {
                    flight_id: flight.flight_id,
                    direction: flight.direction,
                    phase: flight.phase,
                    last_seen_cycle: flight.last_seen_cycle,
                    trail_len: flight.trail.len(),
                });
            }
        }
    }
}

/// Length of the longest suffix of `held` that equals a prefix of `incoming`.
fn overlap_len(held: &[TrailPoint], incoming: &[TrailPoint]) -> usize {
    (1..=held.len().min(incoming.len()))
        .rev()
        .find(|&k| held[held.len() - k..] == incoming[..k])
        .unwrap_or(0)
}

/// Advance a flight's phase given this cycle's ground flag.
fn next_phase(flight: &TrackedFlight, on_ground: bool, geometry: &AirportGeometry) -> Phase {
    match flight.phase {
        Phase::Airborne if !on_ground => Phase::Airborne,
        Phase::Airborne | Phase::GroundApproach => {
            if classify::passed_through(&flight.trail, geometry.exit_regions()).is_some() {
                Phase::Exited
            } else {
                Phase::GroundApproach
            }
        }
        Phase::Grounded if on_ground => Phase::Grounded,
        Phase::Grounded => Phase::Departed,
        final_phase @ (Phase::Exited | Phase::Departed) => final_phase,
    }
}
