//! The tracking run loop.
//!
//! A run is three cooperating pieces:
//!
//! - a fetch task that polls the [`PositionFeed`] on a fixed interval and
//!   sends each result over a bounded channel,
//! - the tracking loop, which owns the [`FlightTracker`] and feeds it one
//!   batch per cycle in arrival order,
//! - a writer task that owns the [`RecordSink`] and saves finalized records
//!   with retry, keeping a backlog of records that could not be saved yet.
//!
//! Stopping (via [`MonitorHandle::stop`], feed exhaustion or a cycle limit)
//! abandons flights that have not finalized; only finalized records are ever
//! written.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::aggregate::{Aggregator, ExitUsageTally};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::feed::{PositionFeed, SnapshotBatch};
use crate::geometry::AirportGeometry;
use crate::record::{Direction, FlightRecord};
use crate::storage::{save_with_retry, RecordSink, RetryPolicy, SaveOutcome, SharedSink};
use crate::tracker::FlightTracker;

/// Settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Time between feed polls.
    pub poll_interval: Duration,
    /// Cycles a flight may go unreported before it is dropped.
    pub stale_after_cycles: u64,
    /// Batches buffered between the fetch task and the tracker.
    pub channel_capacity: usize,
    /// Retry policy for saving records.
    pub retry: RetryPolicy,
    /// Stop after this many cycles.
    pub max_cycles: Option<u64>,
}

impl MonitorOptions {
    /// Options from configuration, without a cycle limit.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            stale_after_cycles: config.tracker.stale_after_cycles,
            channel_capacity: config.tracker.channel_capacity.max(1),
            retry: RetryPolicy::from_config(config),
            max_cycles: None,
        }
    }

    /// Set the cycle limit.
    #[must_use]
    pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A cloneable handle for stopping a run from another task.
#[derive(Debug, Clone, Default)]
pub struct MonitorHandle {
    stop_signal: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl MonitorHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the run to stop after the current cycle.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    async fn stopped(&self) {
        if !self.should_stop() {
            self.wake.notified().await;
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Airport tracked.
    pub airport: String,
    /// Cycles processed.
    pub cycles: u64,
    /// Arrivals finalized.
    pub arrivals: u64,
    /// Departures finalized.
    pub departures: u64,
    /// Flights dropped for staleness.
    pub stale_dropped: u64,
    /// Snapshots rejected by the decoder.
    pub decode_errors: u64,
    /// Snapshots about flights that could not or need not be tracked.
    pub ignored: u64,
    /// Cycles skipped because the feed failed.
    pub fetch_failures: u64,
    /// Records written.
    pub saved: u64,
    /// Records that were already stored.
    pub already_stored: u64,
    /// Records that could not be saved by the end of the run.
    pub unsaved: u64,
    /// Flights still in progress when the run stopped.
    pub abandoned: u64,
    /// Exit usage of the arrivals finalized this run.
    pub arrival_tally: ExitUsageTally,
    /// Exit usage of the departures finalized this run.
    pub departure_tally: ExitUsageTally,
}

impl RunSummary {
    fn new(geometry: &AirportGeometry) -> Self {
        Self {
            airport: geometry.code().to_string(),
            cycles: 0,
            arrivals: 0,
            departures: 0,
            stale_dropped: 0,
            decode_errors: 0,
            ignored: 0,
            fetch_failures: 0,
            saved: 0,
            already_stored: 0,
            unsaved: 0,
            abandoned: 0,
            arrival_tally: Aggregator::new(geometry, Direction::Arrival).finish(),
            departure_tally: Aggregator::new(geometry, Direction::Departure).finish(),
        }
    }

    /// Unmatched records among this run's finalized flights.
    #[must_use]
    pub fn unmatched(&self) -> u64 {
        self.arrival_tally.unmatched.count + self.departure_tally.unmatched.count
    }

    /// Render as plain text.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.arrival_tally.to_table());
        out.push('\n');
        out.push_str(&self.departure_tally.to_table());
        out.push('\n');
        out.push_str(&format!(
            "{} cycles: {} arrivals, {} departures finalized ({} unmatched)\n",
            self.cycles,
            self.arrivals,
            self.departures,
            self.unmatched()
        ));
        out.push_str(&format!(
            "dropped stale: {}, decode errors: {}, ignored: {}, fetch failures: {}, abandoned: {}\n",
            self.stale_dropped, self.decode_errors, self.ignored, self.fetch_failures, self.abandoned
        ));
        out.push_str(&format!(
            "saved: {}, already stored: {}, unsaved: {}\n",
            self.saved, self.already_stored, self.unsaved
        ));
        out
    }
}

enum FetchEvent {
    Batch(SnapshotBatch),
    Failed(Error),
}

#[derive(Debug, Default)]
struct WriterReport {
    saved: u64,
    already_stored: u64,
    unsaved: u64,
}

/// Drives a feed through a tracker into a record sink.
#[derive(Debug)]
pub struct Monitor {
    geometry: Arc<AirportGeometry>,
    options: MonitorOptions,
    handle: MonitorHandle,
}

impl Monitor {
    /// Create a monitor for one airport.
    #[must_use]
    pub fn new(geometry: Arc<AirportGeometry>, options: MonitorOptions) -> Self {
        Self {
            geometry,
            options,
            handle: MonitorHandle::new(),
        }
    }

    /// A handle that can stop this monitor's run.
    #[must_use]
    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    /// Run until stopped, the feed is exhausted, or the cycle limit is hit.
    ///
    /// # Errors
    ///
    /// Returns an error only if one of the run's tasks fails outright; feed,
    /// decode and persistence failures are counted in the summary instead.
    pub async fn run<F, S>(self, feed: F, sink: S) -> Result<RunSummary>
    where
        F: PositionFeed + 'static,
        S: RecordSink + 'static,
    {
        let Self {
            geometry,
            options,
            handle,
        } = self;

        info!(
            airport = geometry.code(),
            feed = feed.name(),
            store = %sink.location(),
            interval = ?options.poll_interval,
            "Starting exit tracking"
        );

        let (batch_tx, mut batch_rx) = mpsc::channel(options.channel_capacity);
        let (record_tx, record_rx) = mpsc::unbounded_channel();

        let fetcher = tokio::spawn(fetch_loop(
            feed,
            batch_tx,
            options.poll_interval,
            handle.clone(),
        ));
        let writer = tokio::spawn(write_loop(sink, record_rx, options.retry));

        let mut tracker = FlightTracker::new(Arc::clone(&geometry), options.stale_after_cycles);
        let mut summary = RunSummary::new(&geometry);
        let mut arrivals = Aggregator::new(&geometry, Direction::Arrival);
        let mut departures = Aggregator::new(&geometry, Direction::Departure);

        while let Some(event) = batch_rx.recv().await {
            let batch = match event {
                FetchEvent::Batch(batch) => batch,
                FetchEvent::Failed(err) => {
                    warn!("Skipping cycle, feed fetch failed: {err}");
                    summary.fetch_failures += 1;
                    continue;
                }
            };

            let report = tracker.process_cycle(batch);
            summary.cycles = report.cycle;
            summary.stale_dropped += report.dropped.len() as u64;
            summary.decode_errors += report.decode_errors as u64;
            summary.ignored += report.ignored as u64;

            for record in report.finalized {
                match record.direction {
                    Direction::Arrival => {
                        summary.arrivals += 1;
                        arrivals.add(&record);
                    }
                    Direction::Departure => {
                        summary.departures += 1;
                        departures.add(&record);
                    }
                }
                if let Err(mpsc::error::SendError(record)) = record_tx.send(record) {
                    error!(key = %record.key(), "Record writer is gone, record not saved");
                    summary.unsaved += 1;
                }
            }

            if options
                .max_cycles
                .is_some_and(|limit| summary.cycles >= limit)
            {
                info!(cycles = summary.cycles, "Cycle limit reached");
                break;
            }
            if handle.should_stop() {
                break;
            }
        }

        handle.stop();
        drop(batch_rx);
        drop(record_tx);

        fetcher
            .await
            .map_err(|err| Error::internal(format!("fetch task failed: {err}")))?;
        let written = writer
            .await
            .map_err(|err| Error::internal(format!("writer task failed: {err}")))?;

        summary.saved = written.saved;
        summary.already_stored = written.already_stored;
        summary.unsaved += written.unsaved;
        summary.abandoned = tracker.unfinished_count() as u64;
        summary.arrival_tally = arrivals.finish();
        summary.departure_tally = departures.finish();

        info!(
            cycles = summary.cycles,
            arrivals = summary.arrivals,
            departures = summary.departures,
            stale_dropped = summary.stale_dropped,
            unsaved = summary.unsaved,
            abandoned = summary.abandoned,
            "Exit tracking stopped"
        );
        Ok(summary)
    }
}

async fn fetch_loop<F: PositionFeed>(
    mut feed: F,
    tx: mpsc::Sender<FetchEvent>,
    poll_interval: Duration,
    handle: MonitorHandle,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = handle.stopped() => break,
        }
        if handle.should_stop() {
            break;
        }

        let event = match feed.fetch().await {
            Ok(Some(batch)) => FetchEvent::Batch(batch),
            Ok(None) => {
                info!(feed = feed.name(), "Position feed exhausted");
                break;
            }
            Err(err) => FetchEvent::Failed(err),
        };
        if tx.send(event).await.is_err() {
            debug!("Tracker stopped listening, ending fetch loop");
            break;
        }
    }
}

async fn write_loop<S: RecordSink + 'static>(
    sink: S,
    mut rx: mpsc::UnboundedReceiver<FlightRecord>,
    retry: RetryPolicy,
) -> WriterReport {
    let mut report = WriterReport::default();
    let mut backlog: VecDeque<FlightRecord> = VecDeque::new();
    let sink: SharedSink<S> = Arc::new(Mutex::new(sink));

    while let Some(record) = rx.recv().await {
        let pending = std::mem::take(&mut backlog);
        for record in pending.into_iter().chain(std::iter::once(record)) {
            save_one(&sink, record, &retry, &mut backlog, &mut report).await;
        }
    }

    if !backlog.is_empty() {
        info!("Retrying {} unsaved records before exit", backlog.len());
        for record in std::mem::take(&mut backlog) {
            save_one(&sink, record, &retry, &mut backlog, &mut report).await;
        }
    }
    for record in backlog {
        error!(key = %record.key(), "Record could not be saved");
        report.unsaved += 1;
    }
    report
}

async fn save_one<S: RecordSink + 'static>(
    sink: &SharedSink<S>,
    record: FlightRecord,
    retry: &RetryPolicy,
    backlog: &mut VecDeque<FlightRecord>,
    report: &mut WriterReport,
) {
    match save_with_retry(sink, record, retry).await {
        Ok(SaveOutcome::Stored) => report.saved += 1,
        Ok(SaveOutcome::AlreadyStored) => report.already_stored += 1,
        Err(failure) if matches!(failure.error, Error::RecordConflict { .. }) => {
            error!("{failure}");
            report.unsaved += 1;
        }
        Err(failure) => {
            warn!("{failure}; keeping record for a later attempt");
            backlog.push_back(failure.record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FlightSnapshot, ScriptedFeed};
    use crate::geometry::{AirportSpec, Bounds, ExitRegion, Position};
    use crate::storage::testing::{broken, busy, FlakySink};
    use crate::storage::{FileStore, RecordSource};

    fn geometry() -> Arc<AirportGeometry> {
        let center = Position::new(0.0, 0.0);
        Arc::new(
            AirportGeometry::from_spec(AirportSpec {
                code: "TST".to_string(),
                runway_count: 1,
                center,
                proximity_tolerance: 1.0,
                plot_bounds: Bounds::around(center, 0.5, 0.5),
                exit_regions: vec![
                    ExitRegion::new("A", (0.1, 0.2), (0.1, 0.2)),
                    ExitRegion::new("B", (0.3, 0.4), (0.1, 0.2)),
                ],
            })
            .unwrap(),
        )
    }

    fn options() -> MonitorOptions {
        MonitorOptions {
            poll_interval: Duration::from_millis(1),
            stale_after_cycles: 2,
            channel_capacity: 4,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
            },
            max_cycles: None,
        }
    }

    fn snap(id: &str, lon: f64, lat: f64, on_ground: bool, arriving: bool) -> FlightSnapshot {
        let (origin, destination) = if arriving { ("LAX", "TST") } else { ("TST", "SFO") };
        FlightSnapshot {
            flight_id: id.to_string(),
            origin: Some(origin.to_string()),
            destination: Some(destination.to_string()),
            position: Position::new(lon, lat),
            timestamp: None,
            on_ground,
            trail_so_far: Vec::new(),
        }
    }

    /// One arrival through exit B, one departure, and one arrival that
    /// vanishes and goes stale.
    fn script() -> Vec<Result<SnapshotBatch>> {
        vec![
            Ok(SnapshotBatch::new(vec![
                snap("AR1", -0.5, 0.15, false, true),
                snap("DP1", 0.0, 0.0, true, false),
                snap("AR2", -0.6, 0.15, false, true),
            ])),
            Ok(SnapshotBatch::new(vec![
                snap("AR1", 0.35, 0.15, true, true),
                snap("DP1", 0.1, 0.0, false, false),
            ])),
            Err(Error::feed("provider timed out")),
            Ok(SnapshotBatch::new(vec![snap("AR1", 0.35, 0.3, true, true)])),
            Ok(SnapshotBatch::new(Vec::new())),
        ]
    }

    #[test]
    fn test_options_from_config() {
        let options = MonitorOptions::default();
        assert_eq!(options.poll_interval, Duration::from_secs(60));
        assert_eq!(options.stale_after_cycles, 10);
        assert_eq!(options.channel_capacity, 16);
        assert_eq!(options.max_cycles, None);
        assert_eq!(
            options.with_max_cycles(Some(3)).max_cycles,
            Some(3)
        );
    }

    #[test]
    fn test_handle_clone_shares_signal() {
        let handle = MonitorHandle::new();
        let clone = handle.clone();
        assert!(!clone.should_stop());
        handle.stop();
        assert!(clone.should_stop());
    }

    #[tokio::test]
    async fn test_run_tracks_saves_and_tallies() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let monitor = Monitor::new(geometry(), options());

        let summary = monitor
            .run(ScriptedFeed::new(script()), store.clone())
            .await
            .unwrap();

        assert_eq!(summary.cycles, 4);
        assert_eq!(summary.fetch_failures, 1);
        assert_eq!(summary.arrivals, 1);
        assert_eq!(summary.departures, 1);
        assert_eq!(summary.stale_dropped, 1);
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.unsaved, 0);
        assert_eq!(summary.abandoned, 0);
        assert_eq!(summary.arrival_tally.count("B"), Some(1));
        assert_eq!(summary.departure_tally.total, 1);

        let stored: Vec<FlightRecord> = store
            .records("TST", Direction::Arrival)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].flight_id, "AR1");
        assert_eq!(store.count("TST", Direction::Departure).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cycle_limit_abandons_unfinished_flights() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let monitor = Monitor::new(geometry(), options().with_max_cycles(Some(1)));

        let summary = monitor
            .run(ScriptedFeed::new(script()), store.clone())
            .await
            .unwrap();

        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.abandoned, 3);
        assert_eq!(summary.saved, 0);
        assert_eq!(store.count("TST", Direction::Arrival).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_handle_ends_run() {
        let monitor = Monitor::new(geometry(), options().with_poll_interval(Duration::from_secs(3600)));
        let handle = monitor.handle();
        handle.stop();

        let summary = monitor
            .run(ScriptedFeed::new(script()), FlakySink::default())
            .await
            .unwrap();
        assert_eq!(summary.cycles, 0);
    }

    #[tokio::test]
    async fn test_transient_save_failures_are_retried() {
        let sink = FlakySink::failing_with([busy()]);
        let summary = Monitor::new(geometry(), options())
            .run(ScriptedFeed::new(script()), sink)
            .await
            .unwrap();
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.unsaved, 0);
    }

    #[tokio::test]
    async fn test_failed_saves_go_to_backlog() {
        // The first record fails permanently once, then the backlog drains.
        let sink = FlakySink::failing_with([broken()]);
        let summary = Monitor::new(geometry(), options())
            .run(ScriptedFeed::new(script()), sink)
            .await
            .unwrap();
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.unsaved, 0);
    }

    #[tokio::test]
    async fn test_unsaveable_records_are_counted() {
        let sink = FlakySink::failing_with((0..10).map(|_| broken()));
        let summary = Monitor::new(geometry(), options())
            .run(ScriptedFeed::new(script()), sink)
            .await
            .unwrap();
        assert_eq!(summary.arrivals + summary.departures, 2);
        assert_eq!(summary.saved, 0);
        assert_eq!(summary.unsaved, 2);
    }

    #[test]
    fn test_summary_text() {
        let summary = RunSummary::new(&geometry());
        let text = summary.to_text();
        assert!(text.contains("TST arrivals"));
        assert!(text.contains("TST departures"));
        assert!(text.contains("0 cycles"));
    }
}
