//! Persistence of finalized flight records.
//!
//! Two backends implement the same pair of traits: [`RecordSink`] for saving
//! and [`RecordSource`] for reading records back for aggregation.
//! [`FileStore`] keeps one JSON document per record; [`SqliteStore`] keeps
//! one row per record. Both are idempotent per record key.

pub mod files;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, StorageBackend};
use crate::error::{Error, Result};
use crate::record::{Direction, FlightRecord};

pub use files::FileStore;
pub use sqlite::SqliteStore;

/// What a successful save did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The record was written.
    Stored,
    /// An identical record was already present; nothing was written.
    AlreadyStored,
}

/// Somewhere finalized records can be saved.
pub trait RecordSink: Send {
    /// Human-readable location of the store (for logging).
    fn location(&self) -> String;

    /// Save a record under its key.
    ///
    /// Saving a record identical to the stored one is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordConflict`] if a different record is stored
    /// under the same key, or the backend's error if the write fails. No
    /// partially written record is ever visible.
    fn save(&mut self, record: &FlightRecord) -> Result<SaveOutcome>;
}

impl<T: RecordSink + ?Sized> RecordSink for Box<T> {
    fn location(&self) -> String {
        (**self).location()
    }

    fn save(&mut self, record: &FlightRecord) -> Result<SaveOutcome> {
        (**self).save(record)
    }
}

/// Lazily read stored records, one item per record.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<FlightRecord>> + 'a>;

/// Somewhere finalized records can be read back from.
pub trait RecordSource {
    /// Number of records stored for one airport and direction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn count(&self, airport: &str, direction: Direction) -> Result<usize>;

    /// Records stored for one airport and direction.
    ///
    /// The listing is taken up front; each record is read as the iterator
    /// reaches it, and a record that cannot be read yields an `Err` item
    /// without ending the iteration. Calling again restarts from the top.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn records(&self, airport: &str, direction: Direction) -> Result<RecordIter<'_>>;
}

/// A backend that is both a sink and a source.
pub trait RecordStore: RecordSink + RecordSource {}

impl<T: RecordSink + RecordSource> RecordStore for T {}

/// Open the store selected by the configuration.
///
/// # Errors
///
/// Returns an error if the store cannot be created or opened.
pub fn open_store(config: &Config) -> Result<Box<dyn RecordStore>> {
    Ok(match config.storage.backend {
        StorageBackend::Files => Box::new(FileStore::open(config.records_dir())?),
        StorageBackend::Sqlite => Box::new(SqliteStore::open(config.database_path())?),
    })
}

/// How hard to try before giving a record back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further one.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Build the policy from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.persistence.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A record that could not be saved, handed back for another attempt.
#[derive(Debug, Error)]
#[error("failed to save {key} after {attempts} attempt(s): {error}")]
pub struct PersistenceFailure {
    /// The record that was not saved.
    pub record: FlightRecord,
    /// Attempts made.
    pub attempts: u32,
    /// The last error.
    #[source]
    pub error: Error,
    key: String,
}

impl PersistenceFailure {
    /// Whether trying again later could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.error.is_transient()
    }
}

/// A sink shared between the async writer and the blocking pool.
pub type SharedSink<S> = Arc<Mutex<S>>;

/// Run one save on the blocking pool so file and database I/O never holds up
/// a runtime worker.
async fn save_blocking<S>(sink: &SharedSink<S>, record: &FlightRecord) -> Result<SaveOutcome>
where
    S: RecordSink + ?Sized + 'static,
{
    let sink = Arc::clone(sink);
    let record = record.clone();
    tokio::task::spawn_blocking(move || {
        let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
        sink.save(&record)
    })
    .await
    .map_err(|e| Error::internal(format!("record save task failed: {e}")))?
}

/// Save a record, retrying transient failures with exponential backoff.
///
/// Each attempt runs on the blocking pool; the backoff waits are async.
///
/// # Errors
///
/// Returns the record inside a [`PersistenceFailure`] when a permanent error
/// occurs or the attempts run out.
pub async fn save_with_retry<S>(
    sink: &SharedSink<S>,
    record: FlightRecord,
    policy: &RetryPolicy,
) -> std::result::Result<SaveOutcome, PersistenceFailure>
where
    S: RecordSink + ?Sized + 'static,
{
    let mut attempt = 1;
    loop {
        match save_blocking(sink, &record).await {
            Ok(outcome) => {
                debug!(key = %record.key(), ?outcome, attempt, "Saved record");
                return Ok(outcome);
            }
            Err(error) if error.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    key = %record.key(),
                    attempt,
                    "Transient save failure, retrying in {delay:?}: {error}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(PersistenceFailure {
                    key: record.key().to_string(),
                    record,
                    attempts: attempt,
                    error,
                });
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{broken, busy, FlakySink};
    use super::*;
    use crate::record::fixtures::record;

    fn shared<S: RecordSink>(sink: S) -> SharedSink<S> {
        Arc::new(Mutex::new(sink))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_secs(1));
    }

    #[test]
    fn test_default_policy_follows_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let sink = shared(FlakySink::failing_with([busy(), busy()]));
        let outcome = save_with_retry(&sink, record("a", Direction::Arrival, &[]), &fast_policy(3))
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Stored);
        let sink = sink.lock().unwrap();
        assert_eq!(sink.attempts, 3);
        assert_eq!(sink.saved.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_hand_record_back() {
        let sink = shared(FlakySink::failing_with([busy(), busy(), busy()]));
        let original = record("a", Direction::Arrival, &[(1.0, 2.0)]);
        let failure = save_with_retry(&sink, original.clone(), &fast_policy(2))
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.record, original);
        assert!(failure.is_retryable());
        assert!(failure.to_string().contains("TST/arrivals/a"));
        assert!(sink.lock().unwrap().saved.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let sink = shared(FlakySink::failing_with([broken()]));
        let failure = save_with_retry(&sink, record("a", Direction::Departure, &[]), &fast_policy(5))
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(sink.lock().unwrap().attempts, 1);
        assert!(!failure.is_retryable());
    }

    #[derive(Debug, Default)]
    struct ThreadRecordingSink {
        threads: Vec<std::thread::ThreadId>,
    }

    impl RecordSink for ThreadRecordingSink {
        fn location(&self) -> String {
            "threads".to_string()
        }

        fn save(&mut self, _record: &FlightRecord) -> Result<SaveOutcome> {
            self.threads.push(std::thread::current().id());
            Ok(SaveOutcome::Stored)
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_saves_run_off_the_runtime_thread() {
        let sink = shared(ThreadRecordingSink::default());
        save_with_retry(&sink, record("a", Direction::Arrival, &[]), &fast_policy(1))
            .await
            .unwrap();

        let threads = sink.lock().unwrap().threads.clone();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[tokio::test]
    async fn test_boxed_sink_can_be_shared() {
        let boxed: Box<dyn RecordSink> = Box::new(FlakySink::default());
        let sink = shared(boxed);
        let outcome = save_with_retry(&sink, record("a", Direction::Arrival, &[]), &fast_policy(1))
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Stored);
    }

    #[test]
    fn test_open_store_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.records_dir = Some(dir.path().join("records"));
        config.storage.database_path = Some(dir.path().join("records.db"));

        let files = open_store(&config).unwrap();
        assert!(files.location().ends_with("records"));

        config.storage.backend = StorageBackend::Sqlite;
        let sqlite = open_store(&config).unwrap();
        assert!(sqlite.location().ends_with("records.db"));
    }
}
