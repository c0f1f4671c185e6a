//! `SQLite` record store.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{migrations, RecordIter, RecordSink, RecordSource, SaveOutcome};
use crate::error::{Error, Result};
use crate::record::{Direction, FlightRecord, RecordKey};

/// Stores one row per record, keyed by airport, direction and flight id.
#[derive(Debug)]
pub struct SqliteStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a record database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist,
    /// and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        debug!("Opening record database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL keeps `tally` readers from blocking a running tracker.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Record database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stored_hash(&self, key: &RecordKey) -> Result<Option<String>> {
        let hash = self
            .conn
            .query_row(
                r"
                SELECT record_hash FROM flight_records
                WHERE airport = ?1 AND direction = ?2 AND flight_id = ?3
                ",
                params![key.airport, key.direction.to_string(), key.flight_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Load one record by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored JSON is unreadable.
    pub fn load(&self, key: &RecordKey) -> Result<Option<FlightRecord>> {
        let json: Option<String> = self
            .conn
            .query_row(
                r"
                SELECT record_json FROM flight_records
                WHERE airport = ?1 AND direction = ?2 AND flight_id = ?3
                ",
                params![key.airport, key.direction.to_string(), key.flight_id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|json| {
            serde_json::from_str(&json)
                .map_err(|err| Error::internal(format!("unreadable record {key}: {err}")))
        })
        .transpose()
    }

    fn flight_ids(&self, airport: &str, direction: Direction) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT flight_id FROM flight_records
            WHERE airport = ?1 AND direction = ?2
            ORDER BY saved_at, flight_id
            ",
        )?;
        let ids = stmt
            .query_map(params![airport, direction.to_string()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

impl RecordSink for SqliteStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn save(&mut self, record: &FlightRecord) -> Result<SaveOutcome> {
        let key = record.key();
        let hash = record.content_hash()?;

        match self.stored_hash(&key)? {
            Some(stored) if stored == hash => {
                debug!("Record {key} already stored");
                return Ok(SaveOutcome::AlreadyStored);
            }
            Some(_) => {
                return Err(Error::RecordConflict {
                    key: key.to_string(),
                })
            }
            None => {}
        }

        self.conn.execute(
            r"
            INSERT INTO flight_records
                (airport, direction, flight_id, record_json, record_hash, saved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                key.airport,
                key.direction.to_string(),
                key.flight_id,
                serde_json::to_string(record)?,
                hash,
                record.saved_at.to_rfc3339(),
            ],
        )?;
        debug!("Inserted record {key}");
        Ok(SaveOutcome::Stored)
    }
}

impl RecordSource for SqliteStore {
    fn count(&self, airport: &str, direction: Direction) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM flight_records WHERE airport = ?1 AND direction = ?2",
            params![airport, direction.to_string()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn records(&self, airport: &str, direction: Direction) -> Result<RecordIter<'_>> {
        let airport = airport.to_string();
        let ids = self.flight_ids(&airport, direction)?;
        Ok(Box::new(ids.into_iter().map(move |flight_id| {
            let key = RecordKey::new(&airport, direction, &flight_id);
            self.load(&key)?
                .ok_or_else(|| Error::internal(format!("record {key} vanished during listing")))
        })))
    }
}
