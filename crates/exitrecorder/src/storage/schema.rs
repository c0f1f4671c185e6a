//! `SQLite` schema for the record database, as an ordered list of migrations.

/// One schema step, applied once and recorded in `PRAGMA user_version`.
#[derive(Debug)]
pub struct Migration {
    /// Version the database is at once this step has run.
    pub version: u32,
    /// Short description for logs.
    pub description: &'static str,
    /// Statements run together in one transaction.
    pub statements: &'static [&'static str],
}

/// One row per finalized flight, keyed like the file store.
pub const CREATE_RECORDS_TABLE: &str = r"
CREATE TABLE flight_records (
    airport TEXT NOT NULL,
    direction TEXT NOT NULL CHECK (direction IN ('arrival', 'departure')),
    flight_id TEXT NOT NULL,
    record_json TEXT NOT NULL,
    record_hash TEXT NOT NULL,
    saved_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (airport, direction, flight_id)
)
";

/// Listing order for `tally`: oldest saved first within an airport and direction.
pub const CREATE_SAVED_AT_INDEX: &str = r"
CREATE INDEX idx_flight_records_saved_at
    ON flight_records(airport, direction, saved_at)
";

/// Every migration, oldest first. Versions are contiguous from 1.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "flight records keyed by airport, direction and flight",
    statements: &[CREATE_RECORDS_TABLE, CREATE_SAVED_AT_INDEX],
}];

/// The version a fully migrated database reports.
#[must_use]
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}
