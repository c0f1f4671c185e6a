//! Error types for exitrecorder.
//!
//! This module defines the run-level error type. Per-snapshot decode failures
//! live in [`crate::feed::FeedDecodeError`] and exhausted save retries in
//! [`crate::storage::PersistenceFailure`], since neither aborts a run.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for exitrecorder operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Geometry Errors ===
    /// An airport's exit-region catalog failed validation.
    #[error("invalid geometry for airport {airport}: {message}")]
    InvalidGeometry {
        /// Code of the airport whose geometry is invalid.
        airport: String,
        /// Description of the validation failure.
        message: String,
    },

    /// No geometry is known for the requested airport.
    #[error("unknown airport: {0}")]
    UnknownAirport(String),

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// A different record is already stored under the same key.
    #[error("conflicting record already stored at {key}")]
    RecordConflict {
        /// The `{airport}/{direction}/{flight}` key.
        key: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Feed Errors ===
    /// The position feed could not deliver a batch this cycle.
    #[error("position feed error: {0}")]
    Feed(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for exitrecorder operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new invalid geometry error.
    #[must_use]
    pub fn invalid_geometry(airport: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            airport: airport.into(),
            message: message.into(),
        }
    }

    /// Create a new feed error.
    #[must_use]
    pub fn feed(message: impl Into<String>) -> Self {
        Self::Feed(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is worth retrying.
    ///
    /// Interrupted or timed-out I/O and a busy or locked database are
    /// transient; everything else is permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(err) | Self::DirectoryCreate { source: err, .. } => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            Self::DatabaseQuery(err) | Self::DatabaseOpen { source: err, .. } => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    /// Check if this error is a geometry problem.
    #[must_use]
    pub fn is_geometry_error(&self) -> bool {
        matches!(self, Self::InvalidGeometry { .. } | Self::UnknownAirport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownAirport("XYZ".to_string());
        assert_eq!(err.to_string(), "unknown airport: XYZ");

        let err = Error::feed("connection reset");
        assert_eq!(err.to_string(), "position feed error: connection reset");
    }

    #[test]
    fn test_invalid_geometry_display() {
        let err = Error::invalid_geometry("SAN", "no exit regions");
        let msg = err.to_string();
        assert!(msg.contains("SAN"));
        assert!(msg.contains("no exit regions"));
        assert!(err.is_geometry_error());
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
        assert!(!err.is_geometry_error());
    }

    #[test]
    fn test_record_conflict_display() {
        let err = Error::RecordConflict {
            key: "SAN/arrivals/abc123".to_string(),
        };
        assert!(err.to_string().contains("SAN/arrivals/abc123"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_io_errors() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr").into();
        assert!(err.is_transient());

        let err: Error = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk").into();
        assert!(err.is_transient());

        let err: Error =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_sqlite_busy() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(Error::DatabaseQuery(busy).is_transient());

        let full = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        );
        assert!(!Error::DatabaseQuery(full).is_transient());
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "poll_interval_secs must be greater than 0".to_string(),
        };
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }

    #[test]
    fn test_database_open_error_display() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/records.db",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err = Error::DatabaseOpen {
                path: PathBuf::from("/nonexistent/path/records.db"),
                source: sqlite_err,
            };
            assert!(err.to_string().contains("/nonexistent/path/records.db"));
        }
    }
}
