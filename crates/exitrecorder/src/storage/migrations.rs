//! Brings a record database up to the latest schema.
//!
//! The applied version lives in `PRAGMA user_version`. Each pending
//! migration runs in its own transaction together with the version bump, so
//! a failed step leaves the database at the previous version.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::schema::{Migration, MIGRATIONS};
use crate::error::{Error, Result};

/// Apply every pending migration to `conn`.
///
/// A database written by a newer build is left untouched.
///
/// # Errors
///
/// Returns [`Error::DatabaseMigration`] naming the step that failed.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    apply(conn, MIGRATIONS)
}

/// The version recorded in the database; 0 for a fresh file.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn apply(conn: &Connection, migrations: &[Migration]) -> Result<()> {
    let current = schema_version(conn)?;
    let latest = migrations.last().map_or(0, |m| m.version);
    if current > latest {
        warn!(
            current,
            latest, "Record database is newer than this build; leaving schema alone"
        );
        return Ok(());
    }

    for migration in migrations.iter().filter(|m| m.version > current) {
        debug!(
            version = migration.version,
            description = migration.description,
            "Applying record database migration"
        );
        run_step(conn, migration).map_err(|e| Error::DatabaseMigration {
            message: format!("version {} ({}): {e}", migration.version, migration.description),
        })?;
    }

    if current < latest {
        info!(from = current, to = latest, "Record database migrated");
    }
    Ok(())
}

fn run_step(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for statement in migration.statements {
        tx.execute(statement, [])?;
    }
    tx.execute_batch(&format!("PRAGMA user_version = {}", migration.version))?;
    tx.commit()
}
