//! JSON-file record store.
//!
//! Layout: `{root}/{airport}/{arrivals|departures}/{flight}.json`. Each
//! record is written to a hidden temp file in the same directory, synced,
//! then renamed over its final name, so readers only ever see whole records.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{RecordIter, RecordSink, RecordSource, SaveOutcome};
use crate::error::{Error, Result};
use crate::record::{Direction, FlightRecord, RecordKey};

const RECORD_EXTENSION: &str = "json";

/// Stores one pretty-printed JSON document per record.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        create_dir(&root)?;
        info!("Record store opened at {}", root.display());
        Ok(Self { root })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition(&self, airport: &str, direction: Direction) -> PathBuf {
        self.root.join(airport).join(direction.key_segment())
    }

    /// Final path of the record stored under `key`.
    #[must_use]
    pub fn path_for(&self, key: &RecordKey) -> PathBuf {
        self.partition(&key.airport, key.direction)
            .join(format!("{}.{RECORD_EXTENSION}", key.flight_stem()))
    }

    /// Read the record at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<FlightRecord> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|err| {
            Error::internal(format!("unreadable record {}: {err}", path.display()))
        })
    }

    fn record_paths(&self, airport: &str, direction: Direction) -> Result<Vec<PathBuf>> {
        let dir = self.partition(airport, direction);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let visible = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !name.starts_with('.'));
            let is_record = path
                .extension()
                .is_some_and(|ext| ext == RECORD_EXTENSION);
            if visible && is_record {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::DirectoryCreate {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(Error::internal(format!(
            "record path has no parent: {}",
            path.display()
        )));
    };
    create_dir(dir)?;

    let temp = dir.join(format!(
        ".{}.{}.tmp",
        name.to_string_lossy(),
        std::process::id()
    ));
    if let Err(err) = write_then_rename(&temp, path, bytes).and_then(|()| sync_dir(dir)) {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }
    Ok(())
}

fn write_then_rename(temp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(temp, path)
}

/// Flush a directory entry so a completed rename survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl RecordSink for FileStore {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn save(&mut self, record: &FlightRecord) -> Result<SaveOutcome> {
        let key = record.key();
        let path = self.path_for(&key);

        if path.exists() {
            let stored = Self::read(&path)?;
            if stored.content_hash()? == record.content_hash()? {
                debug!("Record {key} already stored");
                return Ok(SaveOutcome::AlreadyStored);
            }
            return Err(Error::RecordConflict {
                key: key.to_string(),
            });
        }

        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomically(&path, &bytes)?;
        debug!("Wrote record {key} to {}", path.display());
        Ok(SaveOutcome::Stored)
    }
}

impl RecordSource for FileStore {
    fn count(&self, airport: &str, direction: Direction) -> Result<usize> {
        Ok(self.record_paths(airport, direction)?.len())
    }

    fn records(&self, airport: &str, direction: Direction) -> Result<RecordIter<'_>> {
        let paths = self.record_paths(airport, direction)?;
        Ok(Box::new(paths.into_iter().map(|path| Self::read(&path))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::record;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("records")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_creates_root() {
        let (_dir, store) = store();
        assert!(store.root().is_dir());
    }

    #[test]
    fn test_save_writes_keyed_json() {
        let (_dir, mut store) = store();
        let record = record("abc123", Direction::Arrival, &[(1.0, 2.0)]);

        assert_eq!(store.save(&record).unwrap(), SaveOutcome::Stored);

        let path = store.root().join("TST").join("arrivals").join("abc123.json");
        assert!(path.is_file());
        assert_eq!(FileStore::read(&path).unwrap(), record);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let (_dir, mut store) = store();
        store.save(&record("abc", Direction::Departure, &[])).unwrap();

        let names: Vec<String> = fs::read_dir(store.root().join("TST/departures"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["abc.json".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_sync_after_rename() {
        let (dir, _) = store();
        let path = dir.path().join("TST").join("arrivals").join("AR1.json");
        write_atomically(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");

        sync_dir(path.parent().unwrap()).unwrap();
        assert!(sync_dir(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_save_is_idempotent() {
        let (_dir, mut store) = store();
        let record = record("abc", Direction::Arrival, &[(1.0, 2.0)]);

        store.save(&record).unwrap();
        assert_eq!(store.save(&record).unwrap(), SaveOutcome::AlreadyStored);
        assert_eq!(store.count("TST", Direction::Arrival).unwrap(), 1);
    }

    #[test]
    fn test_different_record_under_same_key_conflicts() {
        let (_dir, mut store) = store();
        store.save(&record("abc", Direction::Arrival, &[(1.0, 2.0)])).unwrap();

        let err = store
            .save(&record("abc", Direction::Arrival, &[(3.0, 4.0)]))
            .unwrap_err();
        assert!(matches!(err, Error::RecordConflict { key } if key == "TST/arrivals/abc"));
    }

    #[test]
    fn test_unsafe_ids_stay_inside_partition() {
        let (_dir, mut store) = store();
        store.save(&record("../../etc", Direction::Arrival, &[])).unwrap();

        let paths = store.record_paths("TST", Direction::Arrival).unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].starts_with(store.root().join("TST/arrivals")));
    }

    #[test]
    fn test_records_lists_one_partition_in_order() {
        let (_dir, mut store) = store();
        for id in ["c", "a", "b"] {
            store.save(&record(id, Direction::Arrival, &[])).unwrap();
        }
        store.save(&record("z", Direction::Departure, &[])).unwrap();

        let ids: Vec<String> = store
            .records("TST", Direction::Arrival)
            .unwrap()
            .map(|r| r.unwrap().flight_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.count("TST", Direction::Departure).unwrap(), 1);
        assert_eq!(store.count("SAN", Direction::Arrival).unwrap(), 0);
    }

    #[test]
    fn test_records_is_restartable() {
        let (_dir, mut store) = store();
        store.save(&record("a", Direction::Arrival, &[])).unwrap();

        assert_eq!(store.records("TST", Direction::Arrival).unwrap().count(), 1);
        assert_eq!(store.records("TST", Direction::Arrival).unwrap().count(), 1);
    }

    #[test]
    fn test_unreadable_record_yields_error_item() {
        let (_dir, mut store) = store();
        store.save(&record("a", Direction::Arrival, &[])).unwrap();
        fs::write(store.root().join("TST/arrivals/b.json"), b"{ not json").unwrap();
        fs::write(store.root().join("TST/arrivals/.c.json.1.tmp"), b"partial").unwrap();

        let results: Vec<Result<FlightRecord>> =
            store.records("TST", Direction::Arrival).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
