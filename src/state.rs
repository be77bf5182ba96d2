/// Last-successful-refresh date.
///
/// Read once before the gate runs and written once after a fully
/// successful cycle; nothing else touches it mid-cycle.

use crate::db;
use crate::model::ForecastError;
use crate::output::write_atomic;
use chrono::NaiveDate;
use postgres::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

pub trait UpdateStore: Send {
    /// `None` when no refresh has ever been recorded.
    fn last_refresh(&mut self) -> Result<Option<NaiveDate>, ForecastError>;

    fn record_refresh(&mut self, date: NaiveDate) -> Result<(), ForecastError>;
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    last_refresh: NaiveDate,
}

/// `{"last_refresh":"2024-05-10"}` in a small file, replaced atomically.
#[derive(Debug, Clone)]
pub struct FileUpdateStore {
    path: PathBuf,
}

impl FileUpdateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl UpdateStore for FileUpdateStore {
    fn last_refresh(&mut self) -> Result<Option<NaiveDate>, ForecastError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ForecastError::Persistence(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let doc: StateDocument = serde_json::from_str(&text).map_err(|e| {
            ForecastError::Persistence(format!("corrupt state file {}: {}", self.path.display(), e))
        })?;
        Ok(Some(doc.last_refresh))
    }

    fn record_refresh(&mut self, date: NaiveDate) -> Result<(), ForecastError> {
        let json = serde_json::to_string(&StateDocument { last_refresh: date })
            .map_err(|e| ForecastError::Persistence(e.to_string()))?;
        write_atomic(&self.path, json.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Single row in `service.updated_on`.
pub struct PgUpdateStore {
    client: Client,
}

impl PgUpdateStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn connect() -> Result<Self, ForecastError> {
        let client = db::connect_and_verify(&["service.updated_on"])?;
        Ok(Self::new(client))
    }
}

impl UpdateStore for PgUpdateStore {
    fn last_refresh(&mut self) -> Result<Option<NaiveDate>, ForecastError> {
        let row = self
            .client
            .query_opt("SELECT updated_on FROM service.updated_on WHERE id = 1", &[])
            .map_err(|e| ForecastError::Persistence(format!("cannot read service.updated_on: {}", e)))?;
        Ok(row.map(|r| r.get::<_, NaiveDate>(0)))
    }

    fn record_refresh(&mut self, date: NaiveDate) -> Result<(), ForecastError> {
        self.client
            .execute(
                "INSERT INTO service.updated_on (id, updated_on) VALUES (1, $1)
                 ON CONFLICT (id) DO UPDATE SET updated_on = EXCLUDED.updated_on",
                &[&date],
            )
            .map_err(|e| ForecastError::Persistence(format!("cannot write service.updated_on: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_means_never_refreshed() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FileUpdateStore::new(temp_dir.path().join("state.json"));
        assert_eq!(store.last_refresh().unwrap(), None);
    }

    #[test]
    fn test_record_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("state.json");
        let mut store = FileUpdateStore::new(&path);
        let date = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();

        store.record_refresh(date).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"last_refresh":"2024-05-10"}"#);
        assert_eq!(FileUpdateStore::new(&path).last_refresh().unwrap(), Some(date));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "yesterday").unwrap();

        let result = FileUpdateStore::new(&path).last_refresh();
        assert!(matches!(result, Err(ForecastError::Persistence(_))));
    }

    #[test]
    #[ignore] // Only run when database is available
    fn test_pg_store_round_trip() {
        let mut store = PgUpdateStore::connect().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        store.record_refresh(date).unwrap();
        assert_eq!(store.last_refresh().unwrap(), Some(date));
    }
}
