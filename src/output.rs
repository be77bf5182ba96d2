/// Published artifacts: one JSON document per spot, the update stamp and
/// the coverage date the last refresh was authorized against.
///
/// Every write goes to a temporary file in the destination directory and
/// is then renamed over the target, so readers see either the previous
/// complete document or the new complete document.

use crate::model::ForecastError;
use crate::record::ForecastRecord;
use chrono::{DateTime, NaiveDate, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Write `contents` to `path` via temp file + rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ForecastError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let fail = |what: &str, e: std::io::Error| {
        ForecastError::Persistence(format!("{} {}: {}", what, path.display(), e))
    };

    fs::create_dir_all(&dir).map_err(|e| fail("cannot create directory for", e))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| fail("cannot stage", e))?;
    tmp.write_all(contents).map_err(|e| fail("cannot write", e))?;
    tmp.as_file().sync_all().map_err(|e| fail("cannot sync", e))?;
    tmp.persist(path).map_err(|e| fail("cannot replace", e.error))?;

    Ok(())
}

/// Writes `<output_dir>/<spot id>.json`.
#[derive(Debug, Clone)]
pub struct ForecastWriter {
    dir: PathBuf,
}

impl ForecastWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Target path for a spot. Ids that would escape the output directory
    /// are rejected.
    pub fn path_for(&self, spot_id: &str) -> Result<PathBuf, ForecastError> {
        let unsafe_id = spot_id.is_empty()
            || spot_id == "."
            || spot_id == ".."
            || spot_id.contains(|c: char| c == '/' || c == '\\');
        if unsafe_id {
            return Err(ForecastError::Persistence(format!(
                "spot id '{}' is not usable as a file name",
                spot_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", spot_id)))
    }

    pub fn write(&self, spot_id: &str, record: &ForecastRecord) -> Result<PathBuf, ForecastError> {
        let path = self.path_for(spot_id)?;
        write_atomic(&path, record.to_json()?.as_bytes())?;
        Ok(path)
    }
}

/// Human-readable "last updated" marker, e.g. `2024-05-10 06:15`.
pub fn format_update_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d %H:%M").to_string()
}

pub fn write_update_stamp(path: &Path, now: DateTime<Utc>) -> Result<(), ForecastError> {
    write_atomic(path, format_update_stamp(now).as_bytes())
}

/// Last upstream day the published forecasts reach, as `YYYY-MM-DD`.
pub fn write_coverage_date(path: &Path, coverage_end: NaiveDate) -> Result<(), ForecastError> {
    write_atomic(path, coverage_end.format("%Y-%m-%d").to_string().as_bytes())
}
