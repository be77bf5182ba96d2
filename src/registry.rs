/// Spot registry: the list of points a forecast is published for.
///
/// Read once at cycle start, single-threaded, before any fan-out.
/// Backends: a TOML file (`spots.toml`) or the PostgreSQL `spots` table.

use crate::db;
use crate::model::{ForecastError, Spot};
use postgres::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

pub trait SpotRegistry {
    fn list_spots(&mut self) -> Result<Vec<Spot>, ForecastError>;
}

/// Fixed in-memory list; handy for one-off runs and tests.
impl SpotRegistry for Vec<Spot> {
    fn list_spots(&mut self) -> Result<Vec<Spot>, ForecastError> {
        validate(self.clone())
    }
}

/// Rejects out-of-range coordinates and duplicate ids.
pub fn validate(spots: Vec<Spot>) -> Result<Vec<Spot>, ForecastError> {
    let mut seen = HashSet::new();

    for spot in &spots {
        if !seen.insert(spot.id.clone()) {
            return Err(ForecastError::Registry(format!("duplicate spot id '{}'", spot.id)));
        }
        if !(-90.0..=90.0).contains(&spot.latitude) {
            return Err(ForecastError::Registry(format!(
                "spot '{}' latitude {} out of range",
                spot.id, spot.latitude
            )));
        }
        if !(-180.0..=360.0).contains(&spot.longitude) {
            return Err(ForecastError::Registry(format!(
                "spot '{}' longitude {} out of range",
                spot.id, spot.longitude
            )));
        }
    }

    Ok(spots)
}

// ---------------------------------------------------------------------------
// TOML file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SpotsFile {
    #[serde(default, rename = "spot")]
    spots: Vec<SpotEntry>,
}

#[derive(Debug, Deserialize)]
struct SpotEntry {
    id: String,
    latitude: f64,
    longitude: f64,
}

/// ```toml
/// [[spot]]
/// id = "12"
/// latitude = 37.0857
/// longitude = -8.6407
/// ```
#[derive(Debug, Clone)]
pub struct TomlSpotRegistry {
    path: PathBuf,
}

impl TomlSpotRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SpotRegistry for TomlSpotRegistry {
    fn list_spots(&mut self) -> Result<Vec<Spot>, ForecastError> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            ForecastError::Registry(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        parse_spots_toml(&text)
    }
}

pub fn parse_spots_toml(text: &str) -> Result<Vec<Spot>, ForecastError> {
    let file: SpotsFile =
        toml::from_str(text).map_err(|e| ForecastError::Registry(format!("invalid spots file: {}", e)))?;

    validate(
        file.spots
            .into_iter()
            .map(|s| Spot::new(s.id, s.latitude, s.longitude))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

pub struct PgSpotRegistry {
    client: Client,
}

impl PgSpotRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn connect() -> Result<Self, ForecastError> {
        let client = db::connect_and_verify(&["spots"])?;
        Ok(Self::new(client))
    }
}

impl SpotRegistry for PgSpotRegistry {
    fn list_spots(&mut self) -> Result<Vec<Spot>, ForecastError> {
        let rows = self
            .client
            .query("SELECT id::text, latitude, longitude FROM spots ORDER BY id", &[])
            .map_err(|e| ForecastError::Registry(format!("cannot query spots: {}", e)))?;

        validate(
            rows.iter()
                .map(|row| Spot::new(row.get::<_, String>(0), row.get(1), row.get(2)))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spots_toml() {
        let spots = parse_spots_toml(
            r#"
            [[spot]]
            id = "12"
            latitude = 37.0857
            longitude = -8.6407

            [[spot]]
            id = "13"
            latitude = 43.55
            longitude = 10.3
            "#,
        )
        .unwrap();

        assert_eq!(spots.len(), 2);
        assert_eq!(spots[0], Spot::new("12", 37.0857, -8.6407));
        assert_eq!(spots[1].id, "13");
    }

    #[test]
    fn test_empty_file_has_no_spots() {
        assert!(parse_spots_toml("").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_duplicates_and_bad_coordinates() {
        let dup = vec![Spot::new("1", 40.0, 10.0), Spot::new("1", 41.0, 11.0)];
        assert!(matches!(validate(dup), Err(ForecastError::Registry(_))));

        let mut bad = vec![Spot::new("1", 91.0, 10.0)];
        assert!(bad.list_spots().is_err());
    }

    #[test]
    fn test_missing_field_is_registry_error() {
        let result = parse_spots_toml("[[spot]]\nid = \"1\"\nlatitude = 40.0\n");
        assert!(matches!(result, Err(ForecastError::Registry(_))));
    }

    #[test]
    #[ignore] // Only run when database is available
    fn test_pg_registry_lists_spots() {
        let mut registry = PgSpotRegistry::connect().unwrap();
        assert!(registry.list_spots().is_ok());
    }
}
