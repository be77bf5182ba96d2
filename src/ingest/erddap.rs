/// ERDDAP griddap client for NCEP GFS 10 m wind components.
///
/// Retrieves u/v wind on a 0–360° longitude grid from an endpoint like:
///   http://oos.soest.hawaii.edu/erddap/griddap/NCEP_Global_Best
///
/// Griddap JSON is a flat table: one row per (time, latitude, longitude)
/// with a column per requested variable. Rows are placed into the cube by
/// coordinate, so row order does not matter, but every cell must appear
/// exactly once.

use crate::grid::{GridPayload, LON_CLAMP, LON_WRAP_LIMIT};
use crate::ingest::{parse_iso_date, CoverageSource, GridProvider, GridRequest, HttpGet};
use crate::model::{Bounds, ForecastError};
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

const SOURCE: &str = "erddap";

// ---------------------------------------------------------------------------
// Serde structures for griddap JSON
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct GriddapResponse {
    table: GriddapTable,
}

#[derive(Deserialize)]
struct GriddapTable {
    #[serde(rename = "columnNames")]
    column_names: Vec<String>,
    rows: Vec<Vec<Value>>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct ErddapProvider<C = reqwest::blocking::Client> {
    client: C,
    base_url: String,
    variables: Vec<String>,
    fill_value: f64,
}

impl<C: HttpGet> ErddapProvider<C> {
    pub fn new(
        client: C,
        base_url: &str,
        variables: Vec<String>,
        fill_value: f64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            variables,
            fill_value,
        }
    }
}

impl<C: HttpGet> GridProvider for ErddapProvider<C> {
    fn name(&self) -> &str {
        SOURCE
    }

    fn fetch(&self, request: &GridRequest) -> Result<GridPayload, ForecastError> {
        let query = build_griddap_query(&self.variables, request);
        let url = format!("{}.json?{}", self.base_url, urlencoding::encode(&query));
        let body = self.client.get_text(SOURCE, &url)?;
        parse_griddap_grid(&body, &self.variables, self.fill_value)
    }
}

impl<C: HttpGet> CoverageSource for ErddapProvider<C> {
    fn name(&self) -> &str {
        SOURCE
    }

    /// Reads `time[last]`, the latest forecast instant the server holds.
    fn coverage_end(&self) -> Result<NaiveDate, ForecastError> {
        let url = format!("{}.json?{}", self.base_url, urlencoding::encode("time[last]"));
        let body = self
            .client
            .get_text(SOURCE, &url)
            .map_err(|e| ForecastError::Coverage(e.to_string()))?;
        parse_last_time(&body)
    }
}

// ---------------------------------------------------------------------------
// Query construction
// ---------------------------------------------------------------------------

/// Longitude window on the 0–360° grid. A box crossing the prime meridian
/// cannot be expressed as one ascending range, so it takes the full ring.
pub fn erddap_lon_window(bounds: &Bounds) -> (f64, f64) {
    if bounds.crosses_prime_meridian() {
        return (0.0, LON_WRAP_LIMIT);
    }

    let wrap = |lon: f64| {
        if lon >= 0.0 {
            lon
        } else if lon + 360.0 > LON_WRAP_LIMIT {
            LON_CLAMP
        } else {
            lon + 360.0
        }
    };
    (wrap(bounds.min_lon), wrap(bounds.max_lon))
}

/// Unencoded griddap constraint, e.g.
/// `ugrd10m[(2024-05-01T00:00:00Z):1:(2024-05-11T00:00:00Z)][(30):1:(46)][(0):1:(359.5)],vgrd10m[...]`
pub fn build_griddap_query(variables: &[String], request: &GridRequest) -> String {
    let (lon0, lon1) = erddap_lon_window(&request.bounds);
    let slice = format!(
        "[({}):1:({})][({}):1:({})][({}):1:({})]",
        request.start.format("%Y-%m-%dT%H:%M:%SZ"),
        request.end.format("%Y-%m-%dT%H:%M:%SZ"),
        request.bounds.min_lat,
        request.bounds.max_lat,
        lon0,
        lon1,
    );

    variables
        .iter()
        .map(|v| format!("{}{}", v, slice))
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Decodes a griddap JSON table into a dense `(time, lat, lon)` payload.
/// `null` samples become the fill value.
pub fn parse_griddap_grid(
    json: &str,
    variables: &[String],
    fill_value: f64,
) -> Result<GridPayload, ForecastError> {
    let response: GriddapResponse = serde_json::from_str(json)
        .map_err(|e| ForecastError::payload(SOURCE, format!("JSON deserialization failed: {}", e)))?;
    let table = response.table;

    let column = |name: &str| {
        table
            .column_names
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ForecastError::payload(SOURCE, format!("missing column '{}'", name)))
    };
    let time_col = column("time")?;
    let lat_col = column("latitude")?;
    let lon_col = column("longitude")?;
    let var_cols = variables
        .iter()
        .map(|v| column(v))
        .collect::<Result<Vec<_>, _>>()?;

    if table.rows.is_empty() {
        return Err(ForecastError::DegenerateGrid("griddap response has no rows".into()));
    }

    let mut coords = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let time = row
            .get(time_col)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .ok_or_else(|| ForecastError::payload(SOURCE, "row with unreadable time"))?
            .timestamp() as f64;
        let lat = number(row, lat_col).ok_or_else(|| ForecastError::payload(SOURCE, "row without latitude"))?;
        let lon = number(row, lon_col).ok_or_else(|| ForecastError::payload(SOURCE, "row without longitude"))?;
        coords.push((time, lat, lon));
    }

    let time = sorted_unique(coords.iter().map(|c| c.0));
    let latitude = sorted_unique(coords.iter().map(|c| c.1));
    let longitude = sorted_unique(coords.iter().map(|c| c.2));

    let (nt, ny, nx) = (time.len(), latitude.len(), longitude.len());
    if coords.len() != nt * ny * nx {
        return Err(ForecastError::ShapeMismatch {
            variable: variables.join(","),
            expected: nt * ny * nx,
            actual: coords.len(),
        });
    }

    let mut samples: Vec<Vec<f64>> = vec![vec![fill_value; nt * ny * nx]; variables.len()];
    let mut filled = vec![false; nt * ny * nx];
    for (row, &(t, y, x)) in table.rows.iter().zip(&coords) {
        let index = (position(&time, t) * ny + position(&latitude, y)) * nx + position(&longitude, x);
        // Row count matches the grid, so a repeated cell means another is missing.
        if std::mem::replace(&mut filled[index], true) {
            return Err(ForecastError::payload(
                SOURCE,
                format!("duplicate row for time {} lat {} lon {}", t, y, x),
            ));
        }
        for (k, &col) in var_cols.iter().enumerate() {
            samples[k][index] = number(row, col).unwrap_or(fill_value);
        }
    }

    let variables: BTreeMap<String, Vec<f64>> = variables.iter().cloned().zip(samples).collect();

    Ok(GridPayload {
        time,
        latitude,
        longitude,
        variables,
        fill_value,
    })
}

/// Date of the single row of a `time[last]` response.
pub fn parse_last_time(json: &str) -> Result<NaiveDate, ForecastError> {
    let response: GriddapResponse = serde_json::from_str(json)
        .map_err(|e| ForecastError::Coverage(format!("cannot decode time[last]: {}", e)))?;

    response
        .table
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(Value::as_str)
        .and_then(parse_iso_date)
        .ok_or_else(|| ForecastError::Coverage("time[last] response has no usable date".into()))
}

fn number(row: &[Value], col: usize) -> Option<f64> {
    row.get(col).and_then(Value::as_f64)
}

fn sorted_unique(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(f64::total_cmp);
    v.dedup();
    v
}

fn position(axis: &[f64], value: f64) -> usize {
    axis.binary_search_by(|probe| probe.total_cmp(&value))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridCube, Sampling};
    use crate::ingest::fixtures;
    use chrono::{TimeZone, Utc};

    fn vars() -> Vec<String> {
        vec!["ugrd10m".to_string(), "vgrd10m".to_string()]
    }

    #[test]
    fn test_lon_window_wraps_and_crosses() {
        let med = Bounds { min_lat: 30.0, max_lat: 46.0, min_lon: -10.0, max_lon: 36.5 };
        assert_eq!(erddap_lon_window(&med), (0.0, 359.5));

        let atlantic = Bounds { min_lat: 30.0, max_lat: 46.0, min_lon: -20.0, max_lon: -10.0 };
        assert_eq!(erddap_lon_window(&atlantic), (340.0, 350.0));

        let edge = Bounds { min_lat: 0.0, max_lat: 1.0, min_lon: -0.3, max_lon: -0.2 };
        assert_eq!(erddap_lon_window(&edge), (LON_CLAMP, LON_CLAMP));
    }

    #[test]
    fn test_build_griddap_query() {
        let request = GridRequest {
            bounds: Bounds { min_lat: 37.0, max_lat: 37.5, min_lon: 10.0, max_lon: 10.5 },
            start: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
        };
        let q = build_griddap_query(&vars(), &request);
        assert_eq!(
            q,
            "ugrd10m[(2024-05-01T00:00:00Z):1:(2024-05-02T00:00:00Z)][(37):1:(37.5)][(10):1:(10.5)],\
             vgrd10m[(2024-05-01T00:00:00Z):1:(2024-05-02T00:00:00Z)][(37):1:(37.5)][(10):1:(10.5)]"
        );
    }

    #[test]
    fn test_parse_griddap_grid() {
        let payload = parse_griddap_grid(fixtures::ERDDAP_WIND_JSON, &vars(), 1e20).unwrap();
        assert_eq!(payload.time.len(), 2);
        assert_eq!(payload.latitude, vec![37.0, 37.5]);
        assert_eq!(payload.longitude, vec![351.0, 351.5]);

        let cube = GridCube::build(payload, Sampling::every(1)).unwrap();
        assert_eq!(cube.time_slice("ugrd10m", 0, 1).unwrap(), vec![1.0, 2.0]);
        assert_eq!(cube.time_slice("vgrd10m", 1, 0).unwrap()[0], -3.5);
        assert!(cube.is_fill(cube.time_slice("vgrd10m", 1, 1).unwrap()[1]));
    }

    #[test]
    fn test_parse_griddap_missing_cell() {
        let v: Value = serde_json::from_str(fixtures::ERDDAP_WIND_JSON).unwrap();
        let mut v = v;
        v["table"]["rows"].as_array_mut().unwrap().pop();
        let result = parse_griddap_grid(&v.to_string(), &vars(), 1e20);
        assert!(matches!(result, Err(ForecastError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_parse_griddap_duplicate_row_hiding_a_gap() {
        let mut v: Value = serde_json::from_str(fixtures::ERDDAP_WIND_JSON).unwrap();
        let rows = v["table"]["rows"].as_array_mut().unwrap();
        let first = rows[0].clone();
        *rows.last_mut().unwrap() = first;

        let result = parse_griddap_grid(&v.to_string(), &vars(), 1e20);
        assert!(matches!(result, Err(ForecastError::Payload { .. })));
    }

    #[test]
    fn test_parse_griddap_missing_column() {
        let result = parse_griddap_grid(fixtures::ERDDAP_WIND_JSON, &["UGRD".to_string()], 1e20);
        assert!(result.is_err());
    }

    #[test]
    fn test_fetch_sends_encoded_constraint() {
        let http = fixtures::CannedHttp::new()
            .route(&[".json?ugrd10m[(2024-05-01T00:00:00Z)"], fixtures::ERDDAP_WIND_JSON)
            .route(&[".json?time[last]"], fixtures::ERDDAP_TIME_LAST_JSON);
        let provider = ErddapProvider::new(http, "http://erddap.test/griddap/NCEP_Global_Best/", vars(), 1e20);
        let request = GridRequest {
            bounds: Bounds { min_lat: 37.0, max_lat: 37.5, min_lon: -9.0, max_lon: -8.5 },
            start: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap(),
        };

        let payload = provider.fetch(&request).unwrap();
        assert_eq!(payload.time.len(), 2);
        assert_eq!(
            provider.coverage_end().unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
        );

        let calls = provider.client.calls();
        assert!(calls[0].starts_with("http://erddap.test/griddap/NCEP_Global_Best.json?ugrd10m"));
        assert!(calls[0].contains("[(351):1:(351.5)]"));
    }

    #[test]
    fn test_parse_last_time() {
        assert_eq!(
            parse_last_time(fixtures::ERDDAP_TIME_LAST_JSON).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
        );
        assert!(parse_last_time(r#"{"table":{"columnNames":["time"],"rows":[]}}"#).is_err());
    }
}
