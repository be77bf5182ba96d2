/// Shared data types for the wave/wind forecast service.
///
/// Everything that crosses a module boundary lives here: the spot record
/// read from the registry, the time table shared by every series of a
/// cycle, the per-spot forecast series, and the error taxonomy used by
/// the whole crate.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Conventional "no data" sentinel in CMEMS / NCEP grids.
pub const DEFAULT_FILL_VALUE: f64 = 1e20;

/// Literal emitted in place of a missing sample.
pub const MISSING_MARKER: &str = "n/a";

// ---------------------------------------------------------------------------
// Spots
// ---------------------------------------------------------------------------

/// A geographic point of interest for which a forecast is published.
#[derive(Debug, Clone, PartialEq)]
pub struct Spot {
    /// Opaque identifier; also names the output file.
    pub id: String,
    /// WGS84 latitude.
    pub latitude: f64,
    /// WGS84 longitude in the conventional ±180° range.
    pub longitude: f64,
}

impl Spot {
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
        }
    }
}

/// Geographic bounding box used when requesting a grid from upstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Bounds {
    /// A box of `epsilon` degrees anchored at the spot, for point requests.
    pub fn around(spot: &Spot, epsilon: f64) -> Self {
        Self {
            min_lat: spot.latitude,
            max_lat: spot.latitude + epsilon,
            min_lon: spot.longitude,
            max_lon: spot.longitude + epsilon,
        }
    }

    /// True when the box straddles the prime meridian in ±180° terms.
    pub fn crosses_prime_meridian(&self) -> bool {
        self.min_lon < 0.0 && self.max_lon >= 0.0
    }
}

// ---------------------------------------------------------------------------
// Time table
// ---------------------------------------------------------------------------

/// Ordered (date, hour) pairs, one per sampled timestep.
///
/// Stored as two parallel vectors because that is the persisted shape:
/// `"time": [["2024-05-01", ...], ["00", ...]]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeTable {
    instants: Vec<DateTime<Utc>>,
    dates: Vec<String>,
    hours: Vec<String>,
}

impl TimeTable {
    /// Builds a table from UTC instants. Instants must be strictly
    /// increasing; duplicates or reordering are rejected.
    pub fn from_instants(instants: Vec<DateTime<Utc>>) -> Result<Self, ForecastError> {
        if let Some(pair) = instants.windows(2).find(|w| w[1] <= w[0]) {
            return Err(ForecastError::DegenerateGrid(format!(
                "time table not strictly increasing at {} -> {}",
                pair[0], pair[1]
            )));
        }

        let dates = instants
            .iter()
            .map(|t| t.format("%Y-%m-%d").to_string())
            .collect();
        let hours = instants.iter().map(|t| t.format("%H").to_string()).collect();

        Ok(Self {
            instants,
            dates,
            hours,
        })
    }

    pub fn len(&self) -> usize {
        self.instants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instants.is_empty()
    }

    pub fn instants(&self) -> &[DateTime<Utc>] {
        &self.instants
    }

    pub fn dates(&self) -> &[String] {
        &self.dates
    }

    pub fn hours(&self) -> &[String] {
        &self.hours
    }
}

// ---------------------------------------------------------------------------
// Forecast series
// ---------------------------------------------------------------------------

/// Published quantities, in persisted key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quantity {
    WaveHeight,
    WavePeriod,
    WaveDir,
    WindSpeed,
    WindDir,
}

impl Quantity {
    pub const ALL: [Quantity; 5] = [
        Quantity::WaveHeight,
        Quantity::WavePeriod,
        Quantity::WaveDir,
        Quantity::WindSpeed,
        Quantity::WindDir,
    ];

    /// JSON key used in the persisted record.
    pub fn key(&self) -> &'static str {
        match self {
            Quantity::WaveHeight => "waveHeight",
            Quantity::WavePeriod => "wavePeriod",
            Quantity::WaveDir => "waveDir",
            Quantity::WindSpeed => "windSpeed",
            Quantity::WindDir => "windDir",
        }
    }

    /// Fixed number of decimals used when rendering a sample.
    pub fn decimals(&self) -> usize {
        match self {
            Quantity::WaveHeight | Quantity::WavePeriod | Quantity::WindSpeed => 2,
            Quantity::WaveDir | Quantity::WindDir => 0,
        }
    }
}

/// Per-spot formatted forecast: one string sequence per quantity, every
/// sequence the same length as the time table.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSeries {
    pub time: TimeTable,
    pub values: BTreeMap<Quantity, Vec<String>>,
}

impl ForecastSeries {
    pub fn get(&self, quantity: Quantity) -> &[String] {
        self.values
            .get(&quantity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Checks that every quantity is present and aligned with the time table.
    pub fn is_aligned(&self) -> bool {
        Quantity::ALL
            .iter()
            .all(|q| self.values.get(q).map(Vec::len) == Some(self.time.len()))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised anywhere in the fetch → extract → publish pipeline.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Upstream unreachable, timed out, or returned a non-success status.
    #[error("transport failure from {source_name}: {message}")]
    Transport {
        source_name: String,
        message: String,
    },

    /// Upstream answered but the payload could not be decoded.
    #[error("malformed payload from {source_name}: {message}")]
    Payload {
        source_name: String,
        message: String,
    },

    /// Empty axis, zero-length time range, or otherwise unusable grid.
    #[error("unusable grid: {0}")]
    DegenerateGrid(String),

    /// Declared axis lengths do not match the flattened sample count.
    #[error("grid shape mismatch for '{variable}': axes imply {expected} samples, payload has {actual}")]
    ShapeMismatch {
        variable: String,
        expected: usize,
        actual: usize,
    },

    /// Requested variable is not present in the cube.
    #[error("variable '{0}' not present in grid")]
    MissingVariable(String),

    /// Coverage metadata missing or unparseable.
    #[error("coverage metadata unavailable: {0}")]
    Coverage(String),

    /// Output or state could not be written.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Spot registry could not be read.
    #[error("spot registry error: {0}")]
    Registry(String),

    /// Configuration file missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Database(#[from] crate::db::DbConfigError),
}

impl ForecastError {
    pub fn transport(source_name: &str, message: impl ToString) -> Self {
        ForecastError::Transport {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }

    pub fn payload(source_name: &str, message: impl ToString) -> Self {
        ForecastError::Payload {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
