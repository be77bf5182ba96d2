/// In-memory lat × lon × time grids and nearest-neighbour indexing.
///
/// Upstream adapters decode whatever wire format they speak into a
/// [`GridPayload`]; [`GridCube::build`] validates its shape, applies the
/// cycle's time window and sub-sampling stride, and freezes the result.
/// A cube is built once per refresh cycle and shared read-only between
/// spot tasks.
///
/// Sample layout is row-major `(time, lat, lon)`, matching both the
/// OpenDAP ASCII dump order and ERDDAP's row order.

use crate::model::{ForecastError, Spot};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Longitudes above this wrap past the last 0.5° column of a 0–360 grid.
pub const LON_WRAP_LIMIT: f64 = 359.5;

/// Value substituted for longitudes beyond [`LON_WRAP_LIMIT`].
pub const LON_CLAMP: f64 = 359.49;

// ---------------------------------------------------------------------------
// Axes
// ---------------------------------------------------------------------------

/// Ordered coordinate values along one dimension. Never empty, never
/// changes once built, monotonic in the upstream's stated order.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAxis {
    name: String,
    values: Vec<f64>,
}

impl GridAxis {
    pub fn new(name: &str, values: Vec<f64>) -> Result<Self, ForecastError> {
        if values.is_empty() {
            return Err(ForecastError::DegenerateGrid(format!("axis '{}' is empty", name)));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::DegenerateGrid(format!(
                "axis '{}' contains non-finite coordinates",
                name
            )));
        }

        let ascending = values.windows(2).all(|w| w[0] <= w[1]);
        let descending = values.windows(2).all(|w| w[0] >= w[1]);
        if !ascending && !descending {
            return Err(ForecastError::DegenerateGrid(format!(
                "axis '{}' is not monotonic",
                name
            )));
        }

        Ok(Self {
            name: name.to_string(),
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

// ---------------------------------------------------------------------------
// Nearest-neighbour indexing
// ---------------------------------------------------------------------------

/// Index of the value closest to `target`; the first one wins on ties.
///
/// Targets outside the axis range resolve to the nearest boundary. This
/// is an approximation, not an exact-match lookup.
pub fn nearest(axis: &GridAxis, target: f64) -> usize {
    nearest_in(axis.values(), target).unwrap_or(0)
}

/// Same algorithm on the time axis (epoch seconds). Used to find where a
/// refresh cycle starts inside a longer upstream time span.
pub fn nearest_time_index(time_axis: &GridAxis, target_epoch: f64) -> usize {
    nearest(time_axis, target_epoch)
}

/// Slice-level nearest search. `None` only for an empty slice.
pub fn nearest_in(values: &[f64], target: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;

    for (i, v) in values.iter().enumerate() {
        let distance = (v - target).abs();
        match best {
            Some((_, d)) if distance >= d => {}
            _ => best = Some((i, distance)),
        }
    }

    best.map(|(i, _)| i)
}

/// Brings a ±180° longitude into the convention used by `axis`.
///
/// Only 0–360 axes need work: negative targets wrap by +360, and anything
/// past [`LON_WRAP_LIMIT`] is pulled back to [`LON_CLAMP`] so it cannot
/// index beyond the last valid column.
pub fn normalize_longitude(longitude: f64, axis: &GridAxis) -> f64 {
    if axis.max() <= 180.0 || longitude >= 0.0 {
        return longitude;
    }

    let wrapped = longitude + 360.0;
    if wrapped > LON_WRAP_LIMIT {
        LON_CLAMP
    } else {
        wrapped
    }
}

// ---------------------------------------------------------------------------
// Payload and cube
// ---------------------------------------------------------------------------

/// Decoded upstream grid, before validation.
#[derive(Debug, Clone, Default)]
pub struct GridPayload {
    /// Time coordinates as Unix epoch seconds.
    pub time: Vec<f64>,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    /// Flattened `(time, lat, lon)` samples per variable name.
    pub variables: BTreeMap<String, Vec<f64>>,
    pub fill_value: f64,
}

/// How a cube's time axis is cut from the payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    /// First timestep is the one nearest this epoch; `None` keeps index 0.
    pub start_epoch: Option<f64>,
    /// Keep every `stride`-th timestep from the start.
    pub stride: usize,
}

impl Sampling {
    pub fn every(stride: usize) -> Self {
        Self {
            start_epoch: None,
            stride,
        }
    }

    pub fn from_epoch(start_epoch: f64, stride: usize) -> Self {
        Self {
            start_epoch: Some(start_epoch),
            stride,
        }
    }
}

/// Validated, read-only time × lat × lon grid for one or more variables.
#[derive(Debug, Clone)]
pub struct GridCube {
    time: GridAxis,
    latitude: GridAxis,
    longitude: GridAxis,
    variables: BTreeMap<String, Vec<f64>>,
    fill_value: f64,
}

impl GridCube {
    /// Validates `payload` and applies `sampling` to its time axis.
    ///
    /// Fails when any axis is empty or unordered, when a variable's sample
    /// count differs from the product of the axis lengths, or when the
    /// sampled time range is empty.
    pub fn build(payload: GridPayload, sampling: Sampling) -> Result<Self, ForecastError> {
        if sampling.stride == 0 {
            return Err(ForecastError::DegenerateGrid("time stride must be at least 1".into()));
        }
        if payload.variables.is_empty() {
            return Err(ForecastError::DegenerateGrid("payload carries no variables".into()));
        }

        let time = GridAxis::new("time", payload.time)?;
        let latitude = GridAxis::new("latitude", payload.latitude)?;
        let longitude = GridAxis::new("longitude", payload.longitude)?;

        if time.values().windows(2).any(|w| w[1] <= w[0]) {
            return Err(ForecastError::DegenerateGrid(
                "time axis must be strictly increasing".into(),
            ));
        }

        let plane = latitude.len() * longitude.len();
        let expected = time.len() * plane;
        for (name, samples) in &payload.variables {
            if samples.len() != expected {
                return Err(ForecastError::ShapeMismatch {
                    variable: name.clone(),
                    expected,
                    actual: samples.len(),
                });
            }
        }

        let offset = sampling
            .start_epoch
            .map(|t| nearest_time_index(&time, t))
            .unwrap_or(0);
        let kept: Vec<usize> = (offset..time.len()).step_by(sampling.stride).collect();

        let time = GridAxis::new("time", kept.iter().map(|&i| time.values()[i]).collect())?;

        let variables = payload
            .variables
            .into_iter()
            .map(|(name, samples)| {
                let mut sampled = Vec::with_capacity(kept.len() * plane);
                for &t in &kept {
                    sampled.extend_from_slice(&samples[t * plane..(t + 1) * plane]);
                }
                (name, sampled)
            })
            .collect();

        Ok(Self {
            time,
            latitude,
            longitude,
            variables,
            fill_value: payload.fill_value,
        })
    }

    pub fn time(&self) -> &GridAxis {
        &self.time
    }

    pub fn latitude(&self) -> &GridAxis {
        &self.latitude
    }

    pub fn longitude(&self) -> &GridAxis {
        &self.longitude
    }

    pub fn fill_value(&self) -> f64 {
        self.fill_value
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// True for the fill sentinel (within float32 round-off) and NaN.
    pub fn is_fill(&self, value: f64) -> bool {
        value.is_nan() || (value - self.fill_value).abs() <= self.fill_value.abs() * 1e-6
    }

    /// Nearest `(lat_idx, lon_idx)` for a spot, normalising its longitude
    /// into this cube's convention first.
    pub fn locate(&self, spot: &Spot) -> (usize, usize) {
        let lon = normalize_longitude(spot.longitude, &self.longitude);
        (nearest(&self.latitude, spot.latitude), nearest(&self.longitude, lon))
    }

    /// Full time series of `variable` at one grid cell.
    pub fn time_slice(
        &self,
        variable: &str,
        lat_idx: usize,
        lon_idx: usize,
    ) -> Result<Vec<f64>, ForecastError> {
        let samples = self
            .variables
            .get(variable)
            .ok_or_else(|| ForecastError::MissingVariable(variable.to_string()))?;

        let ny = self.latitude.len();
        let nx = self.longitude.len();
        if lat_idx >= ny || lon_idx >= nx {
            return Err(ForecastError::DegenerateGrid(format!(
                "cell ({}, {}) outside {}x{} grid",
                lat_idx, lon_idx, ny, nx
            )));
        }

        Ok((0..self.time.len())
            .map(|t| samples[(t * ny + lat_idx) * nx + lon_idx])
            .collect())
    }

    /// Time axis as UTC instants (whole seconds).
    pub fn instants(&self) -> Result<Vec<DateTime<Utc>>, ForecastError> {
        self.time
            .values()
            .iter()
            .map(|&t| {
                DateTime::from_timestamp(t.round() as i64, 0).ok_or_else(|| {
                    ForecastError::DegenerateGrid(format!("time value {} out of range", t))
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
