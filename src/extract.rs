/// Grid-to-spot extraction.
///
/// Turns the shared wave cube (and, when available, the wind cube) into
/// one spot's formatted forecast series. The wave cube's time axis
/// defines the time table; wind is aligned to it by nearest timestep.
/// Missing samples are rendered as `"n/a"`, never as numbers.

use crate::grid::{nearest_time_index, GridCube};
use crate::model::{ForecastError, ForecastSeries, Quantity, Spot, TimeTable, MISSING_MARKER};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::warn;

/// Metres per second to knots.
pub const MS_TO_KNOTS: f64 = 1.9438444924574;

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Fixed-point rendering with `decimals` digits after the point.
pub fn format_fixed(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, value)
}

/// Wind speed in knots from eastward/northward components in m/s.
pub fn wind_speed_knots(u: f64, v: f64) -> f64 {
    (u * u + v * v).sqrt() * MS_TO_KNOTS
}

/// Meteorological "from" direction in degrees, in (0, 360].
pub fn wind_direction(u: f64, v: f64) -> f64 {
    let direction = 270.0 - v.atan2(u) * (180.0 / PI);
    if direction > 360.0 {
        direction - 360.0
    } else {
        direction
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Variable names of the wave product.
#[derive(Debug, Clone)]
pub struct WaveVariables {
    pub height: String,
    pub period: String,
    pub direction: String,
}

impl Default for WaveVariables {
    fn default() -> Self {
        Self {
            height: "VHM0".into(),
            period: "VTM10".into(),
            direction: "VMDR".into(),
        }
    }
}

/// Variable names of the wind product.
#[derive(Debug, Clone)]
pub struct WindVariables {
    pub u: String,
    pub v: String,
}

impl Default for WindVariables {
    fn default() -> Self {
        Self {
            u: "ugrd10m".into(),
            v: "vgrd10m".into(),
        }
    }
}

/// Produces a [`ForecastSeries`] for one spot from the cycle's cubes.
#[derive(Debug, Clone)]
pub struct SpotExtractor {
    pub waves: WaveVariables,
    pub wind: WindVariables,
    /// Wind timesteps further than this from a wave timestep are "n/a".
    pub wind_tolerance_secs: f64,
}

impl Default for SpotExtractor {
    fn default() -> Self {
        Self {
            waves: WaveVariables::default(),
            wind: WindVariables::default(),
            wind_tolerance_secs: 3.0 * 3600.0,
        }
    }
}

impl SpotExtractor {
    /// Extracts every published quantity for `spot`.
    ///
    /// `wind` is `None` when the wind payload could not be retrieved; the
    /// wind series are then all `"n/a"` and the wave data still goes out.
    /// Errors only come from the wave cube, and mean no record should be
    /// written for this spot.
    pub fn extract(
        &self,
        spot: &Spot,
        waves: &GridCube,
        wind: Option<&GridCube>,
    ) -> Result<ForecastSeries, ForecastError> {
        let time = TimeTable::from_instants(waves.instants()?)?;
        if time.is_empty() {
            return Err(ForecastError::DegenerateGrid("wave cube has no timesteps".into()));
        }

        let (lat_idx, lon_idx) = waves.locate(spot);
        let mut values = BTreeMap::new();

        for (quantity, variable) in [
            (Quantity::WaveHeight, &self.waves.height),
            (Quantity::WavePeriod, &self.waves.period),
            (Quantity::WaveDir, &self.waves.direction),
        ] {
            let series = waves.time_slice(variable, lat_idx, lon_idx)?;
            let formatted = series
                .into_iter()
                .map(|v| render(waves, v, quantity.decimals()))
                .collect();
            values.insert(quantity, formatted);
        }

        let (speed, direction) = match wind {
            Some(cube) => match self.wind_series(spot, cube, waves) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(spot = %spot.id, error = %e, "wind grid unusable for spot, publishing n/a");
                    missing_pair(time.len())
                }
            },
            None => missing_pair(time.len()),
        };
        values.insert(Quantity::WindSpeed, speed);
        values.insert(Quantity::WindDir, direction);

        Ok(ForecastSeries { time, values })
    }

    /// Wind speed and direction aligned to the wave cube's timesteps.
    fn wind_series(
        &self,
        spot: &Spot,
        wind: &GridCube,
        waves: &GridCube,
    ) -> Result<(Vec<String>, Vec<String>), ForecastError> {
        let (lat_idx, lon_idx) = wind.locate(spot);
        let u = wind.time_slice(&self.wind.u, lat_idx, lon_idx)?;
        let v = wind.time_slice(&self.wind.v, lat_idx, lon_idx)?;

        let mut speed = Vec::with_capacity(waves.time().len());
        let mut direction = Vec::with_capacity(waves.time().len());

        for &t in waves.time().values() {
            let k = nearest_time_index(wind.time(), t);
            let in_range = (wind.time().values()[k] - t).abs() <= self.wind_tolerance_secs;

            if !in_range || wind.is_fill(u[k]) || wind.is_fill(v[k]) {
                speed.push(MISSING_MARKER.to_string());
                direction.push(MISSING_MARKER.to_string());
                continue;
            }

            speed.push(format_fixed(
                wind_speed_knots(u[k], v[k]),
                Quantity::WindSpeed.decimals(),
            ));
            direction.push(format_fixed(
                wind_direction(u[k], v[k]),
                Quantity::WindDir.decimals(),
            ));
        }

        Ok((speed, direction))
    }
}

fn render(cube: &GridCube, value: f64, decimals: usize) -> String {
    if cube.is_fill(value) {
        MISSING_MARKER.to_string()
    } else {
        format_fixed(value, decimals)
    }
}

fn missing_pair(len: usize) -> (Vec<String>, Vec<String>) {
    (
        vec![MISSING_MARKER.to_string(); len],
        vec![MISSING_MARKER.to_string(); len],
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
