/// Persisted per-spot forecast document.
///
/// The JSON shape is a contract with the website/app and is parsed by key
/// and by position, so field order and compactness matter:
///
/// ```text
/// {"time":[["2024-05-01",...],["00",...]],"waveHeight":[...],"wavePeriod":[...],
///  "waveDir":[...],"windSpeed":[...],"windDir":[...]}
/// ```

use crate::model::{ForecastError, ForecastSeries, Quantity, TimeTable};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    /// `[dates, hours]`, aligned index-for-index with every series.
    pub time: (Vec<String>, Vec<String>),
    #[serde(rename = "waveHeight")]
    pub wave_height: Vec<String>,
    #[serde(rename = "wavePeriod")]
    pub wave_period: Vec<String>,
    #[serde(rename = "waveDir")]
    pub wave_dir: Vec<String>,
    #[serde(rename = "windSpeed")]
    pub wind_speed: Vec<String>,
    #[serde(rename = "windDir")]
    pub wind_dir: Vec<String>,
}

impl ForecastRecord {
    /// Assembles a record from a time table and per-quantity series.
    /// Every series must match the time table's length.
    pub fn new(
        time: &TimeTable,
        wave_height: Vec<String>,
        wave_period: Vec<String>,
        wave_dir: Vec<String>,
        wind_speed: Vec<String>,
        wind_dir: Vec<String>,
    ) -> Result<Self, ForecastError> {
        let record = Self {
            time: (time.dates().to_vec(), time.hours().to_vec()),
            wave_height,
            wave_period,
            wave_dir,
            wind_speed,
            wind_dir,
        };

        let n = time.len();
        for (key, len) in [
            (Quantity::WaveHeight.key(), record.wave_height.len()),
            (Quantity::WavePeriod.key(), record.wave_period.len()),
            (Quantity::WaveDir.key(), record.wave_dir.len()),
            (Quantity::WindSpeed.key(), record.wind_speed.len()),
            (Quantity::WindDir.key(), record.wind_dir.len()),
        ] {
            if len != n {
                return Err(ForecastError::DegenerateGrid(format!(
                    "series '{}' has {} entries, time table has {}",
                    key, len, n
                )));
            }
        }

        Ok(record)
    }

    pub fn from_series(mut series: ForecastSeries) -> Result<Self, ForecastError> {
        let mut take = |q: Quantity| series.values.remove(&q).unwrap_or_default();
        let wave_height = take(Quantity::WaveHeight);
        let wave_period = take(Quantity::WavePeriod);
        let wave_dir = take(Quantity::WaveDir);
        let wind_speed = take(Quantity::WindSpeed);
        let wind_dir = take(Quantity::WindDir);

        Self::new(&series.time, wave_height, wave_period, wave_dir, wind_speed, wind_dir)
    }

    pub fn len(&self) -> usize {
        self.time.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.0.is_empty()
    }

    /// Compact JSON, no inserted whitespace.
    pub fn to_json(&self) -> Result<String, ForecastError> {
        serde_json::to_string(self)
            .map_err(|e| ForecastError::Persistence(format!("cannot serialise record: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
