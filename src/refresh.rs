/// Refresh orchestrator: one cycle from gate to published files.
///
/// 1. Read the last refresh date and run the [`UpdateGate`].
/// 2. List spots from the registry (once, before any fan-out).
/// 3. Build the shared cubes for feeds in `Region` mode.
/// 4. Fan out one task per spot in windows of `max_concurrency`; every
///    window is joined before the next starts.
/// 5. If every spot was attempted and every write succeeded, write the
///    update stamp and coverage date, then advance the state to today.
///
/// Per-spot failures (fetch, extraction) leave that spot's previous file
/// in place and do not stop the cycle. A failed shared wave cube, a failed
/// output write, or a failed state write fails the whole cycle; the state
/// is then left alone so the next scheduled run retries.

use crate::extract::SpotExtractor;
use crate::gate::{GateInput, GateState, SkipReason, UpdateGate};
use crate::grid::{GridCube, Sampling};
use crate::ingest::{CoverageSource, GridProvider, GridRequest};
use crate::model::{Bounds, ForecastError, Spot};
use crate::notify::Notifier;
use crate::output::{write_coverage_date, write_update_stamp, ForecastWriter};
use crate::record::ForecastRecord;
use crate::registry::SpotRegistry;
use crate::state::UpdateStore;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use threadpool::ThreadPool;
use tracing::{debug, error, info, warn};

const NOTICE_SUBJECT: &str = "wavecast notice";

// ---------------------------------------------------------------------------
// Configuration types
// ---------------------------------------------------------------------------

/// Where a feed's cube comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// One cube over the configured region, shared by every spot task.
    Region,
    /// A point-sized cube fetched inside each spot task.
    PerSpot,
}

/// An upstream grid plus how to fetch and sample it.
#[derive(Clone)]
pub struct Feed {
    pub provider: Arc<dyn GridProvider>,
    pub mode: FetchMode,
    /// Keep every `stride`-th native timestep.
    pub stride: usize,
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub region: Bounds,
    /// Forward window requested from upstream, capped by coverage.
    pub horizon_days: u64,
    pub max_concurrency: usize,
    /// Box size in degrees for per-spot requests.
    pub point_epsilon: f64,
    pub stamp_file: Option<PathBuf>,
    pub coverage_file: Option<PathBuf>,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            region: Bounds { min_lat: 30.0, max_lat: 46.0, min_lon: -10.0, max_lon: 36.5 },
            horizon_days: 10,
            max_concurrency: 25,
            point_epsilon: 0.01,
            stamp_file: None,
            coverage_file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle results
// ---------------------------------------------------------------------------

/// What happened to one spot.
#[derive(Debug)]
pub enum SpotOutcome {
    Written(PathBuf),
    /// Fetch or extraction failed; the previous file is untouched.
    Failed(ForecastError),
    /// The record was built but could not be persisted.
    WriteFailed(ForecastError),
    /// The task died without reporting.
    Lost,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    pub spots: usize,
    pub written: usize,
    pub failed: Vec<String>,
    pub write_failed: Vec<String>,
    pub lost: usize,
}

impl CycleReport {
    fn record(&mut self, spot_id: &str, outcome: &SpotOutcome) {
        match outcome {
            SpotOutcome::Written(_) => self.written += 1,
            SpotOutcome::Failed(_) => self.failed.push(spot_id.to_string()),
            SpotOutcome::WriteFailed(_) => self.write_failed.push(spot_id.to_string()),
            SpotOutcome::Lost => self.lost += 1,
        }
    }

    /// Every spot has an outcome.
    pub fn all_attempted(&self) -> bool {
        self.written + self.failed.len() + self.write_failed.len() + self.lost == self.spots
    }
}

#[derive(Debug, PartialEq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Completed { date: NaiveDate, report: CycleReport },
}

// ---------------------------------------------------------------------------
// Per-cycle context
// ---------------------------------------------------------------------------

/// Where a spot task gets a cube from.
enum CubeSource {
    Shared(Arc<GridCube>),
    PerSpot(Feed),
    Unavailable,
}

/// Read-only state handed to every spot task of one cycle.
pub struct CycleContext {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    point_epsilon: f64,
    waves: CubeSource,
    wind: CubeSource,
    extractor: SpotExtractor,
    writer: ForecastWriter,
}

impl CycleContext {
    fn cube_for(&self, source: &CubeSource, spot: &Spot) -> Result<Option<Arc<GridCube>>, ForecastError> {
        match source {
            CubeSource::Shared(cube) => Ok(Some(Arc::clone(cube))),
            CubeSource::Unavailable => Ok(None),
            CubeSource::PerSpot(feed) => {
                let request = GridRequest {
                    bounds: Bounds::around(spot, self.point_epsilon),
                    start: self.start,
                    end: self.end,
                };
                build_cube(feed, &request, self.start).map(|c| Some(Arc::new(c)))
            }
        }
    }

    /// Fetch, extract, format and persist one spot.
    pub fn process_spot(&self, spot: &Spot) -> SpotOutcome {
        // An id that cannot name a file is a bad registry row, not an I/O failure.
        if let Err(e) = self.writer.path_for(&spot.id) {
            return SpotOutcome::Failed(e);
        }

        let waves = match self.cube_for(&self.waves, spot) {
            Ok(Some(cube)) => cube,
            Ok(None) => return SpotOutcome::Failed(ForecastError::DegenerateGrid("no wave grid".into())),
            Err(e) => return SpotOutcome::Failed(e),
        };

        let wind = match self.cube_for(&self.wind, spot) {
            Ok(cube) => cube,
            Err(e) => {
                warn!(spot = %spot.id, error = %e, "wind unavailable for spot, publishing n/a");
                None
            }
        };

        let record = match self
            .extractor
            .extract(spot, &waves, wind.as_deref())
            .and_then(ForecastRecord::from_series)
        {
            Ok(record) => record,
            Err(e) => return SpotOutcome::Failed(e),
        };

        match self.writer.write(&spot.id, &record) {
            Ok(path) => SpotOutcome::Written(path),
            Err(e) => SpotOutcome::WriteFailed(e),
        }
    }
}

fn build_cube(feed: &Feed, request: &GridRequest, start: DateTime<Utc>) -> Result<GridCube, ForecastError> {
    let payload = feed.provider.fetch(request)?;
    GridCube::build(payload, Sampling::from_epoch(start.timestamp() as f64, feed.stride))
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Refresher {
    pub gate: UpdateGate,
    pub coverage: Box<dyn CoverageSource>,
    pub registry: Box<dyn SpotRegistry>,
    pub store: Box<dyn UpdateStore>,
    pub notifier: Box<dyn Notifier>,
    pub writer: ForecastWriter,
    pub extractor: SpotExtractor,
    pub waves: Feed,
    pub wind: Option<Feed>,
    pub settings: RefreshSettings,
}

impl Refresher {
    /// Runs one cycle as of `now`. `Err` means a cycle-level failure; the
    /// notifier has already been told.
    pub fn run_cycle(&mut self, now: DateTime<Utc>, force: bool) -> Result<CycleOutcome, ForecastError> {
        let result = self.try_cycle(now, force);
        if let Err(e) = &result {
            error!(error = %e, "refresh cycle failed");
            if let Err(notify_err) = self.notifier.notify(NOTICE_SUBJECT, &e.to_string()) {
                warn!(error = %notify_err, "could not send failure notice");
            }
        }
        result
    }

    fn try_cycle(&mut self, now: DateTime<Utc>, force: bool) -> Result<CycleOutcome, ForecastError> {
        let today = now.date_naive();
        let last_refresh = self.store.last_refresh()?;

        let gate_input = GateInput {
            today,
            last_refresh,
            coverage: self.coverage.as_ref(),
            force,
        };
        let coverage_end = match self.gate.evaluate(&gate_input) {
            GateState::Authorized { coverage_end, .. } => coverage_end,
            GateState::Skipped(reason) => return Ok(CycleOutcome::Skipped(reason)),
            other => {
                return Err(ForecastError::Config(format!("gate stopped in non-terminal state {:?}", other)))
            }
        };

        let spots = self.registry.list_spots()?;
        info!(spots = spots.len(), %coverage_end, "starting refresh cycle");

        let (start, end) = cycle_window(today, coverage_end, self.settings.horizon_days);
        let ctx = Arc::new(self.prepare_context(start, end)?);

        let report = run_windows(&ctx, spots, self.settings.max_concurrency);
        info!(
            written = report.written,
            failed = report.failed.len(),
            write_failed = report.write_failed.len(),
            lost = report.lost,
            "refresh cycle finished"
        );

        if !report.all_attempted() {
            return Err(ForecastError::Persistence(format!(
                "only {} of {} spots accounted for",
                report.spots - report.lost,
                report.spots
            )));
        }
        if !report.write_failed.is_empty() {
            return Err(ForecastError::Persistence(format!(
                "could not write forecasts for spots {}",
                report.write_failed.join(", ")
            )));
        }

        if let Some(stamp) = &self.settings.stamp_file {
            write_update_stamp(stamp, now)?;
        }
        if let Some(path) = &self.settings.coverage_file {
            write_coverage_date(path, coverage_end)?;
        }
        self.store.record_refresh(today)?;
        info!(%today, "update state advanced");

        Ok(CycleOutcome::Completed { date: today, report })
    }

    /// Builds the shared cubes. A wave failure here aborts the cycle; a
    /// wind failure only turns the wind columns into "n/a".
    fn prepare_context(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<CycleContext, ForecastError> {
        let region = GridRequest { bounds: self.settings.region, start, end };

        let waves = match self.waves.mode {
            FetchMode::PerSpot => CubeSource::PerSpot(self.waves.clone()),
            FetchMode::Region => {
                let cube = build_cube(&self.waves, &region, start)?;
                info!(
                    source = self.waves.provider.name(),
                    timesteps = cube.time().len(),
                    "wave grid ready"
                );
                CubeSource::Shared(Arc::new(cube))
            }
        };

        let wind = match &self.wind {
            None => CubeSource::Unavailable,
            Some(feed) if feed.mode == FetchMode::PerSpot => CubeSource::PerSpot(feed.clone()),
            Some(feed) => match build_cube(feed, &region, start) {
                Ok(cube) => {
                    info!(source = feed.provider.name(), timesteps = cube.time().len(), "wind grid ready");
                    CubeSource::Shared(Arc::new(cube))
                }
                Err(e) => {
                    warn!(source = feed.provider.name(), error = %e, "wind grid unavailable, wind will be n/a");
                    CubeSource::Unavailable
                }
            },
        };

        Ok(CycleContext {
            start,
            end,
            point_epsilon: self.settings.point_epsilon,
            waves,
            wind,
            extractor: self.extractor.clone(),
            writer: self.writer.clone(),
        })
    }
}

/// Requested time window: from today 00:00 UTC for `horizon_days`, but
/// never past the last second of the advertised coverage day.
pub fn cycle_window(today: NaiveDate, coverage_end: NaiveDate, horizon_days: u64) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = today.and_time(chrono::NaiveTime::MIN).and_utc();
    let horizon = today
        .checked_add_days(Days::new(horizon_days))
        .unwrap_or(today)
        .and_time(chrono::NaiveTime::MIN)
        .and_utc();
    let coverage = coverage_end.and_time(chrono::NaiveTime::MIN).and_utc() + chrono::Duration::seconds(86_399);
    (start, horizon.min(coverage).max(start))
}

/// Runs every spot through `ctx` in joined windows of `max_concurrency`.
pub fn run_windows(ctx: &Arc<CycleContext>, spots: Vec<Spot>, max_concurrency: usize) -> CycleReport {
    let width = max_concurrency.max(1);
    let pool = ThreadPool::with_name("spot".into(), width);
    let mut report = CycleReport {
        spots: spots.len(),
        ..CycleReport::default()
    };

    for (n, window) in spots.chunks(width).enumerate() {
        let (tx, rx) = mpsc::channel();

        for spot in window {
            let ctx = Arc::clone(ctx);
            let tx = tx.clone();
            let spot = spot.clone();
            pool.execute(move || {
                let outcome = ctx.process_spot(&spot);
                // The receiver outlives the window, so this cannot fail.
                let _ = tx.send((spot.id, outcome));
            });
        }
        drop(tx);

        // Barrier: nothing from the next window starts before this one ends.
        pool.join();

        let mut reported = 0;
        for (spot_id, outcome) in rx.try_iter() {
            match &outcome {
                SpotOutcome::Written(path) => debug!(spot = %spot_id, path = %path.display(), "forecast written"),
                SpotOutcome::Failed(e) => warn!(spot = %spot_id, error = %e, "spot skipped, previous forecast kept"),
                SpotOutcome::WriteFailed(e) => error!(spot = %spot_id, error = %e, "forecast write failed"),
                SpotOutcome::Lost => {}
            }
            report.record(&spot_id, &outcome);
            reported += 1;
        }

        for _ in reported..window.len() {
            report.record("", &SpotOutcome::Lost);
        }
        if reported < window.len() {
            error!(window = n, lost = window.len() - reported, "spot tasks died without reporting");
        }
    }

    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridPayload;
    use crate::model::TimeTable;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_cycle_window_capped_by_coverage() {
        let (start, end) = cycle_window(date(10), date(14), 10);
        assert_eq!(start.to_rfc3339(), "2024-05-10T00:00:00+00:00");
        // The whole coverage day is requested, not just its midnight.
        assert_eq!(end.to_rfc3339(), "2024-05-14T23:59:59+00:00");

        let (_, end) = cycle_window(date(10), date(25), 10);
        assert_eq!(end.to_rfc3339(), "2024-05-20T00:00:00+00:00");
    }

    #[test]
    fn test_report_accounting() {
        let mut report = CycleReport { spots: 3, ..CycleReport::default() };
        report.record("1", &SpotOutcome::Written(PathBuf::from("1.json")));
        report.record("2", &SpotOutcome::Failed(ForecastError::DegenerateGrid("x".into())));
        assert!(!report.all_attempted());
        report.record("", &SpotOutcome::Lost);
        assert!(report.all_attempted());
        assert_eq!(report.failed, vec!["2"]);
    }

    /// One cell, two timesteps, wave variables only.
    fn shared_wave_cube(start: DateTime<Utc>) -> GridCube {
        let t0 = start.timestamp() as f64;
        let mut variables = BTreeMap::new();
        variables.insert("VHM0".to_string(), vec![1.25, 1.5]);
        variables.insert("VTM10".to_string(), vec![6.0, 6.5]);
        variables.insert("VMDR".to_string(), vec![270.0, 1e20]);
        GridCube::build(
            GridPayload {
                time: vec![t0, t0 + 10800.0],
                latitude: vec![37.0],
                longitude: vec![-8.5],
                variables,
                fill_value: 1e20,
            },
            Sampling::every(1),
        )
        .unwrap()
    }

    #[test]
    fn test_run_windows_writes_every_spot() {
        let temp_dir = TempDir::new().unwrap();
        let start = date(10).and_time(chrono::NaiveTime::MIN).and_utc();
        let ctx = Arc::new(CycleContext {
            start,
            end: start,
            point_epsilon: 0.01,
            waves: CubeSource::Shared(Arc::new(shared_wave_cube(start))),
            wind: CubeSource::Unavailable,
            extractor: SpotExtractor::default(),
            writer: ForecastWriter::new(temp_dir.path()),
        });

        let spots: Vec<Spot> = (0..7).map(|i| Spot::new(i.to_string(), 37.0, -8.5)).collect();
        let report = run_windows(&ctx, spots, 3);

        assert_eq!(report.written, 7);
        assert!(report.all_attempted());

        let text = std::fs::read_to_string(temp_dir.path().join("4.json")).unwrap();
        let record: ForecastRecord = serde_json::from_str(&text).unwrap();
        let table = TimeTable::from_instants(vec![start, start + chrono::Duration::hours(3)]).unwrap();
        assert_eq!(record.time.1, table.hours().to_vec());
        assert_eq!(record.wave_dir, vec!["270", "n/a"]);
        assert_eq!(record.wind_speed, vec!["n/a", "n/a"]);
    }

    #[test]
    fn test_unusable_spot_id_fails_only_that_spot() {
        let temp_dir = TempDir::new().unwrap();
        let start = date(10).and_time(chrono::NaiveTime::MIN).and_utc();
        let ctx = Arc::new(CycleContext {
            start,
            end: start,
            point_epsilon: 0.01,
            waves: CubeSource::Shared(Arc::new(shared_wave_cube(start))),
            wind: CubeSource::Unavailable,
            extractor: SpotExtractor::default(),
            writer: ForecastWriter::new(temp_dir.path()),
        });

        let spots = vec![Spot::new("1", 37.0, -8.5), Spot::new("lido/nord", 37.0, -8.5)];
        let report = run_windows(&ctx, spots, 2);

        assert_eq!(report.written, 1);
        assert_eq!(report.failed, vec!["lido/nord"]);
        assert!(report.write_failed.is_empty());
        assert!(report.all_attempted());
    }
}
