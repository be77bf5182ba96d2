/// Service configuration loader - parses wavecast.toml
///
/// Keeps upstream endpoints, variable names, concurrency and backends out
/// of the code, so a new dataset or a different deployment only needs a
/// config edit. Also wires the configured pieces into a [`Refresher`].

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::extract::{SpotExtractor, WaveVariables, WindVariables};
use crate::gate::UpdateGate;
use crate::ingest::erddap::ErddapProvider;
use crate::ingest::motu::MotuCoverage;
use crate::ingest::opendap::OpenDapProvider;
use crate::ingest::wms::WmsProvider;
use crate::ingest::{http_client, CoverageSource, GridProvider, RetryPolicy, Retrying};
use crate::model::{Bounds, ForecastError, DEFAULT_FILL_VALUE};
use crate::notify::{LogNotifier, Notifier, SendmailNotifier};
use crate::output::ForecastWriter;
use crate::refresh::{FetchMode, Feed, RefreshSettings, Refresher};
use crate::registry::{PgSpotRegistry, SpotRegistry, TomlSpotRegistry};
use crate::state::{FileUpdateStore, PgUpdateStore, UpdateStore};

pub const DEFAULT_CONFIG_PATH: &str = "wavecast.toml";

/// Root of wavecast.toml
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub refresh: RefreshConfig,
    pub region: RegionConfig,
    pub waves: WavesConfig,
    /// Omit to publish wave data only (wind columns all "n/a").
    pub wind: Option<WindConfig>,
    pub coverage: CoverageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub registry: RegistryConfig,
    pub state: StateConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    pub output_dir: PathBuf,
    pub stamp_file: Option<PathBuf>,
    /// Receives the coverage end date each successful cycle ran against.
    pub coverage_file: Option<PathBuf>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_min_days_remaining")]
    pub min_days_remaining: i64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_wind_tolerance_hours")]
    pub wind_time_tolerance_hours: f64,
    /// Box size (degrees) for per-spot requests.
    #[serde(default = "default_point_epsilon")]
    pub point_epsilon: f64,
}

/// Bounding box of the shared region fetch.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RegionConfig {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl From<RegionConfig> for Bounds {
    fn from(r: RegionConfig) -> Self {
        Bounds {
            min_lat: r.min_lat,
            max_lat: r.max_lat,
            min_lon: r.min_lon,
            max_lon: r.max_lon,
        }
    }
}

/// Upstream protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Opendap,
    Erddap,
    Wms,
    /// Coverage probe only.
    Motu,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WavesConfig {
    pub source: SourceKind,
    #[serde(default = "default_mode")]
    pub mode: FetchMode,
    pub base_url: String,
    /// Native timesteps per published timestep. For WMS this is the
    /// request spacing in hours instead.
    #[serde(default = "default_wave_stride")]
    pub time_stride: usize,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u64,
    #[serde(default = "default_height_var")]
    pub height_var: String,
    #[serde(default = "default_period_var")]
    pub period_var: String,
    #[serde(default = "default_direction_var")]
    pub direction_var: String,
    #[serde(default = "default_fill_value")]
    pub fill_value: f64,
    /// OpenDAP only: seconds per time unit and offset to Unix epoch.
    #[serde(default = "default_time_unit_secs")]
    pub time_unit_secs: f64,
    #[serde(default = "default_wave_time_offset_secs")]
    pub time_offset_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindConfig {
    pub source: SourceKind,
    #[serde(default = "default_mode")]
    pub mode: FetchMode,
    pub base_url: String,
    #[serde(default = "default_wind_stride")]
    pub time_stride: usize,
    #[serde(default = "default_u_var")]
    pub u_var: String,
    #[serde(default = "default_v_var")]
    pub v_var: String,
    #[serde(default = "default_fill_value")]
    pub fill_value: f64,
    #[serde(default = "default_time_unit_secs")]
    pub time_unit_secs: f64,
    #[serde(default)]
    pub time_offset_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverageConfig {
    pub source: SourceKind,
    /// Defaults to the wave feed's endpoint.
    pub base_url: Option<String>,
    #[serde(default = "default_motu_program")]
    pub motu_program: String,
    pub motu_service: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(r: RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: r.max_attempts,
            backoff: Duration::from_secs(r.backoff_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RegistryConfig {
    Toml { path: PathBuf },
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StateConfig {
    File { path: PathBuf },
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotifyConfig {
    #[default]
    Log,
    Sendmail {
        #[serde(default = "default_sendmail")]
        program: String,
        from: String,
        to: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_max_concurrency() -> usize { 25 }
fn default_min_days_remaining() -> i64 { 4 }
fn default_fetch_timeout_secs() -> u64 { 20 }
fn default_wind_tolerance_hours() -> f64 { 3.0 }
fn default_point_epsilon() -> f64 { 0.01 }
fn default_mode() -> FetchMode { FetchMode::Region }
fn default_wave_stride() -> usize { 3 }
fn default_wind_stride() -> usize { 1 }
fn default_horizon_days() -> u64 { 10 }
fn default_height_var() -> String { "VHM0".into() }
fn default_period_var() -> String { "VTM10".into() }
fn default_direction_var() -> String { "VMDR".into() }
fn default_u_var() -> String { "ugrd10m".into() }
fn default_v_var() -> String { "vgrd10m".into() }
fn default_fill_value() -> f64 { DEFAULT_FILL_VALUE }
fn default_time_unit_secs() -> f64 { 3600.0 }
fn default_wave_time_offset_secs() -> f64 { 43200.0 }
fn default_motu_program() -> String { "motu-client.py".into() }
fn default_max_attempts() -> u32 { 2 }
fn default_backoff_secs() -> u64 { 3 }
fn default_sendmail() -> String { "/usr/sbin/sendmail".into() }
fn default_log_level() -> String { "info".into() }

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ServiceConfig {
    /// Reads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ForecastError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ForecastError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
            .map_err(|e| ForecastError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ForecastError> {
        let config: ServiceConfig =
            toml::from_str(contents).map_err(|e| ForecastError::Config(format!("Failed to parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ForecastError> {
        let invalid = |msg: String| Err(ForecastError::Config(msg));

        if self.refresh.max_concurrency == 0 {
            return invalid("refresh.max_concurrency must be at least 1".into());
        }
        if self.waves.time_stride == 0 {
            return invalid("waves.time_stride must be at least 1".into());
        }
        if self.region.min_lat > self.region.max_lat || self.region.min_lon > self.region.max_lon {
            return invalid("region bounds are inverted".into());
        }
        if self.waves.source == SourceKind::Motu {
            return invalid("waves.source = \"motu\" is a coverage probe, not a grid source".into());
        }
        // WMS answers one pixel at the box corner, so it only works per spot.
        if self.waves.source == SourceKind::Wms && self.waves.mode != FetchMode::PerSpot {
            return invalid("waves.source = \"wms\" requires mode = \"per_spot\"".into());
        }
        if let Some(wind) = &self.wind {
            if wind.source == SourceKind::Motu {
                return invalid("wind.source = \"motu\" is a coverage probe, not a grid source".into());
            }
            if wind.source == SourceKind::Wms && wind.mode != FetchMode::PerSpot {
                return invalid("wind.source = \"wms\" requires mode = \"per_spot\"".into());
            }
            if wind.time_stride == 0 {
                return invalid("wind.time_stride must be at least 1".into());
            }
        }
        if self.coverage.source == SourceKind::Motu && self.coverage.motu_service.is_none() {
            return invalid("coverage.motu_service is required for the motu probe".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// How one grid feed should be constructed.
struct GridPlan<'a> {
    source: SourceKind,
    base_url: &'a str,
    variables: Vec<String>,
    stride: usize,
    fill_value: f64,
    time_unit_secs: f64,
    time_offset_secs: f64,
}

impl ServiceConfig {
    fn client(&self) -> Result<reqwest::blocking::Client, ForecastError> {
        http_client(Duration::from_secs(self.refresh.fetch_timeout_secs))
    }

    fn grid_feed(&self, plan: GridPlan<'_>, mode: FetchMode) -> Result<Feed, ForecastError> {
        let client = self.client()?;
        let policy = RetryPolicy::from(self.retry);

        // WMS requests are already spaced by the stride, in hours.
        let stride = if plan.source == SourceKind::Wms { 1 } else { plan.stride };

        let provider: Arc<dyn GridProvider> = match plan.source {
            SourceKind::Opendap => Arc::new(Retrying::new(
                OpenDapProvider::new(
                    client,
                    plan.base_url,
                    plan.variables,
                    plan.time_unit_secs,
                    plan.time_offset_secs,
                    plan.fill_value,
                ),
                policy,
            )),
            SourceKind::Erddap => Arc::new(Retrying::new(
                ErddapProvider::new(client, plan.base_url, plan.variables, plan.fill_value),
                policy,
            )),
            SourceKind::Wms => Arc::new(Retrying::new(
                WmsProvider::new(client, plan.base_url, plan.variables, plan.stride as u32, plan.fill_value),
                policy,
            )),
            SourceKind::Motu => {
                return Err(ForecastError::Config("motu cannot deliver grids".into()));
            }
        };

        Ok(Feed { provider, mode, stride })
    }

    pub fn wave_feed(&self) -> Result<Feed, ForecastError> {
        let w = &self.waves;
        self.grid_feed(
            GridPlan {
                source: w.source,
                base_url: &w.base_url,
                variables: vec![w.height_var.clone(), w.period_var.clone(), w.direction_var.clone()],
                stride: w.time_stride,
                fill_value: w.fill_value,
                time_unit_secs: w.time_unit_secs,
                time_offset_secs: w.time_offset_secs,
            },
            w.mode,
        )
    }

    pub fn wind_feed(&self) -> Result<Option<Feed>, ForecastError> {
        let Some(w) = &self.wind else { return Ok(None) };
        self.grid_feed(
            GridPlan {
                source: w.source,
                base_url: &w.base_url,
                variables: vec![w.u_var.clone(), w.v_var.clone()],
                stride: w.time_stride,
                fill_value: w.fill_value,
                time_unit_secs: w.time_unit_secs,
                time_offset_secs: w.time_offset_secs,
            },
            w.mode,
        )
        .map(Some)
    }

    pub fn coverage_source(&self) -> Result<Box<dyn CoverageSource>, ForecastError> {
        let policy = RetryPolicy::from(self.retry);
        let base_url = self.coverage.base_url.as_deref().unwrap_or(&self.waves.base_url);
        let w = &self.waves;

        let source: Box<dyn CoverageSource> = match self.coverage.source {
            SourceKind::Opendap => Box::new(Retrying::new(
                OpenDapProvider::new(
                    self.client()?,
                    base_url,
                    vec![w.height_var.clone()],
                    w.time_unit_secs,
                    w.time_offset_secs,
                    w.fill_value,
                ),
                policy,
            )),
            SourceKind::Erddap => Box::new(Retrying::new(
                ErddapProvider::new(self.client()?, base_url, vec![w.height_var.clone()], w.fill_value),
                policy,
            )),
            SourceKind::Wms => Box::new(Retrying::new(
                WmsProvider::new(self.client()?, base_url, vec![w.height_var.clone()], 1, w.fill_value),
                policy,
            )),
            SourceKind::Motu => {
                let service = self
                    .coverage
                    .motu_service
                    .as_deref()
                    .ok_or_else(|| ForecastError::Config("coverage.motu_service missing".into()))?;
                Box::new(MotuCoverage::new(&self.coverage.motu_program, service))
            }
        };
        Ok(source)
    }

    pub fn spot_registry(&self) -> Result<Box<dyn SpotRegistry>, ForecastError> {
        let registry: Box<dyn SpotRegistry> = match &self.registry {
            RegistryConfig::Toml { path } => Box::new(TomlSpotRegistry::new(path)),
            RegistryConfig::Postgres => Box::new(PgSpotRegistry::connect()?),
        };
        Ok(registry)
    }

    pub fn update_store(&self) -> Result<Box<dyn UpdateStore>, ForecastError> {
        let store: Box<dyn UpdateStore> = match &self.state {
            StateConfig::File { path } => Box::new(FileUpdateStore::new(path)),
            StateConfig::Postgres => Box::new(PgUpdateStore::connect()?),
        };
        Ok(store)
    }

    pub fn notifier(&self) -> Box<dyn Notifier> {
        match &self.notify {
            NotifyConfig::Log => Box::new(LogNotifier),
            NotifyConfig::Sendmail { program, from, to } => Box::new(SendmailNotifier::new(program, from, to)),
        }
    }

    pub fn extractor(&self) -> SpotExtractor {
        let wind = self
            .wind
            .as_ref()
            .map(|w| WindVariables { u: w.u_var.clone(), v: w.v_var.clone() })
            .unwrap_or_default();

        SpotExtractor {
            waves: WaveVariables {
                height: self.waves.height_var.clone(),
                period: self.waves.period_var.clone(),
                direction: self.waves.direction_var.clone(),
            },
            wind,
            wind_tolerance_secs: self.refresh.wind_time_tolerance_hours * 3600.0,
        }
    }

    pub fn settings(&self) -> RefreshSettings {
        RefreshSettings {
            region: self.region.into(),
            horizon_days: self.waves.horizon_days,
            max_concurrency: self.refresh.max_concurrency,
            point_epsilon: self.refresh.point_epsilon,
            stamp_file: self.refresh.stamp_file.clone(),
            coverage_file: self.refresh.coverage_file.clone(),
        }
    }

    /// Assembles a ready-to-run orchestrator. Database backends connect here.
    pub fn build_refresher(&self) -> Result<Refresher, ForecastError> {
        Ok(Refresher {
            gate: UpdateGate::new(self.refresh.min_days_remaining),
            coverage: self.coverage_source()?,
            registry: self.spot_registry()?,
            store: self.update_store()?,
            notifier: self.notifier(),
            writer: ForecastWriter::new(&self.refresh.output_dir),
            extractor: self.extractor(),
            waves: self.wave_feed()?,
            wind: self.wind_feed()?,
            settings: self.settings(),
        })
    }
}
