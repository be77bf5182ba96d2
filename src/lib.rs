/// wavecast_service: per-spot wave and wind forecasts from gridded upstreams.
///
/// # Module structure
///
/// ```text
/// wavecast_service
/// ├── model       — shared data types (Spot, Bounds, TimeTable, ForecastSeries, ForecastError)
/// ├── grid        — GridAxis / GridCube, nearest-index lookup, longitude normalisation
/// ├── extract     — SpotExtractor: wave series, wind speed/direction, fill handling
/// ├── record      — ForecastRecord: the persisted per-spot JSON document
/// ├── gate        — UpdateGate state machine (freshness + upstream coverage)
/// ├── state       — last-refresh date (JSON file or PostgreSQL)
/// ├── registry    — spot registry (spots.toml or PostgreSQL)
/// ├── db          — PostgreSQL connection helpers
/// ├── ingest
/// │   ├── opendap — THREDDS OpenDAP .dds/.ascii slicing (waves, coverage)
/// │   ├── erddap  — ERDDAP griddap JSON (wind u/v, time[last] coverage)
/// │   ├── wms     — WMS GetCapabilities coverage + GetFeatureInfo point grids
/// │   ├── motu    — subsetting client describe-product coverage probe
/// │   └── fixtures (test only) — representative upstream payloads
/// ├── output      — atomic per-spot JSON writer, update stamp
/// ├── notify      — cycle failure notices (log, sendmail)
/// ├── refresh     — Refresher: gate → shared cubes → bounded spot fan-out → state
/// ├── config      — wavecast.toml loader and wiring
/// └── logging     — tracing subscriber setup
/// ```

/// Public modules
pub mod config;
pub mod db;
pub mod extract;
pub mod gate;
pub mod grid;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod notify;
pub mod output;
pub mod record;
pub mod refresh;
pub mod registry;
pub mod state;
