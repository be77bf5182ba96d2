/// Tracing subscriber setup.
///
/// `RUST_LOG` wins over the configured level. Logs go to stderr so the
/// run banner on stdout stays readable under cron mail.

use crate::model::ForecastError;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter from `RUST_LOG`, falling back to `level` (e.g. `"info"` or
/// `"warn,wavecast_service=debug"`).
pub fn filter(level: &str) -> Result<EnvFilter, ForecastError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| ForecastError::Config(format!("invalid log level '{}': {}", level, e)))
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(level: &str, json: bool) -> Result<(), ForecastError> {
    let builder = fmt()
        .with_env_filter(filter(level)?)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ForecastError::Config(format!("cannot install logger: {}", e)))
}
