/// Upstream adapters.
///
/// Every upstream transport decodes its own wire format into a
/// [`GridPayload`] and nothing more; cube validation, sub-sampling and
/// extraction are shared. Each adapter gets its own file:
///
/// - `opendap` — OpenDAP `.dds` / `.ascii` slicing (wave grids, coverage)
/// - `erddap`  — ERDDAP griddap JSON (wind u/v grids, `time[last]` coverage)
/// - `wms`     — WMS GetCapabilities coverage + GetFeatureInfo point scraping
/// - `motu`    — subsetting CLI describe-product coverage probe
/// - `fixtures` (test only) — representative upstream payloads

pub mod erddap;
pub mod motu;
pub mod opendap;
pub mod wms;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::grid::GridPayload;
use crate::model::{Bounds, ForecastError};
use chrono::{DateTime, NaiveDate, Utc};
use std::thread;
use std::time::Duration;
use tracing::warn;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// What the core asks an upstream for: a region and a time window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridRequest {
    pub bounds: Bounds,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Something that can deliver a decoded grid for a request.
pub trait GridProvider: Send + Sync {
    /// Short label used in logs and errors.
    fn name(&self) -> &str;

    fn fetch(&self, request: &GridRequest) -> Result<GridPayload, ForecastError>;
}

/// Something that can report the last date covered by the forecast product.
pub trait CoverageSource: Send + Sync {
    fn name(&self) -> &str;

    fn coverage_end(&self) -> Result<NaiveDate, ForecastError>;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Capped retry with fixed backoff. Only transport failures are retried;
/// a malformed payload will not get better by asking again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn run<T>(
        &self,
        label: &str,
        mut op: impl FnMut() -> Result<T, ForecastError>,
    ) -> Result<T, ForecastError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op() {
                Err(e @ ForecastError::Transport { .. }) if attempt < attempts => {
                    warn!(source = label, attempt, error = %e, "upstream request failed, retrying");
                    if !self.backoff.is_zero() {
                        thread::sleep(self.backoff);
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Wraps a provider or coverage source with a [`RetryPolicy`].
pub struct Retrying<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P> Retrying<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<P: GridProvider> GridProvider for Retrying<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fetch(&self, request: &GridRequest) -> Result<GridPayload, ForecastError> {
        self.policy.run(self.inner.name(), || self.inner.fetch(request))
    }
}

impl<P: CoverageSource> CoverageSource for Retrying<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn coverage_end(&self) -> Result<NaiveDate, ForecastError> {
        self.policy.run(self.inner.name(), || self.inner.coverage_end())
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Blocking text GET used by the HTTP adapters.
pub trait HttpGet: Send + Sync {
    fn get_text(&self, source_name: &str, url: &str) -> Result<String, ForecastError>;
}

impl HttpGet for reqwest::blocking::Client {
    fn get_text(&self, source_name: &str, url: &str) -> Result<String, ForecastError> {
        fetch_text(self, source_name, url)
    }
}

/// Blocking client with the per-request timeout applied to every fetch.
pub fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, ForecastError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("wavecast/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ForecastError::transport("http", e))
}

/// GET `url` and return the body; non-2xx and timeouts are transport failures.
pub fn fetch_text(
    client: &reqwest::blocking::Client,
    source_name: &str,
    url: &str,
) -> Result<String, ForecastError> {
    let response = client.get(url).send().map_err(|e| {
        if e.is_timeout() {
            ForecastError::transport(source_name, format!("{} TIMEOUT", url))
        } else {
            ForecastError::transport(source_name, format!("{}: {}", url, e))
        }
    })?;

    if !response.status().is_success() {
        return Err(ForecastError::transport(
            source_name,
            format!("{} returned {}", url, response.status()),
        ));
    }

    response
        .text()
        .map_err(|e| ForecastError::transport(source_name, format!("{}: {}", url, e)))
}

/// Leading `YYYY-MM-DD` of an ISO 8601 timestamp or date.
pub fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim().trim_matches('"');
    let date = trimmed.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
