/// Coverage probe through the CMEMS subsetting client (`motu-client.py`).
///
/// `motu-client.py -s <service> -D -q -o console` prints the product
/// description, which includes one line like:
///
/// ```text
/// <timeCoverage code="OK" msg="OK" end="2024-05-16T00:00:00.000Z" start="..."/>
/// ```
///
/// Only the coverage probe is supported; the client's NetCDF downloads are
/// not decoded.

use crate::ingest::{parse_iso_date, CoverageSource};
use crate::model::ForecastError;
use chrono::NaiveDate;
use std::process::Command;
use tracing::debug;

const SOURCE: &str = "motu";

pub struct MotuCoverage {
    program: String,
    service_id: String,
}

impl MotuCoverage {
    pub fn new(program: &str, service_id: &str) -> Self {
        Self {
            program: program.to_string(),
            service_id: service_id.to_string(),
        }
    }
}

impl CoverageSource for MotuCoverage {
    fn name(&self) -> &str {
        SOURCE
    }

    fn coverage_end(&self) -> Result<NaiveDate, ForecastError> {
        debug!(program = %self.program, service = %self.service_id, "describing product");

        let output = Command::new(&self.program)
            .args(["-s", &self.service_id, "-D", "-q", "-o", "console"])
            .output()
            .map_err(|e| ForecastError::Coverage(format!("cannot run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(ForecastError::Coverage(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        parse_motu_coverage(&String::from_utf8_lossy(&output.stdout))
    }
}

/// End date of the `timeCoverage` element, which must carry `msg="OK"`.
pub fn parse_motu_coverage(text: &str) -> Result<NaiveDate, ForecastError> {
    let line = text
        .lines()
        .find(|l| l.contains("timeCoverage"))
        .ok_or_else(|| ForecastError::Coverage("no timeCoverage in describe output".into()))?;

    if !line.contains("msg=\"OK\"") {
        return Err(ForecastError::Coverage(format!("timeCoverage not OK: {}", line.trim())));
    }

    attribute(line, "end")
        .and_then(parse_iso_date)
        .ok_or_else(|| ForecastError::Coverage(format!("unreadable timeCoverage end: {}", line.trim())))
}

fn attribute<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let key = format!(" {}=\"", name);
    let start = line.find(&key)? + key.len();
    let len = line[start..].find('"')?;
    Some(&line[start..start + len])
}
