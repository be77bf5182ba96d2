/// WMS adapter: GetCapabilities coverage and GetFeatureInfo point grids.
///
/// The THREDDS WMS endpoint (`.../thredds/wms/<dataset>`) has no bulk
/// download, so a point grid is scraped one request per timestep per
/// variable. The bounding box is the spot plus a small epsilon, and the
/// queried pixel is the bottom-left one (`I=0&J=479` on a 640×480 map),
/// i.e. the spot itself.
///
/// Samples that fail or come back as `none` (land) become the fill value.
/// If every request fails the fetch is a transport failure.

use crate::grid::GridPayload;
use crate::ingest::{parse_iso_date, CoverageSource, GridProvider, GridRequest, HttpGet};
use crate::model::ForecastError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::thread;
use tracing::debug;

const SOURCE: &str = "wms";

const MAP_WIDTH: u32 = 640;
const MAP_HEIGHT: u32 = 480;

pub struct WmsProvider<C = reqwest::blocking::Client> {
    client: C,
    base_url: String,
    variables: Vec<String>,
    step: Duration,
    fill_value: f64,
}

impl<C: HttpGet> WmsProvider<C> {
    pub fn new(
        client: C,
        base_url: &str,
        variables: Vec<String>,
        step_hours: u32,
        fill_value: f64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('?').to_string(),
            variables,
            step: Duration::hours(step_hours.max(1) as i64),
            fill_value,
        }
    }

    fn feature_info_url(&self, layer: &str, request: &GridRequest, at: DateTime<Utc>) -> String {
        let b = &request.bounds;
        format!(
            "{}?service=WMS&version=1.3.0&request=GetFeatureInfo&crs=EPSG:4326\
             &bbox={},{},{},{}&width={}&height={}&query_layers={}&info_format=text/xml\
             &i=0&j={}&time={}",
            self.base_url,
            b.min_lat,
            b.min_lon,
            b.max_lat,
            b.max_lon,
            MAP_WIDTH,
            MAP_HEIGHT,
            layer,
            MAP_HEIGHT - 1,
            format_wms_time(at),
        )
    }

    /// One sample per instant; `None` where the request itself failed.
    fn sample_layer(&self, layer: &str, request: &GridRequest, instants: &[DateTime<Utc>]) -> Vec<Option<f64>> {
        instants
            .iter()
            .map(|&at| {
                let url = self.feature_info_url(layer, request, at);
                match self.client.get_text(SOURCE, &url).and_then(|body| parse_feature_value(&body)) {
                    Ok(value) => Some(value.unwrap_or(self.fill_value)),
                    Err(e) => {
                        debug!(layer, time = %at, error = %e, "feature info sample failed");
                        None
                    }
                }
            })
            .collect()
    }
}

impl<C: HttpGet> GridProvider for WmsProvider<C> {
    fn name(&self) -> &str {
        SOURCE
    }

    fn fetch(&self, request: &GridRequest) -> Result<GridPayload, ForecastError> {
        let instants = timesteps(request.start, request.end, self.step);
        if instants.is_empty() {
            return Err(ForecastError::DegenerateGrid("empty WMS time window".into()));
        }

        // One scraping thread per layer; every layer walks the same instants.
        let steps = instants.as_slice();
        let series: Vec<Vec<Option<f64>>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .variables
                .iter()
                .map(|layer| scope.spawn(move || self.sample_layer(layer, request, steps)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_default())
                .collect()
        });

        let succeeded = series.iter().flatten().filter(|s| s.is_some()).count();
        if succeeded == 0 {
            return Err(ForecastError::transport(
                SOURCE,
                format!("all {} feature info requests failed", instants.len() * self.variables.len()),
            ));
        }

        let mut variables = BTreeMap::new();
        for (name, samples) in self.variables.iter().zip(series) {
            let mut values: Vec<f64> = samples.into_iter().map(|s| s.unwrap_or(self.fill_value)).collect();
            values.resize(instants.len(), self.fill_value);
            variables.insert(name.clone(), values);
        }

        Ok(GridPayload {
            time: instants.iter().map(|t| t.timestamp() as f64).collect(),
            latitude: vec![request.bounds.min_lat],
            longitude: vec![request.bounds.min_lon],
            variables,
            fill_value: self.fill_value,
        })
    }
}

impl<C: HttpGet> CoverageSource for WmsProvider<C> {
    fn name(&self) -> &str {
        SOURCE
    }

    /// Last advertised TIME value of the first configured layer.
    fn coverage_end(&self) -> Result<NaiveDate, ForecastError> {
        let layer = self
            .variables
            .first()
            .ok_or_else(|| ForecastError::Coverage("no WMS layer configured".into()))?;
        let url = format!("{}?service=WMS&version=1.3.0&request=GetCapabilities", self.base_url);
        let body = self
            .client
            .get_text(SOURCE, &url)
            .map_err(|e| ForecastError::Coverage(e.to_string()))?;
        let dimension = parse_time_dimension(&body, layer)?;
        last_time_in_dimension(&dimension)
            .ok_or_else(|| ForecastError::Coverage(format!("unreadable TIME dimension for '{}'", layer)))
    }
}

/// `2024-05-06T03:00:00.000Z`
pub fn format_wms_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Instants from `start` to `end` inclusive, `step` apart.
pub fn timesteps(start: DateTime<Utc>, end: DateTime<Utc>, step: Duration) -> Vec<DateTime<Utc>> {
    let mut out = Vec::new();
    let mut at = start;
    while at <= end {
        out.push(at);
        at += step;
    }
    out
}

// ---------------------------------------------------------------------------
// XML parsing
// ---------------------------------------------------------------------------

fn xml_error(e: quick_xml::Error) -> ForecastError {
    ForecastError::payload(SOURCE, format!("XML parsing error: {}", e))
}

/// Raw text of the TIME `<Dimension>` inside the layer named `layer_name`.
pub fn parse_time_dimension(xml: &str, layer_name: &str) -> Result<String, ForecastError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_target_layer = false;
    let mut in_name = false;
    let mut in_dimension = false;
    let mut content = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Name" if !in_target_layer => in_name = true,
                b"Dimension" if in_target_layer => {
                    in_dimension = e.attributes().flatten().any(|attr| {
                        attr.key.local_name().as_ref() == b"name"
                            && String::from_utf8_lossy(&attr.value).eq_ignore_ascii_case("time")
                    });
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_name => {
                if t.unescape().map_err(xml_error)?.as_ref() == layer_name {
                    in_target_layer = true;
                }
            }
            Ok(Event::Text(t)) if in_dimension => {
                content.push_str(&t.unescape().map_err(xml_error)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"Name" => in_name = false,
                b"Dimension" if in_dimension => {
                    if !content.trim().is_empty() {
                        return Ok(content.trim().to_string());
                    }
                    in_dimension = false;
                }
                b"Layer" => in_target_layer = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ForecastError::Coverage(format!("capabilities XML error: {}", e))),
            _ => {}
        }
    }

    Err(ForecastError::Coverage(format!("no TIME dimension for layer '{}'", layer_name)))
}

/// Coverage end date from a TIME dimension: either a comma-separated list
/// of instants or a `start/end/period` interval.
pub fn last_time_in_dimension(dimension: &str) -> Option<NaiveDate> {
    let last = dimension.split(',').map(str::trim).filter(|s| !s.is_empty()).last()?;
    match last.split('/').collect::<Vec<_>>().as_slice() {
        [_, end, ..] => parse_iso_date(end),
        [single] => parse_iso_date(single),
        _ => None,
    }
}

/// `<FeatureInfo><value>` of a GetFeatureInfo response. `Ok(None)` for
/// the literal `none` the server returns over land.
pub fn parse_feature_value(xml: &str) -> Result<Option<f64>, ForecastError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_feature = false;
    let mut in_value = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"FeatureInfo" => in_feature = true,
                b"value" if in_feature => in_value = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_value => {
                let text = t.unescape().map_err(xml_error)?;
                let text = text.trim();
                if text.eq_ignore_ascii_case("none") {
                    return Ok(None);
                }
                return text
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| ForecastError::payload(SOURCE, format!("not a number: '{}'", text)));
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"FeatureInfo" => in_feature = false,
                b"value" => in_value = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
    }

    Err(ForecastError::payload(SOURCE, "feature info response has no value"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
