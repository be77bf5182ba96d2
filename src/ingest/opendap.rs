/// OpenDAP (THREDDS `dodsC`) adapter for the CMEMS wave product.
///
/// Handles dimension discovery and ASCII slicing against an endpoint like:
///   http://cmems-med-mfc.eu/thredds/dodsC/sv03-med-hcmr-wav-an-fc-h
///
/// A fetch costs four small requests (`.dds`, then the time, lat and lon
/// axes) plus one data request covering the bounding box and time window
/// for every wave variable. See `fixtures.rs` for the response shapes.

use crate::grid::{nearest_in, normalize_longitude, GridAxis, GridPayload};
use crate::ingest::{CoverageSource, GridProvider, GridRequest, HttpGet};
use crate::model::ForecastError;
use chrono::{DateTime, NaiveDate};
use std::collections::BTreeMap;

const SOURCE: &str = "opendap";

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct OpenDapProvider<C = reqwest::blocking::Client> {
    client: C,
    base_url: String,
    variables: Vec<String>,
    /// Seconds per unit of the upstream time axis (hours → 3600).
    time_unit_secs: f64,
    /// Added to the scaled time value to get Unix epoch seconds.
    time_offset_secs: f64,
    fill_value: f64,
}

impl<C: HttpGet> OpenDapProvider<C> {
    pub fn new(
        client: C,
        base_url: &str,
        variables: Vec<String>,
        time_unit_secs: f64,
        time_offset_secs: f64,
        fill_value: f64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            variables,
            time_unit_secs,
            time_offset_secs,
            fill_value,
        }
    }

    fn get(&self, suffix: &str) -> Result<String, ForecastError> {
        self.client.get_text(SOURCE, &format!("{}{}", self.base_url, suffix))
    }

    fn dimensions(&self) -> Result<BTreeMap<String, usize>, ForecastError> {
        let dims = parse_dds_dimensions(&self.get(".dds")?);
        for name in ["time", "lat", "lon"] {
            if !dims.contains_key(name) {
                return Err(ForecastError::payload(SOURCE, format!("dds lacks '{}' dimension", name)));
            }
        }
        Ok(dims)
    }

    fn axis(&self, name: &str, len: usize) -> Result<Vec<f64>, ForecastError> {
        if len == 0 {
            return Err(ForecastError::DegenerateGrid(format!("dimension '{}' is empty", name)));
        }
        let constraint = format!("{}[0:1:{}]", name, len - 1);
        let body = self.get(&format!(".ascii?{}", urlencoding::encode(&constraint)))?;
        parse_ascii_vector(&body, name)
    }

    fn to_epoch(&self, raw: f64) -> f64 {
        raw * self.time_unit_secs + self.time_offset_secs
    }
}

impl<C: HttpGet> GridProvider for OpenDapProvider<C> {
    fn name(&self) -> &str {
        SOURCE
    }

    fn fetch(&self, request: &GridRequest) -> Result<GridPayload, ForecastError> {
        let dims = self.dimensions()?;
        let times: Vec<f64> = self
            .axis("time", dims["time"])?
            .into_iter()
            .map(|t| self.to_epoch(t))
            .collect();
        let lats = GridAxis::new("lat", self.axis("lat", dims["lat"])?)?;
        let lons = GridAxis::new("lon", self.axis("lon", dims["lon"])?)?;

        let (t0, t1) = index_window(
            &times,
            request.start.timestamp() as f64,
            request.end.timestamp() as f64,
        )?;
        let (y0, y1) = index_window(lats.values(), request.bounds.min_lat, request.bounds.max_lat)?;
        let (x0, x1) = index_window(
            lons.values(),
            normalize_longitude(request.bounds.min_lon, &lons),
            normalize_longitude(request.bounds.max_lon, &lons),
        )?;

        let slice = format!("[{}:1:{}][{}:1:{}][{}:1:{}]", t0, t1, y0, y1, x0, x1);
        let constraint = self
            .variables
            .iter()
            .map(|v| format!("{}{}", v, slice))
            .collect::<Vec<_>>()
            .join(",");
        let body = self.get(&format!(".ascii?{}", urlencoding::encode(&constraint)))?;

        let mut grids = parse_ascii_grids(&body)?;
        let mut payload = GridPayload {
            fill_value: self.fill_value,
            ..GridPayload::default()
        };

        for name in &self.variables {
            let grid = grids
                .remove(name)
                .ok_or_else(|| ForecastError::payload(SOURCE, format!("response lacks '{}'", name)))?;

            let time: Vec<f64> = grid.map("time")?.iter().map(|&t| self.to_epoch(t)).collect();
            let lat = grid.map("lat")?.to_vec();
            let lon = grid.map("lon")?.to_vec();

            if payload.variables.is_empty() {
                payload.time = time;
                payload.latitude = lat;
                payload.longitude = lon;
            } else if payload.time != time || payload.latitude != lat || payload.longitude != lon {
                return Err(ForecastError::payload(
                    SOURCE,
                    format!("'{}' is on a different grid than its siblings", name),
                ));
            }
            payload.variables.insert(name.clone(), grid.values);
        }

        Ok(payload)
    }
}

impl<C: HttpGet> CoverageSource for OpenDapProvider<C> {
    fn name(&self) -> &str {
        SOURCE
    }

    /// Date of the last timestep on the server.
    fn coverage_end(&self) -> Result<NaiveDate, ForecastError> {
        let dims = self.dimensions().map_err(|e| ForecastError::Coverage(e.to_string()))?;
        let times = self
            .axis("time", dims["time"])
            .map_err(|e| ForecastError::Coverage(e.to_string()))?;

        let last = times
            .last()
            .copied()
            .ok_or_else(|| ForecastError::Coverage("time axis is empty".into()))?;

        DateTime::from_timestamp(self.to_epoch(last) as i64, 0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| ForecastError::Coverage(format!("time value {} out of range", last)))
    }
}

/// Inclusive, ordered index range spanning the nearest indices of `a` and `b`.
fn index_window(axis: &[f64], a: f64, b: f64) -> Result<(usize, usize), ForecastError> {
    let i = nearest_in(axis, a).ok_or_else(|| ForecastError::DegenerateGrid("empty axis".into()))?;
    let j = nearest_in(axis, b).ok_or_else(|| ForecastError::DegenerateGrid("empty axis".into()))?;
    Ok((i.min(j), i.max(j)))
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// One Grid from an ASCII response: the flattened array plus its map vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct AsciiGrid {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
    pub maps: BTreeMap<String, Vec<f64>>,
}

impl AsciiGrid {
    fn map(&self, name: &str) -> Result<&[f64], ForecastError> {
        self.maps
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ForecastError::payload(SOURCE, format!("grid lacks '{}' map", name)))
    }
}

/// Extracts `name -> length` for every one-dimensional declaration in a DDS,
/// e.g. `Int32 time[time = 9935];`.
pub fn parse_dds_dimensions(dds: &str) -> BTreeMap<String, usize> {
    let mut dims = BTreeMap::new();

    for line in dds.lines() {
        let line = line.trim();
        if line.matches('[').count() != 1 {
            continue;
        }
        let Some(open) = line.find('[') else { continue };
        let Some(close) = line.find(']') else { continue };
        if close < open {
            continue;
        }

        let Some(name) = line[..open].split_whitespace().last() else { continue };
        let inner = &line[open + 1..close];
        let Some((dim, len)) = inner.split_once('=') else { continue };

        if dim.trim() == name {
            if let Ok(n) = len.trim().parse() {
                dims.insert(name.to_string(), n);
            }
        }
    }

    dims
}

/// Values of a single array from a `.ascii?name[a:b:c]` response.
pub fn parse_ascii_vector(body: &str, name: &str) -> Result<Vec<f64>, ForecastError> {
    let mut lines = data_section(body)?;
    let header = format!("{}[", name);

    while let Some(line) = lines.next() {
        if line.trim().starts_with(&header) {
            let count = declared_len(line.trim())?;
            return read_values(&mut lines, count);
        }
    }

    Err(ForecastError::payload(SOURCE, format!("no '{}' array in response", name)))
}

/// Every Grid in a multi-variable `.ascii` response, keyed by variable name.
pub fn parse_ascii_grids(body: &str) -> Result<BTreeMap<String, AsciiGrid>, ForecastError> {
    let mut grids: BTreeMap<String, AsciiGrid> = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut lines = data_section(body)?;

    while let Some(raw) = lines.next() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') {
            let name = current
                .as_ref()
                .ok_or_else(|| ForecastError::payload(SOURCE, "data row before any array header"))?;
            let grid = grids
                .get_mut(name)
                .ok_or_else(|| ForecastError::payload(SOURCE, "data row for unknown grid"))?;
            for token in line.split(',').skip(1) {
                grid.values.push(parse_number(token)?);
            }
            continue;
        }

        let Some((grid_name, rest)) = line.split_once('.') else {
            return Err(ForecastError::payload(SOURCE, format!("unexpected line '{}'", line)));
        };
        let member = rest.split('[').next().unwrap_or_default();

        if member == grid_name {
            let shape = parse_shape(rest)?;
            grids.insert(
                grid_name.to_string(),
                AsciiGrid {
                    shape,
                    values: Vec::new(),
                    maps: BTreeMap::new(),
                },
            );
            current = Some(grid_name.to_string());
        } else {
            let count = declared_len(rest)?;
            let values = read_values(&mut lines, count)?;
            let grid = grids
                .get_mut(grid_name)
                .ok_or_else(|| ForecastError::payload(SOURCE, format!("map for unknown grid '{}'", grid_name)))?;
            grid.maps.insert(member.to_string(), values);
            current = None;
        }
    }

    for (name, grid) in &grids {
        let expected: usize = grid.shape.iter().product();
        if grid.values.len() != expected {
            return Err(ForecastError::ShapeMismatch {
                variable: name.clone(),
                expected,
                actual: grid.values.len(),
            });
        }
    }

    Ok(grids)
}

/// Lines after the `-----` separator that ends the DDS preamble.
fn data_section(body: &str) -> Result<std::str::Lines<'_>, ForecastError> {
    let mut lines = body.lines();
    for line in lines.by_ref() {
        let t = line.trim();
        if t.len() >= 5 && t.chars().all(|c| c == '-') {
            return Ok(lines);
        }
    }
    Err(ForecastError::payload(SOURCE, "no data section in ASCII response"))
}

/// `[3][2][2]` → `[3, 2, 2]`
fn parse_shape(header: &str) -> Result<Vec<usize>, ForecastError> {
    header
        .split('[')
        .skip(1)
        .map(|part| {
            part.trim_end_matches(']')
                .trim()
                .parse()
                .map_err(|_| ForecastError::payload(SOURCE, format!("bad array header '{}'", header)))
        })
        .collect()
}

fn declared_len(header: &str) -> Result<usize, ForecastError> {
    match parse_shape(header)?.as_slice() {
        [n] => Ok(*n),
        _ => Err(ForecastError::payload(SOURCE, format!("expected 1-D header, got '{}'", header))),
    }
}

fn read_values(lines: &mut std::str::Lines<'_>, count: usize) -> Result<Vec<f64>, ForecastError> {
    let mut values = Vec::with_capacity(count);

    while values.len() < count {
        let Some(line) = lines.next() else { break };
        for token in line.split(',').filter(|t| !t.trim().is_empty()) {
            values.push(parse_number(token)?);
        }
    }

    if values.len() != count {
        return Err(ForecastError::payload(
            SOURCE,
            format!("expected {} values, found {}", count, values.len()),
        ));
    }
    Ok(values)
}

fn parse_number(token: &str) -> Result<f64, ForecastError> {
    token
        .trim()
        .parse()
        .map_err(|_| ForecastError::payload(SOURCE, format!("not a number: '{}'", token.trim())))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridCube, Sampling};
    use crate::ingest::fixtures;
    use crate::model::Bounds;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_dds_dimensions() {
        let dims = parse_dds_dimensions(fixtures::OPENDAP_DDS);
        assert_eq!(dims["time"], 9935);
        assert_eq!(dims["lat"], 380);
        assert_eq!(dims["lon"], 1307);
        assert!(!dims.contains_key("VHM0"));
    }

    #[test]
    fn test_parse_ascii_vector() {
        let lat = parse_ascii_vector(fixtures::OPENDAP_LAT_ASCII, "lat").unwrap();
        assert_eq!(lat, vec![30.1875, 30.25, 30.3125, 30.375, 30.4375]);
    }

    #[test]
    fn test_parse_ascii_vector_wrong_count() {
        let body = "Dataset {\n} x;\n---------------\nlat[4]\n1.0, 2.0, 3.0\n";
        assert!(parse_ascii_vector(body, "lat").is_err());
    }

    #[test]
    fn test_parse_ascii_grids() {
        let grids = parse_ascii_grids(fixtures::OPENDAP_GRID_ASCII).unwrap();
        assert_eq!(grids.len(), 3);

        let vhm0 = &grids["VHM0"];
        assert_eq!(vhm0.shape, vec![3, 2, 2]);
        assert_eq!(vhm0.values[..4], [0.52, 0.55, 0.61, 1e20]);
        assert_eq!(vhm0.maps["time"], vec![473856.0, 473857.0, 473858.0]);
        assert_eq!(vhm0.maps["lon"], vec![-9.0, -8.9583]);

        assert_eq!(grids["VMDR"].values[11], 283.0);
    }

    #[test]
    fn test_parse_ascii_grids_shape_mismatch() {
        let body = fixtures::OPENDAP_GRID_ASCII.replace("[2][1], 0.77, 0.81", "[2][1], 0.77");
        assert!(matches!(
            parse_ascii_grids(&body),
            Err(ForecastError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_grid_response_builds_cube() {
        let mut grids = parse_ascii_grids(fixtures::OPENDAP_GRID_ASCII).unwrap();
        let vhm0 = grids.remove("VHM0").unwrap();

        let mut variables = BTreeMap::new();
        variables.insert("VHM0".to_string(), vhm0.values.clone());
        let payload = GridPayload {
            time: vhm0.maps["time"].iter().map(|t| t * 3600.0 + 43200.0).collect(),
            latitude: vhm0.maps["lat"].clone(),
            longitude: vhm0.maps["lon"].clone(),
            variables,
            fill_value: 1e20,
        };

        let cube = GridCube::build(payload, Sampling::every(1)).unwrap();
        assert_eq!(cube.time_slice("VHM0", 0, 1).unwrap(), vec![0.55, 0.70, 0.79]);
        assert!(cube.is_fill(cube.time_slice("VHM0", 1, 1).unwrap()[0]));
    }

    const BASE: &str = "http://thredds.test/dodsC/sv03-med-hcmr-wav-an-fc-h";

    fn small_dds() -> String {
        fixtures::OPENDAP_DDS
            .replace("9935", "3")
            .replace("380", "2")
            .replace("1307", "2")
    }

    fn thredds(grid_body: &str) -> fixtures::CannedHttp {
        fixtures::CannedHttp::new()
            .route(&[".dds"], small_dds())
            .route(
                &[".ascii?time[0:1:2]"],
                fixtures::opendap_axis_ascii("time", &["473856", "473857", "473858"]),
            )
            .route(&[".ascii?lat[0:1:1]"], fixtures::opendap_axis_ascii("lat", &["37.0625", "37.125"]))
            .route(&[".ascii?lon[0:1:1]"], fixtures::opendap_axis_ascii("lon", &["-9.0", "-8.9583"]))
            .route(&[".ascii?VHM0["], grid_body)
    }

    fn provider(http: fixtures::CannedHttp) -> OpenDapProvider<fixtures::CannedHttp> {
        OpenDapProvider::new(
            http,
            BASE,
            vec!["VHM0".into(), "VTM10".into(), "VMDR".into()],
            3600.0,
            43200.0,
            1e20,
        )
    }

    fn request() -> GridRequest {
        GridRequest {
            bounds: Bounds { min_lat: 37.0, max_lat: 37.2, min_lon: -9.0, max_lon: -8.9 },
            start: Utc.with_ymd_and_hms(2024, 1, 22, 12, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 22, 14, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_fetch_slices_every_variable_in_one_request() {
        let provider = provider(thredds(fixtures::OPENDAP_GRID_ASCII));

        let payload = provider.fetch(&request()).unwrap();

        let t0 = Utc.with_ymd_and_hms(2024, 1, 22, 12, 0, 0).unwrap().timestamp() as f64;
        assert_eq!(payload.time, vec![t0, t0 + 3600.0, t0 + 7200.0]);
        assert_eq!(payload.latitude, vec![37.0625, 37.125]);
        assert_eq!(payload.longitude, vec![-9.0, -8.9583]);
        assert_eq!(payload.variables.len(), 3);
        assert_eq!(payload.variables["VMDR"][11], 283.0);

        let calls = provider.client.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0], format!("{}.dds", BASE));
        assert_eq!(
            calls[4],
            format!(
                "{}.ascii?VHM0[0:1:2][0:1:1][0:1:1],VTM10[0:1:2][0:1:1][0:1:1],VMDR[0:1:2][0:1:1][0:1:1]",
                BASE
            )
        );
    }

    #[test]
    fn test_fetch_rejects_variable_on_another_grid() {
        let body = fixtures::OPENDAP_GRID_ASCII.replace("VMDR.lon[2]\n-9.0, -8.9583", "VMDR.lon[2]\n-9.0, -8.9167");
        let result = provider(thredds(&body)).fetch(&request());
        assert!(matches!(result, Err(ForecastError::Payload { .. })));
    }

    #[test]
    fn test_fetch_fails_when_dataset_is_unreachable() {
        let result = provider(fixtures::CannedHttp::new()).fetch(&request());
        assert!(matches!(result, Err(ForecastError::Transport { .. })));
    }

    #[test]
    fn test_coverage_end_is_last_timestep_date() {
        let provider = provider(thredds(fixtures::OPENDAP_GRID_ASCII));
        assert_eq!(
            provider.coverage_end().unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 22).unwrap()
        );
    }

    #[test]
    fn test_index_window_orders_bounds() {
        let axis = [46.0, 45.5, 45.0, 44.5];
        assert_eq!(index_window(&axis, 44.6, 45.9).unwrap(), (0, 3));
    }
}
