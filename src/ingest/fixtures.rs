/// Test fixtures: representative upstream payloads for every adapter.
///
/// These are structurally complete but truncated to the minimum needed to
/// exercise the parsers. They mirror what the live services return for:
///
///   OpenDAP  `<dataset>.dds`, `<dataset>.ascii?lat[0:1:4]`,
///            `<dataset>.ascii?VHM0[..][..][..],VTM10[..],VMDR[..]`
///   ERDDAP   `NCEP_Global_Best.json?ugrd10m[..],vgrd10m[..]`, `?time[last]`
///   WMS      `GetCapabilities`, `GetFeatureInfo&info_format=text/xml`
///   MOTU     `motu-client.py -s <service> -D -q -o console`
///
/// OpenDAP time values are hours since 1970-01-01 shifted by 12 hours;
/// the CMEMS fill value is 1.0E20.

use crate::ingest::HttpGet;
use crate::model::ForecastError;
use std::sync::Mutex;

/// Canned HTTP server. A request is answered by the first route whose
/// fragments all appear in the percent-decoded URL; anything else is a
/// transport failure, as a 404 would be.
#[derive(Default)]
pub(crate) struct CannedHttp {
    routes: Vec<(Vec<String>, String)>,
    calls: Mutex<Vec<String>>,
}

impl CannedHttp {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn route(mut self, fragments: &[&str], body: impl Into<String>) -> Self {
        let fragments = fragments.iter().map(|f| f.to_string()).collect();
        self.routes.push((fragments, body.into()));
        self
    }

    /// Decoded URLs requested so far, in arrival order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl HttpGet for CannedHttp {
    fn get_text(&self, source_name: &str, url: &str) -> Result<String, ForecastError> {
        let decoded = urlencoding::decode(url)
            .map(|u| u.into_owned())
            .unwrap_or_else(|_| url.to_string());
        self.calls.lock().unwrap().push(decoded.clone());

        self.routes
            .iter()
            .find(|(fragments, _)| fragments.iter().all(|f| decoded.contains(f.as_str())))
            .map(|(_, body)| body.clone())
            .ok_or_else(|| ForecastError::transport(source_name, format!("{} returned 404 Not Found", url)))
    }
}

/// A one-dimensional `.ascii` axis response.
pub(crate) fn opendap_axis_ascii(name: &str, values: &[&str]) -> String {
    format!(
        "Dataset {{\n    Float32 {name}[{name} = {n}];\n}} sv03-med-hcmr-wav-an-fc-h;\n\
         ---------------------------------------------\n{name}[{n}]\n{}\n\n",
        values.join(", "),
        name = name,
        n = values.len(),
    )
}

/// Dataset descriptor; only the 1-D declarations carry dimension sizes.
pub(crate) const OPENDAP_DDS: &str = r#"Dataset {
    Int32 time[time = 9935];
    Float32 lat[lat = 380];
    Float32 lon[lon = 1307];
    Grid {
     ARRAY:
        Float32 VHM0[time = 9935][lat = 380][lon = 1307];
     MAPS:
        Int32 time[time = 9935];
        Float32 lat[lat = 380];
        Float32 lon[lon = 1307];
    } VHM0;
} sv03-med-hcmr-wav-an-fc-h;
"#;

/// Axis download for five latitudes.
pub(crate) const OPENDAP_LAT_ASCII: &str = r#"Dataset {
    Float32 lat[lat = 5];
} sv03-med-hcmr-wav-an-fc-h;
---------------------------------------------
lat[5]
30.1875, 30.25, 30.3125, 30.375, 30.4375

"#;

/// Three variables on a 3 (time) × 2 (lat) × 2 (lon) window.
/// VHM0 at (lat 1, lon 1) is land for the first two steps.
pub(crate) const OPENDAP_GRID_ASCII: &str = r#"Dataset {
    Grid {
     ARRAY:
        Float32 VHM0[time = 3][lat = 2][lon = 2];
     MAPS:
        Int32 time[time = 3];
        Float32 lat[lat = 2];
        Float32 lon[lon = 2];
    } VHM0;
    Grid {
     ARRAY:
        Float32 VTM10[time = 3][lat = 2][lon = 2];
     MAPS:
        Int32 time[time = 3];
        Float32 lat[lat = 2];
        Float32 lon[lon = 2];
    } VTM10;
    Grid {
     ARRAY:
        Float32 VMDR[time = 3][lat = 2][lon = 2];
     MAPS:
        Int32 time[time = 3];
        Float32 lat[lat = 2];
        Float32 lon[lon = 2];
    } VMDR;
} sv03-med-hcmr-wav-an-fc-h;
---------------------------------------------
VHM0.VHM0[3][2][2]
[0][0], 0.52, 0.55
[0][1], 0.61, 1.0E20
[1][0], 0.66, 0.70
[1][1], 0.64, 1.0E20
[2][0], 0.72, 0.79
[2][1], 0.77, 0.81

VHM0.time[3]
473856, 473857, 473858

VHM0.lat[2]
37.0625, 37.125

VHM0.lon[2]
-9.0, -8.9583

VTM10.VTM10[3][2][2]
[0][0], 5.1, 5.2
[0][1], 5.3, 1.0E20
[1][0], 5.4, 5.5
[1][1], 5.6, 1.0E20
[2][0], 5.7, 5.8
[2][1], 5.9, 6.0

VTM10.time[3]
473856, 473857, 473858

VTM10.lat[2]
37.0625, 37.125

VTM10.lon[2]
-9.0, -8.9583

VMDR.VMDR[3][2][2]
[0][0], 271.0, 272.0
[0][1], 273.0, 1.0E20
[1][0], 275.0, 276.0
[1][1], 277.0, 1.0E20
[2][0], 279.0, 280.0
[2][1], 281.0, 283.0

VMDR.time[3]
473856, 473857, 473858

VMDR.lat[2]
37.0625, 37.125

VMDR.lon[2]
-9.0, -8.9583

"#;

/// Two 3-hourly steps on a 2 × 2 cell window; the last v sample is null.
pub(crate) const ERDDAP_WIND_JSON: &str = r#"{
  "table": {
    "columnNames": ["time", "latitude", "longitude", "ugrd10m", "vgrd10m"],
    "columnTypes": ["String", "float", "float", "float", "float"],
    "columnUnits": ["UTC", "degrees_north", "degrees_east", "m s-1", "m s-1"],
    "rows": [
      ["2024-05-01T00:00:00Z", 37.0, 351.0, 0.5, 0.25],
      ["2024-05-01T00:00:00Z", 37.0, 351.5, 1.0, 1.0],
      ["2024-05-01T00:00:00Z", 37.5, 351.0, -2.0, -3.5],
      ["2024-05-01T00:00:00Z", 37.5, 351.5, -2.5, -3.0],
      ["2024-05-01T03:00:00Z", 37.0, 351.0, 0.75, 0.5],
      ["2024-05-01T03:00:00Z", 37.0, 351.5, 2.0, 0.0],
      ["2024-05-01T03:00:00Z", 37.5, 351.0, -1.5, -3.0],
      ["2024-05-01T03:00:00Z", 37.5, 351.5, -2.0, null]
    ]
  }
}"#;

pub(crate) const ERDDAP_TIME_LAST_JSON: &str = r#"{
  "table": {
    "columnNames": ["time"],
    "columnTypes": ["String"],
    "columnUnits": ["UTC"],
    "rows": [
      ["2024-05-17T12:00:00Z"]
    ]
  }
}"#;

/// Capabilities with a comma-separated TIME list (trimmed).
pub(crate) const WMS_CAPABILITIES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<WMS_Capabilities version="1.3.0" xmlns="http://www.opengis.net/wms" xmlns:xlink="http://www.w3.org/1999/xlink">
  <Service>
    <Name>WMS</Name>
    <Title>sv03-med-hcmr-wav-an-fc-h</Title>
  </Service>
  <Capability>
    <Layer>
      <Title>Mediterranean waves</Title>
      <Layer queryable="1">
        <Name>VHM0</Name>
        <Title>Spectral significant wave height (Hm0)</Title>
        <Dimension name="time" units="ISO8601" multipleValues="true" current="true" default="2024-05-06T00:00:00.000Z">
          2024-05-06T00:00:00.000Z,2024-05-06T01:00:00.000Z,2024-05-15T22:00:00.000Z,2024-05-15T23:00:00.000Z
        </Dimension>
      </Layer>
    </Layer>
  </Capability>
</WMS_Capabilities>
"#;

/// Capabilities advertising TIME as an ISO 8601 interval.
pub(crate) const WMS_CAPABILITIES_INTERVAL_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<WMS_Capabilities version="1.3.0" xmlns="http://www.opengis.net/wms">
  <Capability>
    <Layer>
      <Layer queryable="1">
        <Name>VHM0</Name>
        <Dimension name="time" units="ISO8601">2024-04-01T00:00:00.000Z/2024-05-16T00:00:00.000Z/PT1H</Dimension>
      </Layer>
    </Layer>
  </Capability>
</WMS_Capabilities>
"#;

pub(crate) const WMS_FEATURE_INFO_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<FeatureInfoResponse>
  <longitude>-8.6407</longitude>
  <latitude>37.0857</latitude>
  <iIndex>0</iIndex>
  <jIndex>479</jIndex>
  <gridCentreLon>-8.6458</gridCentreLon>
  <gridCentreLat>37.0833</gridCentreLat>
  <FeatureInfo>
    <time>2024-05-06T03:00:00.000Z</time>
    <value>0.8234</value>
  </FeatureInfo>
</FeatureInfoResponse>
"#;

/// Over land the server answers with the literal "none".
pub(crate) const WMS_FEATURE_INFO_NONE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<FeatureInfoResponse>
  <longitude>-8.0</longitude>
  <latitude>38.0</latitude>
  <iIndex>0</iIndex>
  <jIndex>479</jIndex>
  <gridCentreLon>-8.0</gridCentreLon>
  <gridCentreLat>38.0</gridCentreLat>
  <FeatureInfo>
    <time>2024-05-06T03:00:00.000Z</time>
    <value>none</value>
  </FeatureInfo>
</FeatureInfoResponse>
"#;

/// Describe-product output, filtered to the interesting lines.
pub(crate) const MOTU_DESCRIBE_OK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<productMetadataInfo code="OK" msg="OK" title="MEDSEA_ANALYSIS_FORECAST_WAV_006_017-TDS">
<timeCoverage code="OK" msg="OK" end="2024-05-16T00:00:00.000Z" start="2024-03-01T00:00:00.000Z"/>
</productMetadataInfo>
"#;

pub(crate) const MOTU_DESCRIBE_ERROR: &str = r#"2024-05-06 06:00:01 [ERROR] Execution failed: [Excp 13] Communication failure with the server: HTTP Error 503
"#;
