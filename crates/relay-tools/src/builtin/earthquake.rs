use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use relay_ai::ToolDefinition;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::LocalTool;

pub const DEFAULT_EARTHQUAKE_API_BASE: &str = "https://earthquake.usgs.gov/fdsnws/event/1/query";
const DEFAULT_MIN_MAGNITUDE: f64 = 4.5;
const DEFAULT_MAX_MAGNITUDE: f64 = 8.0;
const MAX_LISTED_EVENTS: usize = 5;

/// Queries an FDSN event service (GeoJSON output) for a date and magnitude window.
#[derive(Debug, Clone)]
pub struct EarthquakeSearchTool {
    api_base: String,
    timeout_ms: u64,
}

impl EarthquakeSearchTool {
    pub fn new(api_base: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            api_base: api_base.into(),
            timeout_ms,
        }
    }
}

impl Default for EarthquakeSearchTool {
    fn default() -> Self {
        Self::new(DEFAULT_EARTHQUAKE_API_BASE, 30_000)
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    properties: FeatureProperties,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct FeatureProperties {
    mag: Option<f64>,
    place: Option<String>,
    time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(default)]
    coordinates: Vec<f64>,
}

fn parse_date(arguments: &Value, field: &str) -> Result<NaiveDate, String> {
    let raw = arguments
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("`{field}` is required"))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("`{field}` must be a YYYY-MM-DD date, got '{raw}'"))
}

fn render_event(index: usize, feature: &Feature) -> String {
    let magnitude = feature
        .properties
        .mag
        .map_or_else(|| "?".to_string(), |mag| format!("{mag:.1}"));
    let place = feature.properties.place.as_deref().unwrap_or("unknown location");
    let time = feature
        .properties
        .time
        .and_then(DateTime::from_timestamp_millis)
        .map_or_else(
            || "unknown time".to_string(),
            |at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        );
    let depth = feature
        .geometry
        .as_ref()
        .and_then(|geometry| geometry.coordinates.get(2))
        .map_or_else(|| "?".to_string(), |depth| format!("{depth:.1}"));
    format!("{index}. M{magnitude} | depth {depth} km\n   {time}\n   {place}")
}

impl LocalTool for EarthquakeSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "earthquake_search".to_string(),
            description: "Search recorded earthquakes between two dates (YYYY-MM-DD) within a \
                          magnitude range."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "start_date": { "type": "string" },
                    "end_date": { "type": "string" },
                    "min_magnitude": { "type": "number", "minimum": 0, "maximum": 10 },
                    "max_magnitude": { "type": "number", "minimum": 0, "maximum": 10 }
                },
                "required": ["start_date", "end_date"],
                "additionalProperties": false
            }),
        }
    }

    fn execute(&self, arguments: &Value) -> Result<String, String> {
        let start = parse_date(arguments, "start_date")?;
        let end = parse_date(arguments, "end_date")?;
        if start > end {
            return Err("`start_date` must not be after `end_date`".to_string());
        }
        let min_magnitude = arguments
            .get("min_magnitude")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_MIN_MAGNITUDE);
        let max_magnitude = arguments
            .get("max_magnitude")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_MAX_MAGNITUDE);
        if min_magnitude > max_magnitude {
            return Err("`min_magnitude` must not exceed `max_magnitude`".to_string());
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(self.timeout_ms.max(1)))
            .build()
            .map_err(|error| format!("earthquake client setup failed: {error}"))?;
        let start_param = format!("{start}T00:00:00");
        let end_param = format!("{end}T23:59:59");
        let min_param = min_magnitude.to_string();
        let max_param = max_magnitude.to_string();
        tracing::debug!(%start, %end, min_magnitude, max_magnitude, "earthquake search");
        let response = client
            .get(&self.api_base)
            .query(&[
                ("format", "geojson"),
                ("starttime", start_param.as_str()),
                ("endtime", end_param.as_str()),
                ("minmagnitude", min_param.as_str()),
                ("maxmagnitude", max_param.as_str()),
                ("orderby", "time"),
            ])
            .send()
            .map_err(|error| format!("earthquake query failed: {error}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("earthquake service returned status {status}"));
        }
        let collection: FeatureCollection = response
            .json()
            .map_err(|error| format!("earthquake service returned malformed data: {error}"))?;

        let total = collection.features.len();
        if total == 0 {
            return Ok(format!(
                "No earthquakes of M{min_magnitude}-{max_magnitude} were recorded between {start} and {end}."
            ));
        }

        let mut lines = vec![format!(
            "Found {total} earthquake(s) of M{min_magnitude}-{max_magnitude} between {start} and {end}:"
        )];
        lines.extend(
            collection
                .features
                .iter()
                .take(MAX_LISTED_EVENTS)
                .enumerate()
                .map(|(index, feature)| render_event(index + 1, feature)),
        );
        if total > MAX_LISTED_EVENTS {
            lines.push(format!("... and {} more.", total - MAX_LISTED_EVENTS));
        }
        Ok(lines.join("\n"))
    }
}
