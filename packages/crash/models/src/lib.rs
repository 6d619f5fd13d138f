#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Collision query types shared across the crash map system.
//!
//! Everything in this crate is a request-scoped value: a [`Filter`] is
//! validated from [`RawFilterParams`], compiled into query text, and the
//! upstream [`RawRow`]s and [`BinRow`]s it returns are normalized into
//! [`CanonicalFeature`]s. None of these values outlive a single request.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Row cap applied when a filter does not specify a limit.
pub const DEFAULT_LIMIT: u32 = 5000;

/// Hard upper bound on the number of rows or bins a single query may return.
pub const MAX_LIMIT: u32 = 10_000;

/// Maximum number of severity values accepted in a filter.
pub const MAX_SEVERITY_VALUES: usize = 10;

/// Maximum number of county values accepted in a filter.
pub const MAX_COUNTY_VALUES: usize = 20;

/// Largest accepted bin size, in degrees.
pub const MAX_BIN_SIZE: f64 = 0.25;

/// Clamps an optional requested limit into `[1, MAX_LIMIT]`, defaulting to
/// [`DEFAULT_LIMIT`].
#[must_use]
pub fn effective_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// An axis-aligned viewport bound in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bbox {
    /// Western longitude boundary.
    pub min_lon: f64,
    /// Southern latitude boundary.
    pub min_lat: f64,
    /// Eastern longitude boundary.
    pub max_lon: f64,
    /// Northern latitude boundary.
    pub max_lat: f64,
}

impl Bbox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Whether the point lies inside the box. Edges are inclusive, matching
    /// SQL `BETWEEN`.
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// A `YYYY-MM-DD` calendar date as supplied by the caller.
///
/// Only the shape is checked during validation, so calendrically invalid
/// values such as `2025-02-30` are representable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateParam(String);

impl DateParam {
    /// Wraps an already pattern-checked date string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw `YYYY-MM-DD` text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Inclusive lower bound timestamp for this day.
    #[must_use]
    pub fn start_of_day(&self) -> String {
        format!("{} 00:00:00", self.0)
    }

    /// Inclusive upper bound timestamp for this day.
    #[must_use]
    pub fn end_of_day(&self) -> String {
        format!("{} 23:59:59", self.0)
    }
}

impl std::fmt::Display for DateParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which query shape a request runs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QueryMode {
    /// Individual collision rows.
    #[default]
    Points,
    /// Spatially binned aggregate counts.
    Bin,
}

/// A validated, bounded collision filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Viewport bound.
    pub bbox: Option<Bbox>,
    /// First day (inclusive).
    pub start: Option<DateParam>,
    /// Last day (inclusive).
    pub end: Option<DateParam>,
    /// Severity values to match exactly.
    pub severity: Vec<String>,
    /// County names to match case-insensitively.
    pub county: Vec<String>,
    /// Requested row cap.
    pub limit: Option<u32>,
    /// Requested query shape.
    pub mode: Option<QueryMode>,
    /// Bin size in degrees. Present whenever `mode` is [`QueryMode::Bin`].
    pub bin: Option<f64>,
}

impl Filter {
    /// The row cap the compiled query will actually use.
    #[must_use]
    pub fn effective_limit(&self) -> u32 {
        effective_limit(self.limit)
    }

    /// The query shape, defaulting to points.
    #[must_use]
    pub fn mode(&self) -> QueryMode {
        self.mode.unwrap_or_default()
    }
}

/// One spatial aggregate cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinRow {
    /// Latitude of the cell center.
    pub lat_bin: f64,
    /// Longitude of the cell center.
    pub lon_bin: f64,
    /// Number of collisions in the cell.
    pub n: u64,
    /// Earliest collision date in the cell.
    pub first_date: Option<String>,
    /// Latest collision date in the cell.
    pub last_date: Option<String>,
}

/// A single coordinate component as it appeared upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordValue {
    /// A JSON number.
    Number(f64),
    /// A JSON string that may hold a number.
    Text(String),
}

impl CoordValue {
    /// Reads a coordinate component from a JSON value. Anything other than a
    /// number or string yields `None`.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// The component as a finite float, parsing strings if needed.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

/// A longitude/latitude pair of raw components.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordPair {
    /// Longitude component.
    pub lon: CoordValue,
    /// Latitude component.
    pub lat: CoordValue,
}

impl CoordPair {
    /// Resolves both components, or `None` if either is not a finite number.
    #[must_use]
    pub fn resolve(&self) -> Option<Point> {
        Some(Point {
            lon: self.lon.to_f64()?,
            lat: self.lat.to_f64()?,
        })
    }
}

/// The two coordinate layouts seen across upstream schemas.
#[derive(Debug, Clone, PartialEq)]
pub enum Coordinates {
    /// A nested object, either `{"coordinates": [lon, lat]}` or
    /// `{"latitude": .., "longitude": ..}`.
    Nested(CoordPair),
    /// Separate top-level latitude and longitude fields.
    Flat(CoordPair),
}

impl Coordinates {
    /// The underlying pair regardless of layout.
    #[must_use]
    pub const fn pair(&self) -> &CoordPair {
        match self {
            Self::Nested(pair) | Self::Flat(pair) => pair,
        }
    }
}

/// One upstream row-fetch record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    /// Coordinate candidates in precedence order.
    pub coordinates: Vec<Coordinates>,
    /// Every field of the original record.
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Longitude.
    pub lon: f64,
    /// Latitude.
    pub lat: f64,
}

/// The only feature shape exposed to rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalFeature {
    /// Feature location.
    pub geometry: Point,
    /// Display properties. Missing values are JSON `null`.
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Rows returned by a remote query plus the truncation signal.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    /// Rows in upstream order.
    pub rows: Vec<T>,
    /// Whether the row count reached the query's cap.
    pub truncated: bool,
}

/// Normalized features plus the truncation signal of the query that
/// produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureResult {
    /// Canonical features.
    pub features: Vec<CanonicalFeature>,
    /// Whether the underlying query hit its cap.
    pub truncated: bool,
}

/// Untyped filter input, exactly as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFilterParams {
    /// `minLon,minLat,maxLon,maxLat`.
    pub bbox: Option<String>,
    /// `YYYY-MM-DD`.
    pub start: Option<String>,
    /// `YYYY-MM-DD`.
    pub end: Option<String>,
    /// Repeated severity values.
    pub severity: Vec<String>,
    /// Repeated county values.
    pub county: Vec<String>,
    /// Row cap.
    pub limit: Option<String>,
    /// `points` or `bin`.
    pub mode: Option<String>,
    /// Bin size in degrees.
    pub bin: Option<String>,
    /// Map zoom level used to fill in `mode`, `bin` and `limit`.
    pub zoom: Option<String>,
}

/// Filter fields that validation issues can be reported against.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FilterField {
    /// Viewport bound.
    Bbox,
    /// Start date.
    Start,
    /// End date.
    End,
    /// Severity list.
    Severity,
    /// County list.
    County,
    /// Row cap.
    Limit,
    /// Query shape.
    Mode,
    /// Bin size.
    Bin,
    /// Zoom level.
    Zoom,
}

/// A single violated filter constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterIssue {
    /// Field the constraint applies to.
    pub field: FilterField,
    /// Human-readable description.
    pub message: String,
}

impl FilterIssue {
    /// Creates an issue for the given field.
    #[must_use]
    pub fn new(field: FilterField, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_limit_into_range() {
        assert_eq!(effective_limit(None), 5000);
        assert_eq!(effective_limit(Some(50_000)), 10_000);
        assert_eq!(effective_limit(Some(0)), 1);
        assert_eq!(effective_limit(Some(250)), 250);
    }

    #[test]
    fn bbox_contains_is_edge_inclusive() {
        let bbox = Bbox::new(-120.0, 36.0, -119.0, 37.0);
        assert!(bbox.contains(36.0, -120.0));
        assert!(bbox.contains(37.0, -119.0));
        assert!(!bbox.contains(37.01, -119.5));
    }

    #[test]
    fn parses_numeric_string_coordinates() {
        let value = CoordValue::Text("36.7783".to_string());
        assert!((value.to_f64().unwrap() - 36.7783).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_non_finite_coordinates() {
        assert!(CoordValue::Text("not a number".to_string()).to_f64().is_none());
        assert!(CoordValue::Text("NaN".to_string()).to_f64().is_none());
        assert!(CoordValue::Text("inf".to_string()).to_f64().is_none());
    }

    #[test]
    fn day_bounds_are_inclusive() {
        let date = DateParam::new("2024-03-01");
        assert_eq!(date.start_of_day(), "2024-03-01 00:00:00");
        assert_eq!(date.end_of_day(), "2024-03-01 23:59:59");
    }

    #[test]
    fn query_mode_round_trips_through_strum() {
        assert_eq!("bin".parse::<QueryMode>().unwrap(), QueryMode::Bin);
        assert_eq!(QueryMode::Points.to_string(), "points");
        assert!("heatmap".parse::<QueryMode>().is_err());
    }
}
