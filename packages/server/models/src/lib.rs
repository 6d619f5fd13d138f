#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the crash map server.
//!
//! These types are serialized to JSON for the REST API. They are separate
//! from the query types in `crash_map_crash_models` to allow independent
//! evolution of the API contract.

use crash_map_crash_models::{CanonicalFeature, FilterIssue, RawFilterParams};
use geojson::{Feature, FeatureCollection, Geometry};
use serde::Serialize;

/// Response header carrying the truncation flag.
pub const TRUNCATED_HEADER: &str = "X-Result-Truncated";

/// Shared-cache hint for successful query responses.
pub const CACHE_CONTROL_VALUE: &str = "s-maxage=30, stale-while-revalidate=60";

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
    /// Active dataset definition ID.
    pub source: String,
}

/// Generic error body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Human-readable description.
    pub error: String,
}

impl ApiError {
    /// Creates an error body.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Body for rejected filters.
#[derive(Debug, Clone, Serialize)]
pub struct ApiValidationError {
    /// Always `"Invalid query"`.
    pub error: &'static str,
    /// Every violated constraint.
    pub issues: Vec<FilterIssue>,
}

impl From<Vec<FilterIssue>> for ApiValidationError {
    fn from(issues: Vec<FilterIssue>) -> Self {
        Self {
            error: "Invalid query",
            issues,
        }
    }
}

/// Collects query-string pairs into filter parameters.
///
/// `severity` and `county` may repeat; every other key keeps its first
/// occurrence. Unknown keys are ignored.
#[must_use]
pub fn raw_filter_from_pairs(pairs: &[(String, String)]) -> RawFilterParams {
    let mut raw = RawFilterParams::default();
    for (key, value) in pairs {
        let slot = match key.as_str() {
            "severity" => {
                raw.severity.push(value.clone());
                continue;
            }
            "county" => {
                raw.county.push(value.clone());
                continue;
            }
            "bbox" => &mut raw.bbox,
            "start" => &mut raw.start,
            "end" => &mut raw.end,
            "limit" => &mut raw.limit,
            "mode" => &mut raw.mode,
            "bin" => &mut raw.bin,
            "zoom" => &mut raw.zoom,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.clone());
        }
    }
    raw
}

/// Converts a canonical feature to a `GeoJSON` point feature.
#[must_use]
pub fn to_geojson_feature(feature: CanonicalFeature) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::Point(vec![
            feature.geometry.lon,
            feature.geometry.lat,
        ]))),
        id: None,
        properties: Some(feature.properties),
        foreign_members: None,
    }
}

/// Wraps canonical features in a `GeoJSON` `FeatureCollection`.
#[must_use]
pub fn feature_collection(features: Vec<CanonicalFeature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: features.into_iter().map(to_geojson_feature).collect(),
        foreign_members: None,
    }
}

#[cfg(test)]
mod tests {
    use crash_map_crash_models::{FilterField, Point};
    use serde_json::json;

    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn collects_repeated_values() {
        let raw = raw_filter_from_pairs(&pairs(&[
            ("bbox", "-120,36,-119,37"),
            ("severity", "Fatal"),
            ("county", "Fresno"),
            ("severity", "Injury (Severe)"),
            ("limit", "100"),
            ("limit", "200"),
            ("other", "x"),
        ]));
        assert_eq!(raw.bbox.as_deref(), Some("-120,36,-119,37"));
        assert_eq!(raw.severity, vec!["Fatal", "Injury (Severe)"]);
        assert_eq!(raw.county, vec!["Fresno"]);
        assert_eq!(raw.limit.as_deref(), Some("100"));
        assert!(raw.mode.is_none());
    }

    #[test]
    fn serializes_point_features() {
        let mut properties = serde_json::Map::new();
        properties.insert("severity".to_string(), json!("Fatal"));
        let collection = feature_collection(vec![CanonicalFeature {
            geometry: Point {
                lon: -119.4,
                lat: 36.7,
            },
            properties,
        }]);

        let value = serde_json::to_value(&collection).unwrap();
        assert_eq!(value["type"], json!("FeatureCollection"));
        assert_eq!(value["features"][0]["type"], json!("Feature"));
        assert_eq!(
            value["features"][0]["geometry"],
            json!({"type": "Point", "coordinates": [-119.4, 36.7]})
        );
        assert_eq!(value["features"][0]["properties"]["severity"], json!("Fatal"));
    }

    #[test]
    fn validation_body_shape() {
        let body = ApiValidationError::from(vec![FilterIssue::new(
            FilterField::Bbox,
            "maxLon must be greater than minLon",
        )]);
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "error": "Invalid query",
                "issues": [{"field": "bbox", "message": "maxLon must be greater than minLon"}]
            })
        );
    }
}
