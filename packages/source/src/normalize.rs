//! Normalization of upstream records into canonical features.
//!
//! Upstream schemas disagree on where coordinates live and what columns
//! are called. [`decode_row`] reads a record once into a [`RawRow`] whose
//! coordinate candidates are tagged by layout; everything after that works
//! on the tagged form rather than probing JSON at each call site.

use crash_map_crash_models::{
    BinRow, CanonicalFeature, CoordPair, CoordValue, Coordinates, Point, RawRow,
};
use crash_map_source_models::{FieldChain, FieldMapping};
use serde_json::{Map, Value};

/// Nested object names tried before the configured location column.
const LOCATION_ALIAS: &str = "location";

/// Reads the nested pair inside a location object, if present.
///
/// Accepts `GeoJSON` (`{"coordinates": [lon, lat]}`) and the Socrata
/// location shape (`{"latitude": .., "longitude": ..}`).
fn nested_pair(value: &Value) -> Option<CoordPair> {
    let obj = value.as_object()?;
    if let Some(coords) = obj.get("coordinates").and_then(Value::as_array) {
        return Some(CoordPair {
            lon: CoordValue::from_json(coords.first()?)?,
            lat: CoordValue::from_json(coords.get(1)?)?,
        });
    }
    Some(CoordPair {
        lon: CoordValue::from_json(obj.get("longitude")?)?,
        lat: CoordValue::from_json(obj.get("latitude")?)?,
    })
}

/// Decodes one upstream record.
///
/// Coordinate candidates are collected in precedence order: nested pair
/// first, then flat latitude/longitude fields. Non-object records decode
/// to a row with no candidates.
#[must_use]
pub fn decode_row(record: Value, fields: &FieldMapping) -> RawRow {
    let Value::Object(attributes) = record else {
        return RawRow::default();
    };

    let mut coordinates = Vec::new();

    let location_chain = FieldChain::new([LOCATION_ALIAS, fields.location.as_str()]);
    for name in location_chain.names() {
        if let Some(pair) = attributes.get(name).and_then(nested_pair) {
            coordinates.push(Coordinates::Nested(pair));
        }
    }

    let flat = fields
        .latitude_chain()
        .first_in(&attributes)
        .and_then(CoordValue::from_json)
        .zip(
            fields
                .longitude_chain()
                .first_in(&attributes)
                .and_then(CoordValue::from_json),
        );
    if let Some((lat, lon)) = flat {
        coordinates.push(Coordinates::Flat(CoordPair { lon, lat }));
    }

    RawRow {
        coordinates,
        attributes,
    }
}

/// The first coordinate candidate that resolves to two finite numbers.
#[must_use]
pub fn row_point(row: &RawRow) -> Option<Point> {
    row.coordinates.iter().find_map(|c| c.pair().resolve())
}

fn chain_value(chain: &FieldChain, attributes: &Map<String, Value>) -> Value {
    chain.first_in(attributes).cloned().unwrap_or(Value::Null)
}

/// Maps a row to a point feature with `severity`, `date` and `county`
/// properties, or `None` if no coordinate candidate is usable.
#[must_use]
pub fn row_to_feature(row: &RawRow, fields: &FieldMapping) -> Option<CanonicalFeature> {
    let geometry = row_point(row)?;

    let mut properties = Map::new();
    properties.insert(
        "severity".to_string(),
        chain_value(&fields.severity_chain(), &row.attributes),
    );
    properties.insert(
        "date".to_string(),
        chain_value(&fields.date_chain(), &row.attributes),
    );
    properties.insert(
        "county".to_string(),
        chain_value(&fields.county_chain(), &row.attributes),
    );

    Some(CanonicalFeature {
        geometry,
        properties,
    })
}

/// Maps rows to features, dropping rows without usable coordinates.
#[must_use]
pub fn rows_to_features(rows: &[RawRow], fields: &FieldMapping) -> Vec<CanonicalFeature> {
    let features: Vec<CanonicalFeature> = rows
        .iter()
        .filter_map(|row| row_to_feature(row, fields))
        .collect();

    let dropped = rows.len() - features.len();
    if dropped > 0 {
        log::debug!(
            "Dropped {dropped} of {} rows without usable coordinates",
            rows.len()
        );
    }

    features
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            let f = n.as_f64()?;
            (f >= 0.0 && f.fract() == 0.0).then_some(f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn date_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Decodes one aggregate record. Numeric columns may arrive as numbers or
/// numeric strings; `None` if a required column is unusable.
#[must_use]
pub fn decode_bin_row(record: &Value) -> Option<BinRow> {
    let obj = record.as_object()?;
    Some(BinRow {
        lat_bin: CoordValue::from_json(obj.get("lat_bin")?)?.to_f64()?,
        lon_bin: CoordValue::from_json(obj.get("lon_bin")?)?.to_f64()?,
        n: count_value(obj.get("n")?)?,
        first_date: date_value(obj.get("first_date")),
        last_date: date_value(obj.get("last_date")),
    })
}

/// Maps an aggregate cell to a point feature at the cell center with
/// `count`, `first_date` and `last_date` properties.
#[must_use]
pub fn bin_to_feature(row: &BinRow) -> CanonicalFeature {
    let mut properties = Map::new();
    properties.insert("count".to_string(), Value::from(row.n));
    properties.insert(
        "first_date".to_string(),
        row.first_date.clone().map_or(Value::Null, Value::String),
    );
    properties.insert(
        "last_date".to_string(),
        row.last_date.clone().map_or(Value::Null, Value::String),
    );

    CanonicalFeature {
        geometry: Point {
            lon: row.lon_bin,
            lat: row.lat_bin,
        },
        properties,
    }
}
