//! SQL compilation for the CKAN `datastore_search_sql` endpoint.
//!
//! Every value that reaches query text goes through one of three paths:
//! string literals through [`literal`], identifiers through
//! [`quote_ident`], and numbers as typed `f64`/`u32` values formatted here.
//! Caller-supplied text is never spliced in any other way.

use std::fmt::Write as _;

use crash_map_crash_models::{Bbox, Filter};
use crash_map_source_models::{FieldMapping, alias};

use crate::SourceError;

/// Query text plus the row cap it was compiled with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    /// Complete SQL text.
    pub text: String,
    /// The `LIMIT` actually emitted.
    pub limit: u32,
}

/// Doubles every single quote so the value can sit inside `'...'`.
#[must_use]
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Inverse of [`escape_literal`].
#[must_use]
pub fn unescape_literal(value: &str) -> String {
    value.replace("''", "'")
}

/// A complete single-quoted string literal.
#[must_use]
pub fn literal(value: &str) -> String {
    format!("'{}'", escape_literal(value))
}

/// Wraps an identifier in double quotes, doubling embedded double quotes.
#[must_use]
pub fn quote_ident(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}

/// Quoted column identifiers for one dataset.
struct Columns {
    lat: String,
    lon: String,
    date: String,
    severity: String,
    county: String,
    killed: String,
}

impl Columns {
    fn new(fields: &FieldMapping) -> Self {
        Self {
            lat: quote_ident(&fields.latitude),
            lon: quote_ident(&fields.longitude),
            date: quote_ident(&fields.date),
            severity: quote_ident(&fields.severity),
            county: quote_ident(&fields.county),
            killed: quote_ident(&fields.killed),
        }
    }
}

fn in_list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values.into_iter().map(literal).collect::<Vec<_>>().join(",")
}

fn date_predicates(filter: &Filter, date_col: &str, parts: &mut Vec<String>) {
    if let Some(start) = &filter.start {
        parts.push(format!("{date_col} >= {}", literal(&start.start_of_day())));
    }
    if let Some(end) = &filter.end {
        parts.push(format!("{date_col} <= {}", literal(&end.end_of_day())));
    }
}

fn bbox_predicates(bbox: &Bbox, cols: &Columns, parts: &mut Vec<String>) {
    parts.push(format!(
        "{} BETWEEN {} AND {}",
        cols.lat, bbox.min_lat, bbox.max_lat
    ));
    parts.push(format!(
        "{} BETWEEN {} AND {}",
        cols.lon, bbox.min_lon, bbox.max_lon
    ));
}

fn where_clause(parts: &[String]) -> String {
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// Builds the row-fetch `WHERE` clause (with a leading space), or an empty
/// string when no predicate applies.
#[must_use]
pub fn build_where(filter: &Filter, fields: &FieldMapping) -> String {
    let cols = Columns::new(fields);
    let mut parts = Vec::new();

    date_predicates(filter, &cols.date, &mut parts);

    if !filter.severity.is_empty() {
        parts.push(format!(
            "{} IN ({})",
            cols.severity,
            in_list(filter.severity.iter().map(String::as_str))
        ));
    }

    if !filter.county.is_empty() {
        let upper: Vec<String> = filter.county.iter().map(|c| c.to_uppercase()).collect();
        parts.push(format!(
            "UPPER({}) IN ({})",
            cols.county,
            in_list(upper.iter().map(String::as_str))
        ));
    }

    if let Some(bbox) = &filter.bbox {
        bbox_predicates(bbox, &cols, &mut parts);
    }

    where_clause(&parts)
}

/// Compiles the row-fetch query.
///
/// Projects the coordinate pair, date, severity, county and fatality count
/// onto their canonical aliases.
#[must_use]
pub fn build_points_query(resource_id: &str, fields: &FieldMapping, filter: &Filter) -> CompiledQuery {
    let cols = Columns::new(fields);
    let limit = filter.effective_limit();

    let mut text = format!(
        "SELECT {} AS {}, {} AS {}, {} AS {}, {} AS {}, {} AS {}, {} AS {} FROM {}",
        cols.lat,
        alias::LATITUDE,
        cols.lon,
        alias::LONGITUDE,
        cols.date,
        alias::DATE,
        cols.severity,
        alias::SEVERITY,
        cols.county,
        alias::COUNTY,
        cols.killed,
        alias::KILLED,
        quote_ident(resource_id),
    );
    text.push_str(&build_where(filter, fields));
    write!(text, " LIMIT {limit}").unwrap();

    CompiledQuery { text, limit }
}

/// Compiles the spatial-bin aggregation query.
///
/// Cells are `ROUND(coord / bin) * bin` on both axes (`numeric` rounding,
/// half away from zero), grouped and ordered by descending count with the
/// cell coordinates as a tie-break so equal counts come back in a stable
/// order.
///
/// # Errors
///
/// Returns [`SourceError::Usage`] if the filter has no bbox or `bin` is
/// not a positive finite number.
pub fn build_bin_query(
    resource_id: &str,
    fields: &FieldMapping,
    filter: &Filter,
    bin: f64,
) -> Result<CompiledQuery, SourceError> {
    let Some(bbox) = &filter.bbox else {
        return Err(SourceError::Usage {
            message: "bbox is required for binning".to_string(),
        });
    };
    if !bin.is_finite() || bin <= 0.0 {
        return Err(SourceError::Usage {
            message: format!("bin size must be a positive number, got {bin}"),
        });
    }

    let cols = Columns::new(fields);
    let limit = filter.effective_limit();

    let mut parts = vec![
        format!("{} IS NOT NULL", cols.lat),
        format!("{} IS NOT NULL", cols.lon),
    ];
    bbox_predicates(bbox, &cols, &mut parts);
    date_predicates(filter, &cols.date, &mut parts);

    let mut text = format!(
        "SELECT ROUND({lat}::numeric / {bin}, 0) * {bin} AS lat_bin, \
         ROUND({lon}::numeric / {bin}, 0) * {bin} AS lon_bin, \
         COUNT(*) AS n, MIN({date}) AS first_date, MAX({date}) AS last_date \
         FROM {table}",
        lat = cols.lat,
        lon = cols.lon,
        date = cols.date,
        table = quote_ident(resource_id),
    );
    text.push_str(&where_clause(&parts));
    write!(
        text,
        " GROUP BY lat_bin, lon_bin ORDER BY n DESC, lat_bin ASC, lon_bin ASC LIMIT {limit}"
    )
    .unwrap();

    Ok(CompiledQuery { text, limit })
}

#[cfg(test)]
mod tests {
    use crash_map_crash_models::DateParam;

    use super::*;

    fn viewport() -> Bbox {
        Bbox::new(-119.5, 36.6, -119.3, 36.8)
    }

    #[test]
    fn doubles_single_quotes() {
        assert_eq!(escape_literal("O'Brien's"), "O''Brien''s");
        assert_eq!(literal("it's"), "'it''s'");
    }

    #[test]
    fn escaping_round_trips() {
        for value in ["", "plain", "'", "''", "a'b''c'''", "x') OR 1=1 --"] {
            assert_eq!(unescape_literal(&escape_literal(value)), value);
        }
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_ident("NumberKilled"), "\"NumberKilled\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn compiles_unfiltered_points_query() {
        let query = build_points_query("abc-123", &FieldMapping::default(), &Filter::default());
        assert_eq!(
            query.text,
            "SELECT \"latitude\" AS latitude, \"longitude\" AS longitude, \
             \"collision_date\" AS collision_date, \"severity\" AS severity, \
             \"county\" AS county, \"NumberKilled\" AS killed \
             FROM \"abc-123\" LIMIT 5000"
        );
        assert_eq!(query.limit, 5000);
    }

    #[test]
    fn clamps_requested_limit() {
        let filter = Filter {
            limit: Some(50_000),
            ..Filter::default()
        };
        let query = build_points_query("r", &FieldMapping::default(), &filter);
        assert!(query.text.ends_with(" LIMIT 10000"));
        assert_eq!(query.limit, 10_000);
    }

    #[test]
    fn ands_all_predicates() {
        let filter = Filter {
            bbox: Some(viewport()),
            start: Some(DateParam::new("2024-01-01")),
            end: Some(DateParam::new("2024-01-31")),
            severity: vec!["Fatal".to_string(), "Injury (Severe)".to_string()],
            county: vec!["Fresno".to_string()],
            ..Filter::default()
        };
        let clause = build_where(&filter, &FieldMapping::default());
        assert_eq!(
            clause,
            " WHERE \"collision_date\" >= '2024-01-01 00:00:00' \
             AND \"collision_date\" <= '2024-01-31 23:59:59' \
             AND \"severity\" IN ('Fatal','Injury (Severe)') \
             AND UPPER(\"county\") IN ('FRESNO') \
             AND \"latitude\" BETWEEN 36.6 AND 36.8 \
             AND \"longitude\" BETWEEN -119.5 AND -119.3"
        );
    }

    #[test]
    fn county_match_is_case_insensitive() {
        let filter = Filter {
            county: vec!["Los Angeles".to_string()],
            ..Filter::default()
        };
        let clause = build_where(&filter, &FieldMapping::default());
        assert_eq!(clause, " WHERE UPPER(\"county\") IN ('LOS ANGELES')");
    }

    #[test]
    fn escapes_hostile_values() {
        let filter = Filter {
            severity: vec!["x') OR 1=1 --".to_string()],
            ..Filter::default()
        };
        let clause = build_where(&filter, &FieldMapping::default());
        assert_eq!(clause, " WHERE \"severity\" IN ('x'') OR 1=1 --')");
    }

    #[test]
    fn uses_configured_column_names() {
        let fields = FieldMapping {
            latitude: "Latitude".to_string(),
            date: "Crash Date".to_string(),
            ..FieldMapping::default()
        };
        let query = build_points_query("r", &fields, &Filter::default());
        assert!(query.text.starts_with("SELECT \"Latitude\" AS latitude"));
        assert!(query.text.contains("\"Crash Date\" AS collision_date"));
    }

    #[test]
    fn bin_query_requires_bbox() {
        let err = build_bin_query("r", &FieldMapping::default(), &Filter::default(), 0.1)
            .unwrap_err();
        assert!(matches!(err, SourceError::Usage { .. }));
    }

    #[test]
    fn bin_query_rejects_non_positive_bin() {
        let filter = Filter {
            bbox: Some(viewport()),
            ..Filter::default()
        };
        for bin in [0.0, -0.1, f64::NAN] {
            assert!(build_bin_query("r", &FieldMapping::default(), &filter, bin).is_err());
        }
    }

    #[test]
    fn compiles_bin_query() {
        let filter = Filter {
            bbox: Some(viewport()),
            start: Some(DateParam::new("2024-01-01")),
            limit: Some(2000),
            ..Filter::default()
        };
        let query = build_bin_query("abc", &FieldMapping::default(), &filter, 0.1).unwrap();
        assert_eq!(
            query.text,
            "SELECT ROUND(\"latitude\"::numeric / 0.1, 0) * 0.1 AS lat_bin, \
             ROUND(\"longitude\"::numeric / 0.1, 0) * 0.1 AS lon_bin, \
             COUNT(*) AS n, MIN(\"collision_date\") AS first_date, \
             MAX(\"collision_date\") AS last_date FROM \"abc\" \
             WHERE \"latitude\" IS NOT NULL AND \"longitude\" IS NOT NULL \
             AND \"latitude\" BETWEEN 36.6 AND 36.8 \
             AND \"longitude\" BETWEEN -119.5 AND -119.3 \
             AND \"collision_date\" >= '2024-01-01 00:00:00' \
             GROUP BY lat_bin, lon_bin ORDER BY n DESC, lat_bin ASC, lon_bin ASC LIMIT 2000"
        );
        assert_eq!(query.limit, 2000);
    }

    #[test]
    fn bin_query_ignores_attribute_filters() {
        let filter = Filter {
            bbox: Some(viewport()),
            severity: vec!["Fatal".to_string()],
            ..Filter::default()
        };
        let query = build_bin_query("abc", &FieldMapping::default(), &filter, 0.05).unwrap();
        assert!(!query.text.contains("severity"));
    }
}
