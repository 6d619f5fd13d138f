//! `SoQL` compilation for Socrata SODA endpoints.
//!
//! Literals use the same quote-doubling as the SQL builder. `SoQL` has no
//! portable identifier quoting, so configured column names are checked
//! against a conservative identifier pattern instead and rejected as a
//! configuration error if they do not match.

use crash_map_crash_models::{Bbox, Filter};
use crash_map_source_models::{FieldMapping, alias};

use crate::SourceError;
use crate::sql::literal;

/// `SoQL` clauses for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSoql {
    /// `$select` value.
    pub select: String,
    /// `$where` value, if any predicate applies.
    pub where_clause: Option<String>,
    /// `$limit` value.
    pub limit: u32,
}

impl CompiledSoql {
    /// Query-string pairs for the request.
    #[must_use]
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("$select", self.select.clone()),
            ("$limit", self.limit.to_string()),
        ];
        if let Some(where_clause) = &self.where_clause {
            params.push(("$where", where_clause.clone()));
        }
        params
    }
}

/// Validates a column name for use in `SoQL`.
///
/// # Errors
///
/// Returns [`SourceError::Configuration`] unless the name is a plain
/// identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn soql_ident(name: &str) -> Result<&str, SourceError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(SourceError::Configuration {
            message: format!("column name {name:?} is not a valid SoQL identifier"),
        })
    }
}

fn project(column: &str, alias_name: &str) -> String {
    if column == alias_name {
        column.to_string()
    } else {
        format!("{column} AS {alias_name}")
    }
}

/// Where a dataset keeps its coordinates.
enum Geometry<'a> {
    Location(&'a str),
    Flat { lat: &'a str, lon: &'a str },
}

impl<'a> Geometry<'a> {
    /// Only the columns in use are validated.
    fn new(fields: &'a FieldMapping, has_location: bool) -> Result<Self, SourceError> {
        if has_location {
            Ok(Self::Location(soql_ident(&fields.location)?))
        } else {
            Ok(Self::Flat {
                lat: soql_ident(&fields.latitude)?,
                lon: soql_ident(&fields.longitude)?,
            })
        }
    }

    fn select(&self) -> Vec<String> {
        match self {
            Self::Location(location) => vec![(*location).to_string()],
            Self::Flat { lat, lon } => {
                vec![project(lat, alias::LATITUDE), project(lon, alias::LONGITUDE)]
            }
        }
    }

    fn not_null(&self, parts: &mut Vec<String>) {
        match self {
            Self::Location(location) => parts.push(format!("{location} IS NOT NULL")),
            Self::Flat { lat, lon } => {
                parts.push(format!("{lat} IS NOT NULL"));
                parts.push(format!("{lon} IS NOT NULL"));
            }
        }
    }

    fn within(&self, bbox: &Bbox, parts: &mut Vec<String>) {
        match self {
            // top-left corner, then bottom-right corner
            Self::Location(location) => parts.push(format!(
                "within_box({location}, {}, {}, {}, {})",
                bbox.max_lat, bbox.min_lon, bbox.min_lat, bbox.max_lon
            )),
            Self::Flat { lat, lon } => parts.push(format!(
                "{lat} between {} and {} and {lon} between {} and {}",
                bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon
            )),
        }
    }
}

fn date_predicates(filter: &Filter, date: &str, parts: &mut Vec<String>) {
    if let Some(start) = &filter.start {
        parts.push(format!("{date} >= {}", literal(&format!("{start}T00:00:00"))));
    }
    if let Some(end) = &filter.end {
        parts.push(format!("{date} <= {}", literal(&format!("{end}T23:59:59"))));
    }
}

fn compile(select: &[String], parts: &[String], limit: u32) -> CompiledSoql {
    CompiledSoql {
        select: select.join(", "),
        where_clause: (!parts.is_empty()).then(|| parts.join(" AND ")),
        limit,
    }
}

/// Compiles a row-fetch request.
///
/// When `has_location` is set, the dataset's point column is selected and
/// used for `within_box`; otherwise the flat latitude/longitude columns are
/// selected and compared with `BETWEEN`.
///
/// # Errors
///
/// Returns [`SourceError::Configuration`] if a configured column name is
/// not a valid identifier.
pub fn build_points_soql(
    fields: &FieldMapping,
    filter: &Filter,
    has_location: bool,
    limit: u32,
) -> Result<CompiledSoql, SourceError> {
    let geometry = Geometry::new(fields, has_location)?;
    let date = soql_ident(&fields.date)?;
    let severity = soql_ident(&fields.severity)?;
    let county = soql_ident(&fields.county)?;

    let mut select = geometry.select();
    select.push(project(date, alias::DATE));
    select.push(project(severity, alias::SEVERITY));
    select.push(project(county, alias::COUNTY));

    let mut parts = Vec::new();
    date_predicates(filter, date, &mut parts);
    if !filter.severity.is_empty() {
        let list: Vec<String> = filter.severity.iter().map(|s| literal(s)).collect();
        parts.push(format!("{severity} in ({})", list.join(",")));
    }
    if !filter.county.is_empty() {
        let list: Vec<String> = filter
            .county
            .iter()
            .map(|c| literal(&c.to_uppercase()))
            .collect();
        parts.push(format!("upper({county}) in ({})", list.join(",")));
    }
    if let Some(bbox) = &filter.bbox {
        geometry.within(bbox, &mut parts);
    }

    Ok(compile(&select, &parts, limit))
}

/// Compiles the point fetch behind a local bin aggregation.
///
/// Matches the SQL bin query: located rows inside the bbox and date range
/// only. Severity and county filters do not apply to bins.
///
/// # Errors
///
/// Returns [`SourceError::Configuration`] if a configured column name is
/// not a valid identifier.
pub fn build_bin_soql(
    fields: &FieldMapping,
    filter: &Filter,
    has_location: bool,
    limit: u32,
) -> Result<CompiledSoql, SourceError> {
    let geometry = Geometry::new(fields, has_location)?;
    let date = soql_ident(&fields.date)?;

    let mut select = geometry.select();
    select.push(project(date, alias::DATE));

    let mut parts = Vec::new();
    geometry.not_null(&mut parts);
    if let Some(bbox) = &filter.bbox {
        geometry.within(bbox, &mut parts);
    }
    date_predicates(filter, date, &mut parts);

    Ok(compile(&select, &parts, limit))
}
