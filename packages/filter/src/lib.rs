#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Validation of untrusted collision filter input.
//!
//! [`validate_filter`] turns [`RawFilterParams`] into a bounded [`Filter`]
//! or reports every violated constraint at once, so callers can present a
//! complete issue list instead of fixing one field at a time.

pub mod zoom;

use std::sync::LazyLock;

use crash_map_crash_models::{
    Bbox, DateParam, Filter, FilterField, FilterIssue, MAX_BIN_SIZE, MAX_COUNTY_VALUES,
    MAX_LIMIT, MAX_SEVERITY_VALUES, QueryMode, RawFilterParams,
};
use regex::Regex;

pub use zoom::ZoomPlan;

/// `YYYY-MM-DD` shape. Calendar validity is intentionally not checked.
static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("valid date pattern"));

/// Returned when one or more filter constraints are violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid filter ({} issue(s))", .issues.len())]
pub struct ValidationError {
    /// Every violated constraint, in field order.
    pub issues: Vec<FilterIssue>,
}

impl ValidationError {
    /// Whether any issue was reported against `field`.
    #[must_use]
    pub fn has_issue(&self, field: FilterField) -> bool {
        self.issues.iter().any(|issue| issue.field == field)
    }
}

/// Validates and coerces raw filter input.
///
/// # Errors
///
/// Returns [`ValidationError`] listing every violated constraint.
pub fn validate_filter(raw: &RawFilterParams) -> Result<Filter, ValidationError> {
    let mut issues = Vec::new();

    let bbox = match raw.bbox.as_deref().map(parse_bbox) {
        Some(Ok(bbox)) => Some(bbox),
        Some(Err(mut bbox_issues)) => {
            issues.append(&mut bbox_issues);
            None
        }
        None => None,
    };

    let start = record(
        raw.start.as_deref().map(|s| parse_date(FilterField::Start, s)),
        &mut issues,
    );
    let end = record(
        raw.end.as_deref().map(|s| parse_date(FilterField::End, s)),
        &mut issues,
    );

    if raw.severity.len() > MAX_SEVERITY_VALUES {
        issues.push(FilterIssue::new(
            FilterField::Severity,
            format!("at most {MAX_SEVERITY_VALUES} values are allowed"),
        ));
    }
    if raw.county.len() > MAX_COUNTY_VALUES {
        issues.push(FilterIssue::new(
            FilterField::County,
            format!("at most {MAX_COUNTY_VALUES} values are allowed"),
        ));
    }

    let mut limit = record(raw.limit.as_deref().map(parse_limit), &mut issues);
    let mut mode = record(raw.mode.as_deref().map(parse_mode), &mut issues);
    let mut bin = record(raw.bin.as_deref().map(parse_bin), &mut issues);
    let plan = record(raw.zoom.as_deref().map(ZoomPlan::parse), &mut issues);

    if let Some(plan) = plan {
        let resolved = *mode.get_or_insert(plan.mode);
        if resolved == QueryMode::Bin && raw.bin.is_none() {
            bin = Some(plan.bin);
        }
        if raw.limit.is_none() {
            limit = Some(plan.limit);
        }
    }

    if mode == Some(QueryMode::Bin) && raw.bin.is_none() && bin.is_none() {
        issues.push(FilterIssue::new(
            FilterField::Bin,
            "bin is required when mode=bin",
        ));
    }

    if !issues.is_empty() {
        log::debug!("Rejected filter with {} issue(s)", issues.len());
        return Err(ValidationError { issues });
    }

    Ok(Filter {
        bbox,
        start,
        end,
        severity: raw.severity.clone(),
        county: raw.county.clone(),
        limit,
        mode,
        bin,
    })
}

/// Unwraps an optional parse result, moving any issue into `issues`.
fn record<T>(
    result: Option<Result<T, FilterIssue>>,
    issues: &mut Vec<FilterIssue>,
) -> Option<T> {
    match result? {
        Ok(value) => Some(value),
        Err(issue) => {
            issues.push(issue);
            None
        }
    }
}

/// Coerces query-string text to a finite number.
fn coerce_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses `minLon,minLat,maxLon,maxLat`.
fn parse_bbox(s: &str) -> Result<Bbox, Vec<FilterIssue>> {
    const COMPONENTS: [(&str, f64); 4] = [
        ("minLon", 180.0),
        ("minLat", 90.0),
        ("maxLon", 180.0),
        ("maxLat", 90.0),
    ];

    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != COMPONENTS.len() {
        return Err(vec![FilterIssue::new(
            FilterField::Bbox,
            format!(
                "expected 4 comma-separated values (minLon,minLat,maxLon,maxLat), got {}",
                parts.len()
            ),
        )]);
    }

    let mut issues = Vec::new();
    let mut values = [0.0_f64; 4];

    for (i, ((name, range), part)) in COMPONENTS.iter().zip(&parts).enumerate() {
        match coerce_number(part) {
            Some(v) if (-range..=*range).contains(&v) => values[i] = v,
            Some(v) => issues.push(FilterIssue::new(
                FilterField::Bbox,
                format!("{name} {v} is outside [-{range}, {range}]"),
            )),
            None => issues.push(FilterIssue::new(
                FilterField::Bbox,
                format!("{name} is not a number: {part:?}"),
            )),
        }
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    let bbox = Bbox::new(values[0], values[1], values[2], values[3]);
    if bbox.max_lon <= bbox.min_lon || bbox.max_lat <= bbox.min_lat {
        return Err(vec![FilterIssue::new(
            FilterField::Bbox,
            "Invalid bbox: max must be greater than min on both axes",
        )]);
    }

    Ok(bbox)
}

fn parse_date(field: FilterField, s: &str) -> Result<DateParam, FilterIssue> {
    if DATE_PATTERN.is_match(s) {
        Ok(DateParam::new(s))
    } else {
        Err(FilterIssue::new(field, "expected a YYYY-MM-DD date"))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_limit(s: &str) -> Result<u32, FilterIssue> {
    let value = coerce_number(s)
        .ok_or_else(|| FilterIssue::new(FilterField::Limit, "expected a number"))?;
    if value.fract() != 0.0 {
        return Err(FilterIssue::new(FilterField::Limit, "must be an integer"));
    }
    if value <= 0.0 {
        return Err(FilterIssue::new(FilterField::Limit, "must be positive"));
    }
    if value > f64::from(MAX_LIMIT) {
        return Err(FilterIssue::new(
            FilterField::Limit,
            format!("must be at most {MAX_LIMIT}"),
        ));
    }
    Ok(value as u32)
}

fn parse_mode(s: &str) -> Result<QueryMode, FilterIssue> {
    s.parse::<QueryMode>()
        .map_err(|_| FilterIssue::new(FilterField::Mode, "must be one of: points, bin"))
}

fn parse_bin(s: &str) -> Result<f64, FilterIssue> {
    let value =
        coerce_number(s).ok_or_else(|| FilterIssue::new(FilterField::Bin, "expected a number"))?;
    if value <= 0.0 || value > MAX_BIN_SIZE {
        return Err(FilterIssue::new(
            FilterField::Bin,
            format!("must be greater than 0 and at most {MAX_BIN_SIZE}"),
        ));
    }
    Ok(value)
}
