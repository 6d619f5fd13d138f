//! Zoom-driven request defaults.
//!
//! Low zoom levels cover large areas, so they are served as binned
//! aggregates with a coarser grid the further out the viewport is. From
//! [`POINTS_MIN_ZOOM`] onwards individual rows are returned.

use crash_map_crash_models::{DEFAULT_LIMIT, FilterField, FilterIssue, MAX_LIMIT, QueryMode};

/// First zoom level served as individual points.
pub const POINTS_MIN_ZOOM: f64 = 10.0;

/// Highest zoom level accepted.
pub const MAX_ZOOM: f64 = 24.0;

/// Request defaults derived from a map zoom level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomPlan {
    /// Query shape for this zoom.
    pub mode: QueryMode,
    /// Bin size to use if the request is binned.
    pub bin: f64,
    /// Row cap.
    pub limit: u32,
}

impl ZoomPlan {
    /// Builds the plan for a zoom level.
    #[must_use]
    pub fn for_zoom(zoom: f64) -> Self {
        if zoom < POINTS_MIN_ZOOM {
            Self {
                mode: QueryMode::Bin,
                bin: bin_size_for_zoom(zoom),
                limit: DEFAULT_LIMIT,
            }
        } else {
            Self {
                mode: QueryMode::Points,
                bin: bin_size_for_zoom(zoom),
                limit: MAX_LIMIT,
            }
        }
    }

    /// Parses a zoom query parameter and builds its plan.
    ///
    /// # Errors
    ///
    /// Returns a [`FilterIssue`] on [`FilterField::Zoom`] if the value is not
    /// a number in `[0, MAX_ZOOM]`.
    pub fn parse(s: &str) -> Result<Self, FilterIssue> {
        let zoom = s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|z| z.is_finite())
            .ok_or_else(|| FilterIssue::new(FilterField::Zoom, "expected a number"))?;
        if !(0.0..=MAX_ZOOM).contains(&zoom) {
            return Err(FilterIssue::new(
                FilterField::Zoom,
                format!("must be between 0 and {MAX_ZOOM}"),
            ));
        }
        Ok(Self::for_zoom(zoom))
    }
}

/// Grid size in degrees for a zoom level.
#[must_use]
pub fn bin_size_for_zoom(zoom: f64) -> f64 {
    if zoom < 6.0 {
        0.1
    } else if zoom < 8.0 {
        0.05
    } else {
        0.02
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coarse_bins_when_zoomed_out() {
        let plan = ZoomPlan::for_zoom(4.5);
        assert_eq!(plan.mode, QueryMode::Bin);
        assert!((plan.bin - 0.1).abs() < f64::EPSILON);
        assert_eq!(plan.limit, 5000);
    }

    #[test]
    fn finer_bins_at_mid_zoom() {
        assert!((ZoomPlan::for_zoom(6.0).bin - 0.05).abs() < f64::EPSILON);
        assert!((ZoomPlan::for_zoom(9.9).bin - 0.02).abs() < f64::EPSILON);
    }

    #[test]
    fn points_when_zoomed_in() {
        let plan = ZoomPlan::for_zoom(10.0);
        assert_eq!(plan.mode, QueryMode::Points);
        assert_eq!(plan.limit, 10_000);
    }

    #[test]
    fn rejects_non_numeric_zoom() {
        assert_eq!(ZoomPlan::parse("far").unwrap_err().field, FilterField::Zoom);
        assert!(ZoomPlan::parse("-1").is_err());
    }
}
