//! Local spatial binning for backends without server-side aggregation.
//!
//! Produces the same cells as the SQL aggregation: each axis is snapped to
//! `round(coord / bin) * bin` with halves rounded away from zero, and cells
//! are ordered by descending count with the cell index as a tie-break.

use std::collections::BTreeMap;

use crash_map_crash_models::{Bbox, BinRow, Point};

use crate::SourceError;

/// One located collision to aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct BinSample {
    /// Collision location.
    pub point: Point,
    /// Collision timestamp as reported upstream.
    pub date: Option<String>,
}

/// Decimal places the quotient is snapped to before rounding.
const QUOTIENT_SCALE: f64 = 1e9;

/// Grid index of a coordinate for the given cell size.
///
/// The quotient is snapped to nine decimal places first, so that decimal
/// halves such as `36.65 / 0.1` (`366.49999999999994` in binary) round away
/// from zero the way `ROUND(numeric)` does.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn bin_index(coord: f64, bin: f64) -> i64 {
    let quotient = ((coord / bin) * QUOTIENT_SCALE).round() / QUOTIENT_SCALE;
    quotient.round() as i64
}

/// Center of the cell with the given index.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bin_center(index: i64, bin: f64) -> f64 {
    index as f64 * bin
}

#[derive(Debug, Default)]
struct Cell {
    n: u64,
    first_date: Option<String>,
    last_date: Option<String>,
}

impl Cell {
    fn add(&mut self, date: Option<&str>) {
        self.n += 1;
        if let Some(date) = date {
            if self.first_date.as_deref().is_none_or(|d| date < d) {
                self.first_date = Some(date.to_string());
            }
            if self.last_date.as_deref().is_none_or(|d| date > d) {
                self.last_date = Some(date.to_string());
            }
        }
    }
}

/// Aggregates samples inside `bbox` into cells of `bin` degrees.
///
/// Samples outside the box are skipped. At most `limit` cells are
/// returned, busiest first.
///
/// # Errors
///
/// Returns [`SourceError::Usage`] if `bin` is not a positive finite number.
pub fn aggregate_bins(
    samples: &[BinSample],
    bin: f64,
    bbox: &Bbox,
    limit: u32,
) -> Result<Vec<BinRow>, SourceError> {
    if !bin.is_finite() || bin <= 0.0 {
        return Err(SourceError::Usage {
            message: format!("bin size must be a positive number, got {bin}"),
        });
    }

    let mut cells: BTreeMap<(i64, i64), Cell> = BTreeMap::new();
    for sample in samples {
        let Point { lon, lat } = sample.point;
        if !bbox.contains(lat, lon) {
            continue;
        }
        cells
            .entry((bin_index(lat, bin), bin_index(lon, bin)))
            .or_default()
            .add(sample.date.as_deref());
    }

    let mut cells: Vec<((i64, i64), Cell)> = cells.into_iter().collect();
    cells.sort_by(|(ka, a), (kb, b)| b.n.cmp(&a.n).then(ka.cmp(kb)));
    cells.truncate(limit as usize);

    Ok(cells
        .into_iter()
        .map(|((lat_idx, lon_idx), cell)| BinRow {
            lat_bin: bin_center(lat_idx, bin),
            lon_bin: bin_center(lon_idx, bin),
            n: cell.n,
            first_date: cell.first_date,
            last_date: cell.last_date,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lat: f64, lon: f64, date: &str) -> BinSample {
        BinSample {
            point: Point { lon, lat },
            date: Some(date.to_string()),
        }
    }

    fn viewport() -> Bbox {
        Bbox::new(-119.5, 36.6, -119.3, 36.8)
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(bin_index(0.25, 0.5), 1);
        assert_eq!(bin_index(-0.25, 0.5), -1);
        assert_eq!(bin_index(36.71, 0.1), 367);
        assert_eq!(bin_index(-119.41, 0.1), -1194);
    }

    #[test]
    fn decimal_halves_round_like_numeric() {
        assert_eq!(bin_index(36.65, 0.1), 367);
        assert_eq!(bin_index(0.35, 0.1), 4);
        assert_eq!(bin_index(-0.35, 0.1), -4);
        assert_eq!(bin_index(-119.45, 0.1), -1195);
        assert_eq!(bin_index(36.649, 0.1), 366);
    }

    #[test]
    fn half_cell_points_share_the_upper_cell() {
        let samples = vec![
            sample(36.65, -119.41, "2024-01-01"),
            sample(36.74, -119.41, "2024-01-02"),
        ];
        let rows = aggregate_bins(&samples, 0.1, &viewport(), 100).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].n, 2);
        assert!((rows[0].lat_bin - 36.7).abs() < 1e-9);
    }

    #[test]
    fn groups_points_into_cells() {
        let samples = vec![
            sample(36.71, -119.41, "2024-01-05"),
            sample(36.72, -119.42, "2024-01-02"),
            sample(36.76, -119.44, "2024-01-09"),
            sample(36.64, -119.36, "2024-01-01"),
        ];
        let rows = aggregate_bins(&samples, 0.1, &viewport(), 100).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].n, 2);
        assert!((rows[0].lat_bin - 36.7).abs() < 1e-9);
        assert!((rows[0].lon_bin - -119.4).abs() < 1e-9);
        assert_eq!(rows[0].first_date.as_deref(), Some("2024-01-02"));
        assert_eq!(rows[0].last_date.as_deref(), Some("2024-01-05"));

        // equal counts fall back to ascending cell order
        assert!((rows[1].lat_bin - 36.6).abs() < 1e-9);
        assert!((rows[2].lat_bin - 36.8).abs() < 1e-9);
        assert_eq!(rows[1].n, 1);
        assert_eq!(rows[2].n, 1);
    }

    #[test]
    fn skips_points_outside_bbox() {
        let samples = vec![sample(40.0, -119.4, "2024-01-01")];
        assert!(aggregate_bins(&samples, 0.1, &viewport(), 100).unwrap().is_empty());
    }

    #[test]
    fn caps_cell_count() {
        let samples = vec![
            sample(36.61, -119.41, "2024-01-01"),
            sample(36.71, -119.41, "2024-01-01"),
            sample(36.79, -119.41, "2024-01-01"),
        ];
        assert_eq!(aggregate_bins(&samples, 0.1, &viewport(), 2).unwrap().len(), 2);
    }

    #[test]
    fn rejects_non_positive_bin() {
        assert!(aggregate_bins(&[], 0.0, &viewport(), 10).is_err());
    }
}
