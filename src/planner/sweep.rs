//! 往復（ボストロフェドン）型の網羅探索経路

use tracing::debug;

use crate::error::{Result, SearchError};
use crate::models::common::{GeoBounds, GeoPoint};

/// 網羅探索の格子経路
///
/// 南の行から順に、偶数行は西→東、奇数行は東→西へ進むため、
/// 連続するウェイポイントは常に隣接します。
#[derive(Debug, Clone)]
pub struct CoverageSweep {
    points: Vec<GeoPoint>,
    rows: usize,
    cols: usize,
}

/// 1つの掃引経路に許すウェイポイント数の上限
pub const MAX_SWEEP_POINTS: usize = 1_000_000;

/// 区間数: 各区間が `step` 以下になる最小の分割数
fn interval_count(span_m: f64, step_m: f64) -> usize {
    if span_m <= 0.0 {
        0
    } else {
        (span_m / step_m).ceil() as usize
    }
}

/// `start` から `end` までを `intervals` 等分した座標列（両端を含む）
fn linspace(start: f64, end: f64, intervals: usize) -> Vec<f64> {
    if intervals == 0 {
        return vec![start];
    }
    (0..=intervals)
        .map(|i| {
            if i == intervals {
                end
            } else {
                start + (end - start) * i as f64 / intervals as f64
            }
        })
        .collect()
}

impl CoverageSweep {
    /// 境界矩形を `step_m` 以下の間隔で覆う格子を生成
    pub fn generate(bounds: &GeoBounds, step_m: f64, altitude: Option<f64>) -> Result<Self> {
        bounds.validate()?;
        if !step_m.is_finite() || step_m <= 0.0 {
            return Err(SearchError::Validation(format!("sweep step {step_m} must be > 0")));
        }

        let lat_intervals = interval_count(bounds.span_north_south_m(), step_m);
        let lon_intervals = interval_count(bounds.span_east_west_m(), step_m);
        let total = lat_intervals
            .saturating_add(1)
            .saturating_mul(lon_intervals.saturating_add(1));
        if total > MAX_SWEEP_POINTS {
            return Err(SearchError::Validation(format!(
                "sweep step {step_m}m yields {total} waypoints (limit {MAX_SWEEP_POINTS})"
            )));
        }
        let lats = linspace(bounds.south, bounds.north, lat_intervals);
        let lons = linspace(bounds.west, bounds.east, lon_intervals);

        let mut points = Vec::with_capacity(lats.len() * lons.len());
        for (row, lat) in lats.iter().enumerate() {
            let ordered: Box<dyn Iterator<Item = &f64>> = if row % 2 == 0 {
                Box::new(lons.iter())
            } else {
                Box::new(lons.iter().rev())
            };
            for lon in ordered {
                points.push(GeoPoint::new(*lat, *lon, altitude)?);
            }
        }

        debug!(
            "網羅格子生成: {}行 × {}列 (間隔 {:.1}m)",
            lats.len(),
            lons.len(),
            step_m
        );

        Ok(Self {
            points,
            rows: lats.len(),
            cols: lons.len(),
        })
    }

    /// 開始位置を `start` 番目の点へ回転する
    pub fn rotate(&mut self, start: usize) {
        if !self.points.is_empty() {
            let start = start % self.points.len();
            self.points.rotate_left(start);
        }
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> GeoBounds {
        GeoBounds::new(0.01, 0.0, 0.01, 0.0).unwrap()
    }

    #[test]
    fn test_lattice_dimensions() {
        let sweep = CoverageSweep::generate(&bounds(), 280.0, Some(10.0)).unwrap();
        // 1112m / 280m → 4区間 → 5点
        assert_eq!(sweep.rows(), 5);
        assert_eq!(sweep.cols(), 5);
        assert_eq!(sweep.len(), 25);
        assert!(sweep.points().iter().all(|p| p.alt() == Some(10.0)));
    }

    #[test]
    fn test_gaps_within_step_and_points_inside() {
        let area = GeoBounds::new(0.03749, 0.01852, 36.91846, 36.89164).unwrap();
        for step in [35.35, 141.42, 280.0, 1000.0] {
            let sweep = CoverageSweep::generate(&area, step, None).unwrap();
            let points = sweep.points();
            assert!(points.iter().all(|p| area.contains(p)));

            for row in points.chunks(sweep.cols()) {
                for pair in row.windows(2) {
                    assert!(pair[0].horizontal_distance_to(&pair[1]) <= step + 1e-3);
                }
            }
            for r in 1..sweep.rows() {
                let prev = &points[(r - 1) * sweep.cols()];
                let here = points[r * sweep.cols()..(r + 1) * sweep.cols()]
                    .iter()
                    .find(|p| (p.lon() - prev.lon()).abs() < 1e-12)
                    .unwrap();
                assert!(prev.horizontal_distance_to(here) <= step + 1e-3);
            }
        }
    }

    #[test]
    fn test_consecutive_waypoints_are_adjacent() {
        let step = 280.0;
        let sweep = CoverageSweep::generate(&bounds(), step, None).unwrap();
        for pair in sweep.points().windows(2) {
            assert!(pair[0].horizontal_distance_to(&pair[1]) <= step + 1e-3);
        }
        // 2行目は東端から始まる
        assert_eq!(sweep.points()[sweep.cols()].lon(), bounds().east);
    }

    #[test]
    fn test_rotation_keeps_all_points() {
        let mut sweep = CoverageSweep::generate(&bounds(), 280.0, None).unwrap();
        let original = sweep.points().to_vec();
        sweep.rotate(7);
        assert_eq!(sweep.points()[0], original[7]);
        assert_eq!(sweep.points()[sweep.len() - 1], original[6]);
        sweep.rotate(25);
        assert_eq!(sweep.len(), original.len());
    }

    #[test]
    fn test_degenerate_area_is_single_point() {
        let point_area = GeoBounds::new(0.5, 0.5, 36.9, 36.9).unwrap();
        let sweep = CoverageSweep::generate(&point_area, 50.0, None).unwrap();
        assert_eq!(sweep.len(), 1);
    }

    #[test]
    fn test_rejects_bad_step() {
        assert!(CoverageSweep::generate(&bounds(), 0.0, None).is_err());
        assert!(CoverageSweep::generate(&bounds(), f64::NAN, None).is_err());
    }

    #[test]
    fn test_rejects_oversized_lattice() {
        for step in [1e-6, 1e-300, f64::MIN_POSITIVE] {
            assert!(matches!(
                CoverageSweep::generate(&bounds(), step, None),
                Err(SearchError::Validation(_))
            ));
        }
        // 1112m / 2m → 556区間 → 557 × 557 点は上限内
        let fine = CoverageSweep::generate(&bounds(), 2.0, None).unwrap();
        assert_eq!(fine.cols(), 557);
        assert!(fine.len() <= MAX_SWEEP_POINTS);
    }
}
