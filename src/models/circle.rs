use nalgebra::{Matrix2, Vector2};

use crate::error::{Result, SearchError};
use crate::models::common::GeoPoint;

/// 行列式がこの値（スケール正規化後）以下なら退化配置とみなす
const DEGENERATE_DETERMINANT: f64 = 1e-9;

/// 中心点と半径で表される測地円
///
/// センス結果を「この中心からこの距離にターゲットがある」という
/// 証拠として保持するために使用します。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCircle {
    pub center: GeoPoint,
    pub radius: f64,
}

impl GeoCircle {
    /// 新しい円を作成。半径は非負の有限値でなければなりません。
    pub fn new(center: GeoPoint, radius: f64) -> Result<Self> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(SearchError::Validation(format!("radius {radius} must be >= 0")));
        }
        Ok(Self { center, radius })
    }

    /// 3円の三辺測量
    ///
    /// 自身の中心を原点とする局所接平面で円の方程式を立て、
    /// 自身の式との差を取った2×2の線形方程式を解きます。
    /// 解が各円周上に実際に乗っているかは検証しません（推定値）。
    /// 中心が一直線上にある場合、または2つの中心が一致する場合は
    /// `SearchError::Geometry` を返します。
    pub fn intersect_three(&self, other1: &GeoCircle, other2: &GeoCircle) -> Result<GeoPoint> {
        let (x1, y1) = self.center.local_offset_to(&other1.center);
        let (x2, y2) = self.center.local_offset_to(&other2.center);
        let r0 = self.radius;

        let a = Matrix2::new(2.0 * x1, 2.0 * y1, 2.0 * x2, 2.0 * y2);
        let b = Vector2::new(
            r0.powi(2) - other1.radius.powi(2) + x1.powi(2) + y1.powi(2),
            r0.powi(2) - other2.radius.powi(2) + x2.powi(2) + y2.powi(2),
        );

        // 行ベクトル長で正規化した行列式（= 2つの基線のなす角の正弦）
        let scale = (x1.hypot(y1) * x2.hypot(y2)) * 4.0;
        if scale <= f64::EPSILON || (a.determinant() / scale).abs() <= DEGENERATE_DETERMINANT {
            return Err(SearchError::degenerate_geometry());
        }

        let solution = a.lu().solve(&b).ok_or_else(SearchError::degenerate_geometry)?;
        if !solution.x.is_finite() || !solution.y.is_finite() {
            return Err(SearchError::degenerate_geometry());
        }

        self.center.offset(solution.x, solution.y, None)
    }

    /// 推定点の半径からのずれ（メートル、水平距離）
    pub fn residual(&self, point: &GeoPoint) -> f64 {
        (self.center.horizontal_distance_to(point) - self.radius).abs()
    }
}
