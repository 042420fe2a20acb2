use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SearchError};

/// 地球の平均半径（メートル）
///
/// 距離計算と局所接平面変換の両方で同じ球体モデルを使用します。
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_000.0;

/// 測地座標点（緯度・経度・任意の高度）
///
/// 不変の値型です。生成時に緯度経度の範囲を検証し、
/// 新しい点は演算結果としてのみ生成されます。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeoPoint", into = "RawGeoPoint")]
pub struct GeoPoint {
    lat: f64,
    lon: f64,
    alt: Option<f64>,
}

/// シリアライズ用の未検証表現
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawGeoPoint {
    lat: f64,
    lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alt: Option<f64>,
}

impl TryFrom<RawGeoPoint> for GeoPoint {
    type Error = SearchError;

    fn try_from(raw: RawGeoPoint) -> Result<Self> {
        GeoPoint::new(raw.lat, raw.lon, raw.alt)
    }
}

impl From<GeoPoint> for RawGeoPoint {
    fn from(point: GeoPoint) -> Self {
        Self {
            lat: point.lat,
            lon: point.lon,
            alt: point.alt,
        }
    }
}

impl GeoPoint {
    /// 新しい測地座標点を作成
    ///
    /// 緯度は[-90, 90]、経度は[-180, 180]の範囲でなければなりません。
    pub fn new(lat: f64, lon: f64, alt: Option<f64>) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(SearchError::Validation(format!(
                "latitude {lat} must be between -90 and 90 degrees"
            )));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(SearchError::Validation(format!(
                "longitude {lon} must be between -180 and 180 degrees"
            )));
        }
        if let Some(a) = alt {
            if !a.is_finite() {
                return Err(SearchError::Validation(format!("altitude {a} is not finite")));
            }
        }
        Ok(Self { lat, lon, alt })
    }

    /// 高度なしの点を作成
    pub fn surface(lat: f64, lon: f64) -> Result<Self> {
        Self::new(lat, lon, None)
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn alt(&self) -> Option<f64> {
        self.alt
    }

    /// 高度だけを差し替えた点を返す
    pub fn with_alt(&self, alt: Option<f64>) -> Self {
        Self { alt, ..*self }
    }

    /// 2点間の距離（メートル）
    ///
    /// `horizontal_only` が真の場合は大円距離（ハーバーサイン）のみ、
    /// 偽の場合は高度差を加えた斜距離を返します。どちらかの点に高度が
    /// ない場合、高度差は0として扱います。
    pub fn distance_to(&self, other: &GeoPoint, horizontal_only: bool) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();

        let a = (d_lat * 0.5).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon * 0.5).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
        let horizontal = EARTH_MEAN_RADIUS_M * c;

        if horizontal_only {
            return horizontal;
        }

        let d_alt = match (self.alt, other.alt) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        };
        (horizontal.powi(2) + d_alt.powi(2)).sqrt()
    }

    /// 水平距離の省略形
    pub fn horizontal_distance_to(&self, other: &GeoPoint) -> f64 {
        self.distance_to(other, true)
    }

    /// 局所接平面（東・北・上、メートル）で変位させた点を返す
    ///
    /// 元の点に高度がない場合、結果にも高度はありません。
    pub fn offset(&self, east: f64, north: f64, up: Option<f64>) -> Result<GeoPoint> {
        let lat_rad = self.lat.to_radians();
        let lat = self.lat + (north / EARTH_MEAN_RADIUS_M).to_degrees();
        let lon = self.lon + (east / (EARTH_MEAN_RADIUS_M * lat_rad.cos())).to_degrees();
        let alt = self.alt.map(|a| a + up.unwrap_or(0.0));

        GeoPoint::new(lat, math_utils::normalize_longitude(lon), alt)
    }

    /// この点を原点とした局所接平面上の (東, 北) 座標
    ///
    /// `offset` の逆変換です。
    pub fn local_offset_to(&self, other: &GeoPoint) -> (f64, f64) {
        let lat_rad = self.lat.to_radians();
        let d_lon = math_utils::normalize_longitude(other.lon - self.lon);
        let east = d_lon.to_radians() * EARTH_MEAN_RADIUS_M * lat_rad.cos();
        let north = (other.lat - self.lat).to_radians() * EARTH_MEAN_RADIUS_M;
        (east, north)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.alt {
            Some(alt) => write!(f, "({:.6}, {:.6}, {:.1}m)", self.lat, self.lon, alt),
            None => write!(f, "({:.6}, {:.6})", self.lat, self.lon),
        }
    }
}

/// 探索領域の矩形（南・西・北・東の境界）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl GeoBounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self> {
        let bounds = Self { north, south, east, west };
        bounds.validate()?;
        Ok(bounds)
    }

    pub fn validate(&self) -> Result<()> {
        GeoPoint::surface(self.north, self.east)?;
        GeoPoint::surface(self.south, self.west)?;
        if self.south > self.north || self.west > self.east {
            return Err(SearchError::Validation(format!(
                "invalid bounds: south {} / north {} / west {} / east {}",
                self.south, self.north, self.west, self.east
            )));
        }
        Ok(())
    }

    pub fn south_west(&self) -> GeoPoint {
        GeoPoint { lat: self.south, lon: self.west, alt: None }
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: (self.north + self.south) / 2.0,
            lon: (self.east + self.west) / 2.0,
            alt: None,
        }
    }

    /// 南北方向の幅（メートル）
    pub fn span_north_south_m(&self) -> f64 {
        let sw = self.south_west();
        let nw = GeoPoint { lat: self.north, ..sw };
        sw.horizontal_distance_to(&nw)
    }

    /// 東西方向の幅（メートル）
    ///
    /// 赤道に近い側の辺のほうが長いため、南北両辺の大きい方を返します。
    pub fn span_east_west_m(&self) -> f64 {
        let south_edge = GeoPoint { lat: self.south, lon: self.west, alt: None }
            .horizontal_distance_to(&GeoPoint { lat: self.south, lon: self.east, alt: None });
        let north_edge = GeoPoint { lat: self.north, lon: self.west, alt: None }
            .horizontal_distance_to(&GeoPoint { lat: self.north, lon: self.east, alt: None });
        south_edge.max(north_edge)
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.south && point.lat <= self.north && point.lon >= self.west && point.lon <= self.east
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    /// 経度を[-180, 180]の範囲に正規化
    pub fn normalize_longitude(lon_deg: f64) -> f64 {
        if (-180.0..=180.0).contains(&lon_deg) {
            return lon_deg;
        }
        let wrapped = (lon_deg + 180.0).rem_euclid(360.0) - 180.0;
        if wrapped == -180.0 && lon_deg > 0.0 { 180.0 } else { wrapped }
    }
}
