/// 空間參考
///
/// 支援地理座標 (WGS84, wkid 4326) 與 Web Mercator (wkid 3857 / 102100)。
/// 測地運算一律在經緯度上進行，再轉回原本的空間參考。
use geo::Coord;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{AnalysisError, Result};

/// WGS84 橢球長半軸（公尺）
const EARTH_RADIUS_M: f64 = 6_378_137.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SpatialReference {
    wkid: u32,
}

impl SpatialReference {
    pub const WGS84: SpatialReference = SpatialReference { wkid: 4326 };
    pub const WEB_MERCATOR: SpatialReference = SpatialReference { wkid: 3857 };

    /// 由 wkid 建立，不支援的 wkid 回傳錯誤
    pub fn from_wkid(wkid: u32) -> Result<Self> {
        match wkid {
            4326 => Ok(Self::WGS84),
            3857 | 102100 | 102113 => Ok(Self::WEB_MERCATOR),
            other => Err(AnalysisError::UnsupportedSpatialReference(other)),
        }
    }

    pub fn wkid(&self) -> u32 {
        self.wkid
    }

    pub fn is_geographic(&self) -> bool {
        self.wkid == 4326
    }

    /// 轉成經緯度 (x = lon, y = lat)
    pub fn to_geographic(&self, c: Coord<f64>) -> Coord<f64> {
        if self.is_geographic() {
            return c;
        }
        let lon = (c.x / EARTH_RADIUS_M).to_degrees();
        let lat = (2.0 * (c.y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
        Coord { x: lon, y: lat }
    }

    /// 由經緯度轉回本空間參考
    pub fn from_geographic(&self, c: Coord<f64>) -> Coord<f64> {
        if self.is_geographic() {
            return c;
        }
        let x = EARTH_RADIUS_M * c.x.to_radians();
        let y = EARTH_RADIUS_M * (PI / 4.0 + c.y.to_radians() / 2.0).tan().ln();
        Coord { x, y }
    }

    /// 檢查兩者一致，否則回傳 GeometryMismatch
    pub fn ensure_same(&self, other: SpatialReference) -> Result<()> {
        if *self == other {
            Ok(())
        } else {
            Err(AnalysisError::GeometryMismatch {
                expected: self.wkid,
                found: other.wkid,
            })
        }
    }
}

impl Default for SpatialReference {
    fn default() -> Self {
        Self::WGS84
    }
}

impl TryFrom<u32> for SpatialReference {
    type Error = AnalysisError;

    fn try_from(wkid: u32) -> Result<Self> {
        Self::from_wkid(wkid)
    }
}

impl From<SpatialReference> for u32 {
    fn from(sr: SpatialReference) -> u32 {
        sr.wkid
    }
}
