/// 幾何基礎操作
///
/// 包裝 `geo` 幾何引擎：測地圓、視線、交集/聯集、測地面積與最近頂點。
/// 引擎內部的 panic 一律轉成 `AnalysisError::EngineFailure`。
use geo::algorithm::orient::{Direction, Orient};
use geo::{
    BooleanOps, Contains, Coord, GeodesicArea, GeodesicDestination, GeodesicDistance, Intersects,
    LineString, MapCoords, MultiLineString, MultiPolygon, Point, Polygon, Rect,
};
use log::debug;
use ordered_float::OrderedFloat;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::error::{AnalysisError, Result};
use crate::vision::spatial_ref::SpatialReference;

/// 平方公尺轉平方英尺
pub const SQ_FT_PER_SQ_M: f64 = 10.763_910_416_709_722;

thread_local! {
    /// 目前執行緒正在受保護的引擎呼叫中
    static IN_GUARDED_CALL: Cell<bool> = Cell::new(false);
}

static QUIET_ENGINE_PANICS: Once = Once::new();

/// 受保護呼叫中的 panic 改記到 log，其餘交給原本的 hook
fn install_engine_panic_hook() {
    QUIET_ENGINE_PANICS.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_GUARDED_CALL.with(|flag| flag.get()) {
                debug!("geometry engine panicked: {}", info);
            } else {
                previous(info);
            }
        }));
    });
}

pub struct GeometryUtils;

impl GeometryUtils {
    /// 以正多邊形近似測地圓
    ///
    /// 第 0 個頂點在正東方，之後逆時針排列。回傳的環已閉合。
    pub fn geodesic_circle(
        center: Coord<f64>,
        radius_m: f64,
        number_of_points: usize,
        sr: SpatialReference,
    ) -> Polygon<f64> {
        let n = number_of_points.max(3);
        let step = 360.0 / n as f64;
        let coords: Vec<Coord<f64>> = (0..n)
            .map(|i| {
                // 數學角度轉方位角（北為 0，順時針）
                let bearing = 90.0 - i as f64 * step;
                Self::destination(center, bearing, radius_m, sr)
            })
            .collect();

        Polygon::new(LineString::from(coords), vec![])
    }

    /// 沿方位角前進指定公尺數
    pub fn destination(
        origin: Coord<f64>,
        bearing_deg: f64,
        distance_m: f64,
        sr: SpatialReference,
    ) -> Coord<f64> {
        let start = Point::from(sr.to_geographic(origin));
        let end = start.geodesic_destination(bearing_deg, distance_m);
        sr.from_geographic(end.0)
    }

    /// 兩點間的測地距離（公尺）
    pub fn geodesic_distance_m(a: Coord<f64>, b: Coord<f64>, sr: SpatialReference) -> f64 {
        let a = Point::from(sr.to_geographic(a));
        let b = Point::from(sr.to_geographic(b));
        a.geodesic_distance(&b)
    }

    /// 建立觀察者到目標點的視線
    pub fn sightline(from: Coord<f64>, to: Coord<f64>) -> LineString<f64> {
        LineString::from(vec![from, to])
    }

    /// 視線落在障礙物內的線段
    ///
    /// 沒有交集時回傳 `None`，不視為錯誤。
    pub fn intersect_sightline(
        obstruction: &MultiPolygon<f64>,
        sightline: &LineString<f64>,
    ) -> Result<Option<MultiLineString<f64>>> {
        let lines = MultiLineString::new(vec![sightline.clone()]);
        let clipped = Self::guarded("intersect", || obstruction.clip(&lines, false))?;
        let pieces: Vec<LineString<f64>> = clipped
            .0
            .into_iter()
            .filter(|piece| !piece.0.is_empty())
            .collect();

        if pieces.is_empty() {
            Ok(None)
        } else {
            Ok(Some(MultiLineString::new(pieces)))
        }
    }

    /// 多組交集線段中距離 `to` 最近的頂點
    ///
    /// 線段聯集只會合併相接的片段，端點集合不會多出新點，
    /// 因此直接在全部片段的頂點中取最近者。
    pub fn nearest_vertex(lines: &[MultiLineString<f64>], to: Coord<f64>) -> Option<Coord<f64>> {
        lines
            .iter()
            .flat_map(|mls| mls.0.iter())
            .flat_map(|ls| ls.0.iter().copied())
            .min_by_key(|c| {
                let dx = c.x - to.x;
                let dy = c.y - to.y;
                OrderedFloat(dx * dx + dy * dy)
            })
    }

    /// 精確聯集
    pub fn union_all(polygons: &[Polygon<f64>]) -> Result<MultiPolygon<f64>> {
        Self::guarded("union", || {
            polygons
                .iter()
                .fold(MultiPolygon::new(vec![]), |acc, polygon| {
                    acc.union(&MultiPolygon::new(vec![polygon.clone()]))
                })
        })
    }

    /// 交集（亦用於以地圖範圍裁切）
    pub fn intersection(a: &MultiPolygon<f64>, b: &Polygon<f64>) -> Result<MultiPolygon<f64>> {
        Self::guarded("intersect", || {
            a.intersection(&MultiPolygon::new(vec![b.clone()]))
        })
    }

    pub fn intersects(a: &MultiPolygon<f64>, b: &Polygon<f64>) -> bool {
        a.intersects(b)
    }

    pub fn contains(area: &MultiPolygon<f64>, point: Coord<f64>) -> bool {
        area.contains(&Point::from(point))
    }

    /// 測地面積（平方英尺）
    pub fn area_sq_ft(area: &MultiPolygon<f64>, sr: SpatialReference) -> f64 {
        let geographic = area.map_coords(move |c| sr.to_geographic(c));
        geographic.geodesic_area_unsigned() * SQ_FT_PER_SQ_M
    }

    pub fn polygon_area_sq_ft(area: &Polygon<f64>, sr: SpatialReference) -> f64 {
        let geographic = area.map_coords(move |c| sr.to_geographic(c));
        geographic.geodesic_area_unsigned() * SQ_FT_PER_SQ_M
    }

    pub fn rect_area_sq_ft(extent: &Rect<f64>, sr: SpatialReference) -> f64 {
        Self::polygon_area_sq_ft(&extent.to_polygon(), sr)
    }

    /// 外環逆時針、內環順時針
    pub fn orient_ccw(polygon: &Polygon<f64>) -> Polygon<f64> {
        polygon.orient(Direction::Default)
    }

    /// 外環頂點（不含閉合點）
    pub fn ring_coords(polygon: &Polygon<f64>) -> Vec<Coord<f64>> {
        let ring = &polygon.exterior().0;
        match ring.split_last() {
            Some((last, rest)) if !rest.is_empty() && rest[0] == *last => rest.to_vec(),
            _ => ring.clone(),
        }
    }

    /// 執行幾何引擎呼叫並攔截 panic
    fn guarded<T>(op: &str, f: impl FnOnce() -> T) -> Result<T> {
        install_engine_panic_hook();
        let outer = IN_GUARDED_CALL.with(|flag| flag.replace(true));
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        IN_GUARDED_CALL.with(|flag| flag.set(outer));
        result.map_err(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            AnalysisError::EngineFailure(format!("{}: {}", op, reason))
        })
    }
}
