/// 視野計算輸出
use geo::{BoundingRect, Polygon, Rect};
use serde::{Deserialize, Serialize};

use crate::comp::{AnalysisResolution, ObserverId};

/// 可見區域中心相對搜尋圓中心的偏移（百分比）
///
/// 以可見區域外框為基準，50/50 表示兩者中心重合。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CenterOffsets {
    pub cx: f64,
    pub cy: f64,
}

impl CenterOffsets {
    pub const CENTERED: CenterOffsets = CenterOffsets { cx: 50.0, cy: 50.0 };

    /// 由兩個外框計算偏移；寬或高為 0 的軸固定為 50
    pub fn from_extents(visible: &Rect<f64>, search: &Rect<f64>) -> Self {
        let va = visible.center();
        let sa = search.center();

        let cx = if visible.width() > 0.0 {
            50.0 - ((va.x - sa.x) / visible.width()) * 100.0
        } else {
            50.0
        };
        let cy = if visible.height() > 0.0 {
            50.0 + ((va.y - sa.y) / visible.height()) * 100.0
        } else {
            50.0
        };

        CenterOffsets { cx, cy }
    }

    pub fn between(visible: &Polygon<f64>, search: &Polygon<f64>) -> Self {
        match (visible.bounding_rect(), search.bounding_rect()) {
            (Some(va), Some(sa)) => Self::from_extents(&va, &sa),
            _ => Self::CENTERED,
        }
    }
}

/// 單一觀察者在某解析度下的可見區域
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibleAreaResult {
    pub visible_area: Polygon<f64>,
    pub center_offsets: CenterOffsets,
    pub resolution: AnalysisResolution,
    pub analysis_distance_meters: f64,
    /// 因引擎錯誤而退回搜尋圓頂點的視線數
    pub degraded_rays: usize,
}

/// 報告中每位觀察者的結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverVisibility {
    pub observer_id: ObserverId,
    pub name: String,
    pub result: VisibleAreaResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::coord;

    #[test]
    fn test_offsets_follow_visible_center() {
        let search = Rect::new(coord! { x: -10.0, y: -10.0 }, coord! { x: 10.0, y: 10.0 });
        assert_eq!(CenterOffsets::from_extents(&search, &search), CenterOffsets::CENTERED);

        // 可見區域只剩東半邊
        let visible = Rect::new(coord! { x: 0.0, y: -10.0 }, coord! { x: 10.0, y: 10.0 });
        let offsets = CenterOffsets::from_extents(&visible, &search);
        assert!((offsets.cx - 0.0).abs() < 1e-9);
        assert!((offsets.cy - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_extent() {
        let search = Rect::new(coord! { x: -10.0, y: -10.0 }, coord! { x: 10.0, y: 10.0 });
        let line = Rect::new(coord! { x: 0.0, y: 5.0 }, coord! { x: 0.0, y: 5.0 });
        assert_eq!(CenterOffsets::from_extents(&line, &search), CenterOffsets::CENTERED);
    }
}
