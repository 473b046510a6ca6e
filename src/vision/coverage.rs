/// 覆蓋率統計
///
/// 合併所有觀察者的可見區域，計算重疊面積與相對於地圖範圍或關注區域的覆蓋率。
use geo::{Intersects, MultiPolygon, Polygon, Rect};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::vision::geometry_utils::GeometryUtils;
use crate::vision::spatial_ref::SpatialReference;

/// 覆蓋率的參考區域
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CoverageTarget {
    /// 目前地圖畫面範圍
    CurrentMapExtent,
    AreaOfInterest { area_of_interest: Polygon<f64> },
}

impl Default for CoverageTarget {
    fn default() -> Self {
        CoverageTarget::CurrentMapExtent
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageOptions {
    pub target: CoverageTarget,
    /// 由宿主提供的畫面範圍
    pub viewport: Option<Rect<f64>>,
    /// 最近一次完整分析的合併結果
    pub visible_areas_union: Option<MultiPolygon<f64>>,
}

/// 合併方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnionStrategy {
    /// 各環互不相交，直接組成多環多邊形
    RingConcatenation,
    /// 有環相交，做精確聯集
    ExactUnion,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCoverage {
    pub union: MultiPolygon<f64>,
    pub strategy: UnionStrategy,
    /// 各可見區域面積總和
    pub total_area_sq_ft: f64,
    pub union_area_sq_ft: f64,
    pub overlap_area_sq_ft: f64,
    pub overlap_percent: f64,
}

impl AggregateCoverage {
    pub fn empty() -> Self {
        Self {
            union: MultiPolygon::new(vec![]),
            strategy: UnionStrategy::Empty,
            total_area_sq_ft: 0.0,
            union_area_sq_ft: 0.0,
            overlap_area_sq_ft: 0.0,
            overlap_percent: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageStats {
    pub reference_area_sq_ft: f64,
    pub covered_area_sq_ft: f64,
    pub coverage_percent: f64,
}

pub struct CoverageAggregator {
    spatial_reference: SpatialReference,
    options: CoverageOptions,
}

impl CoverageAggregator {
    pub fn new(spatial_reference: SpatialReference) -> Self {
        Self {
            spatial_reference,
            options: CoverageOptions::default(),
        }
    }

    pub fn options(&self) -> &CoverageOptions {
        &self.options
    }

    pub fn spatial_reference(&self) -> SpatialReference {
        self.spatial_reference
    }

    pub fn aggregate(&self, areas: &[Polygon<f64>]) -> Result<AggregateCoverage> {
        Self::aggregate_in(self.spatial_reference, areas)
    }

    /// 合併可見區域並計算重疊
    ///
    /// 先逐環組合並檢查新環是否與已組合的部分相交；只要有一處相交就改做精確聯集。
    /// 不需要覆蓋率設定，可在不持有聚合器鎖的情況下執行。
    pub fn aggregate_in(sr: SpatialReference, areas: &[Polygon<f64>]) -> Result<AggregateCoverage> {
        if areas.is_empty() {
            return Ok(AggregateCoverage::empty());
        }

        let total_area_sq_ft: f64 = areas
            .iter()
            .map(|area| GeometryUtils::polygon_area_sq_ft(area, sr))
            .sum();

        let mut concatenated: Vec<Polygon<f64>> = Vec::with_capacity(areas.len());
        let mut self_intersecting = false;
        for area in areas {
            if concatenated.iter().any(|placed| placed.intersects(area)) {
                self_intersecting = true;
                break;
            }
            concatenated.push(GeometryUtils::orient_ccw(area));
        }

        let (union, strategy) = if self_intersecting {
            (GeometryUtils::union_all(areas)?, UnionStrategy::ExactUnion)
        } else {
            (MultiPolygon::new(concatenated), UnionStrategy::RingConcatenation)
        };

        let union_area_sq_ft = GeometryUtils::area_sq_ft(&union, sr);
        let overlap_area_sq_ft = (total_area_sq_ft - union_area_sq_ft).abs();
        let overlap_percent = if union_area_sq_ft > 0.0 {
            overlap_area_sq_ft / union_area_sq_ft * 100.0
        } else {
            0.0
        };
        debug!(
            "aggregated {} visible areas ({:?}): union {:.0} sq ft, overlap {:.1}%",
            areas.len(),
            strategy,
            union_area_sq_ft,
            overlap_percent
        );

        Ok(AggregateCoverage {
            union,
            strategy,
            total_area_sq_ft,
            union_area_sq_ft,
            overlap_area_sq_ft,
            overlap_percent,
        })
    }

    pub fn set_viewport(&mut self, viewport: Rect<f64>) {
        self.options.viewport = Some(viewport);
    }

    pub fn track_current_extent(&mut self) {
        self.options.target = CoverageTarget::CurrentMapExtent;
    }

    pub fn track_area_of_interest(&mut self, area_of_interest: Polygon<f64>) {
        self.options.target = CoverageTarget::AreaOfInterest { area_of_interest };
    }

    pub fn update_union(&mut self, union: Option<MultiPolygon<f64>>) {
        self.options.visible_areas_union = union;
    }

    /// 以目前設定計算覆蓋率
    ///
    /// 沒有合併結果、沒有參考區域或兩者不相交時覆蓋率為 0。
    pub fn coverage(&self) -> Result<CoverageStats> {
        let sr = self.spatial_reference;
        let (reference, reference_area_sq_ft) = match &self.options.target {
            CoverageTarget::CurrentMapExtent => match self.options.viewport {
                Some(extent) => (extent.to_polygon(), GeometryUtils::rect_area_sq_ft(&extent, sr)),
                None => return Ok(CoverageStats::default()),
            },
            CoverageTarget::AreaOfInterest { area_of_interest } => (
                area_of_interest.clone(),
                GeometryUtils::polygon_area_sq_ft(area_of_interest, sr),
            ),
        };

        let union = match &self.options.visible_areas_union {
            Some(union) if !union.0.is_empty() => union,
            _ => {
                return Ok(CoverageStats {
                    reference_area_sq_ft,
                    ..CoverageStats::default()
                })
            }
        };

        if !GeometryUtils::intersects(union, &reference) {
            return Ok(CoverageStats {
                reference_area_sq_ft,
                ..CoverageStats::default()
            });
        }

        // 畫面範圍是裁切，關注區域是交集，兩者在 geo 中都是多邊形交集
        let covered = GeometryUtils::intersection(union, &reference)?;
        let covered_area_sq_ft = GeometryUtils::area_sq_ft(&covered, sr);
        let coverage_percent = if reference_area_sq_ft > 0.0 {
            covered_area_sq_ft / reference_area_sq_ft * 100.0
        } else {
            0.0
        };

        Ok(CoverageStats {
            reference_area_sq_ft,
            covered_area_sq_ft,
            coverage_percent,
        })
    }
}
