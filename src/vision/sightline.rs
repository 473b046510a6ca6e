/// 視線投射
///
/// 從觀察者向搜尋圓每個頂點各投射一條視線，取最近的障礙物交點作為可見邊界。
use geo::Coord;
use log::warn;

use crate::comp::{Observer, Obstruction};
use crate::error::Result;
use crate::vision::geometry_utils::GeometryUtils;

/// 視線投射結果
#[derive(Debug, Clone, PartialEq)]
pub struct CastOutcome {
    /// 可見邊界頂點，順序與搜尋圓頂點一致
    pub ring: Vec<Coord<f64>>,
    /// 因引擎錯誤而視為完全可見的視線數
    pub degraded_rays: usize,
}

pub struct SightlineCaster;

impl SightlineCaster {
    /// 投射全部視線
    ///
    /// 觀察者與障礙物的空間參考不一致時整個單元失敗；
    /// 單條視線的引擎錯誤只會讓該視線退回搜尋圓頂點。
    pub fn cast_sightlines(
        observer: &Observer,
        search_ring: &[Coord<f64>],
        candidates: &[&Obstruction],
    ) -> Result<CastOutcome> {
        for obstruction in candidates {
            observer
                .spatial_reference
                .ensure_same(obstruction.spatial_reference)?;
        }

        let origin = observer.coord();
        let mut degraded_rays = 0;
        let ring = search_ring
            .iter()
            .enumerate()
            .map(|(i, &target)| {
                let (point, degraded) = Self::resolve_ray(origin, target, candidates, i);
                if degraded {
                    degraded_rays += 1;
                }
                point
            })
            .collect();

        Ok(CastOutcome { ring, degraded_rays })
    }

    /// 單條視線的最終頂點，第二個值表示是否因錯誤降級
    pub fn resolve_ray(
        origin: Coord<f64>,
        target: Coord<f64>,
        candidates: &[&Obstruction],
        ray_index: usize,
    ) -> (Coord<f64>, bool) {
        Self::settle(target, ray_index, Self::nearest_hit(origin, target, candidates))
    }

    /// 依交點查詢結果決定視線頂點；引擎錯誤時退回搜尋圓頂點
    pub fn settle(target: Coord<f64>, ray_index: usize, hit: Result<Option<Coord<f64>>>) -> (Coord<f64>, bool) {
        match hit {
            Ok(Some(hit)) => (hit, false),
            Ok(None) => (target, false),
            Err(e) => {
                warn!("sightline {} degraded to full visibility: {}", ray_index, e);
                (target, true)
            }
        }
    }

    /// 視線與所有候選障礙物交集中距離觀察者最近的頂點
    pub fn nearest_hit(
        origin: Coord<f64>,
        target: Coord<f64>,
        candidates: &[&Obstruction],
    ) -> Result<Option<Coord<f64>>> {
        let sightline = GeometryUtils::sightline(origin, target);
        let mut hits = Vec::new();
        for obstruction in candidates {
            if let Some(hit) = GeometryUtils::intersect_sightline(&obstruction.geometry, &sightline)? {
                hits.push(hit);
            }
        }
        Ok(GeometryUtils::nearest_vertex(&hits, origin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::vision::spatial_ref::SpatialReference;
    use geo::polygon;
    use vek::Vec2;

    #[test]
    fn test_ring_order_and_blocked_rays() {
        let observer = Observer::named("o", Vec2::new(0.0, 0.0), SpatialReference::WEB_MERCATOR);
        let wall = Obstruction::new(
            "Buildings",
            SpatialReference::WEB_MERCATOR,
            polygon![(x: 5.0, y: -1.0), (x: 6.0, y: -1.0), (x: 6.0, y: 1.0), (x: 5.0, y: 1.0)],
        );
        let ring = vec![
            Coord { x: 10.0, y: 0.0 },
            Coord { x: 0.0, y: 10.0 },
            Coord { x: -10.0, y: 0.0 },
            Coord { x: 0.0, y: -10.0 },
        ];

        let outcome = SightlineCaster::cast_sightlines(&observer, &ring, &[&wall]).unwrap();
        assert_eq!(outcome.degraded_rays, 0);
        assert_eq!(outcome.ring.len(), 4);
        assert!((outcome.ring[0].x - 5.0).abs() < 1e-9);
        assert_eq!(&outcome.ring[1..], &ring[1..]);
    }

    #[test]
    fn test_nearest_of_several_obstructions() {
        let near = Obstruction::new(
            "Buildings",
            SpatialReference::WGS84,
            polygon![(x: 3.0, y: -1.0), (x: 4.0, y: -1.0), (x: 4.0, y: 1.0), (x: 3.0, y: 1.0)],
        );
        let far = Obstruction::new(
            "Buildings",
            SpatialReference::WGS84,
            polygon![(x: 7.0, y: -1.0), (x: 8.0, y: -1.0), (x: 8.0, y: 1.0), (x: 7.0, y: 1.0)],
        );
        let hit = SightlineCaster::nearest_hit(
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 10.0, y: 0.0 },
            &[&far, &near],
        )
        .unwrap()
        .unwrap();
        assert!((hit.x - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_engine_failure_degrades_single_ray() {
        let target = Coord { x: 10.0, y: 0.0 };
        let hit = Coord { x: 5.0, y: 0.0 };
        assert_eq!(SightlineCaster::settle(target, 0, Ok(Some(hit))), (hit, false));
        assert_eq!(SightlineCaster::settle(target, 1, Ok(None)), (target, false));
        let failure = Err(AnalysisError::EngineFailure("clip: degenerate ring".to_string()));
        assert_eq!(SightlineCaster::settle(target, 2, failure), (target, true));
    }

    #[test]
    fn test_mismatched_obstruction_fails_unit() {
        let observer = Observer::named("o", Vec2::new(0.0, 0.0), SpatialReference::WGS84);
        let other = Obstruction::new(
            "Buildings",
            SpatialReference::WEB_MERCATOR,
            polygon![(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0)],
        );
        let ring = vec![Coord { x: 1.0, y: 0.0 }];
        assert!(SightlineCaster::cast_sightlines(&observer, &ring, &[&other]).is_err());
    }
}
