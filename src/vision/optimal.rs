/// 最佳位置搜尋
///
/// 在關注區域內取網格候選點，計算每個候選點的 FAST 可見區域，
/// 分數是落在該可見區域內的候選點數（包含自己）。
/// 既有覆蓋範圍同時排除候選點並遮擋視線。
use geo::{BoundingRect, Contains, Coord, Intersects, MultiPolygon, Point, Polygon};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use vek::Vec2;

use crate::comp::{AnalysisResolution, Observer, Obstruction, ObstructionSet};
use crate::error::Result;
use crate::vision::visibility_calculator::VisibilityCalculator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalCandidate {
    pub location: Coord<f64>,
    pub score: usize,
    pub visible_area: Polygon<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalLocations {
    pub candidates: Vec<OptimalCandidate>,
    pub min_score: usize,
    pub max_score: usize,
    /// 落在障礙物或既有覆蓋範圍內而被略過的網格點
    pub skipped: usize,
}

impl OptimalLocations {
    pub fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            min_score: 0,
            max_score: 0,
            skipped: 0,
        }
    }

    /// 分數最高的候選點
    pub fn best(&self) -> Option<&OptimalCandidate> {
        self.candidates.iter().max_by_key(|c| c.score)
    }
}

pub struct OptimalLocationFinder<'a> {
    obstructions: &'a ObstructionSet,
    analysis_distance_m: f64,
    grid_steps: usize,
    existing_coverage: Option<&'a MultiPolygon<f64>>,
}

impl<'a> OptimalLocationFinder<'a> {
    pub fn new(obstructions: &'a ObstructionSet, analysis_distance_m: f64, grid_steps: usize) -> Self {
        Self {
            obstructions,
            analysis_distance_m,
            grid_steps,
            existing_coverage: None,
        }
    }

    /// 已被現有觀察者覆蓋的區域不再放候選點，並視為障礙物
    pub fn excluding(mut self, coverage: Option<&'a MultiPolygon<f64>>) -> Self {
        self.existing_coverage = coverage;
        self
    }

    /// 關注區域外框上的網格點，由上而下、由左而右
    pub fn grid_points(&self, area_of_interest: &Polygon<f64>) -> Vec<Coord<f64>> {
        let Some(extent) = area_of_interest.bounding_rect() else {
            return Vec::new();
        };
        let step = extent.width().min(extent.height()) / self.grid_steps.max(1) as f64;
        if !(step.is_finite() && step > 0.0) {
            return Vec::new();
        }

        let mut points = Vec::new();
        let mut y = extent.max().y;
        while y > extent.min().y {
            let mut x = extent.min().x;
            while x < extent.max().x {
                let location = Coord { x, y };
                if area_of_interest.contains(&Point::from(location)) {
                    points.push(location);
                }
                x += step;
            }
            y -= step;
        }
        points
    }

    pub fn find(&self, area_of_interest: &Polygon<f64>) -> Result<OptimalLocations> {
        VisibilityCalculator::validate_distance(self.analysis_distance_m)?;

        let augmented;
        let obstructions = match self.existing_coverage {
            Some(coverage) => {
                augmented = self.with_coverage(coverage)?;
                &augmented
            }
            None => self.obstructions,
        };

        let sr = obstructions.spatial_reference();
        let grid = self.grid_points(area_of_interest);
        let total = grid.len();
        let locations: Vec<Coord<f64>> = grid
            .into_iter()
            .filter(|&location| !obstructions.covers_point(Vec2::new(location.x, location.y)))
            .collect();
        let skipped = total - locations.len();

        let computed: Vec<(Coord<f64>, Result<Polygon<f64>>)> = locations
            .par_iter()
            .map(|&location| {
                let candidate = Observer::named("candidate", Vec2::new(location.x, location.y), sr);
                let visible_area = VisibilityCalculator::compute_visible_area(
                    &candidate,
                    self.analysis_distance_m,
                    AnalysisResolution::Fast,
                    obstructions,
                )
                .map(|result| result.visible_area);
                (location, visible_area)
            })
            .collect();

        let candidates: Vec<OptimalCandidate> = Self::drop_failed(computed)
            .into_iter()
            .map(|(location, visible_area)| {
                let score = locations
                    .iter()
                    .filter(|&&other| visible_area.intersects(&Point::from(other)))
                    .count();
                OptimalCandidate {
                    location,
                    score,
                    visible_area,
                }
            })
            .collect();

        let min_score = candidates.iter().map(|c| c.score).min().unwrap_or(0);
        let max_score = candidates.iter().map(|c| c.score).max().unwrap_or(0);
        info!(
            "optimal search: {} candidates scored ({} skipped), scores {}..={}",
            candidates.len(),
            skipped,
            min_score,
            max_score
        );

        Ok(OptimalLocations {
            candidates,
            min_score,
            max_score,
            skipped,
        })
    }

    /// 障礙物加上既有覆蓋範圍
    fn with_coverage(&self, coverage: &MultiPolygon<f64>) -> Result<ObstructionSet> {
        let sr = self.obstructions.spatial_reference();
        let obstructions = self
            .obstructions
            .iter()
            .cloned()
            .chain(std::iter::once(Obstruction::new("Existing Coverage", sr, coverage.clone())))
            .collect();
        ObstructionSet::new(sr, obstructions)
    }

    /// 個別候選點計算失敗時略過，不影響其他候選點
    fn drop_failed(computed: Vec<(Coord<f64>, Result<Polygon<f64>>)>) -> Vec<(Coord<f64>, Polygon<f64>)> {
        computed
            .into_iter()
            .filter_map(|(location, visible_area)| match visible_area {
                Ok(visible_area) => Some((location, visible_area)),
                Err(e) => {
                    warn!("optimal candidate at {:?} skipped: {}", location, e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::vision::spatial_ref::SpatialReference;
    use geo::polygon;

    fn aoi() -> Polygon<f64> {
        polygon![(x: 0.0, y: 0.0), (x: 0.002, y: 0.0), (x: 0.002, y: 0.002), (x: 0.0, y: 0.002)]
    }

    #[test]
    fn test_grid_excludes_boundary() {
        let set = ObstructionSet::empty(SpatialReference::WGS84);
        let finder = OptimalLocationFinder::new(&set, 1000.0, 4);
        let grid = finder.grid_points(&aoi());
        // 上緣與左緣落在邊界上，不算在區域內
        assert_eq!(grid.len(), 9);
        assert!((grid[0].x - 0.0005).abs() < 1e-12);
        assert!((grid[0].y - 0.0015).abs() < 1e-12);
    }

    #[test]
    fn test_open_area_scores_every_candidate() {
        let set = ObstructionSet::empty(SpatialReference::WGS84);
        let result = OptimalLocationFinder::new(&set, 1000.0, 4).find(&aoi()).unwrap();
        assert_eq!(result.candidates.len(), 9);
        assert_eq!(result.min_score, 9);
        assert_eq!(result.max_score, 9);
        assert_eq!(result.skipped, 0);
    }

    #[test]
    fn test_obstructed_and_covered_points_skipped() {
        let building = Obstruction::new(
            "Buildings",
            SpatialReference::WGS84,
            polygon![(x: 0.0004, y: 0.0004), (x: 0.0006, y: 0.0004), (x: 0.0006, y: 0.0006), (x: 0.0004, y: 0.0006)],
        );
        let set = ObstructionSet::new(SpatialReference::WGS84, vec![building]).unwrap();
        let covered = MultiPolygon::new(vec![polygon![
            (x: 0.0014, y: 0.0014),
            (x: 0.0016, y: 0.0014),
            (x: 0.0016, y: 0.0016),
            (x: 0.0014, y: 0.0016)
        ]]);

        let result = OptimalLocationFinder::new(&set, 1000.0, 4)
            .excluding(Some(&covered))
            .find(&aoi())
            .unwrap();
        assert_eq!(result.skipped, 2);
        assert_eq!(result.candidates.len(), 7);
        assert!(result.best().is_some());
    }

    #[test]
    fn test_existing_coverage_blocks_candidate_views() {
        // 三個候選點排成一列，中間那個落在既有覆蓋的南北向帶狀區域上
        let area_of_interest =
            polygon![(x: 0.0, y: 0.0), (x: 0.004, y: 0.0), (x: 0.004, y: 0.002), (x: 0.0, y: 0.002)];
        let set = ObstructionSet::empty(SpatialReference::WGS84);
        let strip = MultiPolygon::new(vec![polygon![
            (x: 0.0019, y: -0.01),
            (x: 0.0021, y: -0.01),
            (x: 0.0021, y: 0.01),
            (x: 0.0019, y: 0.01)
        ]]);

        let open = OptimalLocationFinder::new(&set, 1000.0, 2).find(&area_of_interest).unwrap();
        assert_eq!(open.candidates.len(), 3);
        assert_eq!(open.max_score, 3);

        let result = OptimalLocationFinder::new(&set, 1000.0, 2)
            .excluding(Some(&strip))
            .find(&area_of_interest)
            .unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.candidates.len(), 2);
        // 兩側候選點的視線被覆蓋帶擋住，彼此看不到
        assert_eq!(result.min_score, 1);
        assert_eq!(result.max_score, 1);
    }

    #[test]
    fn test_failed_candidate_dropped() {
        let kept = Coord { x: 0.001, y: 0.001 };
        let computed = vec![
            (kept, Ok(aoi())),
            (
                Coord { x: 0.002, y: 0.001 },
                Err(AnalysisError::EngineFailure("clip: degenerate ring".to_string())),
            ),
        ];
        let remaining = OptimalLocationFinder::drop_failed(computed);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, kept);
    }
}
