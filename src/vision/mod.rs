/// 視線分析模組
///
/// 包含幾何包裝、視線投射、可見區域計算、緩存與覆蓋率統計
pub mod coverage;
pub mod geometry_utils;
pub mod optimal;
pub mod quadtree;
pub mod sightline;
pub mod spatial_ref;
pub mod visibility_calculator;
pub mod vision_cache;
pub mod vision_output;

pub use self::{
    coverage::{AggregateCoverage, CoverageAggregator, CoverageOptions, CoverageStats, CoverageTarget, UnionStrategy},
    geometry_utils::GeometryUtils,
    optimal::{OptimalCandidate, OptimalLocationFinder, OptimalLocations},
    sightline::{CastOutcome, SightlineCaster},
    spatial_ref::SpatialReference,
    visibility_calculator::{LocalObstructionService, ObstructionService, SearchArea, VisibilityCalculator},
    vision_cache::{CacheStats, VisibleAreaCache},
    vision_output::{CenterOffsets, ObserverVisibility, VisibleAreaResult},
};
