/// 可見區域計算
///
/// 建立搜尋圓、以空間索引篩選障礙物、投射視線並組成可見區域多邊形。
/// 同步版本給工作執行緒使用；非同步版本把每條視線交給 `ObstructionService`。
use geo::{Coord, LineString, Polygon};
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::comp::{AnalysisResolution, Observer, ObstructionSet};
use crate::error::{AnalysisError, Result};
use crate::vision::geometry_utils::GeometryUtils;
use crate::vision::sightline::SightlineCaster;
use crate::vision::spatial_ref::SpatialReference;
use crate::vision::vision_output::{CenterOffsets, VisibleAreaResult};

/// 以觀察者為圓心、分析距離為半徑的測地圓
#[derive(Debug, Clone, PartialEq)]
pub struct SearchArea {
    pub center: Coord<f64>,
    pub polygon: Polygon<f64>,
    pub spatial_reference: SpatialReference,
}

impl SearchArea {
    pub fn new(observer: &Observer, distance_m: f64, resolution: AnalysisResolution) -> Self {
        let center = observer.coord();
        Self {
            center,
            polygon: GeometryUtils::geodesic_circle(
                center,
                distance_m,
                resolution.ray_count(),
                observer.spatial_reference,
            ),
            spatial_reference: observer.spatial_reference,
        }
    }

    /// 搜尋圓頂點（第 0 點在正東，逆時針）
    pub fn ring(&self) -> Vec<Coord<f64>> {
        GeometryUtils::ring_coords(&self.polygon)
    }
}

/// 非同步視線計算所需的障礙物查詢服務
pub trait ObstructionService: Send + Sync + 'static {
    /// 與搜尋區域相交的障礙物索引
    fn find_obstructions(
        &self,
        obstructions: Arc<ObstructionSet>,
        search_area: Polygon<f64>,
    ) -> impl Future<Output = Result<Vec<usize>>> + Send;

    /// 單條視線最近的障礙物交點
    fn sightline_hit(
        &self,
        obstructions: Arc<ObstructionSet>,
        candidates: Arc<Vec<usize>>,
        origin: Coord<f64>,
        target: Coord<f64>,
    ) -> impl Future<Output = Result<Option<Coord<f64>>>> + Send;
}

/// 在本機 blocking 執行緒池上執行幾何運算
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalObstructionService;

impl ObstructionService for LocalObstructionService {
    fn find_obstructions(
        &self,
        obstructions: Arc<ObstructionSet>,
        search_area: Polygon<f64>,
    ) -> impl Future<Output = Result<Vec<usize>>> + Send {
        async move {
            tokio::task::spawn_blocking(move || obstructions.candidate_indices(&search_area))
                .await
                .map_err(|e| AnalysisError::Worker(e.to_string()))
        }
    }

    fn sightline_hit(
        &self,
        obstructions: Arc<ObstructionSet>,
        candidates: Arc<Vec<usize>>,
        origin: Coord<f64>,
        target: Coord<f64>,
    ) -> impl Future<Output = Result<Option<Coord<f64>>>> + Send {
        async move {
            tokio::task::spawn_blocking(move || {
                let candidates = obstructions.resolve(&candidates);
                SightlineCaster::nearest_hit(origin, target, &candidates)
            })
            .await
            .map_err(|e| AnalysisError::Worker(e.to_string()))?
        }
    }
}

pub struct VisibilityCalculator;

impl VisibilityCalculator {
    /// 計算單一觀察者的可見區域（同步）
    pub fn compute_visible_area(
        observer: &Observer,
        distance_m: f64,
        resolution: AnalysisResolution,
        obstructions: &ObstructionSet,
    ) -> Result<VisibleAreaResult> {
        Self::validate_distance(distance_m)?;
        obstructions
            .spatial_reference()
            .ensure_same(observer.spatial_reference)?;

        let search_area = SearchArea::new(observer, distance_m, resolution);
        let candidates = obstructions.candidates(&search_area.polygon);
        debug!(
            "observer {}: {} of {} obstructions intersect the search area",
            observer.id,
            candidates.len(),
            obstructions.len()
        );

        let outcome = SightlineCaster::cast_sightlines(observer, &search_area.ring(), &candidates)?;
        Ok(Self::assemble(
            &search_area,
            outcome.ring,
            distance_m,
            resolution,
            outcome.degraded_rays,
        ))
    }

    /// 計算單一觀察者的可見區域（非同步）
    ///
    /// 每條視線是一個獨立任務，完成順序不定；以索引放回原位以維持環的順序。
    /// 遺失的任務視同引擎錯誤，該視線退回搜尋圓頂點。
    pub async fn compute_visible_area_async<S: ObstructionService>(
        observer: &Observer,
        distance_m: f64,
        resolution: AnalysisResolution,
        obstructions: Arc<ObstructionSet>,
        service: Arc<S>,
    ) -> Result<VisibleAreaResult> {
        Self::validate_distance(distance_m)?;
        obstructions
            .spatial_reference()
            .ensure_same(observer.spatial_reference)?;

        let search_area = SearchArea::new(observer, distance_m, resolution);
        let indices = service
            .find_obstructions(obstructions.clone(), search_area.polygon.clone())
            .await?;
        for obstruction in obstructions.resolve(&indices) {
            observer
                .spatial_reference
                .ensure_same(obstruction.spatial_reference)?;
        }

        let targets = search_area.ring();
        let mut ring = targets.clone();
        let mut degraded_rays = 0;

        if !indices.is_empty() {
            let candidates = Arc::new(indices);
            let origin = observer.coord();
            let mut units = JoinSet::new();
            for (i, target) in targets.iter().copied().enumerate() {
                let service = service.clone();
                let obstructions = obstructions.clone();
                let candidates = candidates.clone();
                units.spawn(async move {
                    let hit = service
                        .sightline_hit(obstructions, candidates, origin, target)
                        .await;
                    (i, hit)
                });
            }

            let mut resolved = vec![false; targets.len()];
            while let Some(joined) = units.join_next().await {
                match joined {
                    Ok((i, hit)) => {
                        let (point, degraded) = SightlineCaster::settle(targets[i], i, hit);
                        ring[i] = point;
                        resolved[i] = true;
                        if degraded {
                            degraded_rays += 1;
                        }
                    }
                    Err(e) => warn!("sightline task lost: {}", e),
                }
            }
            degraded_rays += resolved.iter().filter(|done| !**done).count();
        }

        Ok(Self::assemble(
            &search_area,
            ring,
            distance_m,
            resolution,
            degraded_rays,
        ))
    }

    pub fn validate_distance(distance_m: f64) -> Result<()> {
        if distance_m.is_finite() && distance_m > 0.0 {
            Ok(())
        } else {
            Err(AnalysisError::InvalidDistance(distance_m))
        }
    }

    fn assemble(
        search_area: &SearchArea,
        ring: Vec<Coord<f64>>,
        distance_m: f64,
        resolution: AnalysisResolution,
        degraded_rays: usize,
    ) -> VisibleAreaResult {
        let visible_area = Polygon::new(LineString::from(ring), vec![]);
        let center_offsets = CenterOffsets::between(&visible_area, &search_area.polygon);
        VisibleAreaResult {
            visible_area,
            center_offsets,
            resolution,
            analysis_distance_meters: distance_m,
            degraded_rays,
        }
    }
}
