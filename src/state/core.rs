/// 分析協調器
///
/// 擁有觀察者、障礙物目錄、緩存與覆蓋率設定。任何變更都會先取消執行中的輪次，
/// 再讓緩存失效，最後開始新的輪次；批次載入期間只標記需要重算。

use std::sync::Arc;
use crossbeam_channel::Receiver;
use geo::{Polygon, Rect};
use log::{debug, info};
use parking_lot::Mutex;
use rayon::ThreadPool;
use vek::Vec2;

use crate::comp::{Observer, ObserverId, ObserverSet, ObstructionCatalog, ObstructionSet};
use crate::config::AnalysisSetting;
use crate::error::{AnalysisError, Result};
use crate::msg::{AnalysisEvent, EventBus};
use crate::vision::{
    CacheStats, CoverageAggregator, CoverageStats, OptimalLocationFinder, OptimalLocations,
    SpatialReference, VisibilityCalculator, VisibleAreaCache,
};

use super::pass::{AnalysisMode, PassHandle, PassId, PassJob, PassOutcome, PassRunner, PassState};
use super::StateInitializer;

pub struct Orchestrator {
    setting: AnalysisSetting,
    spatial_reference: SpatialReference,
    observers: ObserverSet,
    catalog: ObstructionCatalog,
    /// 啟用圖層攤平後的障礙物
    obstructions: Arc<ObstructionSet>,
    cache: Arc<VisibleAreaCache>,
    coverage: Arc<Mutex<CoverageAggregator>>,
    events: Arc<EventBus>,
    thread_pool: Arc<ThreadPool>,
    current: Option<PassHandle>,
    next_pass_id: PassId,
    analysis_distance_m: f64,
    /// 批次載入巢狀層數
    bulk_depth: usize,
    /// 批次期間累積的重算需求
    pending: Option<AnalysisMode>,
}

impl Orchestrator {
    pub fn new(setting: AnalysisSetting) -> Result<Self> {
        VisibilityCalculator::validate_distance(setting.analysis_distance_meters)?;
        let (spatial_reference, catalog) = StateInitializer::create_catalog(&setting)?;
        let thread_pool = StateInitializer::create_thread_pool(setting.worker_threads)?;

        Ok(Self {
            analysis_distance_m: setting.analysis_distance_meters,
            setting,
            spatial_reference,
            observers: ObserverSet::new(),
            catalog,
            obstructions: Arc::new(ObstructionSet::empty(spatial_reference)),
            cache: Arc::new(VisibleAreaCache::new()),
            coverage: Arc::new(Mutex::new(CoverageAggregator::new(spatial_reference))),
            events: Arc::new(EventBus::new()),
            thread_pool,
            current: None,
            next_pass_id: 1,
            bulk_depth: 0,
            pending: None,
        })
    }

    pub fn setting(&self) -> &AnalysisSetting {
        &self.setting
    }

    pub fn spatial_reference(&self) -> SpatialReference {
        self.spatial_reference
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<AnalysisEvent> {
        self.events.subscribe()
    }

    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    pub fn catalog(&self) -> &ObstructionCatalog {
        &self.catalog
    }

    pub fn obstructions(&self) -> &Arc<ObstructionSet> {
        &self.obstructions
    }

    pub fn analysis_distance(&self) -> f64 {
        self.analysis_distance_m
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ---- 觀察者 ----

    /// 新增觀察者，名稱由位置產生
    pub fn add_observer(&mut self, position: Vec2<f64>) -> Result<ObserverId> {
        let observer = Observer::new(position, self.spatial_reference);
        self.insert_observer(observer)
    }

    pub fn add_named_observer(&mut self, name: impl Into<String>, position: Vec2<f64>) -> Result<ObserverId> {
        let observer = Observer::named(name, position, self.spatial_reference);
        self.insert_observer(observer)
    }

    fn insert_observer(&mut self, observer: Observer) -> Result<ObserverId> {
        self.cancel_current();
        let id = self.observers.insert(observer);
        debug!("observer {} added", id);
        self.schedule(AnalysisMode::Final)?;
        Ok(id)
    }

    /// 放開拖曳後的最終位置
    pub fn move_observer(&mut self, id: ObserverId, position: Vec2<f64>) -> Result<()> {
        self.relocate(id, position, AnalysisMode::Final)
    }

    /// 拖曳中的位置，以互動模式重算
    pub fn drag_observer(&mut self, id: ObserverId, position: Vec2<f64>) -> Result<()> {
        self.relocate(id, position, AnalysisMode::Interactive)
    }

    fn relocate(&mut self, id: ObserverId, position: Vec2<f64>, mode: AnalysisMode) -> Result<()> {
        if self.observers.get(id).is_none() {
            return Err(AnalysisError::UnknownObserver(id));
        }
        self.cancel_current();
        self.cache.invalidate(id);
        if let Some(observer) = self.observers.get_mut(id) {
            observer.move_to(position);
        }
        self.schedule(mode)
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> Result<Observer> {
        if self.observers.get(id).is_none() {
            return Err(AnalysisError::UnknownObserver(id));
        }
        self.cancel_current();
        self.cache.invalidate(id);
        let removed = self
            .observers
            .remove(id)
            .ok_or(AnalysisError::UnknownObserver(id))?;
        debug!("observer {} removed", id);
        self.schedule(AnalysisMode::Final)?;
        Ok(removed)
    }

    /// 移除全部觀察者並清空緩存
    pub fn clear_observers(&mut self) -> Result<()> {
        self.cancel_current();
        self.observers.clear();
        self.cache.clear_all();
        self.schedule(AnalysisMode::Final)
    }

    // ---- 障礙物 ----

    /// 新增障礙物圖層，回傳是否預設啟用
    pub fn add_obstruction_layer(&mut self, name: impl Into<String>, polygons: Vec<Polygon<f64>>) -> Result<bool> {
        let enabled = self.catalog.add_layer(name, polygons);
        if enabled {
            self.rebuild_obstructions()?;
        }
        Ok(enabled)
    }

    pub fn set_layer_enabled(&mut self, name: &str, enabled: bool) -> Result<bool> {
        let changed = self.catalog.set_enabled(name, enabled);
        if changed {
            self.rebuild_obstructions()?;
        }
        Ok(changed)
    }

    /// 移除圖層；移除的是啟用圖層時重建障礙物並重算
    pub fn remove_obstruction_layer(&mut self, name: &str) -> Result<bool> {
        match self.catalog.remove_layer(name) {
            Some(true) => {
                self.rebuild_obstructions()?;
                Ok(true)
            }
            Some(false) => Ok(true),
            None => Ok(false),
        }
    }

    fn rebuild_obstructions(&mut self) -> Result<()> {
        let set = self.catalog.build_set()?;
        info!(
            "obstruction set rebuilt: {} obstructions from layers {:?}",
            set.len(),
            self.catalog.enabled_layers()
        );
        self.cancel_current();
        self.obstructions = Arc::new(set);
        self.cache.clear_all();
        self.schedule(AnalysisMode::Final)
    }

    // ---- 分析設定 ----

    /// 變更分析距離會清空緩存並重算
    pub fn set_analysis_distance(&mut self, distance_m: f64) -> Result<()> {
        VisibilityCalculator::validate_distance(distance_m)?;
        if distance_m == self.analysis_distance_m {
            return Ok(());
        }
        self.cancel_current();
        self.analysis_distance_m = distance_m;
        self.cache.clear_all();
        info!("analysis distance set to {} meters", distance_m);
        self.schedule(AnalysisMode::Final)
    }

    // ---- 覆蓋率 ----

    pub fn set_viewport(&mut self, viewport: Rect<f64>) -> Result<CoverageStats> {
        self.coverage.lock().set_viewport(viewport);
        self.publish_coverage()
    }

    pub fn track_area_of_interest(&mut self, area_of_interest: Polygon<f64>) -> Result<CoverageStats> {
        self.coverage.lock().track_area_of_interest(area_of_interest);
        self.publish_coverage()
    }

    pub fn track_current_extent(&mut self) -> Result<CoverageStats> {
        self.coverage.lock().track_current_extent();
        self.publish_coverage()
    }

    pub fn coverage(&self) -> Result<CoverageStats> {
        self.coverage.lock().coverage()
    }

    fn publish_coverage(&self) -> Result<CoverageStats> {
        let stats = self.coverage()?;
        self.events.emit(AnalysisEvent::CoverageUpdated(stats));
        Ok(stats)
    }

    // ---- 批次載入 ----

    pub fn begin_bulk_load(&mut self) {
        self.bulk_depth += 1;
    }

    /// 結束批次；最外層結束時若有累積的變更則開始一輪
    pub fn end_bulk_load(&mut self) -> Result<Option<PassHandle>> {
        if self.bulk_depth == 0 {
            return Ok(None);
        }
        self.bulk_depth -= 1;
        if self.bulk_depth > 0 {
            return Ok(None);
        }
        match self.pending.take() {
            Some(mode) => self.request_recompute(mode).map(Some),
            None => Ok(None),
        }
    }

    pub fn is_bulk_loading(&self) -> bool {
        self.bulk_depth > 0
    }

    // ---- 分析輪次 ----

    fn schedule(&mut self, mode: AnalysisMode) -> Result<()> {
        if self.is_bulk_loading() {
            // 最終模式優先於互動模式
            self.pending = match (self.pending, mode) {
                (Some(AnalysisMode::Final), _) => Some(AnalysisMode::Final),
                _ => Some(mode),
            };
            return Ok(());
        }
        self.request_recompute(mode).map(|_| ())
    }

    fn cancel_current(&mut self) {
        if let Some(handle) = &self.current {
            handle.cancel();
        }
    }

    /// 取消執行中的輪次並開始新的一輪
    pub fn request_recompute(&mut self, mode: AnalysisMode) -> Result<PassHandle> {
        self.cancel_current();

        let id = self.next_pass_id;
        self.next_pass_id += 1;
        let resolution = match mode {
            AnalysisMode::Interactive => self.setting.interactive_resolution,
            AnalysisMode::Final => self.setting.final_resolution,
        };
        let handle = PassHandle::new(id, mode, resolution, self.events.clone());
        let observers = self.observers.snapshot();
        info!(
            "pass {} started: {} observers, {:?} mode at {:?}",
            id,
            observers.len(),
            mode,
            resolution
        );
        self.current = Some(handle.clone());
        self.events.emit(AnalysisEvent::PassStarted {
            handle: handle.clone(),
            observer_count: observers.len(),
        });

        let job = PassJob {
            handle: handle.clone(),
            observers,
            analysis_distance_m: self.analysis_distance_m,
            obstructions: self.obstructions.clone(),
            cache: self.cache.clone(),
            coverage: self.coverage.clone(),
            thread_pool: self.thread_pool.clone(),
            events: self.events.clone(),
        };
        if let Err(e) = PassRunner::spawn(job) {
            handle.cancel();
            return Err(e);
        }
        Ok(handle)
    }

    pub fn current_pass(&self) -> Option<&PassHandle> {
        self.current.as_ref()
    }

    /// 目前輪次執行中為 RUNNING，其餘為 IDLE
    pub fn state(&self) -> PassState {
        match &self.current {
            Some(handle) if handle.state() == PassState::Running => PassState::Running,
            _ => PassState::Idle,
        }
    }

    /// 等待目前輪次結束
    pub fn wait_idle(&self) -> Option<PassOutcome> {
        self.current.as_ref().map(|handle| handle.wait())
    }

    // ---- 最佳位置 ----

    /// 在關注區域內尋找最佳觀察位置，可選擇排除既有覆蓋範圍
    pub fn find_optimal_locations(
        &self,
        area_of_interest: &Polygon<f64>,
        exclude_existing_coverage: bool,
    ) -> Result<OptimalLocations> {
        let existing = if exclude_existing_coverage {
            self.coverage.lock().options().visible_areas_union.clone()
        } else {
            None
        };
        let finder = OptimalLocationFinder::new(
            &self.obstructions,
            self.analysis_distance_m,
            self.setting.optimal_grid_steps,
        )
        .excluding(existing.as_ref());
        self.thread_pool.install(|| finder.find(area_of_interest))
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.cancel_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn orchestrator() -> Orchestrator {
        let setting = AnalysisSetting {
            worker_threads: 2,
            ..AnalysisSetting::default()
        };
        Orchestrator::new(setting).unwrap()
    }

    fn completed(outcome: Option<PassOutcome>) -> Arc<crate::state::PassReport> {
        match outcome {
            Some(PassOutcome::Completed(report)) => report,
            other => panic!("輪次應該完成: {:?}", other),
        }
    }

    #[test]
    fn test_bulk_load_runs_one_pass() {
        let mut orch = orchestrator();
        orch.begin_bulk_load();
        for i in 0..5 {
            orch.add_observer(Vec2::new(i as f64 * 0.01, 0.0)).unwrap();
        }
        assert!(orch.current_pass().is_none());

        let handle = orch.end_bulk_load().unwrap().expect("批次結束應開始一輪");
        assert_eq!(handle.id(), 1);
        let report = completed(Some(handle.wait()));
        assert_eq!(report.visibilities.len(), 5);
        assert!(report.aggregate.is_some());
    }

    #[test]
    fn test_unknown_observer() {
        let mut orch = orchestrator();
        let id = ObserverId::new();
        assert_eq!(
            orch.move_observer(id, Vec2::new(0.0, 0.0)).unwrap_err(),
            AnalysisError::UnknownObserver(id)
        );
        assert!(orch.remove_observer(id).is_err());
    }

    #[test]
    fn test_move_invalidates_and_renames() {
        let mut orch = orchestrator();
        let id = orch.add_observer(Vec2::new(0.0, 0.0)).unwrap();
        completed(orch.wait_idle());
        assert_eq!(orch.cache_stats().entries, [0, 1, 0]);

        orch.drag_observer(id, Vec2::new(0.001, 0.0)).unwrap();
        let report = completed(orch.wait_idle());
        assert_eq!(report.mode, AnalysisMode::Interactive);
        assert!(report.aggregate.is_none());
        assert_eq!(orch.cache_stats().entries, [1, 0, 0]);
        assert_eq!(orch.observers().get(id).unwrap().name, "Lon:0.00100 Lat:0.00000");
    }

    #[test]
    fn test_distance_and_layer_changes_clear_cache() {
        let mut orch = orchestrator();
        orch.add_observer(Vec2::new(0.0, 0.0)).unwrap();
        completed(orch.wait_idle());

        orch.set_analysis_distance(150.0).unwrap();
        let report = completed(orch.wait_idle());
        assert_eq!(report.analysis_distance_meters, 150.0);
        assert_eq!(orch.cache_stats().entries, [0, 1, 0]);
        assert!(orch.set_analysis_distance(-1.0).is_err());

        let enabled = orch
            .add_obstruction_layer(
                "Building Footprints",
                vec![polygon![(x: 0.0003, y: -0.0002), (x: 0.0005, y: -0.0002), (x: 0.0005, y: 0.0002), (x: 0.0003, y: 0.0002)]],
            )
            .unwrap();
        assert!(enabled);
        let report = completed(orch.wait_idle());
        let ring = &report.visibilities[0].result.visible_area.exterior().0;
        assert!((ring[0].x - 0.0003).abs() < 1e-9);

        assert!(!orch.add_obstruction_layer("Parcels", vec![]).unwrap());
        completed(orch.wait_idle());
        let blocked_pass = orch.current_pass().unwrap().id();

        // 停用圖層不觸發重算
        assert!(orch.remove_obstruction_layer("Parcels").unwrap());
        assert_eq!(orch.current_pass().unwrap().id(), blocked_pass);
        assert!(!orch.remove_obstruction_layer("Parcels").unwrap());

        assert!(orch.remove_obstruction_layer("Building Footprints").unwrap());
        let report = completed(orch.wait_idle());
        assert!(report.pass_id > blocked_pass);
        assert!(orch.obstructions().is_empty());
        assert!(orch.catalog().enabled_layers().is_empty());
        let ring = &report.visibilities[0].result.visible_area.exterior().0;
        assert!(ring[0].x > 0.0008);
    }

    #[test]
    fn test_zero_observers_complete_with_zero_coverage() {
        let mut orch = orchestrator();
        let handle = orch.request_recompute(AnalysisMode::Final).unwrap();
        let report = completed(Some(handle.wait()));
        assert!(report.visibilities.is_empty());
        assert_eq!(report.coverage.unwrap().coverage_percent, 0.0);
        assert_eq!(orch.state(), PassState::Idle);
    }
}
