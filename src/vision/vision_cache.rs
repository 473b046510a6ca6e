use hashbrown::HashMap;
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::comp::{AnalysisResolution, ObserverId};
use crate::error::Result;
use crate::vision::vision_output::VisibleAreaResult;

type Partition = RwLock<HashMap<ObserverId, Arc<VisibleAreaResult>>>;

/// 緩存統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// 各解析度分區的項目數（FAST, NORMAL, FINEST）
    pub entries: [usize; 3],
}

/// 可見區域緩存
///
/// 每個解析度一個分區，以觀察者身分為鍵。沒有淘汰機制，
/// 只有觀察者移動/移除或全域清除時才會失效。
pub struct VisibleAreaCache {
    partitions: [Partition; 3],
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for VisibleAreaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibleAreaCache {
    pub fn new() -> Self {
        Self {
            partitions: std::array::from_fn(|_| RwLock::new(HashMap::new())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn partition(&self, resolution: AnalysisResolution) -> &Partition {
        &self.partitions[resolution.index()]
    }

    pub fn get(&self, id: ObserverId, resolution: AnalysisResolution) -> Option<Arc<VisibleAreaResult>> {
        let found = self.partition(resolution).read().get(&id).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn contains(&self, id: ObserverId, resolution: AnalysisResolution) -> bool {
        self.partition(resolution).read().contains_key(&id)
    }

    pub fn set(&self, id: ObserverId, resolution: AnalysisResolution, result: Arc<VisibleAreaResult>) {
        self.partition(resolution).write().insert(id, result);
    }

    /// 只有在 `cancelled` 尚未設定時才寫入
    ///
    /// 旗標在寫鎖內檢查；取消方先設旗標再失效，就不會有過期結果寫回。
    pub fn set_unless(
        &self,
        id: ObserverId,
        resolution: AnalysisResolution,
        result: Arc<VisibleAreaResult>,
        cancelled: &AtomicBool,
    ) -> bool {
        let mut partition = self.partition(resolution).write();
        if cancelled.load(Ordering::SeqCst) {
            return false;
        }
        partition.insert(id, result);
        true
    }

    /// 移除觀察者在所有解析度下的結果
    pub fn invalidate(&self, id: ObserverId) {
        for partition in &self.partitions {
            partition.write().remove(&id);
        }
        debug!("visible area cache invalidated for {}", id);
    }

    pub fn clear_all(&self) {
        for partition in &self.partitions {
            partition.write().clear();
        }
        debug!("visible area cache cleared");
    }

    /// 命中則回傳緩存，否則計算並寫入
    pub fn get_or_compute<F>(
        &self,
        id: ObserverId,
        resolution: AnalysisResolution,
        compute: F,
    ) -> Result<Arc<VisibleAreaResult>>
    where
        F: FnOnce() -> Result<VisibleAreaResult>,
    {
        if let Some(cached) = self.get(id, resolution) {
            return Ok(cached);
        }
        let result = Arc::new(compute()?);
        self.set(id, resolution, result.clone());
        Ok(result)
    }

    pub fn stats(&self) -> CacheStats {
        let mut entries = [0; 3];
        for (count, partition) in entries.iter_mut().zip(&self.partitions) {
            *count = partition.read().len();
        }
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::vision_output::CenterOffsets;
    use geo::polygon;

    fn result(resolution: AnalysisResolution) -> VisibleAreaResult {
        VisibleAreaResult {
            visible_area: polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
            center_offsets: CenterOffsets::CENTERED,
            resolution,
            analysis_distance_meters: 100.0,
            degraded_rays: 0,
        }
    }

    #[test]
    fn test_partitions_are_independent() {
        let cache = VisibleAreaCache::new();
        let id = ObserverId::new();
        cache.set(id, AnalysisResolution::Fast, Arc::new(result(AnalysisResolution::Fast)));

        assert!(cache.get(id, AnalysisResolution::Fast).is_some());
        assert!(cache.get(id, AnalysisResolution::Normal).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, [1, 0, 0]);
    }

    #[test]
    fn test_invalidate_clears_every_resolution() {
        let cache = VisibleAreaCache::new();
        let id = ObserverId::new();
        let other = ObserverId::new();
        for resolution in AnalysisResolution::ALL {
            cache.set(id, resolution, Arc::new(result(resolution)));
        }
        cache.set(other, AnalysisResolution::Normal, Arc::new(result(AnalysisResolution::Normal)));

        cache.invalidate(id);
        for resolution in AnalysisResolution::ALL {
            assert!(!cache.contains(id, resolution));
        }
        assert!(cache.contains(other, AnalysisResolution::Normal));

        cache.clear_all();
        assert_eq!(cache.stats().entries, [0, 0, 0]);
    }

    #[test]
    fn test_get_or_compute_runs_once() {
        let cache = VisibleAreaCache::new();
        let id = ObserverId::new();
        let mut calls = 0;
        for _ in 0..3 {
            cache
                .get_or_compute(id, AnalysisResolution::Finest, || {
                    calls += 1;
                    Ok(result(AnalysisResolution::Finest))
                })
                .unwrap();
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_set_unless_cancelled() {
        let cache = VisibleAreaCache::new();
        let id = ObserverId::new();
        let cancelled = AtomicBool::new(true);
        let written = cache.set_unless(id, AnalysisResolution::Fast, Arc::new(result(AnalysisResolution::Fast)), &cancelled);
        assert!(!written);
        assert!(!cache.contains(id, AnalysisResolution::Fast));
    }
}
