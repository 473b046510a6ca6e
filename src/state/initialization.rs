/// 分析環境初始化 - 負責建立執行緒池與障礙物目錄

use std::sync::Arc;
use log::{error, info};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::comp::ObstructionCatalog;
use crate::config::AnalysisSetting;
use crate::error::{AnalysisError, Result};
use crate::vision::SpatialReference;

/// 分析環境初始化器
pub struct StateInitializer;

impl StateInitializer {
    /// 創建執行緒池，`threads` 為 0 時使用 CPU 核心數
    pub fn create_thread_pool(threads: usize) -> Result<Arc<ThreadPool>> {
        let threads = if threads == 0 { num_cpus::get() } else { threads };
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("rayon-{}", i))
            .panic_handler(|_| error!("analysis unit panicked"))
            .build()
            .map_err(|e| AnalysisError::Worker(e.to_string()))?;
        info!("analysis thread pool ready with {} threads", threads);
        Ok(Arc::new(pool))
    }

    /// 依設定建立空間參考與障礙物目錄
    pub fn create_catalog(setting: &AnalysisSetting) -> Result<(SpatialReference, ObstructionCatalog)> {
        let sr = SpatialReference::from_wkid(setting.spatial_reference)?;
        let catalog = ObstructionCatalog::with_pattern(sr, &setting.candidate_layer_pattern)?;
        Ok((sr, catalog))
    }
}
