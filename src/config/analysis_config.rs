use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use crate::comp::{AnalysisResolution, DEFAULT_CANDIDATE_PATTERN};
use crate::error::{AnalysisError, Result};

/// 分析設定，對應 `analysis.toml` 的 `[analysis]` 區段
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AnalysisSetting {
    /// 搜尋圓半徑（公尺）
    pub analysis_distance_meters: f64,
    /// 放開觀察者或一般重算時的解析度
    pub final_resolution: AnalysisResolution,
    /// 拖曳中的解析度
    pub interactive_resolution: AnalysisResolution,
    /// 0 表示使用 CPU 核心數
    pub worker_threads: usize,
    /// 預設啟用的障礙物圖層名稱規則
    pub candidate_layer_pattern: String,
    pub spatial_reference: u32,
    /// 最佳位置搜尋時短邊切成幾格
    pub optimal_grid_steps: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
struct Setting {
    #[serde(default)]
    analysis: AnalysisSetting,
}

impl Default for AnalysisSetting {
    fn default() -> Self {
        Self {
            analysis_distance_meters: 100.0,
            final_resolution: AnalysisResolution::Normal,
            interactive_resolution: AnalysisResolution::Fast,
            worker_threads: 0,
            candidate_layer_pattern: DEFAULT_CANDIDATE_PATTERN.to_string(),
            spatial_reference: 4326,
            optimal_grid_steps: 40,
        }
    }
}

impl AnalysisSetting {
    /// 讀取設定檔；檔案不存在時使用預設值
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("{} not found, using default analysis settings", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let mut str_val = String::new();
        file.read_to_string(&mut str_val)?;

        let setting = Self::from_toml(&str_val)?;
        info!("analysis settings loaded from {}", path.display());
        Ok(setting)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let setting: Setting = toml::from_str(text)?;
        if setting.analysis.optimal_grid_steps == 0 {
            return Err(AnalysisError::Config("optimal_grid_steps must be at least 1".to_string()));
        }
        Ok(setting.analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let setting = AnalysisSetting::from_toml(
            r#"
            [analysis]
            analysis_distance_meters = 250.0
            final_resolution = "FINEST"
            "#,
        )
        .unwrap();
        assert_eq!(setting.analysis_distance_meters, 250.0);
        assert_eq!(setting.final_resolution, AnalysisResolution::Finest);
        assert_eq!(setting.interactive_resolution, AnalysisResolution::Fast);
        assert_eq!(setting.optimal_grid_steps, 40);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let err = AnalysisSetting::from_toml("[analysis]\nworker_threads = \"many\"").unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let setting = AnalysisSetting::load("does/not/exist/analysis.toml").unwrap();
        assert_eq!(setting, AnalysisSetting::default());
    }
}
