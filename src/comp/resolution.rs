use serde::{Deserialize, Serialize};

/// 分析解析度（視線數量）
///
/// 拖曳時使用 FAST，放開後使用 NORMAL，需要精細結果時用 FINEST。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisResolution {
    Fast,
    Normal,
    Finest,
}

impl AnalysisResolution {
    pub const ALL: [AnalysisResolution; 3] = [
        AnalysisResolution::Fast,
        AnalysisResolution::Normal,
        AnalysisResolution::Finest,
    ];

    /// 搜尋圓的頂點數，也就是視線數
    pub fn ray_count(self) -> usize {
        match self {
            AnalysisResolution::Fast => 60,
            AnalysisResolution::Normal => 360,
            AnalysisResolution::Finest => 720,
        }
    }

    /// 緩存分區索引
    pub fn index(self) -> usize {
        match self {
            AnalysisResolution::Fast => 0,
            AnalysisResolution::Normal => 1,
            AnalysisResolution::Finest => 2,
        }
    }
}

impl Default for AnalysisResolution {
    fn default() -> Self {
        AnalysisResolution::Normal
    }
}
