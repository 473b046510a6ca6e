/// 視野分析錯誤定義
use thiserror::Error;

use crate::comp::ObserverId;

/// 分析過程中可能發生的錯誤
///
/// 單一觀察者的錯誤只會讓該觀察者在本輪缺席，不會中止整輪分析。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// 觀察者與障礙物的空間參考不一致
    #[error("spatial reference mismatch: expected wkid {expected}, found wkid {found}")]
    GeometryMismatch { expected: u32, found: u32 },

    /// 幾何引擎呼叫失敗
    #[error("geometry engine failure: {0}")]
    EngineFailure(String),

    /// 分析距離必須為正的有限值
    #[error("invalid analysis distance: {0} meters")]
    InvalidDistance(f64),

    #[error("unknown observer {0}")]
    UnknownObserver(ObserverId),

    #[error("unsupported spatial reference wkid {0}")]
    UnsupportedSpatialReference(u32),

    #[error("invalid obstruction layer pattern: {0}")]
    InvalidLayerPattern(String),

    #[error("failed to start analysis worker: {0}")]
    Worker(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("json error: {0}")]
    Json(String),
}

impl From<std::io::Error> for AnalysisError {
    fn from(e: std::io::Error) -> Self {
        AnalysisError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(e: serde_json::Error) -> Self {
        AnalysisError::Json(e.to_string())
    }
}

impl From<toml::de::Error> for AnalysisError {
    fn from(e: toml::de::Error) -> Self {
        AnalysisError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
