/// 分析狀態管理模塊
///
/// 負責管理觀察者、障礙物、緩存與分析輪次

pub mod core;
pub mod initialization;
pub mod pass;

pub use self::core::Orchestrator;
pub use self::initialization::StateInitializer;
pub use self::pass::{AnalysisMode, PassHandle, PassId, PassOutcome, PassReport, PassState, UnitFailure};
