/// Blue-light visibility analysis library
///
/// Sightline casting against obstruction polygons, visible-area caching
/// and coverage aggregation for a set of observers

pub mod comp;
pub mod config;
pub mod error;
pub mod msg;
pub mod scenario;
pub mod state;
pub mod vision;

// Re-export commonly used types
pub use crate::comp::*;
pub use crate::config::AnalysisSetting;
pub use crate::error::{AnalysisError, Result};
pub use crate::msg::{AnalysisEvent, EventBus};
pub use crate::state::{AnalysisMode, Orchestrator, PassHandle, PassOutcome, PassReport, PassState};
pub use crate::vision::*;
