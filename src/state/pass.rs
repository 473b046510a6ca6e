/// 分析輪次
///
/// 每次重算是一個輪次：IDLE → RUNNING → (COMPLETED | CANCELLED)。
/// 輪次在自己的執行緒上派發每位觀察者的計算單元到 rayon 執行緒池，
/// 透過 crossbeam channel 收回結果。
use chrono::{DateTime, Utc};
use crossbeam_channel::unbounded;
use geo::Polygon;
use log::{info, warn};
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::comp::{AnalysisResolution, Observer, ObserverId, ObstructionSet};
use crate::error::{AnalysisError, Result};
use crate::msg::{AnalysisEvent, EventBus};
use crate::vision::{
    AggregateCoverage, CoverageAggregator, CoverageStats, ObserverVisibility, VisibilityCalculator,
    VisibleAreaCache, VisibleAreaResult,
};

pub type PassId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// 互動模式在拖曳時使用低解析度並略過覆蓋率統計
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Interactive,
    Final,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub observer_id: ObserverId,
    pub name: String,
    pub error: String,
}

/// 完成的輪次結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_id: PassId,
    pub mode: AnalysisMode,
    pub resolution: AnalysisResolution,
    pub analysis_distance_meters: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// 依觀察者加入順序排列
    pub visibilities: Vec<ObserverVisibility>,
    pub failures: Vec<UnitFailure>,
    /// 互動模式下為 None
    pub aggregate: Option<AggregateCoverage>,
    pub coverage: Option<CoverageStats>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed(Arc<PassReport>),
    Cancelled { pass_id: PassId },
}

#[derive(Debug)]
struct Progress {
    state: PassState,
    outcome: Option<PassOutcome>,
}

#[derive(Debug)]
struct PassControl {
    id: PassId,
    mode: AnalysisMode,
    resolution: AnalysisResolution,
    cancelled: AtomicBool,
    progress: Mutex<Progress>,
    finished: Condvar,
    /// 取消與覆蓋率發布互斥；同執行緒的監聽者可在發布中取消
    publishing: ReentrantMutex<()>,
    events: Arc<EventBus>,
}

/// 輪次控制代碼，可取消或等待結果
#[derive(Debug, Clone)]
pub struct PassHandle {
    control: Arc<PassControl>,
}

impl PassHandle {
    pub(crate) fn new(
        id: PassId,
        mode: AnalysisMode,
        resolution: AnalysisResolution,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            control: Arc::new(PassControl {
                id,
                mode,
                resolution,
                cancelled: AtomicBool::new(false),
                progress: Mutex::new(Progress {
                    state: PassState::Running,
                    outcome: None,
                }),
                finished: Condvar::new(),
                publishing: ReentrantMutex::new(()),
                events,
            }),
        }
    }

    pub fn id(&self) -> PassId {
        self.control.id
    }

    pub fn mode(&self) -> AnalysisMode {
        self.control.mode
    }

    pub fn resolution(&self) -> AnalysisResolution {
        self.control.resolution
    }

    pub fn state(&self) -> PassState {
        self.control.progress.lock().state
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_flag(&self) -> &AtomicBool {
        &self.control.cancelled
    }

    /// 取消執行中的輪次，只有第一次呼叫有效
    ///
    /// 事件發布後才喚醒等待者。
    pub fn cancel(&self) -> bool {
        let _publishing = self.control.publishing.lock();
        {
            let mut progress = self.control.progress.lock();
            if progress.state != PassState::Running {
                return false;
            }
            self.control.cancelled.store(true, Ordering::SeqCst);
            progress.state = PassState::Cancelled;
        }

        info!("pass {} cancelled", self.control.id);
        self.control
            .events
            .emit(AnalysisEvent::PassCancelled { pass_id: self.control.id });
        self.resolve(PassOutcome::Cancelled { pass_id: self.control.id });
        true
    }

    /// 尚未取消時執行發布；發布期間其他執行緒的取消會等到發布結束
    pub(crate) fn publish_unless_cancelled<T>(&self, publish: impl FnOnce() -> T) -> Option<T> {
        let _publishing = self.control.publishing.lock();
        if self.is_cancelled() {
            return None;
        }
        Some(publish())
    }

    fn complete(&self, report: Arc<PassReport>) -> bool {
        {
            let mut progress = self.control.progress.lock();
            if progress.state != PassState::Running {
                return false;
            }
            progress.state = PassState::Completed;
        }

        self.control.events.emit(AnalysisEvent::PassCompleted(report.clone()));
        self.resolve(PassOutcome::Completed(report));
        true
    }

    fn resolve(&self, outcome: PassOutcome) {
        let mut progress = self.control.progress.lock();
        progress.outcome = Some(outcome);
        self.control.finished.notify_all();
    }

    /// 等到輪次完成或被取消
    pub fn wait(&self) -> PassOutcome {
        let mut progress = self.control.progress.lock();
        loop {
            if let Some(outcome) = &progress.outcome {
                return outcome.clone();
            }
            self.control.finished.wait(&mut progress);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<PassOutcome> {
        let deadline = Instant::now() + timeout;
        let mut progress = self.control.progress.lock();
        loop {
            if let Some(outcome) = &progress.outcome {
                return Some(outcome.clone());
            }
            if self.control.finished.wait_until(&mut progress, deadline).timed_out() {
                return progress.outcome.clone();
            }
        }
    }
}

/// 一個輪次所需的全部輸入
pub(crate) struct PassJob {
    pub handle: PassHandle,
    pub observers: Vec<Observer>,
    pub analysis_distance_m: f64,
    pub obstructions: Arc<ObstructionSet>,
    pub cache: Arc<VisibleAreaCache>,
    pub coverage: Arc<Mutex<CoverageAggregator>>,
    pub thread_pool: Arc<ThreadPool>,
    pub events: Arc<EventBus>,
}

type UnitResult = (usize, Result<Arc<VisibleAreaResult>>);

pub(crate) struct PassRunner;

impl PassRunner {
    pub fn spawn(job: PassJob) -> Result<()> {
        thread::Builder::new()
            .name(format!("analysis-pass-{}", job.handle.id()))
            .spawn(move || Self::run(job))
            .map(|_| ())
            .map_err(|e| AnalysisError::Worker(e.to_string()))
    }

    fn run(job: PassJob) {
        let started_at = Utc::now();
        let handle = &job.handle;
        let resolution = handle.resolution();
        let (tx, rx) = unbounded::<UnitResult>();

        // 取消後不再派發新的單元；已派發的單元照常跑完
        let mut issued = 0;
        for (index, observer) in job.observers.iter().enumerate() {
            if handle.is_cancelled() {
                break;
            }
            let tx = tx.clone();
            let observer = observer.clone();
            let unit_handle = handle.clone();
            let cache = job.cache.clone();
            let obstructions = job.obstructions.clone();
            let distance = job.analysis_distance_m;
            job.thread_pool.spawn(move || {
                let result = match cache.get(observer.id, resolution) {
                    Some(cached) => Ok(cached),
                    None => VisibilityCalculator::compute_visible_area(&observer, distance, resolution, &obstructions)
                        .map(|computed| {
                            let computed = Arc::new(computed);
                            cache.set_unless(observer.id, resolution, computed.clone(), unit_handle.cancel_flag());
                            computed
                        }),
                };
                let _ = tx.send((index, result));
            });
            issued += 1;
        }
        drop(tx);

        let mut results: Vec<Option<Result<Arc<VisibleAreaResult>>>> = vec![None; job.observers.len()];
        let mut received = 0;
        for (index, result) in rx.iter() {
            if handle.is_cancelled() {
                break;
            }
            let observer = &job.observers[index];
            if let Err(e) = &result {
                warn!("pass {}: observer {} failed: {}", handle.id(), observer.id, e);
            }
            job.events.emit(AnalysisEvent::UnitCompleted {
                pass_id: handle.id(),
                observer_id: observer.id,
                succeeded: result.is_ok(),
            });
            results[index] = Some(result);
            received += 1;
        }

        if handle.is_cancelled() {
            info!(
                "pass {} discarded after {} of {} units",
                handle.id(),
                received,
                job.observers.len()
            );
            return;
        }

        let mut visibilities = Vec::with_capacity(received);
        let mut failures = Vec::new();
        for (observer, result) in job.observers.iter().zip(results) {
            match result {
                Some(Ok(result)) => visibilities.push(ObserverVisibility {
                    observer_id: observer.id,
                    name: observer.name.clone(),
                    result: (*result).clone(),
                }),
                Some(Err(e)) => failures.push(UnitFailure {
                    observer_id: observer.id,
                    name: observer.name.clone(),
                    error: e.to_string(),
                }),
                None => failures.push(UnitFailure {
                    observer_id: observer.id,
                    name: observer.name.clone(),
                    error: "analysis worker lost".to_string(),
                }),
            }
        }

        let (aggregate, coverage) = match handle.mode() {
            AnalysisMode::Interactive => (None, None),
            AnalysisMode::Final => Self::aggregate(&job, &visibilities),
        };
        if handle.is_cancelled() {
            return;
        }

        let report = Arc::new(PassReport {
            pass_id: handle.id(),
            mode: handle.mode(),
            resolution,
            analysis_distance_meters: job.analysis_distance_m,
            started_at,
            finished_at: Utc::now(),
            visibilities,
            failures,
            aggregate,
            coverage,
        });
        info!(
            "pass {} completed: {} visible areas, {} failures (issued {})",
            report.pass_id,
            report.visibilities.len(),
            report.failures.len(),
            issued
        );
        handle.complete(report);
    }

    /// 合併可見區域並更新覆蓋率；失敗時只記錄，不影響報告
    fn aggregate(
        job: &PassJob,
        visibilities: &[ObserverVisibility],
    ) -> (Option<AggregateCoverage>, Option<CoverageStats>) {
        let areas: Vec<Polygon<f64>> = visibilities
            .iter()
            .map(|v| v.result.visible_area.clone())
            .collect();

        let sr = job.coverage.lock().spatial_reference();
        let aggregate = match CoverageAggregator::aggregate_in(sr, &areas) {
            Ok(aggregate) => aggregate,
            Err(e) => {
                warn!("pass {}: coverage aggregation failed: {}", job.handle.id(), e);
                return (None, None);
            }
        };

        let published = job.handle.publish_unless_cancelled(|| {
            let mut aggregator = job.coverage.lock();
            aggregator.update_union(Some(aggregate.union.clone()));
            let coverage = aggregator.coverage();
            drop(aggregator);
            if let Ok(stats) = &coverage {
                job.events.emit(AnalysisEvent::CoverageUpdated(*stats));
            }
            coverage
        });

        match published {
            None => (None, None),
            Some(Ok(stats)) => (Some(aggregate), Some(stats)),
            Some(Err(e)) => {
                warn!("pass {}: coverage statistics failed: {}", job.handle.id(), e);
                (Some(aggregate), None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_once() {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let handle = PassHandle::new(1, AnalysisMode::Final, AnalysisResolution::Normal, events);

        assert_eq!(handle.state(), PassState::Running);
        assert_eq!(handle.wait_timeout(Duration::from_millis(10)), None);
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert_eq!(handle.state(), PassState::Cancelled);
        assert_eq!(handle.wait(), PassOutcome::Cancelled { pass_id: 1 });
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_cancelled_pass_cannot_complete() {
        let events = Arc::new(EventBus::new());
        let handle = PassHandle::new(2, AnalysisMode::Interactive, AnalysisResolution::Fast, events);
        handle.cancel();

        let report = Arc::new(PassReport {
            pass_id: 2,
            mode: AnalysisMode::Interactive,
            resolution: AnalysisResolution::Fast,
            analysis_distance_meters: 100.0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            visibilities: Vec::new(),
            failures: Vec::new(),
            aggregate: None,
            coverage: None,
        });
        assert!(!handle.complete(report));
        assert_eq!(handle.state(), PassState::Cancelled);
    }

    #[test]
    fn test_cancelled_pass_does_not_publish() {
        let events = Arc::new(EventBus::new());
        let handle = PassHandle::new(3, AnalysisMode::Final, AnalysisResolution::Normal, events);
        assert_eq!(handle.publish_unless_cancelled(|| 1), Some(1));
        handle.cancel();
        assert_eq!(handle.publish_unless_cancelled(|| 2), None);
    }

    #[test]
    fn test_cancel_waits_for_coverage_publish() {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let handle = PassHandle::new(4, AnalysisMode::Final, AnalysisResolution::Normal, events.clone());

        let published = handle.publish_unless_cancelled(|| {
            let canceller = {
                let handle = handle.clone();
                thread::spawn(move || handle.cancel())
            };
            thread::sleep(Duration::from_millis(50));
            // 發布期間其他執行緒的取消尚未生效
            assert!(!handle.is_cancelled());
            events.emit(AnalysisEvent::CoverageUpdated(CoverageStats::default()));
            canceller
        });
        assert!(published.unwrap().join().unwrap());

        let received: Vec<AnalysisEvent> = rx.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert!(matches!(received[0], AnalysisEvent::CoverageUpdated(_)));
        assert!(matches!(received[1], AnalysisEvent::PassCancelled { pass_id: 4 }));
    }

    #[test]
    fn test_listener_may_cancel_while_publishing() {
        let events = Arc::new(EventBus::new());
        let handle = PassHandle::new(5, AnalysisMode::Final, AnalysisResolution::Normal, events);
        assert_eq!(handle.publish_unless_cancelled(|| handle.cancel()), Some(true));
        assert_eq!(handle.wait(), PassOutcome::Cancelled { pass_id: 5 });
    }
}
