use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::comp::ObserverId;
use crate::state::pass::{PassHandle, PassId, PassReport};
use crate::vision::CoverageStats;

/// 分析過程中發布的事件
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    PassStarted {
        handle: PassHandle,
        observer_count: usize,
    },
    /// 單一觀察者的計算單元結束（成功或失敗）
    UnitCompleted {
        pass_id: PassId,
        observer_id: ObserverId,
        succeeded: bool,
    },
    PassCompleted(Arc<PassReport>),
    PassCancelled {
        pass_id: PassId,
    },
    CoverageUpdated(CoverageStats),
}

pub type Listener = Arc<dyn Fn(&AnalysisEvent) + Send + Sync>;

/// 事件匯流排
///
/// 訂閱者拿到一個 channel；監聽器在發布事件的執行緒上同步呼叫。
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<AnalysisEvent>>>,
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<AnalysisEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn on<F>(&self, listener: F)
    where
        F: Fn(&AnalysisEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    pub fn emit(&self, event: AnalysisEvent) {
        // 先複製一份再呼叫，監聽器內可以再發布事件
        let listeners: Vec<Listener> = self.listeners.lock().clone();
        for listener in &listeners {
            listener(&event);
        }

        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.lock().len())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.emit(AnalysisEvent::PassCancelled { pass_id: 3 });
        assert_eq!(bus.subscribers.lock().len(), 1);
        assert!(matches!(kept.try_recv(), Ok(AnalysisEvent::PassCancelled { pass_id: 3 })));
    }

    #[test]
    fn test_listener_may_emit() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let bus2 = bus.clone();
            let seen = seen.clone();
            bus.on(move |event| {
                seen.fetch_add(1, Ordering::SeqCst);
                if let AnalysisEvent::PassCancelled { pass_id: 1 } = event {
                    bus2.emit(AnalysisEvent::PassCancelled { pass_id: 2 });
                }
            });
        }

        bus.emit(AnalysisEvent::PassCancelled { pass_id: 1 });
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
