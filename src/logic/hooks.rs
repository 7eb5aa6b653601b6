//! Post-commit audit hooks.
//!
//! Events are queued by a request only after its transaction committed and
//! are consumed by a single background worker. A full queue drops the event.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::model::{Id, Timestamp};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HookEvent {
    pub end_point: &'static str,
    /// HTTP verb of the write: `POST`, `PUT`, `PATCH` or `DELETE`.
    pub method: &'static str,
    pub id: Option<Id>,
    pub user_id: String,
    pub reason: Option<String>,
    /// State before the write; absent on create.
    pub old: Option<Value>,
    pub at: Timestamp,
}

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: HookEvent) -> anyhow::Result<()>;
}

/// Writes audit events to the application log.
#[derive(Debug, Default)]
pub struct LogAuditSink;

#[async_trait::async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: HookEvent) -> anyhow::Result<()> {
        log::info!(
            "audit: {} {} id={} user={} reason={}",
            event.method,
            event.end_point,
            event.id.map(|id| id.to_string()).unwrap_or_default(),
            event.user_id,
            event.reason.as_deref().unwrap_or("-"),
        );
        Ok(())
    }
}

pub struct HookDispatcher {
    sender: RwLock<Option<mpsc::Sender<HookEvent>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HookDispatcher {
    /// Start the background worker. Must be called inside a tokio runtime.
    pub fn spawn(capacity: usize, sink: Arc<dyn AuditSink>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<HookEvent>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let label = format!("{} {}", event.method, event.end_point);
                if let Err(e) = sink.record(event).await {
                    log::warn!("audit hook for {} failed: {:#}", label, e);
                }
            }
            log::debug!("audit worker stopped");
        });
        Self {
            sender: RwLock::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Dispatcher that discards every event.
    pub fn disabled() -> Self {
        Self {
            sender: RwLock::new(None),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Queue an event without waiting; returns whether it was accepted.
    pub fn dispatch(&self, event: HookEvent) -> bool {
        let sender = self.sender.read();
        let Some(sender) = sender.as_ref() else {
            log::debug!("audit hooks disabled, dropping {} {}", event.method, event.end_point);
            return false;
        };
        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                log::warn!(
                    "audit queue full, dropping {} {}",
                    event.method,
                    event.end_point
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                log::warn!(
                    "audit worker gone, dropping {} {}",
                    event.method,
                    event.end_point
                );
                false
            }
        }
    }

    /// Stop accepting events and wait for the worker to drain the queue.
    pub async fn close(&self) {
        drop(self.sender.write().take());
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                log::warn!("audit worker ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Sink that keeps every event in memory.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub events: Mutex<Vec<HookEvent>>,
    }

    #[async_trait::async_trait]
    impl AuditSink for RecordingSink {
        async fn record(&self, event: HookEvent) -> anyhow::Result<()> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait::async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: HookEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    pub(crate) fn event(method: &'static str) -> HookEvent {
        HookEvent {
            end_point: "surveys",
            method,
            id: Some(uuid::Uuid::new_v4()),
            user_id: "tester".to_string(),
            reason: None,
            old: None,
            at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_close_drains_queued_events() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = HookDispatcher::spawn(8, sink.clone());

        assert!(dispatcher.dispatch(event("POST")));
        assert!(dispatcher.dispatch(event("DELETE")));
        dispatcher.close().await;

        let methods: Vec<_> = sink.events.lock().iter().map(|e| e.method).collect();
        assert_eq!(methods, vec!["POST", "DELETE"]);
        assert!(!dispatcher.dispatch(event("PUT")));
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_worker() {
        let dispatcher = HookDispatcher::spawn(4, Arc::new(FailingSink));
        assert!(dispatcher.dispatch(event("POST")));
        assert!(dispatcher.dispatch(event("PATCH")));
        dispatcher.close().await;
    }

    #[tokio::test]
    async fn test_disabled_dispatcher_drops_events() {
        let dispatcher = HookDispatcher::disabled();
        assert!(!dispatcher.dispatch(event("POST")));
        dispatcher.close().await;
    }
}
