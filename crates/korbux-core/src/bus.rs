//! In-process publish/subscribe registry.
//!
//! Handlers run synchronously on the emitting thread. A failing or panicking handler
//! is reported on the [`DiagnosticSink`] and never reaches the emitter or the other
//! handlers. The handler list is snapshotted before iteration, so `on`/`off` may run
//! concurrently with `emit` (and handlers may themselves subscribe or unsubscribe).

use crate::diagnostics::{DiagnosticSink, DiagnosticSource};
use crate::error::BoxError;
use crate::shared::{AgentResponse, AuditEvent};
use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const RESPONSE_EVENT: &str = "response";
pub const AUDIT_EVENT: &str = "audit";
pub const ENGINE_READY_EVENT: &str = "engine_ready";

#[derive(Debug, Clone)]
pub enum EventPayload {
    Response(AgentResponse),
    Audit(AuditEvent),
    Json(serde_json::Value),
}

pub type EventHandler = Arc<dyn Fn(&EventPayload) -> Result<(), BoxError> + Send + Sync>;

/// Returned by [`EventBus::on`]; pass to [`EventBus::off`] to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct EventBus {
    handlers: DashMap<String, Vec<(SubscriptionId, EventHandler)>>,
    next_id: AtomicU64,
    diagnostics: DiagnosticSink,
}

impl EventBus {
    pub fn new(diagnostics: DiagnosticSink) -> Self {
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
            diagnostics,
        }
    }

    pub fn on<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&EventPayload) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        tracing::debug!(target: "korbux::bus", event, subscription = id.0, "handler registered");
        id
    }

    /// Deregisters a handler. Returns false if it was not registered for `event`.
    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        let Some(mut list) = self.handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        before != list.len()
    }

    /// Invokes every handler registered for `event` and returns how many succeeded.
    pub fn emit(&self, event: &str, payload: &EventPayload) -> usize {
        let snapshot: Vec<(SubscriptionId, EventHandler)> = match self.handlers.get(event) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut ok = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => ok += 1,
                Ok(Err(e)) => self.diagnostics.report(
                    DiagnosticSource::Bus,
                    event,
                    format!("handler {} failed: {}", id.0, e),
                ),
                Err(_) => self.diagnostics.report(
                    DiagnosticSource::Bus,
                    event,
                    format!("handler {} panicked", id.0),
                ),
            }
        }
        ok
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map(|l| l.len()).unwrap_or(0)
    }

    /// Sink that receives handler failures.
    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn bus() -> EventBus {
        EventBus::new(DiagnosticSink::new())
    }

    #[test]
    fn test_emit_reaches_all_handlers() {
        let bus = bus();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            bus.on("ping", move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(bus.emit("ping", &EventPayload::Json(serde_json::json!({}))), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(bus.emit("other", &EventPayload::Json(serde_json::json!({}))), 0);
    }

    #[test]
    fn test_failing_and_panicking_handlers_are_isolated() {
        let sink = DiagnosticSink::new();
        let mut rx = sink.subscribe();
        let bus = EventBus::new(sink);
        let hits = Arc::new(AtomicUsize::new(0));

        bus.on("ping", |_| Err("boom".into()));
        bus.on("ping", |_| panic!("handler panic"));
        let h = Arc::clone(&hits);
        bus.on("ping", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let ok = bus.emit("ping", &EventPayload::Json(serde_json::Value::Null));
        assert_eq!(ok, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.source, DiagnosticSource::Bus);
        assert!(first.message.contains("boom") || second.message.contains("boom"));
        assert!(first.message.contains("panicked") || second.message.contains("panicked"));
    }

    #[test]
    fn test_off_removes_only_that_handler() {
        let bus = bus();
        let a = bus.on("x", |_| Ok(()));
        let _b = bus.on("x", |_| Ok(()));
        assert!(bus.off("x", a));
        assert!(!bus.off("x", a));
        assert_eq!(bus.handler_count("x"), 1);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let bus = Arc::new(bus());
        let inner = Arc::clone(&bus);
        bus.on("x", move |_| {
            inner.on("x", |_| Ok(()));
            Ok(())
        });
        assert_eq!(bus.emit("x", &EventPayload::Json(serde_json::Value::Null)), 1);
        assert_eq!(bus.handler_count("x"), 2);
    }
}
