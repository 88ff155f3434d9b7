//! Audit stream: records engine and administrative actions into the `audit` shards.
//!
//! Recording is best-effort. Storage failures go to the diagnostics channel and the
//! caller still gets the event back.

use crate::bus::{EventBus, EventPayload, AUDIT_EVENT};
use crate::config::SharedConfig;
use crate::diagnostics::{DiagnosticSink, DiagnosticSource};
use crate::error::StorageError;
use crate::shard::ShardManager;
use crate::shared::{AuditEntry, AuditEvent, AuditLevel, AuditType, ShardKind};
use crate::storage::{StorageAdapter, StorageExt};
use crate::util;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_MODULE: &str = "engine";

/// Counts over the stored audit stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditSummary {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_module: BTreeMap<String, usize>,
    pub shards: Vec<String>,
}

pub struct AuditRecorder {
    storage: Arc<dyn StorageAdapter>,
    shards: Arc<ShardManager>,
    bus: Arc<EventBus>,
    config: SharedConfig,
    diagnostics: DiagnosticSink,
}

/// `evt-{UTC timestamp to the microsecond}-{random}`.
fn new_event_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "evt-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S%6f"),
        &random[..8]
    )
}

impl AuditRecorder {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        shards: Arc<ShardManager>,
        bus: Arc<EventBus>,
        config: SharedConfig,
        diagnostics: DiagnosticSink,
    ) -> Self {
        Self {
            storage,
            shards,
            bus,
            config,
            diagnostics,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.read().map(|c| c.audit_enabled).unwrap_or(false)
    }

    /// Records an event. Returns `None` when auditing is disabled.
    pub fn audit(&self, entry: AuditEntry) -> Option<AuditEvent> {
        if !self.enabled() {
            return None;
        }

        let event = AuditEvent {
            id: new_event_id(),
            kind: entry.kind.unwrap_or(AuditType::Interaction),
            module: entry.module.unwrap_or_else(|| DEFAULT_MODULE.to_string()),
            timestamp: util::now_timestamp(),
            data: entry.data,
            level: entry.level.unwrap_or(AuditLevel::System),
        };

        let written = serde_json::to_vec(&event)
            .map_err(StorageError::from)
            .and_then(|bytes| self.shards.write_record(ShardKind::Audit, &event.id, &bytes));
        match written {
            Ok(shard) => tracing::debug!(
                target: "korbux::audit",
                event_id = %event.id,
                kind = event.kind.as_str(),
                module = %event.module,
                shard = %shard,
                "audit event recorded"
            ),
            Err(e) => self.diagnostics.report(
                DiagnosticSource::Audit,
                event.id.clone(),
                format!("audit write failed: {}", e),
            ),
        }

        self.bus.emit(AUDIT_EVENT, &EventPayload::Audit(event.clone()));
        Some(event)
    }

    /// Every stored audit event, oldest first. Unreadable records are skipped.
    pub fn export_events(&self) -> Result<Vec<AuditEvent>, StorageError> {
        let mut events = Vec::new();
        for key in self.shards.record_keys(ShardKind::Audit)? {
            match self.storage.get_json::<AuditEvent>(&key) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    target: "korbux::audit",
                    key = %key,
                    error = %e,
                    "skipping unreadable audit record"
                ),
            }
        }
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    pub fn events_by_type(&self, kind: AuditType) -> Result<Vec<AuditEvent>, StorageError> {
        self.filtered(|e| e.kind == kind)
    }

    pub fn events_by_module(&self, module: &str) -> Result<Vec<AuditEvent>, StorageError> {
        self.filtered(|e| e.module == module)
    }

    pub fn events_by_level(&self, level: AuditLevel) -> Result<Vec<AuditEvent>, StorageError> {
        self.filtered(|e| e.level == level)
    }

    /// The last `n` events, oldest first.
    pub fn recent(&self, n: usize) -> Result<Vec<AuditEvent>, StorageError> {
        let mut events = self.export_events()?;
        let skip = events.len().saturating_sub(n);
        Ok(events.split_off(skip))
    }

    /// Case-insensitive match against the serialized event.
    pub fn search(&self, keyword: &str) -> Result<Vec<AuditEvent>, StorageError> {
        let needle = keyword.to_lowercase();
        self.filtered(|e| {
            serde_json::to_string(e)
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
    }

    pub fn summary(&self) -> Result<AuditSummary, StorageError> {
        let events = self.export_events()?;
        let mut summary = AuditSummary {
            total: events.len(),
            shards: self.shards.load_meta()?.audit_shards,
            ..Default::default()
        };
        for e in &events {
            *summary.by_type.entry(e.kind.as_str().to_string()).or_default() += 1;
            *summary.by_module.entry(e.module.clone()).or_default() += 1;
        }
        Ok(summary)
    }

    fn filtered<F>(&self, keep: F) -> Result<Vec<AuditEvent>, StorageError>
    where
        F: Fn(&AuditEvent) -> bool,
    {
        Ok(self.export_events()?.into_iter().filter(|e| keep(e)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::MemoryStorage;

    fn recorder(enabled: bool) -> (Arc<MemoryStorage>, Arc<EventBus>, AuditRecorder) {
        let storage = Arc::new(MemoryStorage::new());
        let config = EngineConfig {
            audit_enabled: enabled,
            ..Default::default()
        }
        .into_shared();
        let diagnostics = DiagnosticSink::new();
        let bus = Arc::new(EventBus::new(diagnostics.clone()));
        let shards = Arc::new(ShardManager::new(storage.clone(), config.clone()));
        let rec = AuditRecorder::new(storage.clone(), shards, Arc::clone(&bus), config, diagnostics);
        (storage, bus, rec)
    }

    #[test]
    fn test_audit_fills_defaults_and_persists() {
        let (storage, _, rec) = recorder(true);
        let event = rec.audit(AuditEntry::new(serde_json::json!({"k": 1}))).unwrap();
        assert!(event.id.starts_with("evt-"));
        assert_eq!(event.kind, AuditType::Interaction);
        assert_eq!(event.module, "engine");
        assert_eq!(event.level, AuditLevel::System);

        let keys = storage.list_keys("korbux:audit:").unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].ends_with(&event.id));
        assert_eq!(rec.export_events().unwrap(), vec![event]);
    }

    #[test]
    fn test_disabled_audit_writes_nothing() {
        let (storage, bus, rec) = recorder(false);
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        bus.on(AUDIT_EVENT, move |_| {
            s.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });
        assert!(rec.audit(AuditEntry::new(serde_json::json!({}))).is_none());
        assert!(storage.is_empty());
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_queries_and_summary() {
        let (_, _, rec) = recorder(true);
        rec.audit(AuditEntry::new(serde_json::json!({"agent": "echo"})).module("registry"));
        rec.audit(
            AuditEntry::new(serde_json::json!({"path": "/missing"}))
                .kind(AuditType::Warn)
                .module("health_check")
                .level(AuditLevel::Security),
        );
        rec.audit(AuditEntry::new(serde_json::json!({"agent": "keyword"})).module("registry"));

        assert_eq!(rec.events_by_module("registry").unwrap().len(), 2);
        assert_eq!(rec.events_by_type(AuditType::Warn).unwrap().len(), 1);
        assert_eq!(rec.events_by_level(AuditLevel::Security).unwrap().len(), 1);
        assert_eq!(rec.search("MISSING").unwrap().len(), 1);
        assert_eq!(rec.recent(2).unwrap().len(), 2);
        assert_eq!(rec.recent(10).unwrap().len(), 3);

        let summary = rec.summary().unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_module["registry"], 2);
        assert_eq!(summary.by_type["interaction"], 2);
        assert_eq!(summary.shards.len(), 1);
    }
}
