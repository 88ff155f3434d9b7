//! Forward-only schema migrations.

use super::Engine;
use crate::error::{BoxError, EngineError, EngineResult};
use crate::shared::{AuditEntry, AuditType};
use crate::storage::StorageAdapter;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Transforms stored data from schema version `from` to `from + 1`.
pub trait MigrationHook: Send + Sync {
    fn migrate(&self, from: u32, storage: &dyn StorageAdapter) -> Result<(), BoxError>;
}

impl<F> MigrationHook for F
where
    F: Fn(u32, &dyn StorageAdapter) -> Result<(), BoxError> + Send + Sync,
{
    fn migrate(&self, from: u32, storage: &dyn StorageAdapter) -> Result<(), BoxError> {
        self(from, storage)
    }
}

impl Engine {
    /// Registers the hook run when stepping from `from` to `from + 1`.
    /// A later registration for the same version replaces the earlier one.
    pub fn register_migration<H>(&self, from: u32, hook: H)
    where
        H: MigrationHook + 'static,
    {
        let mut hooks = self.migrations.write().unwrap_or_else(|e| e.into_inner());
        hooks.insert(from, Arc::new(hook));
        tracing::debug!(target: "korbux::migrate", from, "migration hook registered");
    }

    /// Brings the store to schema version `target`.
    ///
    /// Returns false when already at `target` (no write, no audit). A lower `target` is
    /// refused. Hooks run for every step in order and each completed step is persisted
    /// before the next one starts, so a failure leaves the store at the last good version.
    /// Concurrent calls are serialized.
    pub fn migrate_schema(&self, target: u32) -> EngineResult<bool> {
        let _running = self.migration_lock.lock().unwrap_or_else(|e| e.into_inner());

        let current = self.shards.load_meta()?.schema_version;
        if target == current {
            tracing::debug!(target: "korbux::migrate", version = current, "schema already current");
            return Ok(false);
        }
        if target < current {
            return Err(EngineError::Downgrade {
                from: current,
                to: target,
            });
        }

        let hooks: BTreeMap<u32, Arc<dyn MigrationHook>> = {
            let registered = self.migrations.read().unwrap_or_else(|e| e.into_inner());
            registered
                .range(current..target)
                .map(|(v, h)| (*v, Arc::clone(h)))
                .collect()
        };
        for from in current..target {
            if let Some(hook) = hooks.get(&from) {
                if let Err(e) = hook.migrate(from, self.storage.as_ref()) {
                    self.audit(
                        AuditEntry::new(serde_json::json!({
                            "action": "migrate_schema",
                            "from": current,
                            "to": target,
                            "reached": from,
                            "error": e.to_string(),
                        }))
                        .kind(AuditType::Error)
                        .module("migrator"),
                    );
                    return Err(EngineError::Migration {
                        from,
                        to: from + 1,
                        reason: e.to_string(),
                    });
                }
            }
            self.commit_schema_version(from + 1)?;
            tracing::info!(target: "korbux::migrate", from, to = from + 1, "migration step applied");
        }

        tracing::info!(target: "korbux::migrate", from = current, to = target, "schema migrated");
        self.audit(
            AuditEntry::new(serde_json::json!({
                "action": "migrate_schema",
                "from": current,
                "to": target,
            }))
            .kind(AuditType::Info)
            .module("migrator"),
        );
        Ok(true)
    }

    fn commit_schema_version(&self, version: u32) -> EngineResult<()> {
        self.shards.set_schema_version(version)?;
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        config.schema_version = config.schema_version.max(version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::error::{BoxError, EngineError};
    use crate::shared::AuditType;
    use crate::storage::{MemoryStorage, StorageAdapter};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default(), Arc::new(MemoryStorage::new())).unwrap()
    }

    #[test]
    fn test_hooks_run_in_order_and_version_advances() {
        let engine = engine();
        let steps = Arc::new(std::sync::Mutex::new(Vec::new()));
        for v in [2u32, 1] {
            let steps = Arc::clone(&steps);
            engine.register_migration(v, move |from: u32, _: &dyn StorageAdapter| -> Result<(), BoxError> {
                steps.lock().unwrap().push(from);
                Ok(())
            });
        }

        assert!(engine.migrate_schema(4).unwrap());
        assert_eq!(*steps.lock().unwrap(), vec![1, 2]);
        assert_eq!(engine.shards().load_meta().unwrap().schema_version, 4);
        assert_eq!(engine.config().schema_version, 4);

        let events = engine.audit_log().events_by_module("migrator").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["from"], 1);
        assert_eq!(events[0].data["to"], 4);
    }

    #[test]
    fn test_downgrade_is_refused() {
        let engine = engine();
        engine.migrate_schema(3).unwrap();
        assert!(matches!(
            engine.migrate_schema(2),
            Err(EngineError::Downgrade { from: 3, to: 2 })
        ));
        assert_eq!(engine.config().schema_version, 3);
    }

    #[test]
    fn test_failing_hook_keeps_completed_steps() {
        let engine = engine();
        let ran = Arc::new(AtomicU32::new(0));
        let r = Arc::clone(&ran);
        engine.register_migration(1, move |_: u32, _: &dyn StorageAdapter| -> Result<(), BoxError> {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        engine.register_migration(2, |_: u32, _: &dyn StorageAdapter| -> Result<(), BoxError> {
            Err("column missing".into())
        });

        let err = engine.migrate_schema(3).unwrap_err();
        assert!(matches!(err, EngineError::Migration { from: 2, to: 3, .. }));
        assert_eq!(engine.shards().load_meta().unwrap().schema_version, 2);
        assert_eq!(engine.config().schema_version, 2);

        let events = engine.audit_log().events_by_module("migrator").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditType::Error);
        assert_eq!(events[0].data["reached"], 2);

        // A retry resumes at step 2 and does not replay step 1.
        assert!(engine.migrate_schema(3).is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_migrations_never_lower_the_version() {
        let engine = Arc::new(engine());
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        engine.register_migration(1, move |_: u32, _: &dyn StorageAdapter| -> Result<(), BoxError> {
            c.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        });

        let slow = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.migrate_schema(2))
        };
        std::thread::sleep(Duration::from_millis(10));
        let fast = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.migrate_schema(5))
        };
        let slow = slow.join().unwrap();
        let fast = fast.join().unwrap();

        assert!(slow.is_ok() || matches!(slow, Err(EngineError::Downgrade { .. })));
        assert!(fast.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.shards().load_meta().unwrap().schema_version, 5);
        assert_eq!(engine.config().schema_version, 5);
    }
}
