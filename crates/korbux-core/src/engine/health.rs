use super::Engine;
use crate::shared::{AuditEntry, AuditLevel, AuditType};
use serde::Serialize;

const ENVIRONMENTS: [&str; 3] = ["development", "staging", "production"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub environment: String,
    pub schema_version: u32,
    /// Backend name.
    pub storage: String,
    pub agents: usize,
    pub plugins: usize,
    pub issues: Vec<String>,
}

impl Engine {
    /// Probes storage and checks the config. A degraded report is audited as a warning.
    pub fn health(&self) -> HealthReport {
        let config = self.config_snapshot();
        let mut issues = Vec::new();

        let schema_version = match self.shards.load_meta() {
            Ok(meta) => meta.schema_version,
            Err(e) => {
                issues.push(format!("storage probe failed: {}", e));
                config.schema_version
            }
        };
        if !ENVIRONMENTS.contains(&config.environment.as_str()) {
            issues.push(format!("unknown environment '{}'", config.environment));
        }
        if !config.supported_languages.contains(&config.default_lang) {
            issues.push(format!(
                "default language '{}' is not supported",
                config.default_lang
            ));
        }
        if config.license.trim().is_empty() {
            issues.push("license is not set".to_string());
        }

        let status = if issues.is_empty() {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        let report = HealthReport {
            status,
            environment: config.environment,
            schema_version,
            storage: self.storage.name().to_string(),
            agents: self.agents.len(),
            plugins: self.plugins.len(),
            issues,
        };

        if report.status == HealthStatus::Degraded {
            tracing::warn!(target: "korbux::dispatch", issues = ?report.issues, "health check degraded");
            self.audit(
                AuditEntry::new(serde_json::json!({ "issues": report.issues }))
                    .kind(AuditType::Warn)
                    .module("health_check")
                    .level(AuditLevel::System),
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    #[test]
    fn test_default_engine_is_healthy() {
        let engine = Engine::new(EngineConfig::default(), Arc::new(MemoryStorage::new())).unwrap();
        let report = engine.health();
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(report.storage, "memory");
        assert!(report.issues.is_empty());
        assert!(engine.audit_log().events_by_module("health_check").unwrap().is_empty());
    }

    #[test]
    fn test_bad_environment_and_language_degrade() {
        let config = EngineConfig {
            environment: "qa".into(),
            default_lang: "xx".into(),
            ..Default::default()
        };
        let engine = Engine::new(config, Arc::new(MemoryStorage::new())).unwrap();
        let report = engine.health();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.issues.len(), 2);

        let warnings = engine.audit_log().events_by_module("health_check").unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, AuditType::Warn);
    }
}
