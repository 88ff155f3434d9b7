//! Engine: agent registry and the request pipeline
//! (validate, lookup, invoke, finalize, persist, emit).

mod agent;
mod health;
mod import;
mod migrate;

pub use agent::{Agent, AgentContext, AgentInfo, Plugin};
pub use health::{HealthReport, HealthStatus};
pub use migrate::MigrationHook;

use crate::audit::AuditRecorder;
use crate::bus::{EventBus, EventPayload, SubscriptionId, ENGINE_READY_EVENT, RESPONSE_EVENT};
use crate::config::{EngineConfig, SharedConfig};
use crate::diagnostics::{Diagnostic, DiagnosticSink, DiagnosticSource};
use crate::error::{EngineError, EngineResult, StorageError};
use crate::shard::ShardManager;
use crate::shared::{
    response_key, AgentRequest, AgentResponse, AuditEntry, AuditEvent, AuditType, ShardKind,
    ShardMeta, META_KEY,
};
use crate::storage::{StorageAdapter, StorageExt};
use crate::util;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Instant;
use tokio::sync::broadcast;

pub struct Engine {
    config: SharedConfig,
    storage: Arc<dyn StorageAdapter>,
    bus: Arc<EventBus>,
    shards: Arc<ShardManager>,
    audit: Arc<AuditRecorder>,
    diagnostics: DiagnosticSink,
    agents: DashMap<String, Arc<dyn Agent>>,
    /// Installed plugin id -> version.
    plugins: DashMap<String, String>,
    /// Keyed by the schema version a hook migrates from.
    migrations: RwLock<BTreeMap<u32, Arc<dyn MigrationHook>>>,
    migration_lock: Mutex<()>,
    /// Ids emitted by this engine and not yet sharded by its subscriber.
    dispatched: Arc<DashSet<String>>,
    response_subscription: OnceLock<SubscriptionId>,
}

impl Engine {
    pub fn new(config: EngineConfig, storage: Arc<dyn StorageAdapter>) -> EngineResult<Self> {
        Self::with_bus(
            config,
            storage,
            Arc::new(EventBus::new(DiagnosticSink::new())),
        )
    }

    /// Builds an engine on an existing bus, so listeners registered beforehand
    /// (for example on `engine_ready`) see construction.
    ///
    /// A store that already holds a meta record decides the schema version; a config
    /// asking for a newer version than the store has is rejected until it is migrated.
    /// The bus may be shared: the response subscriber only shards responses this
    /// engine dispatched.
    pub fn with_bus(
        mut config: EngineConfig,
        storage: Arc<dyn StorageAdapter>,
        bus: Arc<EventBus>,
    ) -> EngineResult<Self> {
        config.validate()?;
        if let Some(meta) = storage.get_json::<ShardMeta>(META_KEY)? {
            if config.schema_version > meta.schema_version {
                return Err(EngineError::InvalidConfig(format!(
                    "schema_version {} is ahead of the stored version {}; migrate first",
                    config.schema_version, meta.schema_version
                )));
            }
            if config.schema_version != meta.schema_version {
                tracing::info!(
                    target: "korbux::migrate",
                    configured = config.schema_version,
                    stored = meta.schema_version,
                    "using stored schema version"
                );
            }
            config.schema_version = meta.schema_version;
        }
        let ready = serde_json::json!({
            "schemaVersion": config.schema_version,
            "environment": config.environment,
            "storage": storage.name(),
        });

        let config = config.into_shared();
        let diagnostics = bus.diagnostics().clone();
        let shards = Arc::new(ShardManager::new(Arc::clone(&storage), Arc::clone(&config)));
        let audit = Arc::new(AuditRecorder::new(
            Arc::clone(&storage),
            Arc::clone(&shards),
            Arc::clone(&bus),
            Arc::clone(&config),
            diagnostics.clone(),
        ));

        let engine = Self {
            config,
            storage,
            bus,
            shards,
            audit,
            diagnostics,
            agents: DashMap::new(),
            plugins: DashMap::new(),
            migrations: RwLock::new(BTreeMap::new()),
            migration_lock: Mutex::new(()),
            dispatched: Arc::new(DashSet::new()),
            response_subscription: OnceLock::new(),
        };
        engine.install_response_subscriber();

        engine.bus.emit(ENGINE_READY_EVENT, &EventPayload::Json(ready.clone()));
        engine.audit(
            AuditEntry::new(serde_json::json!({ "action": "engine_init", "details": ready }))
                .kind(AuditType::Info),
        );
        tracing::info!(
            target: "korbux::dispatch",
            storage = engine.storage.name(),
            "engine ready"
        );
        Ok(engine)
    }

    /// Persists every emitted response into its shard. Installed once per engine.
    fn install_response_subscriber(&self) -> SubscriptionId {
        *self.response_subscription.get_or_init(|| {
            let shards = Arc::clone(&self.shards);
            let storage = Arc::clone(&self.storage);
            let diagnostics = self.diagnostics.clone();
            let dispatched = Arc::clone(&self.dispatched);
            self.bus.on(RESPONSE_EVENT, move |payload| {
                let EventPayload::Response(response) = payload else {
                    return Ok(());
                };
                if dispatched.remove(&response.id).is_none() {
                    return Ok(());
                }
                let stored = store_in_shard(&shards, storage.as_ref(), response.clone(), None);
                if let Err(e) = stored {
                    diagnostics.report(
                        DiagnosticSource::Shard,
                        response.id.clone(),
                        format!("sharded response write failed: {}", e),
                    );
                }
                Ok(())
            })
        })
    }

    /// Routes `request` to its agent and returns the finalized response.
    ///
    /// Agent failures come back unchanged as [`EngineError::Agent`]; nothing is persisted
    /// for them. Persistence failures after the agent ran are reported on the
    /// diagnostics channel and do not fail the call.
    pub async fn request(&self, request: &AgentRequest) -> EngineResult<AgentResponse> {
        let started = Instant::now();

        if request.agent_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest("agentId is required".into()));
        }
        if request.user_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest("userId is required".into()));
        }

        let agent = self
            .agents
            .get(&request.agent_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::AgentNotRegistered(request.agent_id.clone()))?;

        let config = self.config_snapshot();
        let (input, input_truncated) = util::truncate(&request.input, config.max_chars);
        let invoked = AgentRequest {
            input,
            ..request.clone()
        };
        let ctx = AgentContext::new(
            config.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.bus),
            Arc::clone(&self.audit),
        );

        let mut response = agent
            .handle(&invoked, &ctx)
            .await
            .map_err(EngineError::Agent)?;
        finalize(&invoked, &mut response, &config, input_truncated, started)?;

        let key = response_key(&response.id);
        let persisted = serde_json::to_vec(&response)
            .map_err(StorageError::from)
            .and_then(|bytes| self.storage.best_effort_set(&key, &bytes));
        if let Err(e) = persisted {
            self.diagnostics.report(
                DiagnosticSource::Storage,
                key,
                format!("response write failed: {}", e),
            );
        }

        self.dispatched.insert(response.id.clone());
        self.bus
            .emit(RESPONSE_EVENT, &EventPayload::Response(response.clone()));
        self.dispatched.remove(&response.id);
        tracing::info!(
            target: "korbux::dispatch",
            agent_id = %response.agent_id,
            response_id = %response.id,
            duration_ms = response.meta.duration_ms,
            truncated = response.meta.truncated,
            "request handled"
        );
        Ok(response)
    }

    /// Like [`Engine::request`] for an untyped request; `null` counts as a missing request.
    pub async fn request_value(&self, request: serde_json::Value) -> EngineResult<AgentResponse> {
        if request.is_null() {
            return Err(EngineError::InvalidRequest("request is required".into()));
        }
        let request: AgentRequest = serde_json::from_value(request)
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        self.request(&request).await
    }

    /// Registers `agent` under its id, replacing any agent already there.
    /// Returns true if an existing registration was replaced.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) -> bool {
        let info = AgentInfo::of(agent.as_ref());
        let replaced = self.agents.insert(info.id.clone(), agent).is_some();
        if replaced {
            tracing::warn!(target: "korbux::dispatch", agent_id = %info.id, "agent registration replaced");
        } else {
            tracing::info!(target: "korbux::dispatch", agent_id = %info.id, version = %info.version, "agent registered");
        }
        self.audit(
            AuditEntry::new(serde_json::json!({
                "action": "register_agent",
                "agentId": info.id,
                "name": info.name,
                "version": info.version,
                "replaced": replaced,
            }))
            .module("registry"),
        );
        replaced
    }

    /// Registry snapshot, sorted by id.
    pub fn list_agents(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> = self
            .agents
            .iter()
            .map(|entry| AgentInfo::of(entry.value().as_ref()))
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Installs `plugin` unless one with the same id is already installed.
    /// Returns false for the no-op case.
    pub fn use_plugin(&self, plugin: &dyn Plugin) -> EngineResult<bool> {
        let id = plugin.id().to_string();
        if self.plugins.contains_key(&id) {
            tracing::debug!(target: "korbux::plugin", plugin = %id, "plugin already installed");
            return Ok(false);
        }
        plugin.install(self).map_err(|source| EngineError::Plugin {
            id: id.clone(),
            source,
        })?;
        self.plugins.insert(id.clone(), plugin.version().to_string());
        tracing::info!(target: "korbux::plugin", plugin = %id, version = plugin.version(), "plugin installed");
        self.audit(
            AuditEntry::new(serde_json::json!({
                "action": "use_plugin",
                "pluginId": id,
                "version": plugin.version(),
            }))
            .module("registry"),
        );
        Ok(true)
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Applies `update` to a copy of the config, validates it and swaps it in.
    /// Records a `config_changed` audit event naming the changed fields, if any.
    ///
    /// `schema_version` is owned by [`Engine::migrate_schema`] and cannot change here.
    pub fn update_config<F>(&self, update: F) -> EngineResult<Vec<String>>
    where
        F: FnOnce(&mut EngineConfig),
    {
        let changed = {
            let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
            let mut after = guard.clone();
            update(&mut after);
            if after.schema_version != guard.schema_version {
                return Err(EngineError::InvalidConfig(
                    "schema_version changes only through migrate_schema".into(),
                ));
            }
            after.validate()?;

            let changed = changed_fields(&guard, &after)?;
            if changed.is_empty() {
                return Ok(changed);
            }
            *guard = after;
            changed
        };
        tracing::info!(target: "korbux::dispatch", fields = ?changed, "config changed");
        self.audit(
            AuditEntry::new(serde_json::json!({
                "action": "config_changed",
                "fields": changed,
            }))
            .kind(AuditType::Info),
        );
        Ok(changed)
    }

    pub fn set_max_chars(&self, max_chars: usize) -> EngineResult<()> {
        self.update_config(|c| c.max_chars = max_chars).map(|_| ())
    }

    /// Disabling takes effect before the change is recorded, so it leaves no audit trace.
    pub fn set_audit_enabled(&self, enabled: bool) -> EngineResult<()> {
        self.update_config(|c| c.audit_enabled = enabled).map(|_| ())
    }

    pub fn set_default_lang(&self, lang: impl Into<String>) -> EngineResult<()> {
        let lang = lang.into();
        self.update_config(|c| c.default_lang = lang).map(|_| ())
    }

    pub fn set_shard_max_bytes(&self, max_bytes: u64) -> EngineResult<()> {
        self.update_config(|c| c.shard_max_bytes = max_bytes).map(|_| ())
    }

    /// Records an audit event through the engine's recorder.
    pub fn audit(&self, entry: AuditEntry) -> Option<AuditEvent> {
        self.audit.audit(entry)
    }

    /// Recorder for audit queries.
    pub fn audit_log(&self) -> &AuditRecorder {
        &self.audit
    }

    pub fn config(&self) -> EngineConfig {
        self.config_snapshot()
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn shards(&self) -> &ShardManager {
        &self.shards
    }

    /// New receiver on the channel of swallowed failures.
    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    fn config_snapshot(&self) -> EngineConfig {
        match self.config.read() {
            Ok(c) => c.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Finalize stage: enforce the output limit and stamp pipeline metadata.
fn finalize(
    request: &AgentRequest,
    response: &mut AgentResponse,
    config: &EngineConfig,
    input_truncated: bool,
    started: Instant,
) -> EngineResult<()> {
    if !response.agent_id.is_empty() && response.agent_id != request.agent_id {
        return Err(EngineError::InvalidResponse {
            agent_id: request.agent_id.clone(),
            reason: format!("response claims agent '{}'", response.agent_id),
        });
    }
    if response.id.is_empty() {
        response.id = uuid::Uuid::new_v4().to_string();
    }
    if response.agent_id.is_empty() {
        response.agent_id = request.agent_id.clone();
    }
    if response.user_id.is_empty() {
        response.user_id = request.user_id.clone();
    }
    if response.timestamp.is_empty() {
        response.timestamp = util::now_timestamp();
    }
    if response.lang.is_empty() {
        response.lang = request
            .lang
            .clone()
            .unwrap_or_else(|| config.default_lang.clone());
    }
    if response.level.is_empty() {
        response.level = request
            .level
            .clone()
            .unwrap_or_else(|| config.default_level.clone());
    }

    let (output, output_truncated) = util::truncate(&response.output, config.max_chars);
    response.output = output;
    response.meta.truncated |= input_truncated || output_truncated;
    response.meta.schema_version = config.schema_version;
    response.meta.bytes = Some(response.output.len());
    response.meta.duration_ms = started.elapsed().as_millis() as u64;
    if response.meta.seed == 0 {
        response.meta.seed = util::seed_from_str(&request.input);
    }
    response.meta.shard = None;
    Ok(())
}

/// Writes `response` into a `responses` shard, stamps `meta.shard` and rewrites the
/// direct `resp:{id}` record with the stamped copy.
///
/// `existing` pins the record to a shard it already lives in; otherwise the active
/// shard is used.
pub(crate) fn store_in_shard(
    shards: &ShardManager,
    storage: &dyn StorageAdapter,
    mut response: AgentResponse,
    existing: Option<String>,
) -> Result<AgentResponse, StorageError> {
    let shard = match existing {
        Some(shard) => shard,
        None => shards.ensure_shard_for_write(ShardKind::Responses)?,
    };
    response.meta.shard = Some(shard.clone());
    let bytes = serde_json::to_vec(&response)?;
    storage.best_effort_set(
        &shards.record_key(ShardKind::Responses, &shard, &response.id),
        &bytes,
    )?;
    storage.best_effort_set(&response_key(&response.id), &bytes)?;
    tracing::debug!(
        target: "korbux::shard",
        response_id = %response.id,
        shard = %shard,
        "response sharded"
    );
    Ok(response)
}

fn changed_fields(before: &EngineConfig, after: &EngineConfig) -> EngineResult<Vec<String>> {
    let as_map = |c: &EngineConfig| match serde_json::to_value(c) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Ok(serde_json::Map::new()),
        Err(e) => Err(EngineError::InvalidConfig(e.to_string())),
    };
    let before = as_map(before)?;
    let after = as_map(after)?;
    Ok(after
        .iter()
        .filter(|(k, v)| before.get(k.as_str()) != Some(v))
        .map(|(k, _)| k.clone())
        .collect())
}
