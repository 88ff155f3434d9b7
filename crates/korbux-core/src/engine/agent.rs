//! Agent and plugin contracts, and the context handed to an agent for one call.

use super::Engine;
use crate::audit::AuditRecorder;
use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::error::BoxError;
use crate::shared::{AgentRequest, AgentResponse, AuditEntry, AuditEvent, ResponseMeta};
use crate::storage::StorageAdapter;
use crate::util;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A pluggable request handler, routed to by its `id`.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Descriptive tags. The dispatcher does not enforce them.
    fn capabilities(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Produces a response for an already-truncated request.
    async fn handle(
        &self,
        request: &AgentRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResponse, BoxError>;
}

/// Installs agents (or anything else) into an engine. Installed at most once per id.
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    fn version(&self) -> &str;

    fn install(&self, engine: &Engine) -> Result<(), BoxError>;
}

/// Registry snapshot entry returned by [`Engine::list_agents`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub capabilities: Vec<String>,
}

impl AgentInfo {
    pub(crate) fn of(agent: &dyn Agent) -> Self {
        Self {
            id: agent.id().to_string(),
            name: agent.name().to_string(),
            version: agent.version().to_string(),
            capabilities: agent.capabilities().into_iter().collect(),
        }
    }
}

/// What an agent may touch while handling one request.
pub struct AgentContext {
    config: EngineConfig,
    storage: Arc<dyn StorageAdapter>,
    bus: Arc<EventBus>,
    audit: Arc<AuditRecorder>,
}

impl AgentContext {
    pub(crate) fn new(
        config: EngineConfig,
        storage: Arc<dyn StorageAdapter>,
        bus: Arc<EventBus>,
        audit: Arc<AuditRecorder>,
    ) -> Self {
        Self {
            config,
            storage,
            bus,
            audit,
        }
    }

    /// Config as it was when the request started.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &dyn StorageAdapter {
        self.storage.as_ref()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn audit(&self, entry: AuditEntry) -> Option<AuditEvent> {
        self.audit.audit(entry)
    }

    pub fn seed_from_str(&self, input: &str) -> u32 {
        util::seed_from_str(input)
    }

    pub fn truncate(&self, text: &str, max_chars: usize) -> (String, bool) {
        util::truncate(text, max_chars)
    }

    pub fn now(&self) -> String {
        util::now_timestamp()
    }

    pub fn sanitize(&self, input: &str) -> String {
        util::sanitize(input)
    }

    /// A response to `request` carrying `output`, with a fresh id, the request's
    /// language and level (or the configured defaults) and a seed derived from the input.
    pub fn response_for(&self, request: &AgentRequest, output: impl Into<String>) -> AgentResponse {
        AgentResponse {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: request.agent_id.clone(),
            user_id: request.user_id.clone(),
            timestamp: self.now(),
            lang: request
                .lang
                .clone()
                .unwrap_or_else(|| self.config.default_lang.clone()),
            level: request
                .level
                .clone()
                .unwrap_or_else(|| self.config.default_level.clone()),
            output: output.into(),
            meta: ResponseMeta {
                seed: util::seed_from_str(&request.input),
                ..Default::default()
            },
        }
    }
}
