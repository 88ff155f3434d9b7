//! korbux-core: agent execution engine (dispatch, event bus, sharded response and audit log).
//!
//! Hosts supply a [`StorageAdapter`] and register [`Agent`]s; the engine validates and
//! truncates requests, invokes the agent, and records every response and administrative
//! action in append-only month/size shards.

mod audit;
mod bus;
mod config;
mod diagnostics;
mod engine;
mod error;
mod shard;
mod shared;
mod storage;
mod util;

pub use audit::{AuditRecorder, AuditSummary};
pub use bus::{
    EventBus, EventHandler, EventPayload, SubscriptionId, AUDIT_EVENT, ENGINE_READY_EVENT,
    RESPONSE_EVENT,
};
pub use config::{EngineConfig, SharedConfig};
pub use diagnostics::{Diagnostic, DiagnosticSink, DiagnosticSource};
pub use engine::{
    Agent, AgentContext, AgentInfo, Engine, HealthReport, HealthStatus, MigrationHook, Plugin,
};
pub use error::{BoxError, EngineError, EngineResult, StorageError};
pub use shard::{ShardManager, ESTIMATED_RECORD_BYTES};
pub use shared::{
    response_key, AgentRequest, AgentResponse, AuditEntry, AuditEvent, AuditLevel, AuditType,
    ResponseMeta, ShardKind, ShardMeta, META_KEY, RESPONSE_KEY_PREFIX,
};
pub use storage::{FileStorage, MemoryStorage, SledStorage, StorageAdapter, StorageExt};
pub use util::{now_timestamp, sanitize, seed_from_str, truncate};
