use thiserror::Error;

/// Error type returned by agents, plugins and migration hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend '{backend}' does not support {capability}")]
    Unsupported {
        backend: String,
        capability: &'static str,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Agent not registered: {0}")]
    AgentNotRegistered(String),

    /// Failure raised by an agent's `handle`; passed through untouched.
    #[error(transparent)]
    Agent(BoxError),

    #[error("Invalid response from agent '{agent_id}': {reason}")]
    InvalidResponse { agent_id: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Migration {from} -> {to} failed: {reason}")]
    Migration { from: u32, to: u32, reason: String },

    #[error("Refusing schema downgrade from {from} to {to}")]
    Downgrade { from: u32, to: u32 },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Config load error: {0}")]
    ConfigLoad(#[from] ::config::ConfigError),

    #[error("Plugin '{id}' failed to install: {source}")]
    Plugin {
        id: String,
        #[source]
        source: BoxError,
    },

    #[error("Import parse error: {0}")]
    ImportParse(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
