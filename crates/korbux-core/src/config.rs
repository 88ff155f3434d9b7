//! Engine configuration. Load from TOML or env.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Config handle shared by the engine, shard manager and audit recorder.
pub type SharedConfig = Arc<RwLock<EngineConfig>>;

const ENV_CONFIG_PATH: &str = "KORBUX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/engine";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum characters of request input and response output.
    pub max_chars: usize,
    pub default_lang: String,
    pub default_level: String,
    pub audit_enabled: bool,
    /// Estimated bytes after which the active shard rolls over.
    pub shard_max_bytes: u64,
    pub schema_version: u32,
    /// One of `development`, `staging`, `production`.
    pub environment: String,
    pub license: String,
    /// Namespace prepended to sharded record keys.
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,
    /// Directory of the durable store used by hosts (sled).
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    #[serde(default = "default_supported_languages")]
    pub supported_languages: Vec<String>,
}

fn default_storage_prefix() -> String {
    "korbux:".to_string()
}

fn default_storage_path() -> String {
    "./data/korbux".to_string()
}

fn default_supported_languages() -> Vec<String> {
    ["es", "en", "fr", "de", "pt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chars: 4000,
            default_lang: "es".to_string(),
            default_level: "basic".to_string(),
            audit_enabled: true,
            shard_max_bytes: 5 * 1024 * 1024,
            schema_version: 1,
            environment: "development".to_string(),
            license: "MIT".to_string(),
            storage_prefix: default_storage_prefix(),
            storage_path: default_storage_path(),
            supported_languages: default_supported_languages(),
        }
    }
}

impl EngineConfig {
    /// Load config from file and environment. Precedence: env `KORBUX_*` > `KORBUX_CONFIG` path
    /// (default `config/engine`) > defaults.
    pub fn load() -> Result<Self, EngineError> {
        let config_path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let defaults = Self::default();
        let builder = ::config::Config::builder()
            .set_default("max_chars", defaults.max_chars as i64)?
            .set_default("default_lang", defaults.default_lang)?
            .set_default("default_level", defaults.default_level)?
            .set_default("audit_enabled", defaults.audit_enabled)?
            .set_default("shard_max_bytes", defaults.shard_max_bytes as i64)?
            .set_default("schema_version", defaults.schema_version as i64)?
            .set_default("environment", defaults.environment)?
            .set_default("license", defaults.license)?
            .set_default("storage_prefix", defaults.storage_prefix)?
            .set_default("storage_path", defaults.storage_path)?;

        let path = Path::new(&config_path);
        let builder = builder.add_source(::config::File::from(path).required(false));

        let built = builder
            .add_source(
                ::config::Environment::with_prefix("KORBUX")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("supported_languages")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_chars == 0 {
            return Err(EngineError::InvalidConfig("max_chars must be > 0".into()));
        }
        if self.shard_max_bytes == 0 {
            return Err(EngineError::InvalidConfig(
                "shard_max_bytes must be > 0".into(),
            ));
        }
        if self.default_lang.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "default_lang must not be empty".into(),
            ));
        }
        if self.storage_prefix.is_empty() {
            return Err(EngineError::InvalidConfig(
                "storage_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}
