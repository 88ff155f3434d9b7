//! Shard assignment for the append-only `responses` and `audit` streams.
//!
//! A shard id embeds its UTC year-month bucket: `{kind}_{YYYY-MM}` for the first
//! shard of a month and `{kind}_{YYYY-MM}_{n}` for size rollovers inside that month.
//! Record keys are `{storage_prefix}{kind}:{shard}:{record_id}`.
//!
//! Usage is estimated as key count × [`ESTIMATED_RECORD_BYTES`], not measured.

use crate::config::SharedConfig;
use crate::error::{EngineError, EngineResult, StorageError};
use crate::shared::{ShardKind, ShardMeta, META_KEY};
use crate::storage::{StorageAdapter, StorageExt};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Assumed size of one stored record when estimating shard usage.
pub const ESTIMATED_RECORD_BYTES: u64 = 2048;

pub struct ShardManager {
    storage: Arc<dyn StorageAdapter>,
    config: SharedConfig,
    /// Guards every load -> decide -> append -> persist cycle on the meta record.
    meta_lock: Mutex<()>,
}

impl ShardManager {
    pub fn new(storage: Arc<dyn StorageAdapter>, config: SharedConfig) -> Self {
        Self {
            storage,
            config,
            meta_lock: Mutex::new(()),
        }
    }

    fn storage_prefix(&self) -> String {
        self.config
            .read()
            .map(|c| c.storage_prefix.clone())
            .unwrap_or_default()
    }

    fn shard_max_bytes(&self) -> u64 {
        self.config.read().map(|c| c.shard_max_bytes).unwrap_or(u64::MAX)
    }

    fn configured_schema_version(&self) -> u32 {
        self.config.read().map(|c| c.schema_version).unwrap_or(0)
    }

    /// Stored meta, or a fresh one at the configured schema version.
    pub fn load_meta(&self) -> Result<ShardMeta, StorageError> {
        Ok(self
            .storage
            .get_json::<ShardMeta>(META_KEY)?
            .unwrap_or_else(|| ShardMeta::new(self.configured_schema_version())))
    }

    /// `{prefix}{kind}:`, the prefix every record of that kind lives under.
    pub fn kind_prefix(&self, kind: ShardKind) -> String {
        format!("{}{}:", self.storage_prefix(), kind)
    }

    pub fn shard_prefix(&self, kind: ShardKind, shard: &str) -> String {
        format!("{}{}:", self.kind_prefix(kind), shard)
    }

    pub fn record_key(&self, kind: ShardKind, shard: &str, record_id: &str) -> String {
        format!("{}{}", self.shard_prefix(kind, shard), record_id)
    }

    /// Estimated bytes held by `shard`. Zero when the backend cannot list keys.
    pub fn estimate_usage(&self, kind: ShardKind, shard: &str) -> Result<u64, StorageError> {
        match self.storage.list_keys(&self.shard_prefix(kind, shard)) {
            Ok(keys) => Ok(keys.len() as u64 * ESTIMATED_RECORD_BYTES),
            Err(StorageError::Unsupported { .. }) => {
                tracing::debug!(
                    target: "korbux::shard",
                    backend = self.storage.name(),
                    "backend cannot list keys; shard usage treated as empty"
                );
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Shard the next record of `kind` belongs to, rolling over when needed.
    pub fn ensure_shard_for_write(&self, kind: ShardKind) -> Result<String, StorageError> {
        self.ensure_shard_for_write_at(kind, Utc::now())
    }

    pub fn ensure_shard_for_write_at(
        &self,
        kind: ShardKind,
        now: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        let _guard = self.meta_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut meta = self.load_meta()?;
        let bucket = now.format("%Y-%m").to_string();

        if let Some(latest) = meta.shards(kind).last() {
            if shard_bucket(kind, latest) == Some(bucket.as_str()) {
                let usage = self.estimate_usage(kind, latest)?;
                if usage < self.shard_max_bytes() {
                    return Ok(latest.clone());
                }
                tracing::info!(
                    target: "korbux::shard",
                    kind = %kind,
                    shard = %latest,
                    usage,
                    "shard full, rolling over"
                );
            }
        }

        let new_shard = next_shard_id(kind, &bucket, meta.shards(kind));
        meta.shards_mut(kind).push(new_shard.clone());
        self.storage.atomic_set_json(META_KEY, &meta)?;
        tracing::info!(
            target: "korbux::shard",
            kind = %kind,
            shard = %new_shard,
            total = meta.shards(kind).len(),
            "opened shard"
        );
        Ok(new_shard)
    }

    /// Writes a record into the active shard of `kind` and returns that shard id.
    pub fn write_record(
        &self,
        kind: ShardKind,
        record_id: &str,
        value: &[u8],
    ) -> Result<String, StorageError> {
        let shard = self.ensure_shard_for_write(kind)?;
        let key = self.record_key(kind, &shard, record_id);
        self.storage.best_effort_set(&key, value)?;
        tracing::debug!(
            target: "korbux::shard",
            key = %key,
            bytes = value.len(),
            "record written"
        );
        Ok(shard)
    }

    /// Persists a new schema version in the meta record; returns the previous one.
    /// The stored version never decreases.
    pub fn set_schema_version(&self, version: u32) -> EngineResult<u32> {
        let _guard = self.meta_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut meta = self.load_meta()?;
        let previous = meta.schema_version;
        if version < previous {
            return Err(EngineError::Downgrade {
                from: previous,
                to: version,
            });
        }
        meta.schema_version = version;
        self.storage.atomic_set_json(META_KEY, &meta)?;
        Ok(previous)
    }

    /// Keys of every stored record of `kind`, across all shards.
    pub fn record_keys(&self, kind: ShardKind) -> Result<Vec<String>, StorageError> {
        self.storage.list_keys(&self.kind_prefix(kind))
    }
}

/// Year-month bucket embedded in a shard id, if it has one.
fn shard_bucket<'a>(kind: ShardKind, shard: &'a str) -> Option<&'a str> {
    let rest = shard.strip_prefix(kind.as_str())?.strip_prefix('_')?;
    rest.get(..7)
}

fn next_shard_id(kind: ShardKind, bucket: &str, existing: &[String]) -> String {
    let base = format!("{}_{}", kind, bucket);
    let in_bucket = existing
        .iter()
        .filter(|s| shard_bucket(kind, s) == Some(bucket))
        .count();
    let mut n = in_bucket + 1;
    loop {
        let candidate = if n == 1 {
            base.clone()
        } else {
            format!("{}_{}", base, n)
        };
        if !existing.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
