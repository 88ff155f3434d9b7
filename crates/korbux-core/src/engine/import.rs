//! Bulk export and re-import of stored responses.

use super::{store_in_shard, Engine};
use crate::diagnostics::DiagnosticSource;
use crate::error::{EngineError, EngineResult};
use crate::shared::{response_key, AgentResponse, AuditEntry, ShardKind, RESPONSE_KEY_PREFIX};
use crate::storage::{StorageAdapter, StorageExt};
use std::collections::HashSet;

impl Engine {
    /// Every response reachable under `resp:`, ordered by timestamp.
    pub fn export_responses(&self) -> EngineResult<Vec<AgentResponse>> {
        let mut responses = Vec::new();
        for key in self.storage.list_keys(RESPONSE_KEY_PREFIX)? {
            match self.storage.get_json::<AgentResponse>(&key) {
                Ok(Some(resp)) => responses.push(resp),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    target: "korbux::import",
                    key = %key,
                    error = %e,
                    "skipping unreadable response record"
                ),
            }
        }
        responses.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(responses)
    }

    /// Loads response records and returns how many were added.
    ///
    /// Records without a usable id, and ids already seen earlier in this batch, are
    /// skipped. Ids already in the store are overwritten in the shard they already
    /// occupy; new ids go to the active shard.
    pub fn import_responses(&self, batch: Vec<serde_json::Value>) -> usize {
        let total = batch.len();
        let mut seen = HashSet::new();
        let mut added = 0;

        for record in batch {
            let response: AgentResponse = match serde_json::from_value(record) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(target: "korbux::import", error = %e, "skipping malformed record");
                    continue;
                }
            };
            if response.id.is_empty() || !seen.insert(response.id.clone()) {
                continue;
            }

            let id = response.id.clone();
            let existing = self.current_shard_of(&id);
            match store_in_shard(&self.shards, self.storage.as_ref(), response, existing) {
                Ok(_) => added += 1,
                Err(e) => self.diagnostics.report(
                    DiagnosticSource::Storage,
                    id,
                    format!("import write failed: {}", e),
                ),
            }
        }

        tracing::info!(target: "korbux::import", total, added, "import finished");
        self.audit(
            AuditEntry::new(serde_json::json!({
                "action": "import_responses",
                "received": total,
                "added": added,
            }))
            .module("import"),
        );
        added
    }

    /// Shard already holding response `id` in this store, if it is a known shard.
    fn current_shard_of(&self, id: &str) -> Option<String> {
        let stored = match self.storage.get_json::<AgentResponse>(&response_key(id)) {
            Ok(stored) => stored?,
            Err(e) => {
                tracing::debug!(target: "korbux::import", id, error = %e, "existing record unreadable");
                return None;
            }
        };
        let shard = stored.meta.shard?;
        let meta = self.shards.load_meta().ok()?;
        meta.shards(ShardKind::Responses)
            .contains(&shard)
            .then_some(shard)
    }

    /// [`Engine::import_responses`] over a JSON array, as written by an export.
    pub fn import_responses_json(&self, json: &str) -> EngineResult<usize> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        match value {
            serde_json::Value::Array(records) => Ok(self.import_responses(records)),
            _ => Err(EngineError::InvalidRequest(
                "import expects a JSON array of responses".into(),
            )),
        }
    }
}
