//! Shared fixtures for engine integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use korbux_core::{
    Agent, AgentContext, AgentRequest, AgentResponse, BoxError, Engine, EngineConfig,
    MemoryStorage, StorageAdapter, StorageError,
};

/// Replies with `echo: {input}`.
pub struct Echo;

#[async_trait::async_trait]
impl Agent for Echo {
    fn id(&self) -> &str {
        "echo"
    }

    fn name(&self) -> &str {
        "Echo"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn handle(
        &self,
        request: &AgentRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResponse, BoxError> {
        Ok(ctx.response_for(request, format!("echo: {}", request.input)))
    }
}

/// Memory store that counts writes to the `meta` key.
#[derive(Default)]
pub struct CountingStorage {
    inner: MemoryStorage,
    meta_writes: AtomicUsize,
}

impl CountingStorage {
    pub fn meta_writes(&self) -> usize {
        self.meta_writes.load(Ordering::SeqCst)
    }

    fn count(&self, key: &str) {
        if key == korbux_core::META_KEY {
            self.meta_writes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl StorageAdapter for CountingStorage {
    fn name(&self) -> &str {
        "counting"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.count(key);
        self.inner.set(key, value)
    }

    fn atomic_set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.count(key);
        self.inner.atomic_set(key, value)
    }

    fn supports_atomic(&self) -> bool {
        true
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list_keys(prefix)
    }
}

/// Store whose writes always fail; reads see nothing.
pub struct BrokenStorage;

impl StorageAdapter for BrokenStorage {
    fn name(&self) -> &str {
        "broken"
    }

    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::Backend("disk full".into()))
    }
}

pub fn echo_engine(config: EngineConfig) -> (Arc<MemoryStorage>, Engine) {
    let storage = Arc::new(MemoryStorage::new());
    let engine = Engine::new(config, storage.clone()).unwrap();
    engine.register_agent(Arc::new(Echo));
    (storage, engine)
}
