//! In-memory [`KvStore`] implementation for tests and ephemeral runs.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock`, so listings come back in
//! key order like the SQLite backend. Expiry is checked lazily on read.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Instant;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{KvKey, KvStore, PutOptions};

struct StoredValue {
    value: String,
    metadata: Option<serde_json::Value>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
pub struct InMemoryKv {
    entries: RwLock<BTreeMap<String, StoredValue>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory kv lock poisoned")
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.value.clone()))
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                metadata: options.metadata,
                expires_at: options.ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvKey>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let now = Instant::now();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, v)| v.is_live(now))
            .map(|(k, v)| KvKey {
                name: k.clone(),
                metadata: v.metadata.clone(),
            })
            .collect())
    }
}
