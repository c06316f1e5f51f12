//! Key-value storage abstraction for Sheets.
//!
//! The [`KvStore`] trait covers everything the relay, the rules page,
//! and the session layer need from a flat key-value store: point reads
//! and writes with optional metadata and expiry, deletes, and prefix
//! listings. Backends: [`memory::InMemoryKv`] here, and the SQLite
//! backend in the application crate.
//!
//! Reads distinguish "absent" (`Ok(None)`) from "the store failed"
//! (`Err`), so callers can decide what a miss means for them.
//!
//! # Key layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `file:{path}` | rules file content, metadata `{size, modified}` |
//! | `context:{user}:{path}` | per-user context content |
//! | `context:{user}:{path}:meta` | JSON metadata for the entry above |
//! | `auth:{token}` | session JSON, 30-day expiry |
//! | `oauth:{state}` | `pending`, 10-minute expiry |

pub mod memory;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Options for [`KvStore::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub metadata: Option<serde_json::Value>,
    /// Entry becomes invisible once this much time has passed.
    pub ttl: Option<Duration>,
}

impl PutOptions {
    pub fn with_metadata(metadata: serde_json::Value) -> Self {
        Self {
            metadata: Some(metadata),
            ttl: None,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            metadata: None,
            ttl: Some(ttl),
        }
    }
}

/// A key returned by [`KvStore::list`], with its metadata but not its value.
#[derive(Debug, Clone, PartialEq)]
pub struct KvKey {
    pub name: String,
    pub metadata: Option<serde_json::Value>,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite a value.
    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<()>;

    /// Remove a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All live keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<KvKey>>;
}

/// Read and deserialize a JSON value.
///
/// A value that exists but does not parse is reported as an error, not
/// as a miss.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Key builders for the layout described in the module docs.
pub mod keys {
    pub const FILE_PREFIX: &str = "file:";

    pub fn file(path: &str) -> String {
        format!("{}{}", FILE_PREFIX, path)
    }

    pub fn context_prefix(user_id: &str) -> String {
        format!("context:{}:", user_id)
    }

    pub fn context(user_id: &str, path: &str) -> String {
        format!("context:{}:{}", user_id, path)
    }

    pub fn context_meta(user_id: &str, path: &str) -> String {
        format!("context:{}:{}:meta", user_id, path)
    }

    pub fn auth(token: &str) -> String {
        format!("auth:{}", token)
    }

    pub fn oauth(state: &str) -> String {
        format!("oauth:{}", state)
    }
}
