//! Context loading for tagged prompts, and per-user context entries.
//!
//! A `#path` tag resolves to stored text. For an authenticated request the
//! user's own entry (`context:{user}:{path}`) shadows the shared rules
//! file (`file:{path}`). Lookups run concurrently; the returned blocks
//! keep the order of the input paths.

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::warn;

use sheets_core::compose::{BlockOrigin, ContentBlock};
use sheets_core::models::ContextFile;
use sheets_core::store::{get_json, keys, KvStore, PutOptions};
use sheets_core::SheetsError;

/// Resolve every path to a block. Misses are dropped; store failures
/// become inline error blocks for that path.
pub async fn load_context(
    store: &dyn KvStore,
    paths: &[String],
    user_id: Option<&str>,
) -> Vec<ContentBlock> {
    let lookups = paths.iter().map(|path| async move {
        match lookup(store, path, user_id).await {
            Ok(Some(body)) => Some(ContentBlock::new(BlockOrigin::File(path.clone()), body)),
            Ok(None) => None,
            Err(e) => {
                warn!(path = %path, error = %e, "context lookup failed");
                Some(ContentBlock::fetch_error(BlockOrigin::File(path.clone()), e))
            }
        }
    });

    join_all(lookups).await.into_iter().flatten().collect()
}

async fn lookup(
    store: &dyn KvStore,
    path: &str,
    user_id: Option<&str>,
) -> Result<Option<String>, SheetsError> {
    if let Some(uid) = user_id {
        if let Some(body) = store.get(&keys::context(uid, path)).await? {
            return Ok(Some(body));
        }
    }
    Ok(store.get(&keys::file(path)).await?)
}

/// Context entries owned by `user_id`, with their upload metadata.
pub async fn list_user_context(
    store: &dyn KvStore,
    user_id: &str,
) -> Result<Vec<ContextFile>, SheetsError> {
    let prefix = keys::context_prefix(user_id);
    let mut files = Vec::new();

    for key in store.list(&prefix).await? {
        if key.name.ends_with(":meta") {
            continue;
        }
        let path = key.name[prefix.len()..].to_string();
        let metadata: Map<String, Value> = get_json(store, &keys::context_meta(user_id, &path))
            .await?
            .unwrap_or_default();
        files.push(ContextFile { path, metadata });
    }

    Ok(files)
}

/// Store a context entry for `user_id`. Caller-supplied metadata is kept
/// and extended with `uploadedAt` and `size`.
pub async fn upload_user_context(
    store: &dyn KvStore,
    user_id: &str,
    path: &str,
    content: &str,
    metadata: Option<Map<String, Value>>,
) -> Result<(), SheetsError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(SheetsError::validation("path is required"));
    }
    if path.ends_with(":meta") {
        return Err(SheetsError::validation("path must not end with :meta"));
    }

    let mut meta = metadata.unwrap_or_default();
    meta.insert(
        "uploadedAt".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    meta.insert("size".to_string(), Value::from(content.chars().count()));

    store
        .put(&keys::context(user_id, path), content, PutOptions::default())
        .await?;
    store
        .put(
            &keys::context_meta(user_id, path),
            &serde_json::to_string(&meta).map_err(anyhow::Error::from)?,
            PutOptions::default(),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sheets_core::store::memory::InMemoryKv;
    use sheets_core::store::KvKey;
    use std::time::Duration;

    /// Delays reads in reverse alphabetical order and fails on `broken`.
    struct SlowKv {
        inner: InMemoryKv,
    }

    #[async_trait]
    impl KvStore for SlowKv {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            if key.contains("broken") {
                anyhow::bail!("connection reset");
            }
            let delay = if key.ends_with("a.md") { 40 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, value: &str, options: PutOptions) -> anyhow::Result<()> {
            self.inner.put(key, value, options).await
        }
        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.inner.delete(key).await
        }
        async fn list(&self, prefix: &str) -> anyhow::Result<Vec<KvKey>> {
            self.inner.list(prefix).await
        }
    }

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_order_follows_input_not_latency() {
        let kv = SlowKv {
            inner: InMemoryKv::new(),
        };
        kv.put("file:a.md", "first", PutOptions::default()).await.unwrap();
        kv.put("file:b.md", "second", PutOptions::default()).await.unwrap();

        let blocks = load_context(&kv, &paths(&["a.md", "missing.md", "b.md"]), None).await;
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].origin, BlockOrigin::File("a.md".into()));
        assert_eq!(blocks[0].body, "first");
        assert_eq!(blocks[1].body, "second");
    }

    #[tokio::test]
    async fn test_store_failure_is_inline() {
        let kv = SlowKv {
            inner: InMemoryKv::new(),
        };
        let blocks = load_context(&kv, &paths(&["broken.md"]), None).await;
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].body.starts_with("Error fetching:"));
        assert!(blocks[0].body.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_user_entry_shadows_shared_file() {
        let kv = InMemoryKv::new();
        kv.put("file:style.md", "shared", PutOptions::default()).await.unwrap();
        kv.put("context:42:style.md", "mine", PutOptions::default())
            .await
            .unwrap();

        let anon = load_context(&kv, &paths(&["style.md"]), None).await;
        assert_eq!(anon[0].body, "shared");
        let authed = load_context(&kv, &paths(&["style.md"]), Some("42")).await;
        assert_eq!(authed[0].body, "mine");
        let other = load_context(&kv, &paths(&["style.md"]), Some("7")).await;
        assert_eq!(other[0].body, "shared");
    }

    #[tokio::test]
    async fn test_upload_and_list_user_context() {
        let kv = InMemoryKv::new();
        let mut meta = Map::new();
        meta.insert("source".into(), Value::from("paste"));
        upload_user_context(&kv, "42", "notes/a.md", "héllo", Some(meta))
            .await
            .unwrap();
        upload_user_context(&kv, "7", "other.md", "x", None).await.unwrap();

        let files = list_user_context(&kv, "42").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "notes/a.md");
        assert_eq!(files[0].metadata["size"], 5);
        assert_eq!(files[0].metadata["source"], "paste");
        assert!(files[0].metadata.contains_key("uploadedAt"));
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_path() {
        let kv = InMemoryKv::new();
        let err = upload_user_context(&kv, "42", "  ", "x", None).await.unwrap_err();
        assert!(matches!(err, SheetsError::Validation(_)));
    }
}
