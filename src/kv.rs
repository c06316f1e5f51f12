//! SQLite-backed [`KvStore`] implementation.
//!
//! All entries live in the single `kv` table. Expiry is stored as a unix
//! timestamp in milliseconds and enforced at read time; expired rows are
//! physically removed by [`SqliteKv::purge_expired`].

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use sheets_core::store::{KvKey, KvStore, PutOptions};

use crate::config::Config;
use crate::{db, migrate};

pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Delete rows whose expiry has passed. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn parse_metadata(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<()> {
        let metadata_json = match &options.metadata {
            Some(meta) => Some(serde_json::to_string(meta)?),
            None => None,
        };
        let expires_at = options
            .ttl
            .map(|ttl| now_millis() + ttl.as_millis() as i64);

        sqlx::query(
            r#"
            INSERT INTO kv (key, value, metadata_json, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                metadata_json = excluded.metadata_json,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(metadata_json)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvKey>> {
        // substr() instead of LIKE: paths routinely contain `_` and `%`.
        let rows = sqlx::query(
            r#"
            SELECT key, metadata_json FROM kv
            WHERE substr(key, 1, length(?)) = ?
              AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY key ASC
            "#,
        )
        .bind(prefix)
        .bind(prefix)
        .bind(now_millis())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| KvKey {
                name: row.get("key"),
                metadata: parse_metadata(row.get("metadata_json")),
            })
            .collect())
    }
}
