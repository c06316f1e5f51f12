//! Saved sheets: generated reports persisted per user in SQLite.

use anyhow::Context;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use sheets_core::models::{NewSheet, Sheet};
use sheets_core::SheetsError;

/// Listings return at most this many sheets, newest first.
pub const LIST_LIMIT: i64 = 50;

pub async fn list_sheets(pool: &SqlitePool, user_id: &str) -> Result<Vec<Sheet>, SheetsError> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, title, content, metadata, created_at, updated_at
        FROM sheets
        WHERE user_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(LIST_LIMIT)
    .fetch_all(pool)
    .await
    .context("Failed to list sheets")?;

    Ok(rows.iter().map(sheet_from_row).collect())
}

/// Insert a new sheet owned by `user_id` and return its id.
pub async fn save_sheet(
    pool: &SqlitePool,
    user_id: &str,
    sheet: &NewSheet,
) -> Result<String, SheetsError> {
    if sheet.content.trim().is_empty() {
        return Err(SheetsError::validation("content is required"));
    }

    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp_millis();
    let metadata = sheet
        .metadata
        .clone()
        .unwrap_or_else(|| serde_json::json!({}));

    sqlx::query(
        r#"
        INSERT INTO sheets (id, user_id, title, content, metadata, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(user_id)
    .bind(&sheet.title)
    .bind(&sheet.content)
    .bind(metadata.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to save sheet")?;

    Ok(id)
}

/// Fetch one sheet by id. Sheets are readable by anyone holding the id.
pub async fn get_sheet(pool: &SqlitePool, id: &str) -> Result<Sheet, SheetsError> {
    let row = sqlx::query(
        "SELECT id, user_id, title, content, metadata, created_at, updated_at FROM sheets WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to load sheet")?;

    row.as_ref()
        .map(sheet_from_row)
        .ok_or_else(|| SheetsError::not_found("Sheet not found"))
}

fn sheet_from_row(row: &SqliteRow) -> Sheet {
    let metadata: String = row.get("metadata");
    Sheet {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        content: row.get("content"),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::json!({})),
        created_at: format_ts_iso(row.get("created_at")),
        updated_at: format_ts_iso(row.get("updated_at")),
    }
}

fn format_ts_iso(ts_millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_millis)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| ts_millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn test_pool(tmp: &TempDir) -> SqlitePool {
        let cfg = Config::from_toml(&format!(
            "[db]\npath = \"{}\"\n[server]\nbind = \"127.0.0.1:0\"\n",
            tmp.path().join("sheets.sqlite").display()
        ))
        .unwrap();
        let pool = db::connect(&cfg).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        pool
    }

    fn new_sheet(title: &str) -> NewSheet {
        NewSheet {
            title: title.to_string(),
            content: format!("# {}", title),
            metadata: Some(serde_json::json!({ "prompt": "p" })),
        }
    }

    #[tokio::test]
    async fn test_save_then_get() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;

        let id = save_sheet(&pool, "42", &new_sheet("Report")).await.unwrap();
        let sheet = get_sheet(&pool, &id).await.unwrap();
        assert_eq!(sheet.user_id, "42");
        assert_eq!(sheet.content, "# Report");
        assert_eq!(sheet.metadata["prompt"], "p");
        assert!(sheet.created_at.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_missing_sheet_not_found() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        let err = get_sheet(&pool, "nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Sheet not found");
    }

    #[tokio::test]
    async fn test_list_newest_first_per_user() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;

        save_sheet(&pool, "42", &new_sheet("first")).await.unwrap();
        save_sheet(&pool, "42", &new_sheet("second")).await.unwrap();
        save_sheet(&pool, "7", &new_sheet("other")).await.unwrap();

        let sheets = list_sheets(&pool, "42").await.unwrap();
        let titles: Vec<&str> = sheets.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        let sheet = NewSheet {
            title: String::new(),
            content: " ".into(),
            metadata: None,
        };
        assert!(matches!(
            save_sheet(&pool, "42", &sheet).await,
            Err(SheetsError::Validation(_))
        ));
    }
}
