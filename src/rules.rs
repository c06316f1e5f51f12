//! Rules files: shared context entries stored under `file:{path}`.
//!
//! Every write records `{size, modified}` metadata next to the content so
//! listings never have to read file bodies.

use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use tracing::info;

use sheets_core::extract::partial_tag;
use sheets_core::models::{FileEntry, FileMeta};
use sheets_core::store::{keys, KvStore, PutOptions};
use sheets_core::tree::{build_file_tree, TreeNode};
use sheets_core::SheetsError;

use crate::config::Config;
use crate::import::{import_directory, ImportOptions};
use crate::kv::SqliteKv;

pub const AUTOCOMPLETE_LIMIT: usize = 10;

fn check_path(path: &str) -> Result<&str, SheetsError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(SheetsError::validation("path is required"));
    }
    Ok(path)
}

/// All rules files in key order. Entries without readable metadata
/// report size 0 and the current time.
pub async fn list_files(store: &dyn KvStore) -> Result<Vec<FileEntry>, SheetsError> {
    let entries = store.list(keys::FILE_PREFIX).await?;
    Ok(entries
        .into_iter()
        .map(|key| {
            let meta: Option<FileMeta> = key
                .metadata
                .and_then(|m| serde_json::from_value(m).ok());
            let (size, modified) = match meta {
                Some(m) => (m.size, m.modified),
                None => (0, Utc::now().to_rfc3339()),
            };
            FileEntry {
                path: key.name[keys::FILE_PREFIX.len()..].to_string(),
                size,
                modified,
            }
        })
        .collect())
}

pub async fn rules_tree(store: &dyn KvStore) -> Result<TreeNode, SheetsError> {
    Ok(build_file_tree(&list_files(store).await?))
}

pub async fn read_file(store: &dyn KvStore, path: &str) -> Result<String, SheetsError> {
    let path = check_path(path)?;
    store
        .get(&keys::file(path))
        .await?
        .ok_or_else(|| SheetsError::not_found("File not found"))
}

/// Create or overwrite a rules file.
pub async fn write_file(
    store: &dyn KvStore,
    path: &str,
    content: &str,
) -> Result<FileMeta, SheetsError> {
    let path = check_path(path)?;
    let meta = FileMeta {
        size: content.chars().count() as u64,
        modified: Utc::now().to_rfc3339(),
    };
    let metadata = serde_json::to_value(&meta).map_err(anyhow::Error::from)?;

    store
        .put(&keys::file(path), content, PutOptions::with_metadata(metadata))
        .await?;
    info!(path, size = meta.size, "rules file written");
    Ok(meta)
}

pub async fn delete_file(store: &dyn KvStore, path: &str) -> Result<(), SheetsError> {
    let path = check_path(path)?;
    store.delete(&keys::file(path)).await?;
    info!(path, "rules file deleted");
    Ok(())
}

/// Up to [`AUTOCOMPLETE_LIMIT`] paths containing `query`, ignoring case.
///
/// When `query` ends in a tag being typed (`"see #src/ma"`), only the tag
/// text is matched. An empty query matches everything.
pub async fn autocomplete(store: &dyn KvStore, query: &str) -> Result<Vec<String>, SheetsError> {
    let needle = partial_tag(query).unwrap_or(query).to_lowercase();
    let entries = store.list(keys::FILE_PREFIX).await?;
    Ok(entries
        .into_iter()
        .map(|key| key.name[keys::FILE_PREFIX.len()..].to_string())
        .filter(|path| path.to_lowercase().contains(&needle))
        .take(AUTOCOMPLETE_LIMIT)
        .collect())
}

// ============ CLI entry points ============

pub async fn run_list(config: &Config) -> anyhow::Result<()> {
    let store = SqliteKv::open(config).await?;
    let files = list_files(&store).await?;

    if files.is_empty() {
        println!("No rules files.");
        return Ok(());
    }

    println!("{:<48} {:>8}  MODIFIED", "PATH", "SIZE");
    for file in &files {
        println!("{:<48} {:>8}  {}", file.path, file.size, file.modified);
    }
    println!();
    println!("{} file(s)", files.len());
    Ok(())
}

pub async fn run_put(config: &Config, file: &Path, path: Option<String>) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let path = match path {
        Some(p) => p,
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive a path from {}", file.display()))?,
    };

    let store = SqliteKv::open(config).await?;
    let meta = write_file(&store, &path, &content).await?;
    println!("Stored {} ({} chars)", path, meta.size);
    Ok(())
}

pub async fn run_cat(config: &Config, path: &str) -> anyhow::Result<()> {
    let store = SqliteKv::open(config).await?;
    let content = read_file(&store, path).await?;
    print!("{}", content);
    Ok(())
}

pub async fn run_rm(config: &Config, path: &str) -> anyhow::Result<()> {
    let store = SqliteKv::open(config).await?;
    delete_file(&store, path).await?;
    println!("Deleted {}", path);
    Ok(())
}

pub async fn run_import(config: &Config, root: &Path, options: &ImportOptions) -> anyhow::Result<()> {
    let store = SqliteKv::open(config).await?;
    let report = import_directory(&store, root, options).await?;

    for path in &report.imported {
        println!("  + {}", path);
    }
    for path in &report.skipped {
        println!("  ! {} (not UTF-8, skipped)", path);
    }
    println!();
    println!(
        "Imported {} file(s), skipped {}",
        report.imported.len(),
        report.skipped.len()
    );
    Ok(())
}
