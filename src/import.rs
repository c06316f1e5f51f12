//! Bulk import of a local directory into rules files.
//!
//! Walks `root`, applies include/exclude globs to paths relative to it,
//! and writes each UTF-8 file to `file:{prefix}{relative_path}`.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use sheets_core::store::KvStore;

use crate::rules::write_file;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// Prepended to every stored path, e.g. `"team/"`.
    pub prefix: String,
    pub follow_symlinks: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            include_globs: vec!["**/*".to_string()],
            exclude_globs: Vec::new(),
            prefix: String::new(),
            follow_symlinks: false,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ImportReport {
    pub imported: Vec<String>,
    /// Files that matched but could not be read as UTF-8.
    pub skipped: Vec<String>,
}

/// Matching files under `root` as `(relative path, absolute path)`, sorted.
pub fn scan_directory(root: &Path, options: &ImportOptions) -> Result<Vec<(String, PathBuf)>> {
    if !root.is_dir() {
        bail!("Import root is not a directory: {}", root.display());
    }

    let include_set = build_globset(&options.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(options.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(options.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((rel_str, path.to_path_buf()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

pub async fn import_directory(
    store: &dyn KvStore,
    root: &Path,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for (relative, path) in scan_directory(root, options)? {
        let stored = format!("{}{}", options.prefix, relative);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                write_file(store, &stored, &content).await?;
                debug!(path = %stored, "imported");
                report.imported.push(stored);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                report.skipped.push(stored);
            }
        }
    }

    Ok(report)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheets_core::store::memory::InMemoryKv;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_applies_globs() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "docs/a.md", b"a");
        write(tmp.path(), "docs/b.txt", b"b");
        write(tmp.path(), ".git/config", b"x");
        write(tmp.path(), "drafts/c.md", b"c");

        let options = ImportOptions {
            include_globs: vec!["**/*.md".into()],
            exclude_globs: vec!["drafts/**".into()],
            ..ImportOptions::default()
        };
        let files = scan_directory(tmp.path(), &options).unwrap();
        let names: Vec<&str> = files.iter().map(|(rel, _)| rel.as_str()).collect();
        assert_eq!(names, vec!["docs/a.md"]);
    }

    #[tokio::test]
    async fn test_import_with_prefix_skips_binary() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "style.md", b"use tabs");
        write(tmp.path(), "logo.bin", &[0xff, 0xfe, 0x00]);

        let kv = InMemoryKv::new();
        let options = ImportOptions {
            prefix: "team/".into(),
            ..ImportOptions::default()
        };
        let report = import_directory(&kv, tmp.path(), &options).await.unwrap();
        assert_eq!(report.imported, vec!["team/style.md"]);
        assert_eq!(report.skipped, vec!["team/logo.bin"]);
        assert_eq!(
            kv.get("file:team/style.md").await.unwrap().as_deref(),
            Some("use tabs")
        );
    }

    #[test]
    fn test_missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_directory(&tmp.path().join("nope"), &ImportOptions::default()).is_err());
    }
}
