//! Core data models used throughout Sheets.
//!
//! These types cross the HTTP boundary, so their serde shapes are part
//! of the public contract (`githubToken`, `type`, flattened metadata).

use serde::{Deserialize, Serialize};

/// Metadata stored next to every rules file (`file:{path}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Content length in characters.
    pub size: u64,
    /// ISO8601 timestamp of the last write.
    pub modified: String,
}

/// A rules file as listed from the store, without its content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub modified: String,
}

/// A persisted, generated markdown report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: String, // ISO8601
    pub updated_at: String, // ISO8601
}

/// Request body for `POST /api/sheets/save`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSheet {
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Session stored under `auth:{token}` after a successful GitHub login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(rename = "githubToken")]
    pub github_token: String,
}

impl UserSession {
    /// Key used for per-user rows and context entries.
    pub fn user_id(&self) -> String {
        self.id.to_string()
    }

    /// The session as shown to the browser: the GitHub token stays server-side.
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            login: self.login.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub login: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// One entry of `GET /api/context`: the path plus whatever metadata was
/// stored with the upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextFile {
    pub path: String,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}
