//! GitHub repository analysis behind `POST /api/analyze-repo` and
//! `sheets analyze`.
//!
//! The repository is named either as `owner/name` or as a GitHub URL.
//! Three GitHub API calls run concurrently:
//!
//! | Call | Used for | On failure |
//! |------|----------|------------|
//! | `GET /repos/{o}/{n}` | name, description, language, stars, forks | request fails |
//! | `GET /repos/{o}/{n}/readme` (raw) | first 3000 characters | section omitted |
//! | `GET /repos/{o}/{n}/git/trees/HEAD?recursive=1` | first 50 file paths | section omitted |
//!
//! The snapshot is turned into a prompt ending with the directive for the
//! requested [`AnalysisType`], then streamed through the completion relay
//! with [`ANALYSIS_SYSTEM_PROMPT`].

use anyhow::Context;
use axum::http::header;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use sheets_core::SheetsError;

use crate::auth::GITHUB_TIMEOUT;
use crate::config::{Config, GithubConfig};
use crate::fetch::{read_body_prefix, truncate_chars};
use crate::relay::{build_http_client, CompletionClient};

pub const README_MAX_CHARS: usize = 3000;
pub const MAX_TREE_FILES: usize = 50;

pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are an expert code analyst creating beautiful, \
comprehensive markdown sheets for developers. Focus on actionable insights, patterns, and \
practical recommendations. Use emojis, clear headings, and excellent formatting.";

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub repo: String,
    #[serde(default, rename = "analysisType")]
    pub analysis_type: Option<String>,
}

/// What the analysis should focus on. Unknown names fall back to `Overview`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisType {
    #[default]
    Overview,
    Security,
    Patterns,
    Improvements,
    Learning,
    Comparison,
}

impl AnalysisType {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "security" => Self::Security,
            "patterns" => Self::Patterns,
            "improvements" => Self::Improvements,
            "learning" => Self::Learning,
            "comparison" => Self::Comparison,
            _ => Self::Overview,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overview => "overview",
            Self::Security => "security",
            Self::Patterns => "patterns",
            Self::Improvements => "improvements",
            Self::Learning => "learning",
            Self::Comparison => "comparison",
        }
    }

    pub fn directive(self) -> &'static str {
        match self {
            Self::Overview => {
                "Provide a comprehensive overview including architecture, tech stack, and key features."
            }
            Self::Security => {
                "Conduct a security audit focusing on vulnerabilities, best practices, and recommendations."
            }
            Self::Patterns => {
                "Identify design patterns, architectural patterns, and coding best practices used."
            }
            Self::Improvements => {
                "Suggest specific improvements for code quality, performance, and maintainability."
            }
            Self::Learning => "Extract key learning points and create a study guide for developers.",
            Self::Comparison => {
                "Compare this repository with modern best practices and suggest modernization strategies."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

/// Parse `owner/name`, `github.com/owner/name`, or a full GitHub URL.
///
/// Anything after the second path segment (`/tree/main`, `/issues`) is
/// ignored and a trailing `.git` is dropped.
pub fn parse_repo(input: &str, github_host: &str) -> Result<RepoRef, SheetsError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SheetsError::validation("Repository is required"));
    }
    let invalid = || SheetsError::validation("Invalid repository format");

    let path = if input.starts_with("http://") || input.starts_with("https://") {
        let url = Url::parse(input).map_err(|_| invalid())?;
        let host = url.host_str().unwrap_or_default();
        if host != github_host && host.strip_prefix("www.") != Some(github_host) {
            return Err(invalid());
        }
        url.path().to_string()
    } else {
        let bare = input.strip_prefix("www.").unwrap_or(input);
        bare.strip_prefix(github_host)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(bare)
            .to_string()
    };

    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let (Some(owner), Some(name)) = (segments.next(), segments.next()) else {
        return Err(invalid());
    };
    let name = name.strip_suffix(".git").unwrap_or(name);
    if name.is_empty() || owner.chars().chain(name.chars()).any(char::is_whitespace) {
        return Err(invalid());
    }

    Ok(RepoRef {
        owner: owner.to_string(),
        name: name.to_string(),
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoInfo {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
}

#[derive(Debug, Deserialize)]
struct GitTree {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Everything the analysis prompt is built from.
#[derive(Debug, Clone, Default)]
pub struct RepoSnapshot {
    pub info: RepoInfo,
    pub readme: Option<String>,
    /// Blob paths, at most [`MAX_TREE_FILES`].
    pub files: Vec<String>,
}

/// Build the user message for one analysis.
pub fn build_analysis_prompt(snapshot: &RepoSnapshot, kind: AnalysisType) -> String {
    let info = &snapshot.info;
    let mut prompt = format!("# Repository Analysis: {}\n\n", info.full_name);
    prompt.push_str(&format!(
        "Description: {}\n",
        info.description.as_deref().unwrap_or("No description")
    ));
    prompt.push_str(&format!(
        "Language: {}\n",
        info.language.as_deref().unwrap_or("Unknown")
    ));
    prompt.push_str(&format!(
        "Stars: {} | Forks: {}\n\n",
        info.stargazers_count, info.forks_count
    ));

    if let Some(readme) = &snapshot.readme {
        prompt.push_str(&format!(
            "## README Content\n{}...\n\n",
            truncate_chars(readme, README_MAX_CHARS)
        ));
    }

    if !snapshot.files.is_empty() {
        prompt.push_str("## File Structure\n");
        for path in snapshot.files.iter().take(MAX_TREE_FILES) {
            prompt.push_str(&format!("- {}\n", path));
        }
    }

    prompt.push_str(&format!("\n\nAnalysis Type: {}\n", kind.as_str()));
    prompt.push_str(kind.directive());
    prompt.push_str(
        "\n\nGenerate a beautiful, comprehensive markdown sheet with emojis, clear sections, and actionable insights.",
    );
    prompt
}

/// Read-only GitHub API client for repository snapshots.
#[derive(Clone)]
pub struct RepoAnalyzer {
    http: reqwest::Client,
    config: GithubConfig,
}

impl RepoAnalyzer {
    pub fn new(http: reqwest::Client, config: GithubConfig) -> Self {
        Self { http, config }
    }

    /// Fetch repository info, README, and file tree concurrently.
    ///
    /// `token` is the caller's GitHub access token, if signed in; private
    /// repositories are only visible with it.
    pub async fn snapshot(
        &self,
        repo: &RepoRef,
        token: Option<&str>,
    ) -> Result<RepoSnapshot, SheetsError> {
        let base = format!("/repos/{}/{}", repo.owner, repo.name);
        let (info, readme, files) = tokio::join!(
            self.repo_info(&base, token),
            self.readme(&base, token),
            self.tree(&base, token),
        );

        let info = info?;
        debug!(
            repo = %info.full_name,
            readme = readme.is_some(),
            files = files.len(),
            "repository snapshot"
        );
        Ok(RepoSnapshot {
            info,
            readme,
            files,
        })
    }

    async fn repo_info(&self, base: &str, token: Option<&str>) -> Result<RepoInfo, SheetsError> {
        let upstream = |e: reqwest::Error| SheetsError::UpstreamConnect(e.to_string());
        let response = self
            .get(base, token, "application/vnd.github+json")
            .await
            .map_err(upstream)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SheetsError::not_found("Repository not found"));
        }
        if !status.is_success() {
            return Err(SheetsError::UpstreamConnect(format!(
                "GitHub returned {}",
                status
            )));
        }
        response.json().await.map_err(upstream)
    }

    async fn readme(&self, base: &str, token: Option<&str>) -> Option<String> {
        let path = format!("{}/readme", base);
        let response = match self.get(&path, token, "application/vnd.github.raw+json").await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(status = %response.status(), "no readme");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "readme fetch failed");
                return None;
            }
        };

        match read_body_prefix(response, README_MAX_CHARS * 4).await {
            Ok(bytes) => Some(
                truncate_chars(&String::from_utf8_lossy(&bytes), README_MAX_CHARS).to_string(),
            ),
            Err(e) => {
                warn!(error = %e, "readme read failed");
                None
            }
        }
    }

    async fn tree(&self, base: &str, token: Option<&str>) -> Vec<String> {
        let path = format!("{}/git/trees/HEAD?recursive=1", base);
        let tree: GitTree = match self.get(&path, token, "application/vnd.github+json").await {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(tree) => tree,
                Err(e) => {
                    warn!(error = %e, "tree response unreadable");
                    return Vec::new();
                }
            },
            Ok(response) => {
                debug!(status = %response.status(), "no tree");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "tree fetch failed");
                return Vec::new();
            }
        };

        tree.tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| entry.path)
            .take(MAX_TREE_FILES)
            .collect()
    }

    async fn get(
        &self,
        path: &str,
        token: Option<&str>,
        accept: &str,
    ) -> reqwest::Result<reqwest::Response> {
        let mut request = self
            .http
            .get(format!("{}{}", self.config.api_base.trim_end_matches('/'), path))
            .header(header::ACCEPT, accept)
            .timeout(GITHUB_TIMEOUT);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("token {}", token));
        }
        request.send().await
    }
}

/// CLI entry point: analyze a repository and stream the sheet to stdout.
pub async fn run_analyze(config: &Config, repo: &str, kind: AnalysisType) -> anyhow::Result<()> {
    let repo = parse_repo(repo, &config.fetch.github_host)?;
    let http = build_http_client()?;
    let analyzer = RepoAnalyzer::new(http.clone(), config.github.clone());
    let client = CompletionClient::new(http, config.upstream.clone());

    let snapshot = analyzer.snapshot(&repo, None).await?;
    let prompt = build_analysis_prompt(&snapshot, kind);
    info!(repo = %snapshot.info.full_name, kind = kind.as_str(), "analyzing repository");

    let mut deltas = client.open_with_system(ANALYSIS_SYSTEM_PROMPT, &prompt).await?;
    let mut stdout = tokio::io::stdout();
    while let Some(delta) = deltas.next().await {
        stdout
            .write_all(delta.as_bytes())
            .await
            .context("Failed to write to stdout")?;
        stdout.flush().await?;
    }
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
