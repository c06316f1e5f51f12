//! TOML configuration.
//!
//! Secrets never live in the file: `[upstream].api_key_env` and
//! `[github].client_secret_env` name environment variables that are read
//! when the value is needed.
//!
//! ```toml
//! [db]
//! path = "./data/sheets.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:8787"
//! app_url = "http://127.0.0.1:8787"
//!
//! [upstream]
//! model = "moonshotai/kimi-k2"
//!
//! [github]
//! client_id = "Iv1.0123456789abcdef"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub generate: GenerateConfig,
    #[serde(default)]
    pub github: GithubConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Public URL of the browser app; OAuth redirects land here.
    #[serde(default = "default_app_url")]
    pub app_url: String,
}

fn default_app_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

/// The streaming chat-completions API the relay talks to.
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Bound on waiting for response headers and on each idle gap between chunks.
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_referer")]
    pub referer: String,
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_upstream_timeout(),
            referer: default_referer(),
            title: default_title(),
        }
    }
}

fn default_upstream_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_model() -> String {
    "moonshotai/kimi-k2".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    8000
}
fn default_upstream_timeout() -> u64 {
    60
}
fn default_referer() -> String {
    "https://sheets.dev".to_string()
}
fn default_title() -> String {
    "Sheets Developer Tool".to_string()
}

/// Remote content fetching for URLs embedded in prompts.
#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Non-GitHub bodies are cut to this many characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_readme_branch")]
    pub readme_branch: String,
    #[serde(default = "default_github_host")]
    pub github_host: String,
    #[serde(default = "default_raw_base")]
    pub raw_base: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_chars: default_max_chars(),
            readme_branch: default_readme_branch(),
            github_host: default_github_host(),
            raw_base: default_raw_base(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    15
}
fn default_max_chars() -> usize {
    5000
}
fn default_readme_branch() -> String {
    "main".to_string()
}
fn default_github_host() -> String {
    "github.com".to_string()
}
fn default_raw_base() -> String {
    "https://raw.githubusercontent.com".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GenerateConfig {
    /// Reject prompts without at least one URL.
    #[serde(default)]
    pub require_url: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_oauth_base")]
    pub oauth_base: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret_env: default_client_secret_env(),
            scope: default_scope(),
            oauth_base: default_oauth_base(),
            api_base: default_api_base(),
        }
    }
}

fn default_client_secret_env() -> String {
    "GITHUB_CLIENT_SECRET".to_string()
}
fn default_scope() -> String {
    "repo,user".to_string()
}
fn default_oauth_base() -> String {
    "https://github.com".to_string()
}
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

impl UpstreamConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl GithubConfig {
    pub fn client_secret(&self) -> Option<String> {
        std::env::var(&self.client_secret_env)
            .ok()
            .filter(|s| !s.is_empty())
    }
}

impl Config {
    /// Parse and validate a config from TOML text.
    pub fn from_toml(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.fetch.max_chars == 0 {
            anyhow::bail!("fetch.max_chars must be > 0");
        }

        if self.fetch.timeout_secs == 0 || self.upstream.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be > 0");
        }

        if self.upstream.max_tokens == 0 {
            anyhow::bail!("upstream.max_tokens must be > 0");
        }

        if !(0.0..=2.0).contains(&self.upstream.temperature) {
            anyhow::bail!("upstream.temperature must be in [0.0, 2.0]");
        }

        if self.fetch.readme_branch.trim().is_empty() {
            anyhow::bail!("fetch.readme_branch must not be empty");
        }

        url::Url::parse(&self.upstream.base_url)
            .with_context(|| format!("upstream.base_url is not a URL: {}", self.upstream.base_url))?;
        url::Url::parse(&self.server.app_url)
            .with_context(|| format!("server.app_url is not a URL: {}", self.server.app_url))?;

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "/tmp/sheets.sqlite"

[server]
bind = "127.0.0.1:8787"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.upstream.model, "moonshotai/kimi-k2");
        assert_eq!(cfg.upstream.max_tokens, 8000);
        assert_eq!(cfg.fetch.max_chars, 5000);
        assert_eq!(cfg.fetch.readme_branch, "main");
        assert_eq!(cfg.fetch.raw_base, "https://raw.githubusercontent.com");
        assert!(!cfg.generate.require_url);
        assert_eq!(cfg.github.scope, "repo,user");
        assert_eq!(
            cfg.upstream.completions_url(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = Config::from_toml(include_str!("../config/sheets.example.toml")).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:8787");
        assert_eq!(cfg.github.client_secret_env, "GITHUB_CLIENT_SECRET");
    }

    #[test]
    fn test_rejects_zero_max_chars() {
        let content = format!("{}\n[fetch]\nmax_chars = 0\n", MINIMAL);
        let err = Config::from_toml(&content).unwrap_err();
        assert!(err.to_string().contains("max_chars"));
    }

    #[test]
    fn test_rejects_out_of_range_temperature() {
        let content = format!("{}\n[upstream]\ntemperature = 3.5\n", MINIMAL);
        assert!(Config::from_toml(&content).is_err());
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let content = format!(
            "{}\n[upstream]\nbase_url = \"http://127.0.0.1:9000/v1/\"\n",
            MINIMAL
        );
        let cfg = Config::from_toml(&content).unwrap();
        assert_eq!(
            cfg.upstream.completions_url(),
            "http://127.0.0.1:9000/v1/chat/completions"
        );
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
