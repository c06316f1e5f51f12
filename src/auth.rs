//! Bearer sessions and the GitHub OAuth flow.
//!
//! # Flow
//!
//! 1. `GET /api/github/auth` stores `oauth:{state}` (10 minutes) and returns
//!    the GitHub authorize URL.
//! 2. GitHub redirects to `/api/github/callback?code&state`. The state must
//!    still be pending; the code is exchanged for an access token and the
//!    GitHub profile is fetched.
//! 3. A random session token is stored under `auth:{token}` (30 days) and
//!    the browser is redirected to `{app_url}?token=…`.
//!
//! Later requests send `Authorization: Bearer {token}`. Expired sessions
//! read as absent. There is no revocation endpoint.

use std::time::Duration;

use axum::http::{header, HeaderMap};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use sheets_core::models::UserSession;
use sheets_core::store::{get_json, keys, KvStore, PutOptions};
use sheets_core::SheetsError;

use crate::config::GithubConfig;

pub const SESSION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const OAUTH_STATE_TTL: Duration = Duration::from_secs(10 * 60);
const PENDING: &str = "pending";
pub(crate) const GITHUB_TIMEOUT: Duration = Duration::from_secs(15);

/// The token from an `Authorization: Bearer …` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The session for the request, if it carries a live token.
pub async fn current_session(
    store: &dyn KvStore,
    headers: &HeaderMap,
) -> Result<Option<UserSession>, SheetsError> {
    match bearer_token(headers) {
        Some(token) => Ok(get_json(store, &keys::auth(token)).await?),
        None => Ok(None),
    }
}

pub async fn require_session(
    store: &dyn KvStore,
    headers: &HeaderMap,
) -> Result<UserSession, SheetsError> {
    current_session(store, headers)
        .await?
        .ok_or(SheetsError::Unauthorized)
}

/// Persist a session and return its fresh token.
pub async fn create_session(
    store: &dyn KvStore,
    session: &UserSession,
) -> Result<String, SheetsError> {
    let token = Uuid::new_v4().to_string();
    let value = serde_json::to_string(session).map_err(anyhow::Error::from)?;
    store
        .put(&keys::auth(&token), &value, PutOptions::with_ttl(SESSION_TTL))
        .await?;
    Ok(token)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
}

/// GitHub OAuth client bound to the app's public URL.
#[derive(Clone)]
pub struct GithubOAuth {
    http: reqwest::Client,
    config: GithubConfig,
    app_url: String,
}

impl GithubOAuth {
    pub fn new(http: reqwest::Client, config: GithubConfig, app_url: String) -> Self {
        Self {
            http,
            config,
            app_url,
        }
    }

    fn redirect_uri(&self) -> String {
        format!("{}/api/github/callback", self.app_url.trim_end_matches('/'))
    }

    /// `{app_url}?{key}={value}`.
    fn app_redirect(&self, key: &str, value: &str) -> String {
        match Url::parse(&self.app_url) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair(key, value);
                url.to_string()
            }
            Err(_) => format!("{}?{}={}", self.app_url, key, value),
        }
    }

    /// Start a login: record a pending state and return the authorize URL.
    pub async fn begin(&self, store: &dyn KvStore) -> Result<String, SheetsError> {
        if self.config.client_id.is_empty() {
            return Err(SheetsError::validation("GitHub OAuth is not configured"));
        }

        let state = Uuid::new_v4().to_string();
        store
            .put(&keys::oauth(&state), PENDING, PutOptions::with_ttl(OAUTH_STATE_TTL))
            .await?;

        let mut url = Url::parse(&format!(
            "{}/login/oauth/authorize",
            self.config.oauth_base.trim_end_matches('/')
        ))
        .map_err(|e| SheetsError::validation(format!("github.oauth_base: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.redirect_uri())
            .append_pair("scope", &self.config.scope)
            .append_pair("state", &state);

        Ok(url.to_string())
    }

    /// Finish a login. Always yields a redirect target; only storage
    /// failures are errors.
    pub async fn complete(
        &self,
        store: &dyn KvStore,
        code: Option<&str>,
        state: Option<&str>,
    ) -> Result<String, SheetsError> {
        let Some(state) = state.filter(|s| !s.is_empty()) else {
            return Ok(self.app_redirect("error", "invalid_state"));
        };
        if store.get(&keys::oauth(state)).await?.as_deref() != Some(PENDING) {
            warn!("oauth callback with unknown or expired state");
            return Ok(self.app_redirect("error", "invalid_state"));
        }
        store.delete(&keys::oauth(state)).await?;

        let Some(code) = code.filter(|c| !c.is_empty()) else {
            return Ok(self.app_redirect("error", "oauth_failed"));
        };

        let session = match self.exchange(code).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "oauth exchange failed");
                return Ok(self.app_redirect("error", "oauth_failed"));
            }
        };

        let token = create_session(store, &session).await?;
        info!(login = %session.login, "github login");
        Ok(self.app_redirect("token", &token))
    }

    /// Trade the code for an access token, then load the GitHub profile.
    async fn exchange(&self, code: &str) -> anyhow::Result<UserSession> {
        let secret = self.config.client_secret().ok_or_else(|| {
            anyhow::anyhow!("{} is not set", self.config.client_secret_env)
        })?;

        let token: TokenResponse = self
            .http
            .post(format!(
                "{}/login/oauth/access_token",
                self.config.oauth_base.trim_end_matches('/')
            ))
            .header(header::ACCEPT, "application/json")
            .timeout(GITHUB_TIMEOUT)
            .json(&serde_json::json!({
                "client_id": self.config.client_id,
                "client_secret": secret,
                "code": code,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let access_token = match (token.access_token, token.error) {
            (Some(t), _) => t,
            (None, Some(e)) => anyhow::bail!("token exchange rejected: {}", e),
            (None, None) => anyhow::bail!("token exchange returned no token"),
        };

        let user: GithubUser = self
            .api_get("/user", &access_token)
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(UserSession {
            id: user.id,
            login: user.login,
            name: user.name,
            avatar: user.avatar_url,
            github_token: access_token,
        })
    }

    /// The user's repositories, most recently updated first.
    pub async fn repos(&self, session: &UserSession) -> Result<serde_json::Value, SheetsError> {
        let upstream = |e: reqwest::Error| SheetsError::UpstreamConnect(e.to_string());
        let response = self
            .api_get("/user/repos?per_page=100&sort=updated", &session.github_token)
            .await
            .map_err(upstream)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SheetsError::UpstreamConnect(format!(
                "GitHub returned {}",
                status
            )));
        }
        response.json().await.map_err(upstream)
    }

    async fn api_get(&self, path: &str, token: &str) -> reqwest::Result<reqwest::Response> {
        self.http
            .get(format!("{}{}", self.config.api_base.trim_end_matches('/'), path))
            .header(header::AUTHORIZATION, format!("token {}", token))
            .header(header::ACCEPT, "application/vnd.github+json")
            .timeout(GITHUB_TIMEOUT)
            .send()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use sheets_core::store::memory::InMemoryKv;

    fn oauth() -> GithubOAuth {
        GithubOAuth::new(
            reqwest::Client::new(),
            GithubConfig {
                client_id: "cid".into(),
                ..GithubConfig::default()
            },
            "http://app.local".into(),
        )
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let kv = InMemoryKv::new();
        let session = UserSession {
            id: 42,
            login: "octo".into(),
            name: None,
            avatar: None,
            github_token: "gho".into(),
        };
        let token = create_session(&kv, &session).await.unwrap();

        let found = require_session(&kv, &headers(&format!("Bearer {}", token)))
            .await
            .unwrap();
        assert_eq!(found, session);
        assert!(matches!(
            require_session(&kv, &headers("Bearer wrong")).await,
            Err(SheetsError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_begin_records_state() {
        let kv = InMemoryKv::new();
        let auth_url = oauth().begin(&kv).await.unwrap();
        let url = Url::parse(&auth_url).unwrap();
        assert_eq!(url.path(), "/login/oauth/authorize");

        let pairs: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "cid");
        assert_eq!(pairs["scope"], "repo,user");
        assert_eq!(pairs["redirect_uri"], "http://app.local/api/github/callback");
        let state = &pairs["state"];
        assert_eq!(
            kv.get(&keys::oauth(state)).await.unwrap().as_deref(),
            Some("pending")
        );
    }

    #[tokio::test]
    async fn test_unknown_state_redirects_with_error() {
        let kv = InMemoryKv::new();
        let target = oauth().complete(&kv, Some("code"), Some("bogus")).await.unwrap();
        assert_eq!(target, "http://app.local/?error=invalid_state");
    }

    #[tokio::test]
    async fn test_state_is_single_use() {
        let kv = InMemoryKv::new();
        kv.put("oauth:s1", "pending", PutOptions::default()).await.unwrap();
        // No client secret configured, so the exchange fails after the
        // state has been consumed.
        let client = GithubOAuth::new(
            reqwest::Client::new(),
            GithubConfig {
                client_id: "cid".into(),
                client_secret_env: "SHEETS_TEST_UNSET_SECRET".into(),
                ..GithubConfig::default()
            },
            "http://app.local".into(),
        );
        let first = client.complete(&kv, Some("c"), Some("s1")).await.unwrap();
        assert_eq!(first, "http://app.local/?error=oauth_failed");
        let second = client.complete(&kv, Some("c"), Some("s1")).await.unwrap();
        assert_eq!(second, "http://app.local/?error=invalid_state");
    }
}
