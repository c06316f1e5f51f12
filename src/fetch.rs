//! Remote content fetching for URLs found in prompts.
//!
//! GitHub web URLs are rewritten to their raw-content equivalents so the
//! model sees source text rather than rendered HTML:
//!
//! | Input | Fetched |
//! |-------|---------|
//! | `https://github.com/o/r/blob/main/x/y.py` | `{raw_base}/o/r/main/x/y.py` |
//! | `https://github.com/o/r` | `{raw_base}/o/r/{readme_branch}/README.md` |
//! | anything else | the URL itself, truncated to `max_chars` characters |
//!
//! Every URL yields exactly one block. Failures are rendered inline and
//! never abort the remaining fetches.

use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use tracing::{debug, warn};
use url::Url;

use sheets_core::compose::{BlockOrigin, ContentBlock};
use sheets_core::SheetsError;

use crate::config::FetchConfig;

/// What a prompt URL resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum UrlTarget {
    GithubFile { raw_url: String, file_path: String },
    GithubRepo {
        owner: String,
        repo: String,
        readme_url: String,
    },
    Direct(String),
}

/// Classify `url` according to the GitHub rewriting rules.
pub fn resolve_url(url: &str, config: &FetchConfig) -> UrlTarget {
    let Ok(parsed) = Url::parse(url) else {
        return UrlTarget::Direct(url.to_string());
    };
    let host = parsed.host_str().unwrap_or_default();
    let is_github = host == config.github_host
        || host.strip_prefix("www.") == Some(config.github_host.as_str());
    if !is_github {
        return UrlTarget::Direct(url.to_string());
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    let raw_base = config.raw_base.trim_end_matches('/');

    match segments.as_slice() {
        [owner, repo] => {
            let repo = repo.strip_suffix(".git").unwrap_or(*repo);
            UrlTarget::GithubRepo {
                owner: owner.to_string(),
                repo: repo.to_string(),
                readme_url: format!(
                    "{}/{}/{}/{}/README.md",
                    raw_base, owner, repo, config.readme_branch
                ),
            }
        }
        [owner, repo, "blob", branch, path @ ..] if !path.is_empty() => {
            let file_path = path.join("/");
            UrlTarget::GithubFile {
                raw_url: format!("{}/{}/{}/{}/{}", raw_base, owner, repo, branch, file_path),
                file_path,
            }
        }
        _ => UrlTarget::Direct(url.to_string()),
    }
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Read at most `limit` bytes of a response body, then drop the rest.
///
/// Dropping the response closes the connection, so a large or endless
/// body costs no more than `limit` bytes.
pub async fn read_body_prefix(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, reqwest::Error> {
    let mut body = response.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let room = limit - buf.len();
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if buf.len() >= limit {
            break;
        }
    }
    Ok(buf)
}

/// Concurrent URL fetcher sharing one HTTP client.
#[derive(Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(http: reqwest::Client, config: FetchConfig) -> Self {
        Self { http, config }
    }

    /// Fetch every URL concurrently. Output order equals input order.
    pub async fn fetch_all(&self, urls: &[String]) -> Vec<ContentBlock> {
        join_all(urls.iter().map(|url| self.fetch_one(url))).await
    }

    pub async fn fetch_one(&self, url: &str) -> ContentBlock {
        let target = resolve_url(url, &self.config);
        debug!(url, ?target, "fetching");

        match &target {
            UrlTarget::GithubFile { raw_url, file_path } => {
                match self.get_text(raw_url, None).await {
                    Ok((true, body)) => {
                        ContentBlock::new(BlockOrigin::GithubFile(file_path.clone()), body)
                    }
                    Ok((false, _)) => ContentBlock::unavailable(url),
                    Err(e) => self.inline_error(BlockOrigin::GithubUrl(url.to_string()), e),
                }
            }
            UrlTarget::GithubRepo {
                owner,
                repo,
                readme_url,
            } => match self.get_text(readme_url, None).await {
                Ok((true, body)) => ContentBlock::new(
                    BlockOrigin::GithubRepo {
                        owner: owner.clone(),
                        repo: repo.clone(),
                    },
                    body,
                ),
                Ok((false, _)) => ContentBlock::unavailable(url),
                Err(e) => self.inline_error(BlockOrigin::GithubUrl(url.to_string()), e),
            },
            UrlTarget::Direct(direct) => {
                match self.get_text(direct, Some(self.config.max_chars)).await {
                    Ok((ok, body)) => {
                        if !ok {
                            warn!(url, "non-success status; using body as-is");
                        }
                        ContentBlock::new(BlockOrigin::Url(url.to_string()), body)
                    }
                    Err(e) => self.inline_error(BlockOrigin::Url(url.to_string()), e),
                }
            }
        }
    }

    /// GET `url` and return `(status is success, body)`.
    ///
    /// With `max_chars` set, only enough bytes to hold that many
    /// characters are read before the connection is dropped.
    async fn get_text(
        &self,
        url: &str,
        max_chars: Option<usize>,
    ) -> Result<(bool, String), SheetsError> {
        let fetch_err = |e: reqwest::Error| SheetsError::Fetch {
            target: url.to_string(),
            message: e.to_string(),
        };

        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(fetch_err)?;
        let ok = response.status().is_success();
        let body = match max_chars {
            Some(max_chars) => {
                // A UTF-8 character is at most four bytes.
                let bytes = read_body_prefix(response, max_chars.saturating_mul(4))
                    .await
                    .map_err(fetch_err)?;
                truncate_chars(&String::from_utf8_lossy(&bytes), max_chars).to_string()
            }
            None => response.text().await.map_err(fetch_err)?,
        };
        Ok((ok, body))
    }

    fn inline_error(&self, origin: BlockOrigin, err: SheetsError) -> ContentBlock {
        warn!(error = %err, "fetch failed");
        let message = match err {
            SheetsError::Fetch { message, .. } => message,
            other => other.to_string(),
        };
        ContentBlock::fetch_error(origin, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FetchConfig {
        FetchConfig::default()
    }

    #[test]
    fn test_blob_url_rewritten_to_raw() {
        let target = resolve_url("https://github.com/o/r/blob/main/x/y.py", &cfg());
        assert_eq!(
            target,
            UrlTarget::GithubFile {
                raw_url: "https://raw.githubusercontent.com/o/r/main/x/y.py".into(),
                file_path: "x/y.py".into(),
            }
        );
    }

    #[test]
    fn test_repo_url_fetches_readme() {
        let target = resolve_url("https://www.github.com/o/r.git", &cfg());
        assert_eq!(
            target,
            UrlTarget::GithubRepo {
                owner: "o".into(),
                repo: "r".into(),
                readme_url: "https://raw.githubusercontent.com/o/r/main/README.md".into(),
            }
        );
    }

    #[test]
    fn test_other_github_shapes_fetch_directly() {
        for url in [
            "https://github.com/o",
            "https://github.com/o/r/issues/3",
            "https://github.com/o/r/blob/main",
            "https://gist.github.com/o/r",
        ] {
            assert_eq!(resolve_url(url, &cfg()), UrlTarget::Direct(url.into()), "{}", url);
        }
    }

    #[test]
    fn test_configurable_hosts() {
        let config = FetchConfig {
            github_host: "127.0.0.1".into(),
            raw_base: "http://127.0.0.1:9000/raw/".into(),
            readme_branch: "trunk".into(),
            ..cfg()
        };
        let UrlTarget::GithubRepo { readme_url, .. } =
            resolve_url("http://127.0.0.1:9001/o/r", &config)
        else {
            panic!("expected repo target");
        };
        assert_eq!(readme_url, "http://127.0.0.1:9000/raw/o/r/trunk/README.md");
    }

    #[test]
    fn test_truncate_counts_chars() {
        let text = "é".repeat(6000);
        let cut = truncate_chars(&text, 5000);
        assert_eq!(cut.chars().count(), 5000);
        assert_eq!(truncate_chars("short", 5000), "short");
    }

    #[tokio::test]
    async fn test_unreachable_url_becomes_inline_block() {
        let fetcher = Fetcher::new(
            reqwest::Client::new(),
            FetchConfig {
                timeout_secs: 2,
                ..cfg()
            },
        );
        // Port 9 (discard) on loopback is closed in test environments.
        let blocks = fetcher
            .fetch_all(&["http://127.0.0.1:9/a".to_string()])
            .await;
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].origin, BlockOrigin::Url("http://127.0.0.1:9/a".into()));
        assert!(blocks[0].body.starts_with("Error fetching:"));
    }

    #[tokio::test]
    async fn test_direct_fetch_stops_reading_past_limit() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        const TOTAL: usize = 64 * 1024 * 1024;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
                TOTAL
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            let block = vec![b'a'; 64 * 1024];
            let mut written = 0;
            while written < TOTAL {
                if socket.write_all(&block).await.is_err() {
                    break;
                }
                written += block.len();
            }
            written
        });

        let fetcher = Fetcher::new(
            reqwest::Client::new(),
            FetchConfig {
                max_chars: 100,
                timeout_secs: 10,
                ..cfg()
            },
        );
        let url = format!("http://{}/big.txt", addr);
        let block = fetcher.fetch_one(&url).await;
        assert_eq!(block.body, "a".repeat(100));

        let written = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .expect("server should see the connection close")
            .unwrap();
        assert!(written < TOTAL, "whole body was sent: {} bytes", written);
    }

    #[test]
    fn test_multibyte_prefix_decodes_whole_chars() {
        // Four bytes per char: a cut at 4 * max_chars keeps exactly max_chars.
        let text = "\u{1F600}".repeat(10);
        let prefix = &text.as_bytes()[..4 * 3 + 2];
        let decoded = String::from_utf8_lossy(prefix);
        assert_eq!(truncate_chars(&decoded, 3), "\u{1F600}".repeat(3));
    }
}
