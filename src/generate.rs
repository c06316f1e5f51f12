//! The prompt pipeline behind `POST /api/generate` and `sheets generate`.
//!
//! 1. Validate and extract `#tags` and URLs from the prompt.
//! 2. Load tagged context and fetch URLs concurrently.
//! 3. Compose the prompt.
//!
//! The caller then opens the completion with
//! [`CompletionClient::open`](crate::relay::CompletionClient::open), so
//! nothing is sent upstream until every block has been assembled.

use anyhow::Context;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::info;

use sheets_core::compose::{compose_prompt, Mode, PromptParts};
use sheets_core::extract::{extract, require_urls};
use sheets_core::store::KvStore;
use sheets_core::SheetsError;

use crate::config::Config;
use crate::context::load_context;
use crate::fetch::Fetcher;
use crate::kv::SqliteKv;
use crate::relay::{build_http_client, CompletionClient};

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    /// Extra context paths selected outside the prompt text.
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// A composed prompt plus what went into it, for logging.
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub text: String,
    pub context_blocks: usize,
    pub content_blocks: usize,
}

/// Everything [`prepare`] needs besides the request.
pub struct Pipeline<'a> {
    pub store: &'a dyn KvStore,
    pub fetcher: &'a Fetcher,
    pub require_url: bool,
}

impl Pipeline<'_> {
    pub async fn prepare(
        &self,
        request: &GenerateRequest,
        user_id: Option<&str>,
    ) -> Result<PreparedPrompt, SheetsError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(SheetsError::validation("Prompt is required"));
        }

        if self.require_url {
            require_urls(prompt)?;
        }
        let extracted = extract(prompt);

        let mut paths: Vec<String> = Vec::new();
        for path in request
            .context
            .iter()
            .map(|p| p.trim_start_matches('#').to_string())
            .chain(extracted.tag_paths())
        {
            if !path.is_empty() && !paths.contains(&path) {
                paths.push(path);
            }
        }

        let (context, content) = tokio::join!(
            load_context(self.store, &paths, user_id),
            self.fetcher.fetch_all(&extracted.urls),
        );

        let mode = request.mode.as_deref().and_then(Mode::parse);
        let text = compose_prompt(PromptParts {
            context: &context,
            content: &content,
            prompt,
            mode,
        });

        info!(
            tags = paths.len(),
            urls = extracted.urls.len(),
            context_blocks = context.len(),
            content_blocks = content.len(),
            prompt_chars = text.chars().count(),
            "prompt composed"
        );

        Ok(PreparedPrompt {
            text,
            context_blocks: context.len(),
            content_blocks: content.len(),
        })
    }
}

/// CLI entry point: run the pipeline and stream the report to stdout.
pub async fn run_generate(config: &Config, prompt: &str, mode: Option<String>) -> anyhow::Result<()> {
    let store = SqliteKv::open(config).await?;
    let http = build_http_client()?;
    let fetcher = Fetcher::new(http.clone(), config.fetch.clone());
    let client = CompletionClient::new(http, config.upstream.clone());

    let pipeline = Pipeline {
        store: &store,
        fetcher: &fetcher,
        require_url: config.generate.require_url,
    };
    let request = GenerateRequest {
        prompt: prompt.to_string(),
        context: Vec::new(),
        mode,
    };

    let prepared = pipeline.prepare(&request, None).await?;
    let mut deltas = client.open(&prepared.text).await?;

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use sheets_core::store::memory::InMemoryKv;
    use sheets_core::store::PutOptions;

    fn request(prompt: &str) -> GenerateRequest {
        GenerateRequest {
            prompt: prompt.to_string(),
            context: Vec::new(),
            mode: None,
        }
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let kv = InMemoryKv::new();
        let fetcher = Fetcher::new(reqwest::Client::new(), FetchConfig::default());
        let pipeline = Pipeline {
            store: &kv,
            fetcher: &fetcher,
            require_url: false,
        };
        let err = pipeline.prepare(&request("   "), None).await.unwrap_err();
        assert!(matches!(err, SheetsError::Validation(_)));
    }

    #[tokio::test]
    async fn test_strict_mode_requires_url() {
        let kv = InMemoryKv::new();
        let fetcher = Fetcher::new(reqwest::Client::new(), FetchConfig::default());
        let pipeline = Pipeline {
            store: &kv,
            fetcher: &fetcher,
            require_url: true,
        };
        let err = pipeline.prepare(&request("no links"), None).await.unwrap_err();
        assert!(matches!(err, SheetsError::NoUrl));
    }

    #[tokio::test]
    async fn test_tags_and_explicit_context_merged() {
        let kv = InMemoryKv::new();
        kv.put("file:style.md", "use tabs", PutOptions::default())
            .await
            .unwrap();
        kv.put("file:api.md", "rest only", PutOptions::default())
            .await
            .unwrap();
        let fetcher = Fetcher::new(reqwest::Client::new(), FetchConfig::default());
        let pipeline = Pipeline {
            store: &kv,
            fetcher: &fetcher,
            require_url: false,
        };

        let req = GenerateRequest {
            prompt: "review with #style.md".into(),
            context: vec!["#api.md".into(), "style.md".into()],
            mode: Some("design".into()),
        };
        let prepared = pipeline.prepare(&req, None).await.unwrap();
        assert_eq!(prepared.context_blocks, 2);
        assert_eq!(prepared.content_blocks, 0);
        let api = prepared.text.find("File: api.md").unwrap();
        let style = prepared.text.find("File: style.md").unwrap();
        assert!(api < style);
        assert!(prepared.text.contains("Mode: design"));
        assert!(prepared.text.contains("User Request: review with #style.md"));
    }
}
