//! Streaming completion relay.
//!
//! Opens a streaming chat-completion request against the configured
//! upstream and turns its event stream into a stream of plain-text
//! deltas. The relay moves through these states:
//!
//! ```text
//! Idle ──▶ Requesting ──▶ Streaming ──▶ Completed
//!               │              │
//!               ▼              ▼
//!             Failed         Failed (inline "Error:" marker)
//! ```
//!
//! A failure before headers arrive is returned as
//! [`SheetsError::UpstreamConnect`] and no stream is produced. A failure
//! after that point cannot change the response status any more, so it is
//! appended to the output as `\n\nError: …` and the stream ends.
//!
//! Dropping the returned [`DeltaStream`] drops the upstream response body,
//! which closes the upstream connection.

use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};

use sheets_core::sse::DeltaDecoder;
use sheets_core::SheetsError;

use crate::config::UpstreamConfig;
use crate::fetch::read_body_prefix;

/// How much of a non-success response body is kept for the error message.
const ERROR_BODY_BYTES: usize = 1024;

/// Plain-text deltas in upstream order.
pub type DeltaStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
}

/// The one HTTP client shared by the relay, the fetcher, and GitHub calls.
///
/// Per-request timeouts are set at each call site.
pub fn build_http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("sheets/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl CompletionClient {
    pub fn new(http: reqwest::Client, config: UpstreamConfig) -> Self {
        Self { http, config }
    }

    /// JSON body of the upstream request: one user message, streaming on.
    pub fn request_body(&self, prompt: &str) -> serde_json::Value {
        self.chat_body(vec![json!({ "role": "user", "content": prompt })])
    }

    fn chat_body(&self, messages: Vec<serde_json::Value>) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }

    /// Send the request and wait for a success status.
    pub async fn open(&self, prompt: &str) -> Result<DeltaStream, SheetsError> {
        debug!(state = ?RelayState::Idle, prompt_chars = prompt.chars().count());
        self.send(self.request_body(prompt)).await
    }

    /// Like [`open`](Self::open), with a system message ahead of the prompt.
    pub async fn open_with_system(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<DeltaStream, SheetsError> {
        debug!(state = ?RelayState::Idle, prompt_chars = prompt.chars().count(), "with system message");
        let body = self.chat_body(vec![
            json!({ "role": "system", "content": system }),
            json!({ "role": "user", "content": prompt }),
        ]);
        self.send(body).await
    }

    async fn send(&self, body: serde_json::Value) -> Result<DeltaStream, SheetsError> {
        let api_key = self.config.api_key().ok_or_else(|| {
            SheetsError::UpstreamConnect(format!("{} is not set", self.config.api_key_env))
        })?;
        let timeout = Duration::from_secs(self.config.timeout_secs);
        // Headers and any error body share one deadline.
        let deadline = tokio::time::Instant::now() + timeout;

        info!(state = ?RelayState::Requesting, model = %self.config.model, "opening completion");

        let send = self
            .http
            .post(self.config.completions_url())
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(&body)
            .send();

        let response = match tokio::time::timeout_at(deadline, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(state = ?RelayState::Failed, error = %e, "upstream unreachable");
                return Err(SheetsError::UpstreamConnect(e.to_string()));
            }
            Err(_) => {
                warn!(state = ?RelayState::Failed, "upstream headers timed out");
                return Err(SheetsError::UpstreamConnect(format!(
                    "no response within {}s",
                    self.config.timeout_secs
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let read = read_body_prefix(response, ERROR_BODY_BYTES);
            let body = match tokio::time::timeout_at(deadline, read).await {
                Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).chars().take(200).collect(),
                Ok(Err(e)) => {
                    debug!(error = %e, "error body unreadable");
                    String::new()
                }
                Err(_) => {
                    debug!("error body timed out");
                    String::new()
                }
            };
            warn!(state = ?RelayState::Failed, %status, "upstream rejected request");
            return Err(SheetsError::UpstreamConnect(format!(
                "upstream returned {}: {}",
                status, body
            )));
        }

        info!(state = ?RelayState::Streaming, "upstream accepted");
        Ok(relay_deltas(response.bytes_stream(), timeout))
    }
}

/// Decode an upstream byte stream into text deltas.
///
/// `idle_timeout` bounds the wait for each chunk. A read error or an idle
/// timeout ends the stream with an inline error marker; partial output
/// already yielded stays with the consumer.
pub fn relay_deltas<S, E>(upstream: S, idle_timeout: Duration) -> DeltaStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(stream! {
        let mut upstream = Box::pin(upstream);
        let mut decoder = DeltaDecoder::new();
        let mut forwarded = 0usize;

        let failure = loop {
            match tokio::time::timeout(idle_timeout, upstream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    for delta in decoder.feed(&chunk) {
                        forwarded += 1;
                        yield delta;
                    }
                }
                Ok(Some(Err(e))) => break Some(e.to_string()),
                Ok(None) => break None,
                Err(_) => break Some(format!("no data from upstream for {}s", idle_timeout.as_secs())),
            }
        };

        match failure {
            None => {
                for delta in decoder.finish() {
                    forwarded += 1;
                    yield delta;
                }
                info!(state = ?RelayState::Completed, deltas = forwarded, done = decoder.is_done());
            }
            Some(message) => {
                let err = SheetsError::UpstreamStream(message.clone());
                warn!(state = ?RelayState::Failed, deltas = forwarded, error = %err);
                yield format!("\n\nError: {}", message);
            }
        }
    })
}
