//! Client for the embedding service, with retry and batching.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Why a single embedding request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedFailure {
    /// Worth retrying: network trouble, rate limiting, server errors.
    Transient(String),
    Permanent(String),
}

impl std::fmt::Display for EmbedFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "transient: {msg}"),
            Self::Permanent(msg) => write!(f, "permanent: {msg}"),
        }
    }
}

/// One request to an embedding backend.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    fn model(&self) -> &str;

    /// Embed `text` with a single request.
    ///
    /// `Ok(None)` means the service answered but returned no vector.
    async fn embed_once(
        &self,
        text: &str,
    ) -> std::result::Result<Option<Vec<f32>>, EmbedFailure>;
}

/// Ollama-style `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint =
            format!("{}/api/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
        })
    }
}

impl std::fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[async_trait]
impl EmbeddingService for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_once(
        &self,
        text: &str,
    ) -> std::result::Result<Option<Vec<f32>>, EmbedFailure> {
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let msg = format!("HTTP {status}: {body}");
            return Err(if should_retry(status) {
                EmbedFailure::Transient(msg)
            } else {
                EmbedFailure::Permanent(msg)
            });
        }

        let body = response.text().await.map_err(classify_error)?;
        Ok(parse_embedding(&body))
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn classify_error(err: reqwest::Error) -> EmbedFailure {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
    {
        EmbedFailure::Transient(err.to_string())
    } else {
        EmbedFailure::Permanent(err.to_string())
    }
}

/// Extract the `embedding` array from a response body.
fn parse_embedding(body: &str) -> Option<Vec<f32>> {
    let value: Value = serde_json::from_str(body).ok()?;
    let items = value.get("embedding")?.as_array()?;
    items
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Retry and pacing parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per text, including the first.
    pub max_attempts: usize,
    /// After attempt `n` fails the client waits `n * backoff_unit`.
    pub backoff_unit: Duration,
    /// Pause between consecutive requests of a batch.
    pub batch_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(2),
            batch_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Clone)]
pub struct EmbeddingClient {
    service: Arc<dyn EmbeddingService>,
    policy: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(service: Arc<dyn EmbeddingService>, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    pub fn model(&self) -> &str {
        self.service.model()
    }

    /// Embed one text, retrying transient failures.
    ///
    /// A response without a vector yields an empty vector and is not
    /// retried.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.service.embed_once(text).await {
                Ok(Some(vector)) => return Ok(vector),
                Ok(None) => {
                    tracing::warn!(
                        model = self.service.model(),
                        "embedding response had no vector"
                    );
                    return Ok(Vec::new());
                }
                Err(EmbedFailure::Transient(reason))
                    if attempt < max_attempts =>
                {
                    let wait = self.policy.backoff_unit * attempt as u32;
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        %reason,
                        "embedding request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(failure) => {
                    let reason = match failure {
                        EmbedFailure::Transient(r) | EmbedFailure::Permanent(r) => r,
                    };
                    return Err(Error::EmbeddingUnavailable {
                        attempts: attempt,
                        reason,
                    });
                }
            }
        }
    }

    /// Embed texts one after another, pausing between requests.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            if i > 0 && !self.policy.batch_delay.is_zero() {
                tokio::time::sleep(self.policy.batch_delay).await;
            }
            vectors.push(self.embed(text).await?);
            tracing::debug!(done = i + 1, total = texts.len(), "embedded");
        }
        Ok(vectors)
    }
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("model", &self.service.model())
            .field("policy", &self.policy)
            .finish()
    }
}
