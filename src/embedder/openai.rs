//! Blocking embedding client for OpenAI-compatible endpoints.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::embedder::Embedder;
use crate::error::EmbedError;

/// Stock [`Embedder`] implementation talking to any OpenAI-compatible
/// `/embeddings` endpoint. Rate limits and transient failures are retried
/// with exponential backoff.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Builds a new embedding client.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing embedding API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid embedding API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
            max_retries: max_retries.max(1),
            batch_size: batch_size.max(1),
        })
    }

    fn request_once(&self, inputs: &[&str]) -> RequestOutcome {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };
        let response = match self.client.post(&self.endpoint).json(&request).send() {
            Ok(response) => response,
            Err(err) => {
                let retryable = err.is_timeout() || err.is_connect() || err.is_request();
                return RequestOutcome::Failed {
                    retryable,
                    message: err.to_string(),
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            return RequestOutcome::Failed {
                retryable,
                message: format!("endpoint returned {status}: {body}"),
            };
        }

        let mut parsed: EmbeddingResponse = match response.json() {
            Ok(parsed) => parsed,
            Err(err) => {
                return RequestOutcome::Failed {
                    retryable: true,
                    message: format!("unparseable embedding response: {err}"),
                }
            }
        };
        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != inputs.len() {
            return RequestOutcome::Failed {
                retryable: false,
                message: format!(
                    "endpoint returned {} embeddings for {} inputs",
                    parsed.data.len(),
                    inputs.len()
                ),
            };
        }
        RequestOutcome::Done(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }

    fn retry_backoff(attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(500 * (1 << capped))
    }
}

impl Embedder for OpenAiEmbedder {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if inputs.len() > self.batch_size {
            return Err(EmbedError::new(format!(
                "batch of {} exceeds configured max {}",
                inputs.len(),
                self.batch_size
            )));
        }

        let mut attempt = 0usize;
        loop {
            match self.request_once(inputs) {
                RequestOutcome::Done(vectors) => return Ok(vectors),
                RequestOutcome::Failed { retryable, message } => {
                    if retryable && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(Self::retry_backoff(attempt));
                        continue;
                    }
                    return Err(EmbedError::new(message));
                }
            }
        }
    }
}

enum RequestOutcome {
    Done(Vec<Vec<f32>>),
    Failed { retryable: bool, message: String },
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
