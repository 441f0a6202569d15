//! HTTP client for the external embedding provider.
//!
//! One POST per batch: `{model, input: [...]}` in, `{embeddings: [[...]]}`
//! out, one vector per input in input order. Server errors and transport
//! failures are retried with exponential backoff; client errors are not.
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Embedder, EmbedderError};
use crate::config::EmbeddingConfig;

const REQUEST_TIMEOUT_SECONDS: u64 = 60;
const RETRY_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: u64 = 2;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct RemoteEmbedder {
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl RemoteEmbedder {
    /// Build a client from the embedding section of the config.
    /// `Ok(None)` when no endpoint is configured — the caller decides
    /// whether that means "skip embedding" (it does, with a warning, for
    /// indexing).
    pub fn from_config(config: &EmbeddingConfig) -> Result<Option<Self>> {
        let Some(endpoint) = config.endpoint.clone() else {
            return Ok(None);
        };
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            debug!(
                "No API key in ${}, sending unauthenticated requests",
                config.api_key_env
            );
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .context("HTTP client build failed")?;
        Ok(Some(Self {
            endpoint,
            model: config.model.clone(),
            dimensions: config.dimensions,
            api_key,
            client,
        }))
    }

    fn post_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let request = EmbedRequest {
            model: &self.model,
            input: texts.to_vec(),
        };

        let mut last_error = None;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.try_post(&request) {
                Ok(embeddings) => return Ok(embeddings),
                Err(Retry::Fatal(err)) => return Err(err),
                Err(Retry::Transient(err)) => {
                    warn!(
                        "Embedding request attempt {attempt}/{RETRY_ATTEMPTS} failed: {err}"
                    );
                    last_error = Some(err);
                    if attempt < RETRY_ATTEMPTS {
                        let delay = Duration::from_secs(BACKOFF_BASE.pow(attempt - 1));
                        std::thread::sleep(delay);
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| EmbedderError::RequestFailed("retries exhausted".to_string())))
    }

    fn try_post(&self, request: &EmbedRequest<'_>) -> Result<Vec<Vec<f32>>, Retry> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().map_err(|e| {
            Retry::Transient(EmbedderError::RequestFailed(e.to_string()))
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Retry::Transient(EmbedderError::RequestFailed(format!(
                "HTTP {status}"
            ))));
        }
        if !status.is_success() {
            return Err(Retry::Fatal(EmbedderError::RequestFailed(format!(
                "HTTP {status}"
            ))));
        }

        let parsed: EmbedResponse = response.json().map_err(|e| {
            Retry::Fatal(EmbedderError::InvalidResponse(e.to_string()))
        })?;

        if parsed.embeddings.len() != request.input.len() {
            return Err(Retry::Fatal(EmbedderError::CountMismatch {
                expected: request.input.len(),
                got: parsed.embeddings.len(),
            }));
        }
        Ok(parsed.embeddings)
    }
}

enum Retry {
    Transient(EmbedderError),
    Fatal(EmbedderError),
}

impl Embedder for RemoteEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.post_batch(&[text])?;
        Ok(vectors.remove(0))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Embedding batch of {} bodies", texts.len());
        self.post_batch(texts)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_endpoint_yields_no_client() {
        let config = EmbeddingConfig::default();
        assert!(config.endpoint.is_none());
        assert!(RemoteEmbedder::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_request_wire_shape() {
        let request = EmbedRequest {
            model: "microsoft/codebert-base",
            input: vec!["\tbx lr", "\tjr $ra"],
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"model":"microsoft/codebert-base","input":["\tbx lr","\tjr $ra"]}"#
        );
    }

    #[test]
    fn test_response_wire_shape() {
        let parsed: EmbedResponse =
            serde_json::from_str(r#"{"embeddings":[[0.1,0.2],[0.3,0.4]]}"#).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1], vec![0.3, 0.4]);
    }
}
