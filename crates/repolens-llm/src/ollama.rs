use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;
use crate::provider::EmbeddingProvider;

const DEFAULT_ENDPOINT: &str = "/api/embed";

/// Embedder speaking the Ollama `/api/embed` protocol.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
    model: String,
}

impl fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("client", &"<reqwest::Client>")
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl OllamaEmbedder {
    #[must_use]
    pub fn new(mut base_url: String, model: String, timeout: Duration) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(timeout),
            base_url,
            endpoint: DEFAULT_ENDPOINT.into(),
            model,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint = if endpoint.starts_with('/') {
            endpoint
        } else {
            format!("/{endpoint}")
        };
        self
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, self.endpoint)
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self.client.post(self.url()).json(&body).send().await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::error!("embedding API error {status}: {text}");
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let resp: EmbeddingResponse = serde_json::from_str(&text)?;

        resp.embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::EmptyEmbedding {
                provider: self.name().into(),
            })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}
