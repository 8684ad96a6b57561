//! HTTP embedding providers (OpenAI-compatible and Ollama).

use super::{EmbeddingClient, EmbeddingClientError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Client for `POST {base}/embeddings` (OpenAI and API-compatible gateways).
pub struct OpenAiEmbeddingClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiEmbeddingClient {
    /// Construct a client; `base_url` defaults to the public OpenAI endpoint.
    pub fn new(base_url: Option<&str>, api_key: Option<String>) -> Result<Self, EmbeddingClientError> {
        let client = Client::builder().user_agent("vector-records/0.2").build()?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(OPENAI_DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        model: &str,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let expected = texts.len();
        tracing::debug!(model, texts = expected, "Requesting OpenAI embeddings");

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&json!({ "model": model, "input": texts }));
        if let Some(api_key) = self.api_key.as_deref()
            && !api_key.is_empty()
        {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::UnexpectedStatus { status, body });
        }

        let mut payload: OpenAiEmbeddingResponse = response.json().await?;
        payload.data.sort_by_key(|item| item.index);
        let vectors: Vec<Vec<f32>> = payload.data.into_iter().map(|item| item.embedding).collect();
        ensure_count(expected, vectors)
    }
}

/// Client for Ollama's `POST {base}/api/embed`.
pub struct OllamaEmbeddingClient {
    client: Client,
    base_url: String,
}

impl OllamaEmbeddingClient {
    /// Construct a client; `base_url` defaults to a local Ollama daemon.
    pub fn new(base_url: Option<&str>) -> Result<Self, EmbeddingClientError> {
        let client = Client::builder().user_agent("vector-records/0.2").build()?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(OLLAMA_DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        model: &str,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let expected = texts.len();
        tracing::debug!(model, texts = expected, "Requesting Ollama embeddings");

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&json!({ "model": model, "input": texts }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::UnexpectedStatus { status, body });
        }

        let payload: OllamaEmbedResponse = response.json().await?;
        ensure_count(expected, payload.embeddings)
    }
}

fn ensure_count(
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    if vectors.len() == expected {
        Ok(vectors)
    } else {
        Err(EmbeddingClientError::CountMismatch {
            expected,
            actual: vectors.len(),
        })
    }
}
