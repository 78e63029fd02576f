use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{Embedder, RetrievalError};

const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/text-embedding-004:embedContent";
pub const EMBEDDING_MODEL: &str = "text-embedding-004";

/// Gemini `text-embedding-004` over HTTP. Used for queries and for ingestion.
pub struct GeminiEmbedder {
    client: Client,
    api_key: String,
}

impl GeminiEmbedder {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        if text.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }

        let body = json!({
            "model": format!("models/{EMBEDDING_MODEL}"),
            "content": { "parts": [{ "text": text }] }
        });

        let response = self
            .client
            .post(GEMINI_EMBED_URL)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "status {}: {message}",
                status.as_u16()
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        if parsed.embedding.values.is_empty() {
            return Err(RetrievalError::Embedding("empty embedding".to_string()));
        }
        Ok(parsed.embedding.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_response_shape() {
        let parsed: EmbedResponse =
            serde_json::from_str(r#"{"embedding": {"values": [0.25, -0.5, 1.0]}}"#).unwrap();
        assert_eq!(parsed.embedding.values, vec![0.25, -0.5, 1.0]);
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected_without_a_request() {
        let embedder = GeminiEmbedder::new(Client::new(), "key".to_string());
        let err = embedder.embed("  ").await.unwrap_err();
        assert!(matches!(err, RetrievalError::EmptyQuery));
    }
}
