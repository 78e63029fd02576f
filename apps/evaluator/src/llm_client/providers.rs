//! HTTP backends for `TextGenerator`. Each performs exactly one request per call;
//! retrying belongs to `LlmInvoker`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{mentions_quota, ProviderError, TextGenerator};
use crate::config::{Config, LlmProvider};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const GEMINI_MODEL: &str = "gemini-1.5-flash";

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const GROQ_MODEL: &str = "llama-3.3-70b-versatile";

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_MODEL: &str = "claude-sonnet-4-5";

const TEMPERATURE: f32 = 0.7;
const MAX_OUTPUT_TOKENS: u32 = 2048;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Builds the backend selected by `LLM_PROVIDER`. Called once at startup.
pub fn build_generator(config: &Config) -> Result<Arc<dyn TextGenerator>> {
    let http = http_client()?;
    let generator: Arc<dyn TextGenerator> = match config.llm_provider {
        LlmProvider::Gemini => Arc::new(GeminiGenerator::new(
            http,
            required_key(&config.gemini_api_key, "GEMINI_API_KEY")?,
        )),
        LlmProvider::Groq => Arc::new(GroqGenerator::new(
            http,
            required_key(&config.groq_api_key, "GROQ_API_KEY")?,
        )),
        LlmProvider::Anthropic => Arc::new(AnthropicGenerator::new(
            http,
            required_key(&config.anthropic_api_key, "ANTHROPIC_API_KEY")?,
        )),
    };
    Ok(generator)
}

pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

pub(crate) fn required_key(key: &Option<String>, name: &str) -> Result<String> {
    match key {
        Some(k) if !k.trim().is_empty() => Ok(k.clone()),
        _ => bail!("{name} must be set"),
    }
}

/// Maps a non-success HTTP response onto the provider error taxonomy.
pub(crate) async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    if status == 429 || mentions_quota(&body) {
        return ProviderError::Quota(format!("status {status}: {body}"));
    }
    ProviderError::Api {
        status,
        message: body,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gemini
// ────────────────────────────────────────────────────────────────────────────

pub struct GeminiGenerator {
    client: Client,
    api_key: String,
}

impl GeminiGenerator {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate_text(&self, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{GEMINI_API_BASE}/{GEMINI_MODEL}:generateContent");
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "topP": 0.95,
                "topK": 40,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
            }
        });

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let parsed: GeminiResponse = response.json().await?;
        Ok(parsed.text())
    }

    fn model(&self) -> &str {
        GEMINI_MODEL
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Groq (OpenAI-compatible chat completions)
// ────────────────────────────────────────────────────────────────────────────

pub struct GroqGenerator {
    client: Client,
    api_key: String,
}

impl GroqGenerator {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl TextGenerator for GroqGenerator {
    async fn generate_text(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: GROQ_MODEL,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_OUTPUT_TOKENS,
        };

        let response = self
            .client
            .post(GROQ_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let parsed: ChatResponse = response.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default())
    }

    fn model(&self) -> &str {
        GROQ_MODEL
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Anthropic Messages API
// ────────────────────────────────────────────────────────────────────────────

pub struct AnthropicGenerator {
    client: Client,
    api_key: String,
}

impl AnthropicGenerator {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicResponse {
    /// Text of the first text block.
    fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    async fn generate_text(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = AnthropicRequest {
            model: ANTHROPIC_MODEL,
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let parsed: AnthropicResponse = response.json().await?;
        if let Some(usage) = &parsed.usage {
            debug!(
                "Anthropic call succeeded: input_tokens={}, output_tokens={}",
                usage.input_tokens, usage.output_tokens
            );
        }
        Ok(parsed.text().unwrap_or_default().to_string())
    }

    fn model(&self) -> &str {
        ANTHROPIC_MODEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_text_joins_parts_of_first_candidate() {
        let body = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "{\"a\":"}, {"text": " 1}"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.text(), "{\"a\": 1}");
    }

    #[test]
    fn test_gemini_blocked_prompt_yields_empty_text() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.text(), "");
    }

    #[test]
    fn test_anthropic_text_picks_first_text_block() {
        let body = r#"{
            "content": [
                {"type": "tool_use", "text": null},
                {"type": "text", "text": "hello"}
            ],
            "usage": {"input_tokens": 3, "output_tokens": 1}
        }"#;
        let parsed: AnthropicResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.text(), Some("hello"));
    }

    #[test]
    fn test_chat_response_without_choices_is_empty() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parsed.choices.is_empty());
    }

    #[test]
    fn test_required_key_rejects_blank() {
        assert!(required_key(&None, "GROQ_API_KEY").is_err());
        assert!(required_key(&Some("  ".to_string()), "GROQ_API_KEY").is_err());
        assert_eq!(
            required_key(&Some("k".to_string()), "GROQ_API_KEY").unwrap(),
            "k"
        );
    }
}
