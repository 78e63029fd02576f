/// LLM client: the single point of entry for every text-generation call.
///
/// ARCHITECTURAL RULE: evaluators never talk to a provider directly.
/// They go through `LlmInvoker`, which owns the retry/backoff policy and the
/// quota classification.
///
/// The backend (Gemini, Groq, Anthropic) is picked once at startup by
/// `providers::build_generator` and carried as `Arc<dyn TextGenerator>`.
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};

use crate::retry::{ErrorClass, RetryPolicy};

pub mod prompts;
pub mod providers;

/// Markers in provider error text that mean usage limits, not a broken request.
const QUOTA_MARKERS: [&str; 4] = ["quota", "rate limit", "resource_exhausted", "too many requests"];

/// Failure of a single provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Quota or rate limit: {0}")]
    Quota(String),

    #[error("Empty response from provider (possible quota limit)")]
    EmptyResponse,

    #[error("Unexpected response shape: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Quota-class failures get a distinct terminal error once retries run out.
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Quota(_) | ProviderError::EmptyResponse => ErrorClass::Quota,
            ProviderError::Api { status: 429, .. } => ErrorClass::Quota,
            ProviderError::Api { message, .. } if mentions_quota(message) => ErrorClass::Quota,
            _ => ErrorClass::Generic,
        }
    }
}

pub(crate) fn mentions_quota(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    QUOTA_MARKERS.iter().any(|m| lower.contains(m))
}

/// Terminal outcome of an invocation after retries.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM service temporarily exhausted after {attempts} attempts (quota or rate limit)")]
    ServiceExhausted { attempts: u32 },

    #[error(transparent)]
    Provider(ProviderError),
}

impl LlmError {
    pub fn is_quota(&self) -> bool {
        matches!(self, LlmError::ServiceExhausted { .. })
    }
}

/// One capability every backend exposes.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Performs exactly one generation request. No retries at this layer.
    async fn generate_text(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Model identifier, recorded with each result.
    fn model(&self) -> &str;
}

/// Wraps a `TextGenerator` with classification-aware retry/backoff.
#[derive(Clone)]
pub struct LlmInvoker {
    generator: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
}

impl LlmInvoker {
    pub fn new(generator: Arc<dyn TextGenerator>, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    pub fn model(&self) -> &str {
        self.generator.model()
    }

    /// Generates text with the configured attempt budget.
    pub async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        self.generate_text_with_retries(prompt, self.policy.max_attempts)
            .await
    }

    /// Generates text, trying at most `max_retries` times.
    ///
    /// Only a complete, non-blank completion is returned. A blank completion
    /// counts as a quota-class failure and is retried like one.
    pub async fn generate_text_with_retries(
        &self,
        prompt: &str,
        max_retries: u32,
    ) -> Result<String, LlmError> {
        let policy = self.policy.with_attempts(max_retries);
        let generator = &self.generator;

        let outcome = policy
            .run(
                |attempt| async move {
                    debug!(attempt = attempt + 1, model = generator.model(), "LLM call");
                    let text = generator.generate_text(prompt).await?;
                    if text.trim().is_empty() {
                        return Err(ProviderError::EmptyResponse);
                    }
                    Ok(text)
                },
                ProviderError::class,
            )
            .await;

        outcome.map_err(|exhausted| match exhausted.class {
            ErrorClass::Quota => {
                error!(
                    attempts = exhausted.attempts,
                    "LLM quota exhausted: {}", exhausted.error
                );
                LlmError::ServiceExhausted {
                    attempts: exhausted.attempts,
                }
            }
            ErrorClass::Generic => {
                error!(
                    attempts = exhausted.attempts,
                    "LLM call failed: {}", exhausted.error
                );
                LlmError::Provider(exhausted.error)
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays scripted responses in order; repeats the last one when drained.
    pub struct ScriptedGenerator {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        fallback: fn() -> Result<String, ProviderError>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub fn new(
            script: Vec<Result<String, ProviderError>>,
            fallback: fn() -> Result<String, ProviderError>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn always(fallback: fn() -> Result<String, ProviderError>) -> Self {
            Self::new(Vec::new(), fallback)
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate_text(&self, prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| (self.fallback)())
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedGenerator;
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    fn invoker(generator: Arc<ScriptedGenerator>) -> LlmInvoker {
        LlmInvoker::new(generator, RetryPolicy::new(3, Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_responses_are_retried_until_text_arrives() {
        let generator = Arc::new(ScriptedGenerator::new(
            vec![Ok(String::new()), Ok("   \n".to_string())],
            || Ok("third time".to_string()),
        ));
        let llm = invoker(generator.clone());

        let start = Instant::now();
        let text = llm.generate_text("prompt").await.unwrap();

        assert_eq!(text, "third time");
        assert_eq!(generator.calls(), 3);
        // 1 unit before attempt 2, 2 units before attempt 3.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_signal_surfaces_as_service_exhausted() {
        let generator = Arc::new(ScriptedGenerator::always(|| {
            Err(ProviderError::Quota("RESOURCE_EXHAUSTED".to_string()))
        }));
        let llm = invoker(generator.clone());

        let err = llm.generate_text("prompt").await.unwrap_err();

        assert!(matches!(err, LlmError::ServiceExhausted { attempts: 3 }));
        assert!(err.is_quota());
        assert!(!err.to_string().contains("RESOURCE_EXHAUSTED"));
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_error_propagates_unchanged() {
        let generator = Arc::new(ScriptedGenerator::always(|| {
            Err(ProviderError::Api {
                status: 500,
                message: "upstream crashed".to_string(),
            })
        }));
        let llm = invoker(generator.clone());

        let err = llm.generate_text("prompt").await.unwrap_err();

        match err {
            LlmError::Provider(ProviderError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream crashed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_retry_budget_is_respected() {
        let generator = Arc::new(ScriptedGenerator::always(|| Ok(String::new())));
        let llm = invoker(generator.clone());

        let err = llm
            .generate_text_with_retries("prompt", 5)
            .await
            .unwrap_err();

        assert!(err.is_quota());
        assert_eq!(generator.calls(), 5);
    }

    #[test]
    fn test_classification() {
        assert_eq!(ProviderError::EmptyResponse.class(), ErrorClass::Quota);
        assert_eq!(
            ProviderError::Api {
                status: 429,
                message: String::new()
            }
            .class(),
            ErrorClass::Quota
        );
        assert_eq!(
            ProviderError::Api {
                status: 400,
                message: "You exceeded your current quota".to_string()
            }
            .class(),
            ErrorClass::Quota
        );
        assert_eq!(
            ProviderError::Api {
                status: 400,
                message: "bad request".to_string()
            }
            .class(),
            ErrorClass::Generic
        );
        assert_eq!(
            ProviderError::Decode("no candidates".to_string()).class(),
            ErrorClass::Generic
        );
    }
}
