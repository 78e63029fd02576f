use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::retry::RetryPolicy;
use crate::worker::WorkerConfig;

/// Text-generation backend, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    Groq,
    Anthropic,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(LlmProvider::Gemini),
            "groq" => Ok(LlmProvider::Groq),
            "anthropic" => Ok(LlmProvider::Anthropic),
            other => bail!("Unknown LLM provider '{other}' (expected gemini, groq or anthropic)"),
        }
    }
}

/// Process configuration loaded from environment variables.
/// Provider keys are optional here and checked when the backend is built.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm_provider: LlmProvider,
    pub gemini_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub llm_max_retries: u32,
    pub llm_backoff_base: Duration,
    pub redis_url: String,
    pub worker_concurrency: usize,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub queue_max_attempts: u32,
    pub queue_retry_delay: Duration,
    pub claim_timeout: Duration,
    pub vector_index_path: PathBuf,
    pub documents_dir: PathBuf,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            llm_provider: env_or("LLM_PROVIDER", "gemini").parse()?,
            gemini_api_key: optional_env("GEMINI_API_KEY"),
            groq_api_key: optional_env("GROQ_API_KEY"),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            llm_max_retries: parse_env("LLM_MAX_RETRIES", 3)?,
            llm_backoff_base: Duration::from_millis(parse_env("LLM_BACKOFF_BASE_MS", 1000)?),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            worker_concurrency: parse_env("WORKER_CONCURRENCY", 2)?,
            rate_limit_max: parse_env("RATE_LIMIT_MAX", 10)?,
            rate_limit_window: Duration::from_millis(parse_env("RATE_LIMIT_DURATION_MS", 60_000)?),
            queue_max_attempts: parse_env("QUEUE_MAX_ATTEMPTS", 3)?,
            queue_retry_delay: Duration::from_millis(parse_env("QUEUE_RETRY_DELAY_MS", 2000)?),
            claim_timeout: Duration::from_millis(parse_env("CLAIM_TIMEOUT_MS", 600_000)?),
            vector_index_path: env_or("VECTOR_INDEX_PATH", "./data/vector_index.json").into(),
            documents_dir: env_or("DOCUMENTS_DIR", "./data/uploads").into(),
            rust_log: env_or("RUST_LOG", "info"),
        })
    }

    pub fn llm_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.llm_max_retries, self.llm_backoff_base)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.worker_concurrency.max(1),
            rate_limit_max: self.rate_limit_max.max(1),
            rate_limit_window: self.rate_limit_window,
            max_attempts: self.queue_max_attempts.max(1),
            retry_delay: self.queue_retry_delay,
            claim_timeout: self.claim_timeout,
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
