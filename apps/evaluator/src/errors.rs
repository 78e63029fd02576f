use thiserror::Error;

use crate::evaluation::json_extract::ParseError;
use crate::jobs::StoreError;
use crate::llm_client::LlmError;
use crate::rag::RetrievalError;

/// Pipeline-level error type.
/// Everything a job attempt can fail with ends up here; `public_message()` is
/// the only text that ever reaches the status surface.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Failed to parse {stage} response: {source}")]
    Parse {
        stage: &'static str,
        #[source]
        source: ParseError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EvalError {
    pub fn parse(stage: &'static str, source: ParseError) -> Self {
        EvalError::Parse { stage, source }
    }

    /// Whether a fresh job attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EvalError::Validation(_) | EvalError::DocumentNotFound(_) => false,
            EvalError::Retrieval(RetrievalError::EmptyQuery) => false,
            _ => true,
        }
    }

    /// Stable machine-readable code, used as a log field.
    pub fn code(&self) -> &'static str {
        match self {
            EvalError::Validation(_) => "VALIDATION_ERROR",
            EvalError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            EvalError::Retrieval(_) => "RETRIEVAL_ERROR",
            EvalError::Llm(e) if e.is_quota() => "LLM_QUOTA_EXHAUSTED",
            EvalError::Llm(_) => "LLM_ERROR",
            EvalError::Parse { .. } => "PARSE_ERROR",
            EvalError::Store(_) => "STORE_ERROR",
            EvalError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Generic, user-safe description. Never includes the underlying error text.
    pub fn public_message(&self) -> &'static str {
        match self {
            EvalError::Validation(_) => "The evaluation request was invalid",
            EvalError::DocumentNotFound(_) => "A referenced document could not be found",
            EvalError::Llm(e) if e.is_quota() => {
                "The AI service is temporarily exhausted. Please try again later."
            }
            EvalError::Retrieval(_) | EvalError::Llm(_) | EvalError::Parse { .. } => {
                "An AI processing error occurred"
            }
            EvalError::Store(_) => "A storage error occurred",
            EvalError::Internal(_) => "An internal error occurred",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::ProviderError;

    #[test]
    fn test_missing_documents_and_validation_are_not_retried() {
        assert!(!EvalError::DocumentNotFound("cv.pdf".to_string()).is_retryable());
        assert!(!EvalError::Validation("empty job title".to_string()).is_retryable());
        assert!(!EvalError::from(RetrievalError::EmptyQuery).is_retryable());
    }

    #[test]
    fn test_stage_failures_are_retried() {
        assert!(EvalError::parse("CV evaluation", ParseError::NoJsonFound).is_retryable());
        assert!(EvalError::from(LlmError::ServiceExhausted { attempts: 3 }).is_retryable());
        assert!(EvalError::from(RetrievalError::Index("down".to_string())).is_retryable());
    }

    #[test]
    fn test_public_message_hides_detail() {
        let err = EvalError::from(LlmError::Provider(ProviderError::Api {
            status: 500,
            message: "secret upstream stack trace".to_string(),
        }));
        assert!(!err.public_message().contains("secret"));
        assert_eq!(err.code(), "LLM_ERROR");

        let quota = EvalError::from(LlmError::ServiceExhausted { attempts: 3 });
        assert_eq!(quota.code(), "LLM_QUOTA_EXHAUSTED");
        assert!(quota.public_message().contains("temporarily exhausted"));
    }

    #[test]
    fn test_parse_error_names_the_stage() {
        let err = EvalError::parse("CV evaluation", ParseError::NoJsonFound);
        assert_eq!(
            err.to_string(),
            "Failed to parse CV evaluation response: No JSON found in LLM response"
        );
    }
}
