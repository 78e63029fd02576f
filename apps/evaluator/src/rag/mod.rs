//! Context retriever. Embeds a query, runs a bounded nearest-neighbour search and
//! filters by source tag.
//!
//! Filtering happens after the search, so fewer than `top_k` chunks may come back.
//! That is accepted; the retriever does not over-fetch to compensate.
//! Nothing here retries: failures propagate straight to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod embedding;
pub mod index;

/// Which reference document a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceTag {
    JobDescription,
    CaseStudyBrief,
    ScoringRubric,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::JobDescription => "job-description",
            SourceTag::CaseStudyBrief => "case-study-brief",
            SourceTag::ScoringRubric => "scoring-rubric",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieved slice of a reference document. Read-only to evaluators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub content: String,
    pub source: SourceTag,
    pub filename: String,
    pub chunk_index: u32,
    /// Distance from the query vector; smaller is closer.
    pub distance: f32,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Query cannot be empty")]
    EmptyQuery,

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Vector index failed: {0}")]
    Index(String),
}

/// Turns text into a vector. One request per call.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// Nearest-neighbour lookup over ingested chunks, closest first.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ContextChunk>, RetrievalError>;
}

#[derive(Clone)]
pub struct ContextRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl ContextRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub async fn retrieve_contexts(
        &self,
        query: &str,
        top_k: usize,
        source_filter: Option<SourceTag>,
    ) -> Result<Vec<ContextChunk>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }

        let started = Instant::now();
        let vector = self.embedder.embed(query).await?;
        let hits = self.index.search(&vector, top_k).await?;

        let contexts: Vec<ContextChunk> = hits
            .into_iter()
            .filter(|chunk| source_filter.map_or(true, |tag| chunk.source == tag))
            .collect();

        debug!(
            query,
            top_k,
            source = source_filter.map(|t| t.as_str()).unwrap_or("any"),
            returned = contexts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieved contexts"
        );

        Ok(contexts)
    }
}

/// Joins chunks into labeled blocks for prompt injection.
pub fn format_contexts(contexts: &[ContextChunk]) -> String {
    contexts
        .iter()
        .map(|ctx| format!("Source: {} ({})\n{}", ctx.filename, ctx.source, ctx.content))
        .collect::<Vec<_>>()
        .join(crate::llm_client::prompts::CONTEXT_SEPARATOR)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn search(&self, _: &[f32], _: usize) -> Result<Vec<ContextChunk>, RetrievalError> {
            Err(RetrievalError::Index("collection missing".to_string()))
        }
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected_before_embedding() {
        let embedder = Arc::new(FixedEmbedder::default());
        let retriever = ContextRetriever::new(embedder.clone(), Arc::new(mixed_index()));

        let err = retriever.retrieve_contexts("   ", 5, None).await.unwrap_err();

        assert!(matches!(err, RetrievalError::EmptyQuery));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_filter_applies_after_search_without_overfetch() {
        let index = Arc::new(mixed_index());
        let retriever = ContextRetriever::new(Arc::new(FixedEmbedder::default()), index.clone());

        let contexts = retriever
            .retrieve_contexts("rubric", 2, Some(SourceTag::CaseStudyBrief))
            .await
            .unwrap();

        // The brief is third-closest, so a top-2 search never sees it.
        assert!(contexts.is_empty());
        assert_eq!(*index.limits.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_unfiltered_returns_ranked_hits() {
        let retriever =
            ContextRetriever::new(Arc::new(FixedEmbedder::default()), Arc::new(mixed_index()));

        let contexts = retriever.retrieve_contexts("anything", 2, None).await.unwrap();

        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0].source, SourceTag::JobDescription);
        assert_eq!(contexts[1].source, SourceTag::ScoringRubric);
    }

    #[tokio::test]
    async fn test_index_failure_propagates() {
        let retriever =
            ContextRetriever::new(Arc::new(FixedEmbedder::default()), Arc::new(FailingIndex));
        let err = retriever.retrieve_contexts("q", 1, None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Index(_)));
    }

    #[test]
    fn test_source_tag_serializes_kebab_case() {
        let json = serde_json::to_string(&SourceTag::CaseStudyBrief).unwrap();
        assert_eq!(json, "\"case-study-brief\"");
        let tag: SourceTag = serde_json::from_str("\"scoring-rubric\"").unwrap();
        assert_eq!(tag, SourceTag::ScoringRubric);
    }

    #[test]
    fn test_format_contexts_labels_each_block() {
        let text = format_contexts(&[
            chunk(SourceTag::JobDescription, "JD body", 0.1),
            chunk(SourceTag::ScoringRubric, "Rubric body", 0.2),
        ]);
        assert!(text.starts_with("Source: job-description.txt (job-description)\nJD body"));
        assert!(text.contains("\n\n---\n\nSource: scoring-rubric.txt"));
    }
}
