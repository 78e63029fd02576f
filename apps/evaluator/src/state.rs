use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::jobs::documents::FsDocumentStore;
use crate::jobs::redis_store::RedisStore;
use crate::jobs::{DocumentStore, JobQueue, JobStore, ResultStore};
use crate::llm_client::providers::{build_generator, http_client, required_key};
use crate::llm_client::LlmInvoker;
use crate::rag::embedding::GeminiEmbedder;
use crate::rag::index::SnapshotIndex;
use crate::rag::ContextRetriever;

/// Every collaborator the pipeline needs, built once at startup and shared by
/// reference across worker slots.
#[derive(Clone)]
pub struct Services {
    pub llm: LlmInvoker,
    pub retriever: ContextRetriever,
    pub documents: Arc<dyn DocumentStore>,
    pub jobs: Arc<dyn JobStore>,
    pub results: Arc<dyn ResultStore>,
    pub queue: Arc<dyn JobQueue>,
}

impl Services {
    /// Production wiring: configured LLM backend, Gemini embeddings over the
    /// snapshot index, filesystem documents and Redis state.
    pub async fn from_config(config: &Config, store: Arc<RedisStore>) -> Result<Self> {
        let generator = build_generator(config)?;
        let llm = LlmInvoker::new(generator, config.llm_retry_policy());
        info!("LLM invoker initialized (model: {})", llm.model());

        let retriever = ContextRetriever::new(
            Arc::new(build_embedder(config)?),
            Arc::new(SnapshotIndex::load(&config.vector_index_path).await?),
        );

        Ok(Self {
            llm,
            retriever,
            documents: Arc::new(FsDocumentStore::new(&config.documents_dir)),
            jobs: store.clone(),
            results: store.clone(),
            queue: store,
        })
    }
}

pub fn build_embedder(config: &Config) -> Result<GeminiEmbedder> {
    let key = required_key(&config.gemini_api_key, "GEMINI_API_KEY")?;
    Ok(GeminiEmbedder::new(http_client()?, key))
}
