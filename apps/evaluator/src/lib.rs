pub mod config;
pub mod errors;
pub mod evaluation;
pub mod jobs;
pub mod llm_client;
pub mod rag;
pub mod retry;
pub mod state;
pub mod worker;
