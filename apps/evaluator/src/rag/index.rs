//! Snapshot-backed vector index and the ingestion step that builds it.
//!
//! The snapshot is a JSON file of embedded chunks. Search is brute force over
//! squared L2 distance, ascending. Reference corpora here are a handful of
//! documents, so an exact scan is enough.

use std::cmp::Ordering;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ContextChunk, Embedder, RetrievalError, SourceTag, VectorIndex};

/// Max characters per ingested chunk.
pub const CHUNK_SIZE: usize = 1000;

/// Sub-directory of the ingest root holding each source's `.txt` files.
const SOURCE_DIRS: [(&str, SourceTag); 3] = [
    ("job-descriptions", SourceTag::JobDescription),
    ("case-study-briefs", SourceTag::CaseStudyBrief),
    ("scoring-rubrics", SourceTag::ScoringRubric),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub source: SourceTag,
    pub filename: String,
    pub chunk_index: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub embedding_model: String,
    pub chunks: Vec<IndexedChunk>,
}

pub struct SnapshotIndex {
    chunks: Vec<IndexedChunk>,
}

impl SnapshotIndex {
    pub fn new(chunks: Vec<IndexedChunk>) -> Self {
        Self { chunks }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path).await.with_context(|| {
            format!(
                "Vector index '{}' not found. Run the ingest command first.",
                path.display()
            )
        })?;
        let snapshot: Snapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("Vector index '{}' is not a valid snapshot", path.display()))?;
        info!(
            chunks = snapshot.chunks.len(),
            model = %snapshot.embedding_model,
            "loaded vector index from {}",
            path.display()
        );
        Ok(Self::new(snapshot.chunks))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl VectorIndex for SnapshotIndex {
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ContextChunk>, RetrievalError> {
        let mut scored = Vec::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            if chunk.embedding.len() != vector.len() {
                return Err(RetrievalError::Index(format!(
                    "dimension mismatch: query has {}, chunk '{}' has {}",
                    vector.len(),
                    chunk.id,
                    chunk.embedding.len()
                )));
            }
            scored.push((squared_l2(vector, &chunk.embedding), chunk));
        }

        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(distance, chunk)| ContextChunk {
                content: chunk.content.clone(),
                source: chunk.source,
                filename: chunk.filename.clone(),
                chunk_index: chunk.chunk_index,
                distance,
            })
            .collect())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Splits text into sentences and packs them into chunks of at most
/// `max_chars` characters. A single sentence longer than the limit becomes
/// its own chunk.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        if !current.is_empty()
            && current.chars().count() + 1 + sentence.chars().count() > max_chars
        {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Sentences end at `.`, `!` or `?` followed by whitespace. Terminators are kept.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(false, |(_, next)| next.is_whitespace());
        if at_boundary {
            let end = i + c.len_utf8();
            sentences.push(text[start..end].trim());
            start = end;
        }
    }
    sentences.push(text[start..].trim());

    sentences.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Embeds every `.txt` file under the source sub-directories of `root`.
/// Missing sub-directories are skipped with a warning.
pub async fn ingest_directory(
    root: &Path,
    embedder: &dyn Embedder,
    embedding_model: &str,
) -> Result<Snapshot> {
    let mut snapshot = Snapshot {
        embedding_model: embedding_model.to_string(),
        chunks: Vec::new(),
    };

    for (dir_name, source) in SOURCE_DIRS {
        let dir = root.join(dir_name);
        let mut files = match list_text_files(&dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!("skipping {}: {e}", dir.display());
                continue;
            }
        };
        files.sort();

        for path in files {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let chunks = chunk_text(&content, CHUNK_SIZE);
            for (i, text) in chunks.iter().enumerate() {
                let embedding = embedder
                    .embed(text)
                    .await
                    .with_context(|| format!("Failed to embed {filename} chunk {i}"))?;
                snapshot.chunks.push(IndexedChunk {
                    id: format!("{source}-{}", snapshot.chunks.len()),
                    content: text.clone(),
                    embedding,
                    source,
                    filename: filename.clone(),
                    chunk_index: i as u32,
                });
            }
            info!(source = source.as_str(), chunks = chunks.len(), "ingested {filename}");
        }
    }

    Ok(snapshot)
}

pub async fn write_snapshot(snapshot: &Snapshot, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec(snapshot).context("Failed to serialize snapshot")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

async fn list_text_files(dir: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "txt") {
            files.push(path);
        }
    }
    Ok(files)
}
