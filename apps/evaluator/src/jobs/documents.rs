use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use super::DocumentStore;

/// Documents stored as files under a root directory.
/// References are relative paths; `.pdf` files have their text extracted.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Joins `reference` onto the root. Absolute paths and `..` are refused.
    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let relative = Path::new(reference);
        let is_plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        (is_plain && !reference.trim().is_empty()).then(|| self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn read_text(&self, reference: &str) -> anyhow::Result<Option<String>> {
        let Some(path) = self.resolve(reference) else {
            debug!(reference, "document reference escapes the documents root");
            return Ok(None);
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let is_pdf = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("pdf"));

        let text = if is_pdf {
            // PDF parsing is CPU-bound.
            tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                .await
                .context("spawn_blocking failed in PDF extraction")?
                .with_context(|| format!("Failed to extract text from {}", path.display()))?
        } else {
            String::from_utf8(bytes)
                .with_context(|| format!("{} is not valid UTF-8", path.display()))?
        };

        debug!(reference, chars = text.len(), "document text loaded");
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_plain_text_documents() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("cv.txt"), "Rust, Postgres, Redis")
            .await
            .unwrap();
        let store = FsDocumentStore::new(dir.path());

        let text = store.read_text("cv.txt").await.unwrap();

        assert_eq!(text.as_deref(), Some("Rust, Postgres, Redis"));
    }

    #[tokio::test]
    async fn test_missing_document_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        assert!(store.read_text("nope.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_references_cannot_escape_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("uploads");
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(outer.path().join("secret.txt"), "x")
            .await
            .unwrap();
        let store = FsDocumentStore::new(&root);

        assert!(store.read_text("../secret.txt").await.unwrap().is_none());
        let absolute = outer.path().join("secret.txt");
        assert!(store
            .read_text(&absolute.to_string_lossy())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_corrupt_pdf_is_an_error_not_missing() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("cv.pdf"), b"not a pdf")
            .await
            .unwrap();
        let store = FsDocumentStore::new(dir.path());
        assert!(store.read_text("cv.pdf").await.is_err());
    }
}
