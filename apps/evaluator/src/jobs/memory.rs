//! In-process implementations of the job collaborators.
//! Used by tests and by single-process runs that do not need Redis.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    DocumentStore, EvaluationJob, JobQueue, JobStatus, JobStore, QueuedJob, ResultStore,
    StoreError,
};
use crate::evaluation::models::EvaluationResult;

/// How long `pop` waits on an empty queue before returning `None`.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".to_string())
}

/// Job records plus the ordered status history of every job.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, EvaluationJob>>,
    history: Mutex<HashMap<Uuid, Vec<JobStatus>>>,
}

impl MemoryJobStore {
    /// Every status the job has held, oldest first.
    pub fn history(&self, id: Uuid) -> Vec<JobStatus> {
        self.history
            .lock()
            .map(|h| h.get(&id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &EvaluationJob) -> Result<(), StoreError> {
        self.jobs.lock().map_err(poisoned)?.insert(job.id, job.clone());
        self.history
            .lock()
            .map_err(poisoned)?
            .insert(job.id, vec![job.status]);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EvaluationJob>, StoreError> {
        Ok(self.jobs.lock().map_err(poisoned)?.get(&id).cloned())
    }

    async fn transition(&self, id: Uuid, from: JobStatus, to: JobStatus) -> Result<(), StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from, to });
        }

        let mut jobs = self.jobs.lock().map_err(poisoned)?;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if job.status != from {
            return Err(StoreError::StatusConflict {
                id,
                expected: from,
                actual: job.status,
            });
        }
        job.status = to;
        drop(jobs);

        self.history
            .lock()
            .map_err(poisoned)?
            .entry(id)
            .or_default()
            .push(to);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryResultStore {
    results: Mutex<HashMap<Uuid, EvaluationResult>>,
}

impl MemoryResultStore {
    pub fn len(&self) -> usize {
        self.results.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save(&self, job_id: Uuid, result: &EvaluationResult) -> Result<(), StoreError> {
        self.results
            .lock()
            .map_err(poisoned)?
            .insert(job_id, result.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<EvaluationResult>, StoreError> {
        Ok(self.results.lock().map_err(poisoned)?.get(&job_id).cloned())
    }

    async fn delete(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.results.lock().map_err(poisoned)?.remove(&job_id);
        Ok(())
    }
}

/// Documents held as already-extracted text.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<String, String>>,
}

impl MemoryDocumentStore {
    pub fn insert(&self, reference: impl Into<String>, text: impl Into<String>) {
        if let Ok(mut docs) = self.docs.lock() {
            docs.insert(reference.into(), text.into());
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read_text(&self, reference: &str) -> anyhow::Result<Option<String>> {
        let docs = self
            .docs
            .lock()
            .map_err(|_| anyhow::anyhow!("document store lock poisoned"))?;
        Ok(docs.get(reference).cloned())
    }
}

/// Unbounded FIFO over a tokio channel. Popped jobs are tracked as claims
/// until acked.
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedJob>>,
    claims: Mutex<Vec<(QueuedJob, Instant)>>,
}

impl MemoryQueue {
    /// Deliveries popped but not yet acked.
    pub fn claimed(&self) -> usize {
        self.claims.lock().map(|c| c.len()).unwrap_or_default()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            claims: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn push(&self, job: QueuedJob) -> Result<(), StoreError> {
        self.tx
            .send(job)
            .map_err(|_| StoreError::Backend("queue receiver dropped".to_string()))
    }

    async fn pop(&self) -> Result<Option<QueuedJob>, StoreError> {
        let mut rx = self.rx.lock().await;
        let job = match tokio::time::timeout(POLL_INTERVAL, rx.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) | Err(_) => return Ok(None),
        };
        self.claims
            .lock()
            .map_err(poisoned)?
            .push((job.clone(), Instant::now()));
        Ok(Some(job))
    }

    async fn ack(&self, job: &QueuedJob) -> Result<(), StoreError> {
        let mut claims = self.claims.lock().map_err(poisoned)?;
        if let Some(pos) = claims.iter().position(|(claimed, _)| claimed == job) {
            claims.remove(pos);
        }
        Ok(())
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<Vec<QueuedJob>, StoreError> {
        let mut claims = self.claims.lock().map_err(poisoned)?;
        let (stale, live): (Vec<_>, Vec<_>) = claims
            .drain(..)
            .partition(|(_, since)| since.elapsed() >= older_than);
        *claims = live;
        Ok(stale.into_iter().map(|(job, _)| job).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = MemoryJobStore::default();
        let job = EvaluationJob::new("SRE".into(), "a".into(), "b".into());
        store.create(&job).await.unwrap();

        store
            .transition(job.id, JobStatus::Queued, JobStatus::Processing)
            .await
            .unwrap();
        let err = store
            .transition(job.id, JobStatus::Queued, JobStatus::Processing)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::StatusConflict {
                actual: JobStatus::Processing,
                ..
            }
        ));
        assert_eq!(
            store.history(job.id),
            vec![JobStatus::Queued, JobStatus::Processing]
        );
    }

    #[tokio::test]
    async fn test_terminal_states_reject_transitions() {
        let store = MemoryJobStore::default();
        let job = EvaluationJob::new("SRE".into(), "a".into(), "b".into());
        store.create(&job).await.unwrap();
        store
            .transition(job.id, JobStatus::Queued, JobStatus::Processing)
            .await
            .unwrap();
        store
            .transition(job.id, JobStatus::Processing, JobStatus::Completed)
            .await
            .unwrap();

        let err = store
            .transition(job.id, JobStatus::Completed, JobStatus::Queued)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_job_transition_is_not_found() {
        let store = MemoryJobStore::default();
        let err = store
            .transition(Uuid::new_v4(), JobStatus::Queued, JobStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_pop_times_out() {
        let queue = MemoryQueue::default();
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_popped_job_stays_claimed_until_acked() {
        let queue = MemoryQueue::default();
        let job = EvaluationJob::new("SRE".into(), "a".into(), "b".into());
        let delivery = QueuedJob {
            data: job.data(),
            attempt: 1,
        };
        queue.push(delivery.clone()).await.unwrap();

        let popped = queue.pop().await.unwrap().unwrap();
        assert_eq!(queue.claimed(), 1);

        queue.ack(&popped).await.unwrap();
        assert_eq!(queue.claimed(), 0);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(queue.reclaim_stale(Duration::from_secs(60)).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaim_returns_only_expired_claims() {
        let queue = MemoryQueue::default();
        for title in ["old", "new"] {
            let job = EvaluationJob::new(title.into(), "a".into(), "b".into());
            queue
                .push(QueuedJob {
                    data: job.data(),
                    attempt: 1,
                })
                .await
                .unwrap();
        }

        let old = queue.pop().await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(90)).await;
        queue.pop().await.unwrap().unwrap();

        let stale = queue.reclaim_stale(Duration::from_secs(60)).await.unwrap();
        assert_eq!(stale, vec![old]);
        assert_eq!(queue.claimed(), 1);
    }

    #[tokio::test]
    async fn test_document_lookup() {
        let docs = MemoryDocumentStore::default();
        docs.insert("cv.pdf", "Rust engineer");
        assert_eq!(
            docs.read_text("cv.pdf").await.unwrap().as_deref(),
            Some("Rust engineer")
        );
        assert!(docs.read_text("missing.pdf").await.unwrap().is_none());
    }
}
