use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::{EvaluationPipeline, JobOutcome, WorkerConfig, QUEUE_ERROR_BACKOFF};

/// How often abandoned queue claims are swept.
const RECLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// N worker slots sharing one queue and one claim rate limiter, plus a sweeper
/// that recovers jobs whose worker disappeared.
pub struct WorkerPool {
    pipeline: Arc<EvaluationPipeline>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

/// `max` claims per `window`, all of them available as a burst.
fn claim_quota(max: u32, window: Duration) -> Quota {
    let burst = NonZeroU32::new(max).unwrap_or(NonZeroU32::MIN);
    let period = window / burst.get();
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

impl WorkerPool {
    pub fn new(pipeline: EvaluationPipeline) -> Self {
        let WorkerConfig {
            rate_limit_max,
            rate_limit_window,
            ..
        } = *pipeline.config();
        let limiter = RateLimiter::direct(claim_quota(rate_limit_max, rate_limit_window));
        Self {
            pipeline: Arc::new(pipeline),
            limiter: Arc::new(limiter),
        }
    }

    /// Runs every slot until `shutdown` flips to true. Idle slots notice within
    /// one queue poll; a slot that already claimed a job finishes it first.
    /// A slot that dies is replaced while the pool is running.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let concurrency = self.pipeline.config().concurrency.max(1);
        info!(concurrency, "worker pool started");

        let mut slots = JoinSet::new();
        for slot in 0..concurrency {
            slots.spawn(self.slot(slot, &shutdown));
        }
        let reaper = tokio::spawn(run_reaper(self.pipeline.clone(), shutdown.clone()));

        let mut next_slot = concurrency;
        while let Some(joined) = slots.join_next().await {
            let Err(e) = joined else {
                continue;
            };
            error!("worker slot died: {e}");
            if !*shutdown.borrow() {
                info!(slot = next_slot, "replacing worker slot");
                slots.spawn(self.slot(next_slot, &shutdown));
                next_slot += 1;
            }
        }

        if let Err(e) = reaper.await {
            error!("stale claim sweeper died: {e}");
        }
        info!("worker pool stopped");
    }

    fn slot(
        &self,
        slot: usize,
        shutdown: &watch::Receiver<bool>,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        run_slot(
            slot,
            self.pipeline.clone(),
            self.limiter.clone(),
            shutdown.clone(),
        )
    }
}

async fn run_reaper(pipeline: Arc<EvaluationPipeline>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(RECLAIM_INTERVAL) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let recovered = pipeline.recover_stale().await;
        if recovered > 0 {
            info!(recovered, "abandoned queue claims recovered");
        }
    }
}

async fn run_slot(
    slot: usize,
    pipeline: Arc<EvaluationPipeline>,
    limiter: Arc<DefaultDirectRateLimiter>,
    shutdown: watch::Receiver<bool>,
) {
    let queue = pipeline.queue();

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Not raced against shutdown: a dropped pop could lose a delivery.
        let delivery = match queue.pop().await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(e) => {
                warn!(slot, "queue pop failed: {e}");
                tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
                continue;
            }
        };

        // Job starts are rate limited independently of per-call LLM backoff.
        limiter.until_ready().await;

        let job_id = delivery.data.job_id;
        let outcome = pipeline.process(delivery).await;
        if outcome != JobOutcome::Skipped {
            info!(slot, job_id = %job_id, ?outcome, "delivery handled");
        }
    }

    info!(slot, "worker slot stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::jobs::memory::MemoryQueue;
    use crate::jobs::{submit_job, JobQueue, JobStatus, JobStore, QueuedJob, StoreError};
    use crate::worker::testing::{fixture, StageGenerator};

    /// Delegates to a memory queue but panics on its first pop.
    struct PanicOnceQueue {
        inner: Arc<MemoryQueue>,
        panicked: AtomicBool,
    }

    #[async_trait]
    impl JobQueue for PanicOnceQueue {
        async fn push(&self, job: QueuedJob) -> Result<(), StoreError> {
            self.inner.push(job).await
        }

        async fn pop(&self) -> Result<Option<QueuedJob>, StoreError> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("queue connection lost its framing");
            }
            self.inner.pop().await
        }

        async fn ack(&self, job: &QueuedJob) -> Result<(), StoreError> {
            self.inner.ack(job).await
        }

        async fn reclaim_stale(&self, older_than: Duration) -> Result<Vec<QueuedJob>, StoreError> {
            self.inner.reclaim_stale(older_than).await
        }
    }

    #[test]
    fn test_claim_quota_allows_full_burst() {
        let quota = claim_quota(10, Duration::from_secs(60));
        assert_eq!(quota.burst_size().get(), 10);
        assert_eq!(quota.replenish_interval(), Duration::from_secs(6));
    }

    #[test]
    fn test_claim_quota_floors_zero() {
        let quota = claim_quota(0, Duration::ZERO);
        assert_eq!(quota.burst_size().get(), 1);
    }

    #[test]
    fn test_limiter_blocks_claims_beyond_burst() {
        let limiter = RateLimiter::direct(claim_quota(2, Duration::from_secs(60)));
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_slot_is_replaced() {
        let mut fx = fixture(Arc::new(StageGenerator::healthy()));
        fx.services.queue = Arc::new(PanicOnceQueue {
            inner: fx.queue.clone(),
            panicked: AtomicBool::new(false),
        });
        let id = submit_job(fx.jobs.as_ref(), fx.queue.as_ref(), "SRE", "cv.pdf", "report.pdf")
            .await
            .unwrap();

        let config = WorkerConfig {
            concurrency: 1,
            rate_limit_max: 100,
            ..WorkerConfig::default()
        };
        let pool = WorkerPool::new(EvaluationPipeline::new(fx.services.clone(), config));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(pool.run(shutdown_rx));

        let mut status = JobStatus::Queued;
        for _ in 0..100 {
            status = fx.jobs.get(id).await.unwrap().unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(fx.queue.claimed(), 0);

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }
}
