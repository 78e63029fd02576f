//! Evaluation worker: claims a delivery, runs CV -> project -> final in strict
//! order, persists the composite result and moves the job to a terminal state.
//!
//! Two retry layers exist and do not coordinate. The LLM invoker retries single
//! calls; this module retries whole jobs by requeueing them with exponential
//! backoff, up to `max_attempts` deliveries.
//!
//! Progress checkpoints are log events only. A job that dies mid-pipeline is
//! never resumed; its next delivery starts from scratch. A panic is caught and
//! treated as a failed attempt. A delivery whose worker vanished keeps its
//! queue claim, and `recover_stale` hands it back once the claim expires.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use futures::FutureExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::EvalError;
use crate::evaluation::models::EvaluationResult;
use crate::evaluation::{evaluate_cv, evaluate_project, generate_final_analysis};
use crate::jobs::{EvaluationJobData, JobQueue, JobStatus, QueuedJob, StoreError};
use crate::retry::{ErrorClass, RetryPolicy};
use crate::state::Services;

pub mod composer;
pub mod pool;

pub use pool::WorkerPool;

/// Pause after a queue or claim backend error before the delivery is tried again.
pub const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

const COMPLETION_ATTEMPTS: u32 = 3;
const COMPLETION_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Parallel worker slots.
    pub concurrency: usize,
    /// Job claims allowed per `rate_limit_window`.
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    /// Deliveries per job, first one included.
    pub max_attempts: u32,
    /// Base delay before a failed job is redelivered; doubles per attempt.
    pub retry_delay: Duration,
    /// A queue claim older than this is treated as abandoned. Must exceed the
    /// longest legitimate run of one job.
    pub claim_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            rate_limit_max: 10,
            rate_limit_window: Duration::from_secs(60),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            claim_timeout: Duration::from_secs(600),
        }
    }
}

impl WorkerConfig {
    /// Delay before redelivering a job whose 1-based `attempt` just failed.
    pub fn requeue_delay(&self, attempt: u32) -> Duration {
        RetryPolicy::new(self.max_attempts, self.retry_delay).delay_after(attempt.saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Failed,
    /// Scheduled for another delivery.
    Requeued { next_attempt: u32, delay: Duration },
    /// The job was not `queued` when delivered, so nothing ran.
    Skipped,
    /// The job could not be moved out of `processing`. Its claim is kept for
    /// stale-claim recovery.
    Unresolved,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Documents,
    Cv,
    Project,
    Final,
    Completed,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Documents => "documents",
            Stage::Cv => "cv_evaluation",
            Stage::Project => "project_evaluation",
            Stage::Final => "final_analysis",
            Stage::Completed => "completed",
        }
    }

    fn percentage(self) -> u8 {
        match self {
            Stage::Documents => 10,
            Stage::Cv => 30,
            Stage::Project => 60,
            Stage::Final => 80,
            Stage::Completed => 100,
        }
    }
}

fn checkpoint(job_id: Uuid, stage: Stage) {
    info!(
        job_id = %job_id,
        stage = stage.name(),
        progress = stage.percentage(),
        "job progress"
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

pub struct EvaluationPipeline {
    services: Services,
    config: WorkerConfig,
}

impl EvaluationPipeline {
    pub fn new(services: Services, config: WorkerConfig) -> Self {
        Self { services, config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn queue(&self) -> Arc<dyn JobQueue> {
        self.services.queue.clone()
    }

    /// Handles one delivery to a terminal state, a requeue, or a skip, then
    /// releases its queue claim. Requeues release it once the next delivery
    /// is queued.
    pub async fn process(&self, delivery: QueuedJob) -> JobOutcome {
        let outcome = self.handle(delivery.clone()).await;
        match outcome {
            JobOutcome::Requeued { .. } | JobOutcome::Unresolved => {}
            _ => self.acknowledge(&delivery).await,
        }
        outcome
    }

    async fn acknowledge(&self, delivery: &QueuedJob) {
        if let Err(e) = self.services.queue.ack(delivery).await {
            warn!(job_id = %delivery.data.job_id, "failed to release queue claim: {e}");
        }
    }

    async fn handle(&self, delivery: QueuedJob) -> JobOutcome {
        let job_id = delivery.data.job_id;

        match self
            .services
            .jobs
            .transition(job_id, JobStatus::Queued, JobStatus::Processing)
            .await
        {
            Ok(()) => {}
            Err(StoreError::StatusConflict { actual, .. }) => {
                warn!(job_id = %job_id, status = %actual, "delivery for a job that is not queued, skipping");
                return JobOutcome::Skipped;
            }
            Err(e) => {
                error!(job_id = %job_id, "failed to claim job, redelivering: {e}");
                return self.redeliver(delivery.clone(), delivery, QUEUE_ERROR_BACKOFF);
            }
        }
        info!(job_id = %job_id, attempt = delivery.attempt, "job claimed");

        let started = Instant::now();
        let run = AssertUnwindSafe(self.run_stages(&delivery.data, started))
            .catch_unwind()
            .await;
        let result = match run {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return self.handle_failure(delivery, e).await,
            Err(panic) => {
                let err = EvalError::Internal(anyhow!(
                    "evaluation panicked: {}",
                    panic_message(&*panic)
                ));
                return self.handle_failure(delivery, err).await;
            }
        };

        if let Err(e) = self.services.results.save(job_id, &result).await {
            return self.handle_failure(delivery, e.into()).await;
        }

        match self.complete(job_id).await {
            Ok(()) => {
                checkpoint(job_id, Stage::Completed);
                info!(
                    job_id = %job_id,
                    final_score = result.final_score,
                    recommendation = %result.recommendation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "evaluation completed"
                );
                JobOutcome::Completed
            }
            Err(e) => {
                error!(job_id = %job_id, "result saved but completion transition failed: {e}");
                if let Err(e) = self.services.results.delete(job_id).await {
                    error!(job_id = %job_id, "failed to remove result of uncompleted job: {e}");
                }
                self.handle_failure(delivery, e.into()).await
            }
        }
    }

    async fn run_stages(
        &self,
        data: &EvaluationJobData,
        started: Instant,
    ) -> Result<EvaluationResult, EvalError> {
        let Services {
            llm,
            retriever,
            documents,
            ..
        } = &self.services;

        checkpoint(data.job_id, Stage::Documents);
        let cv_text = documents
            .read_text(&data.cv_reference)
            .await?
            .ok_or_else(|| EvalError::DocumentNotFound(data.cv_reference.clone()))?;
        let project_text = documents
            .read_text(&data.project_reference)
            .await?
            .ok_or_else(|| EvalError::DocumentNotFound(data.project_reference.clone()))?;

        checkpoint(data.job_id, Stage::Cv);
        let cv = evaluate_cv(&cv_text, &data.job_title, retriever, llm).await?;

        checkpoint(data.job_id, Stage::Project);
        let project =
            evaluate_project(&project_text, &data.job_title, cv.score, retriever, llm).await?;

        checkpoint(data.job_id, Stage::Final);
        let analysis =
            generate_final_analysis(&cv, &project, &data.job_title, retriever, llm).await?;

        Ok(composer::compose_result(
            cv,
            project,
            analysis,
            &data.job_title,
            llm.model(),
            started.elapsed(),
        ))
    }

    /// processing -> completed, retried briefly on store errors.
    async fn complete(&self, job_id: Uuid) -> Result<(), StoreError> {
        let jobs = &self.services.jobs;
        RetryPolicy::new(COMPLETION_ATTEMPTS, COMPLETION_BACKOFF)
            .run(
                |_| jobs.transition(job_id, JobStatus::Processing, JobStatus::Completed),
                |_| ErrorClass::Generic,
            )
            .await
            .map_err(|exhausted| exhausted.error)
    }

    async fn handle_failure(&self, delivery: QueuedJob, err: EvalError) -> JobOutcome {
        let job_id = delivery.data.job_id;
        let jobs = &self.services.jobs;

        error!(
            job_id = %job_id,
            attempt = delivery.attempt,
            code = err.code(),
            "evaluation attempt failed: {err}"
        );

        if err.is_retryable() && delivery.attempt < self.config.max_attempts {
            match jobs
                .transition(job_id, JobStatus::Processing, JobStatus::Queued)
                .await
            {
                Ok(()) => return self.schedule_retry(delivery),
                Err(e) => error!(job_id = %job_id, "failed to requeue job: {e}"),
            }
        }

        match jobs
            .transition(job_id, JobStatus::Processing, JobStatus::Failed)
            .await
        {
            Ok(()) => {
                warn!(job_id = %job_id, public_message = err.public_message(), "job failed");
                JobOutcome::Failed
            }
            Err(e) => {
                error!(job_id = %job_id, "failed to mark job failed, leaving claim for recovery: {e}");
                JobOutcome::Unresolved
            }
        }
    }

    fn schedule_retry(&self, delivery: QueuedJob) -> JobOutcome {
        let delay = self.config.requeue_delay(delivery.attempt);
        let next = QueuedJob {
            data: delivery.data.clone(),
            attempt: delivery.attempt + 1,
        };
        info!(
            job_id = %next.data.job_id,
            next_attempt = next.attempt,
            delay_ms = delay.as_millis() as u64,
            "job requeued"
        );
        self.redeliver(delivery, next, delay)
    }

    /// Pushes `next` after `delay`, then releases the claim on `claimed`. If
    /// the push fails the claim stays and stale-claim recovery takes over.
    fn redeliver(&self, claimed: QueuedJob, next: QueuedJob, delay: Duration) -> JobOutcome {
        let next_attempt = next.attempt;
        let job_id = next.data.job_id;
        let queue = self.services.queue.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.push(next).await {
                error!(job_id = %job_id, "failed to redeliver job: {e}");
                return;
            }
            if let Err(e) = queue.ack(&claimed).await {
                warn!(job_id = %job_id, "failed to release queue claim: {e}");
            }
        });

        JobOutcome::Requeued {
            next_attempt,
            delay,
        }
    }

    /// Takes back queue claims older than `claim_timeout` and routes each job
    /// onward: a job left `processing` is requeued or, with no attempts left,
    /// failed; a job still `queued` lost its redelivery and is pushed again.
    /// Returns how many claims were taken back.
    pub async fn recover_stale(&self) -> usize {
        let stale = match self
            .services
            .queue
            .reclaim_stale(self.config.claim_timeout)
            .await
        {
            Ok(stale) => stale,
            Err(e) => {
                warn!("stale claim sweep failed: {e}");
                return 0;
            }
        };

        let count = stale.len();
        for delivery in stale {
            self.recover(delivery).await;
        }
        count
    }

    async fn recover(&self, delivery: QueuedJob) {
        let job_id = delivery.data.job_id;
        let jobs = &self.services.jobs;
        let max_attempts = self.config.max_attempts.max(1);

        let status = match jobs.get(job_id).await {
            Ok(Some(job)) => job.status,
            Ok(None) => {
                warn!(job_id = %job_id, "stale claim for an unknown job dropped");
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, "cannot read job of stale claim, returning it to the queue: {e}");
                self.push_logged(delivery).await;
                return;
            }
        };

        match status {
            JobStatus::Processing if delivery.attempt >= max_attempts => {
                warn!(job_id = %job_id, attempt = delivery.attempt, "abandoned job has no attempts left");
                if let Err(e) = jobs
                    .transition(job_id, JobStatus::Processing, JobStatus::Failed)
                    .await
                {
                    error!(job_id = %job_id, "failed to mark abandoned job failed: {e}");
                }
            }
            JobStatus::Processing => {
                match jobs
                    .transition(job_id, JobStatus::Processing, JobStatus::Queued)
                    .await
                {
                    Ok(()) => {
                        info!(job_id = %job_id, next_attempt = delivery.attempt + 1, "abandoned job requeued");
                        self.push_logged(QueuedJob {
                            attempt: delivery.attempt + 1,
                            data: delivery.data,
                        })
                        .await;
                    }
                    Err(e) => error!(job_id = %job_id, "failed to requeue abandoned job: {e}"),
                }
            }
            JobStatus::Queued => {
                info!(job_id = %job_id, "queued job lost its redelivery, pushing again");
                self.push_logged(QueuedJob {
                    attempt: (delivery.attempt + 1).min(max_attempts),
                    data: delivery.data,
                })
                .await;
            }
            JobStatus::Completed | JobStatus::Failed => {
                debug!(job_id = %job_id, status = %status, "stale claim for a finished job dropped");
            }
        }
    }

    async fn push_logged(&self, delivery: QueuedJob) {
        let job_id = delivery.data.job_id;
        if let Err(e) = self.services.queue.push(delivery).await {
            error!(job_id = %job_id, "failed to push recovered job: {e}");
        }
    }
}
