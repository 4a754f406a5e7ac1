use std::sync::Arc;

use log::{info, warn};

use crate::broadcast::JobPhase;
use crate::db::job_repo;
use crate::db::{upload_repo, Database};
use crate::error::SchedulerError;
use crate::model::{JobSnapshot, JobStatus, MergeStatus, UploadJob};
use crate::scheduler::cancel::CancelRegistry;
use crate::scheduler::pool::WorkerPool;
use crate::scheduler::progress::ProgressReporter;
use crate::scheduler::runner::JobRunner;

/// Owns the worker pool and applies the transitions that happen outside a
/// worker: queueing, cancellation and startup recovery.
pub struct Scheduler {
    db: Database,
    pool: WorkerPool,
    cancels: CancelRegistry,
    progress: Arc<dyn ProgressReporter>,
}

/// What startup recovery did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Jobs found processing and failed as interrupted.
    pub failed: Vec<String>,
    /// Pending jobs queued again.
    pub requeued: Vec<String>,
}

impl Scheduler {
    pub fn start(
        db: Database,
        runner: JobRunner,
        progress: Arc<dyn ProgressReporter>,
        worker_count: usize,
    ) -> Self {
        let cancels = runner.cancels().clone();
        let pool = WorkerPool::new(Arc::new(runner), Arc::clone(&progress), worker_count);
        Self {
            db,
            pool,
            cancels,
            progress,
        }
    }

    pub fn enqueue(&self, job_id: &str) -> Result<(), SchedulerError> {
        self.pool.submit(job_id.to_string())
    }

    /// Fails jobs a previous process left processing and queues the
    /// pending ones again.
    pub fn recover(&self) -> Result<Recovery, SchedulerError> {
        let (interrupted, pending) = self.db.with_tx(|tx| {
            let interrupted = job_repo::fail_interrupted(tx)?;
            for job in &interrupted {
                upload_repo::set_merge_status(tx, &job.upload_id, MergeStatus::Failed)?;
            }
            let pending = job_repo::list_by_status(tx, JobStatus::Pending)?;
            Ok(((interrupted, pending), true))
        })?;

        for job in &interrupted {
            warn!(
                "Job {} was interrupted after {} of {} chunks",
                job.id, job.current_chunk, job.total_chunks
            );
            if let Some(failed) = self.load(&job.id)? {
                self.progress.report(JobPhase::Finished, &failed);
            }
        }

        let mut recovery = Recovery {
            failed: interrupted.into_iter().map(|job| job.id).collect(),
            requeued: Vec::with_capacity(pending.len()),
        };
        for job in pending {
            self.enqueue(&job.id)?;
            recovery.requeued.push(job.id);
        }

        if !recovery.failed.is_empty() || !recovery.requeued.is_empty() {
            info!(
                "Recovered jobs: {} failed as interrupted, {} requeued",
                recovery.failed.len(),
                recovery.requeued.len()
            );
        }
        Ok(recovery)
    }

    /// Requests cancellation of a job.
    ///
    /// A pending job is cancelled on the spot. A processing job is flagged
    /// and stops at its next chunk boundary, so the returned snapshot may
    /// still read `processing`. Terminal jobs cannot be cancelled.
    pub fn cancel(&self, job_id: &str) -> Result<JobSnapshot, SchedulerError> {
        let job = self
            .load(job_id)?
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

        if job.status == JobStatus::Pending {
            let cancelled = self.db.with_tx(|tx| {
                let cancelled = job_repo::transition(tx, job_id, JobStatus::Cancelled, None)?;
                if cancelled {
                    upload_repo::set_merge_status(tx, &job.upload_id, MergeStatus::Cancelled)?;
                }
                Ok((cancelled, cancelled))
            })?;
            if cancelled {
                let current = self.require(job_id)?;
                info!("Cancelled pending job {}", job_id);
                self.progress.report(JobPhase::Finished, &current);
                return Ok(current.snapshot());
            }
        }

        // Either processing from the start, or picked up since the read.
        let current = self.require(job_id)?;
        match current.status {
            JobStatus::Processing => {
                self.cancels.request(job_id);
                info!("Cancellation requested for job {}", job_id);
                Ok(current.snapshot())
            }
            from => Err(SchedulerError::InvalidTransition {
                job_id: job_id.to_string(),
                from,
                to: JobStatus::Cancelled,
            }),
        }
    }

    /// Stops the pool once in-flight jobs finish. Queued jobs stay pending
    /// and are picked up by [`Scheduler::recover`] on the next start.
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }

    fn load(&self, job_id: &str) -> Result<Option<UploadJob>, SchedulerError> {
        Ok(self.db.with_conn(|conn| job_repo::find_by_id(conn, job_id))?)
    }

    fn require(&self, job_id: &str) -> Result<UploadJob, SchedulerError> {
        self.load(job_id)?
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }
}
