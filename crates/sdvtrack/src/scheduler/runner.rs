use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::broadcast::JobPhase;
use crate::db::job_repo::{self, ChunkProgress};
use crate::db::{upload_repo, Database};
use crate::error::SchedulerError;
use crate::ingest::{parse_chunk, ChunkSpec};
use crate::merge::{MergeContext, MergeEngine};
use crate::model::{JobStatus, MergeStatus, UploadJob};
use crate::scheduler::cancel::CancelRegistry;
use crate::scheduler::progress::ProgressReporter;
use crate::storage::BlobStore;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
    Cancelled,
    /// The job was not pending when the worker got to it.
    NotStarted(JobStatus),
}

/// Processes a single job from pickup to a terminal state.
pub struct JobRunner {
    db: Database,
    store: Arc<dyn BlobStore>,
    engine: Arc<MergeEngine>,
    cancels: CancelRegistry,
}

enum ChunkResult {
    Committed,
    /// The job left `processing` under us; nothing was committed.
    Superseded,
}

impl JobRunner {
    pub fn new(
        db: Database,
        store: Arc<dyn BlobStore>,
        engine: Arc<MergeEngine>,
        cancels: CancelRegistry,
    ) -> Self {
        Self {
            db,
            store,
            engine,
            cancels,
        }
    }

    pub fn cancels(&self) -> &CancelRegistry {
        &self.cancels
    }

    /// Runs the job to completion, failure or cancellation.
    ///
    /// Chunk-level failures end the job as failed and are not errors here;
    /// `Err` means the job's own bookkeeping could not be written.
    pub fn run(
        &self,
        job_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome, SchedulerError> {
        let flag = self.cancels.flag(job_id);
        let result = self.run_flagged(job_id, &flag, progress);
        self.cancels.remove(job_id);
        result
    }

    fn run_flagged(
        &self,
        job_id: &str,
        flag: &AtomicBool,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome, SchedulerError> {
        let _job_span = info_span!("job", job_id = %job_id).entered();

        let Some(job) = self.pick_up(job_id)? else {
            let status = self
                .load(job_id)?
                .map(|job| job.status)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            debug!("Job {} is {}, not starting it", job_id, status);
            return Ok(RunOutcome::NotStarted(status));
        };

        info!(
            "Started {} job {} for upload {} ({} records in {} chunks)",
            job.file_role, job.id, job.upload_id, job.total_records, job.total_chunks
        );
        progress.report(JobPhase::Started, &job);

        let start = job.current_chunk as usize;
        for spec in job.plan.chunks.iter().skip(start) {
            if flag.load(Ordering::SeqCst) {
                return self.cancel(&job, progress);
            }

            let _chunk_span =
                info_span!("chunk", index = spec.index, rows = spec.row_count).entered();
            match self.process_chunk(&job, spec) {
                Ok(ChunkResult::Committed) => {
                    let current = self.require(job_id)?;
                    progress.report(JobPhase::ChunkCommitted, &current);
                }
                Ok(ChunkResult::Superseded) => return self.superseded(job_id, progress),
                Err(message) => return self.fail(&job, message, progress),
            }
        }

        if flag.load(Ordering::SeqCst) {
            return self.cancel(&job, progress);
        }
        self.complete(&job, progress)
    }

    /// Moves a pending job to processing and marks its upload as merging.
    fn pick_up(&self, job_id: &str) -> Result<Option<UploadJob>, SchedulerError> {
        let started = self.db.with_tx(|tx| {
            let started = job_repo::transition(tx, job_id, JobStatus::Processing, None)?;
            if !started {
                return Ok((None, false));
            }
            let job = job_repo::find_by_id(tx, job_id)?;
            if let Some(job) = &job {
                upload_repo::set_merge_status(tx, &job.upload_id, MergeStatus::Merging)?;
            }
            Ok((job, true))
        })?;
        Ok(started)
    }

    /// Reads, parses and merges one chunk in a single transaction.
    ///
    /// Errors are rendered as the message the job fails with.
    fn process_chunk(&self, job: &UploadJob, spec: &ChunkSpec) -> Result<ChunkResult, String> {
        let bytes = self
            .store
            .read_range(&job.blob_ref, spec.byte_range())
            .map_err(|e| format!("Chunk {} unreadable: {}", spec.index + 1, e))?;

        let parsed = parse_chunk(&job.plan, spec, &bytes)
            .map_err(|e| format!("Chunk {} unreadable: {}", spec.index + 1, e))?;
        if !parsed.errors.is_empty() {
            warn!(
                "Skipped {} malformed rows in chunk {} of job {}",
                parsed.errors.len(),
                spec.index + 1,
                job.id
            );
        }

        let ctx = MergeContext {
            company_id: &job.company_id,
            upload_id: &job.upload_id,
            job_id: &job.id,
            paired_upload_id: job.paired_upload_id.as_deref(),
        };

        let committed = self
            .db
            .with_tx(|tx| {
                let outcome = self.engine.merge_chunk(tx, &ctx, &parsed.rows)?;
                let counters = ChunkProgress {
                    chunk_index: spec.index,
                    rows: parsed.consumed(),
                    skipped: parsed.errors.len() as u64,
                    orphans: outcome.orphans,
                    conflicts: outcome.conflicts.len() as u64,
                };
                let recorded = job_repo::record_chunk(tx, &job.id, &counters)?;
                if recorded {
                    debug!(
                        "Chunk {}: {} upserted, {} attached, {} orphans, {} conflicts, {} consolidated",
                        spec.index + 1,
                        outcome.upserted,
                        outcome.attached,
                        outcome.orphans,
                        outcome.conflicts.len(),
                        outcome.consolidated
                    );
                }
                Ok((recorded, recorded))
            })
            .map_err(|e| format!("Chunk {} failed to commit: {}", spec.index + 1, e))?;

        Ok(if committed {
            ChunkResult::Committed
        } else {
            ChunkResult::Superseded
        })
    }

    fn complete(
        &self,
        job: &UploadJob,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome, SchedulerError> {
        let ctx = MergeContext {
            company_id: &job.company_id,
            upload_id: &job.upload_id,
            job_id: &job.id,
            paired_upload_id: job.paired_upload_id.as_deref(),
        };

        let finalized = self.db.with_tx(|tx| {
            let pruned = self.engine.finalize(tx, &ctx, job.file_role)?;
            let completed = job_repo::transition(tx, &job.id, JobStatus::Completed, None)?;
            if completed {
                upload_repo::set_merge_status(tx, &job.upload_id, MergeStatus::Merged)?;
            }
            Ok((completed.then_some(pruned), completed))
        });

        match finalized {
            Ok(Some(_)) => {
                let done = self.require(&job.id)?;
                info!(
                    "Completed job {}: {} records, {} skipped, {} orphans, {} conflicts",
                    done.id,
                    done.processed_records,
                    done.skipped_records,
                    done.orphan_records,
                    done.conflict_records
                );
                progress.report(JobPhase::Finished, &done);
                Ok(RunOutcome::Completed)
            }
            Ok(None) => self.superseded(&job.id, progress),
            Err(e) => self.fail(job, format!("Finalizing failed: {}", e), progress),
        }
    }

    fn cancel(
        &self,
        job: &UploadJob,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome, SchedulerError> {
        let cancelled = self.db.with_tx(|tx| {
            let cancelled = job_repo::transition(tx, &job.id, JobStatus::Cancelled, None)?;
            if cancelled {
                upload_repo::set_merge_status(tx, &job.upload_id, MergeStatus::Cancelled)?;
            }
            Ok((cancelled, cancelled))
        })?;
        if !cancelled {
            return self.superseded(&job.id, progress);
        }

        let current = self.require(&job.id)?;
        info!(
            "Cancelled job {} after {} of {} chunks",
            current.id, current.current_chunk, current.total_chunks
        );
        progress.report(JobPhase::Finished, &current);
        Ok(RunOutcome::Cancelled)
    }

    fn fail(
        &self,
        job: &UploadJob,
        message: String,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome, SchedulerError> {
        warn!("Job {} failed: {}", job.id, message);
        let failed = self.db.with_tx(|tx| {
            let failed = job_repo::transition(tx, &job.id, JobStatus::Failed, Some(&message))?;
            if failed {
                upload_repo::set_merge_status(tx, &job.upload_id, MergeStatus::Failed)?;
            }
            Ok((failed, failed))
        })?;
        if !failed {
            return self.superseded(&job.id, progress);
        }

        let current = self.require(&job.id)?;
        progress.report(JobPhase::Finished, &current);
        Ok(RunOutcome::Failed(message))
    }

    /// Someone else moved the job out of `processing`, typically a cancel
    /// triggered by deleting its upload.
    fn superseded(
        &self,
        job_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome, SchedulerError> {
        let current = self.require(job_id)?;
        info!("Job {} was moved to {} externally, stopping", job_id, current.status);
        progress.report(JobPhase::Finished, &current);
        Ok(match current.status {
            JobStatus::Completed => RunOutcome::Completed,
            JobStatus::Failed => {
                RunOutcome::Failed(current.error_message.clone().unwrap_or_default())
            }
            _ => RunOutcome::Cancelled,
        })
    }

    fn load(&self, job_id: &str) -> Result<Option<UploadJob>, SchedulerError> {
        Ok(self.db.with_conn(|conn| job_repo::find_by_id(conn, job_id))?)
    }

    fn require(&self, job_id: &str) -> Result<UploadJob, SchedulerError> {
        self.load(job_id)?
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }
}
