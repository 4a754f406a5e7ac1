//! The `SdvService` facade: one object wiring persistence, storage, the
//! scheduler and the read side together for a host application.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::aggregate::scope::borrow_conditions;
use crate::aggregate::{Aggregator, Filters, Scope, Summary};
use crate::broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
use crate::config::loader::validate_config;
use crate::config::Config;
use crate::db::{job_repo, record_repo, settings_repo, upload_repo, Database};
use crate::error::{ConfigError, IngestError, Result, SchedulerError};
use crate::hierarchy::{HierarchyCache, HierarchyTree};
use crate::ingest::plan_chunks;
use crate::merge::MergeEngine;
use crate::model::{
    CalculationSettings, CompositeKey, FileRole, JobSnapshot, JobStatus, MergeStatus, Upload,
    UploadJob, VerificationRecord,
};
use crate::model::job::pairing_key;
use crate::scheduler::{
    BroadcastProgress, BroadcastWaiter, CancelRegistry, CompletionWaiter, JobRunner,
    ProgressReporter, Recovery, Scheduler,
};
use crate::storage::{BlobStore, FileBlobStore};

/// A file submitted for ingestion.
#[derive(Debug, Clone, Copy)]
pub struct IngestionRequest<'a> {
    pub company_id: &'a str,
    pub file_name: &'a str,
    pub file_role: FileRole,
    pub content: &'a [u8],
    /// For verification files: the primary upload being verified.
    pub paired_upload_id: Option<&'a str>,
}

pub struct SdvService {
    config: Config,
    db: Database,
    store: Arc<dyn BlobStore>,
    aggregator: Aggregator,
    broadcaster: JobProgressBroadcaster,
    progress: Arc<dyn ProgressReporter>,
    cancels: CancelRegistry,
    scheduler: Scheduler,
    waiter: Arc<dyn CompletionWaiter>,
    recovery: Recovery,
}

impl SdvService {
    /// Opens the configured database and file blob store.
    pub fn open(config: Config) -> Result<Self> {
        let db_path = config
            .resolved_database_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "database_path is not set and no home directory was found".to_string(),
            })?;
        let storage_dir =
            config
                .resolved_storage_directory()
                .ok_or_else(|| ConfigError::Validation {
                    message: "storage_directory is not set and no home directory was found"
                        .to_string(),
                })?;

        let db = Database::open(&db_path)?;
        Self::with_parts(config, db, Arc::new(FileBlobStore::new(storage_dir)))
    }

    /// Builds a service over existing collaborators, then recovers jobs a
    /// previous process left unfinished.
    pub fn with_parts(config: Config, db: Database, store: Arc<dyn BlobStore>) -> Result<Self> {
        validate_config(&config)?;

        let engine = Arc::new(MergeEngine::new(&config.consolidation)?);
        let broadcaster = JobProgressBroadcaster::default();
        let progress: Arc<dyn ProgressReporter> =
            Arc::new(BroadcastProgress::new(broadcaster.clone()));
        let cancels = CancelRegistry::new();

        let runner = JobRunner::new(db.clone(), Arc::clone(&store), engine, cancels.clone());
        let scheduler = Scheduler::start(
            db.clone(),
            runner,
            Arc::clone(&progress),
            config.worker_count,
        );
        let recovery = scheduler.recover()?;

        Ok(Self {
            aggregator: Aggregator::new(db.clone(), config.defaults.settings()),
            waiter: Arc::new(BroadcastWaiter::new(db.clone(), broadcaster.clone())),
            config,
            db,
            store,
            broadcaster,
            progress,
            cancels,
            scheduler,
            recovery,
        })
    }

    /// Replaces how [`SdvService::await_completion`] waits.
    pub fn with_waiter(mut self, waiter: Arc<dyn CompletionWaiter>) -> Self {
        self.waiter = waiter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// What startup recovery did when the service was built.
    pub fn recovery(&self) -> &Recovery {
        &self.recovery
    }

    /// Validates and stores a file, creates its upload and job, and queues
    /// the job. Returns the job id.
    ///
    /// Nothing is persisted when validation fails or an active job blocks
    /// this one: a company runs one primary job at a time, and verification
    /// jobs wait for it.
    pub fn submit_ingestion_job(&self, request: IngestionRequest<'_>) -> Result<String> {
        let plan = plan_chunks(request.content, request.file_role, &self.config.chunk)?;
        let pairing = self.check_pairing(&request)?;

        let upload_id = Uuid::new_v4().to_string();
        let job_id = Uuid::new_v4().to_string();
        let key = pairing_key(
            request.company_id,
            request.file_role,
            pairing.as_deref().unwrap_or(&upload_id),
        );
        self.ensure_unblocked(request.company_id, request.file_role, &key)?;

        let blob_ref = self
            .store
            .put(request.company_id, &upload_id, request.content)?;
        let now = Utc::now();

        let upload = Upload {
            id: upload_id.clone(),
            company_id: request.company_id.to_string(),
            file_role: request.file_role,
            file_name: request.file_name.to_string(),
            blob_ref: blob_ref.clone(),
            row_count: plan.total_records,
            column_count: plan.layout.width as u32,
            merge_status: MergeStatus::Pending,
            paired_upload_id: pairing.clone(),
            created_at: now,
            updated_at: now,
        };
        let job = UploadJob {
            id: job_id.clone(),
            company_id: request.company_id.to_string(),
            upload_id: upload_id.clone(),
            file_role: request.file_role,
            status: JobStatus::Pending,
            total_records: plan.total_records,
            processed_records: 0,
            skipped_records: 0,
            orphan_records: 0,
            conflict_records: 0,
            total_chunks: plan.total_chunks(),
            current_chunk: 0,
            paired_upload_id: pairing,
            error_message: None,
            blob_ref: blob_ref.clone(),
            plan,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };

        let inserted = self.db.with_tx(|tx| {
            upload_repo::insert(tx, &upload)?;
            let inserted = job_repo::insert(tx, &job)?;
            Ok((inserted, inserted))
        });

        match inserted {
            Ok(true) => {}
            Ok(false) => {
                self.discard_blob(&blob_ref);
                self.ensure_unblocked(request.company_id, request.file_role, &key)?;
                // Freed between the refused insert and the lookup.
                return Err(SchedulerError::ActiveJobExists {
                    pairing: key,
                    job_id: String::new(),
                }
                .into());
            }
            Err(e) => {
                self.discard_blob(&blob_ref);
                return Err(e.into());
            }
        }

        info!(
            "Submitted {} upload {} ({}, {} records in {} chunks) as job {}",
            job.file_role,
            upload_id,
            request.file_name,
            job.total_records,
            job.total_chunks,
            job_id
        );
        self.scheduler.enqueue(&job_id)?;
        Ok(job_id)
    }

    fn ensure_unblocked(&self, company_id: &str, file_role: FileRole, key: &str) -> Result<()> {
        let blocking = self
            .db
            .with_conn(|conn| job_repo::find_blocking(conn, company_id, file_role, key))?;
        match blocking {
            Some(active) => Err(SchedulerError::ActiveJobExists {
                pairing: active.pairing_key(),
                job_id: active.id,
            }
            .into()),
            None => Ok(()),
        }
    }

    /// The pairing key of a valid request: the paired primary upload of a
    /// verification file, `None` for a primary file.
    fn check_pairing(&self, request: &IngestionRequest<'_>) -> Result<Option<String>> {
        let invalid = |reason: &str| IngestError::InvalidPairing {
            reason: reason.to_string(),
        };

        match (request.file_role, request.paired_upload_id) {
            (FileRole::Primary, None) => Ok(None),
            (FileRole::Primary, Some(_)) => {
                Err(invalid("a primary upload cannot be paired on submission").into())
            }
            (FileRole::Verification, None) => {
                Err(invalid("a verification upload must name its primary upload").into())
            }
            (FileRole::Verification, Some(primary_id)) => {
                let primary = self
                    .db
                    .with_conn(|conn| upload_repo::find_by_id(conn, primary_id))?
                    .filter(|u| u.company_id == request.company_id);
                match primary {
                    Some(upload) if upload.file_role == FileRole::Primary => {
                        Ok(Some(upload.id))
                    }
                    Some(_) => Err(invalid("the paired upload is not a primary upload").into()),
                    None => Err(invalid("the paired primary upload does not exist").into()),
                }
            }
        }
    }

    fn discard_blob(&self, reference: &str) {
        if let Err(e) = self.store.delete(reference) {
            warn!("Failed to remove blob {}: {}", reference, e);
        }
    }

    pub fn job_status(&self, job_id: &str) -> Result<JobSnapshot> {
        let job = self
            .db
            .with_conn(|conn| job_repo::find_by_id(conn, job_id))?
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
        Ok(job.snapshot())
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<JobSnapshot> {
        Ok(self.scheduler.cancel(job_id)?)
    }

    /// Blocks until the job is terminal or `timeout` elapses.
    pub fn await_completion(&self, job_id: &str, timeout: Duration) -> Result<JobSnapshot> {
        Ok(self.waiter.wait(job_id, timeout)?)
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    pub fn get_upload(&self, company_id: &str, upload_id: &str) -> Result<Option<Upload>> {
        Ok(self
            .db
            .with_conn(|conn| upload_repo::find_by_id(conn, upload_id))?
            .filter(|u| u.company_id == company_id))
    }

    pub fn list_uploads(&self, company_id: &str) -> Result<Vec<Upload>> {
        Ok(self
            .db
            .with_conn(|conn| upload_repo::list_for_company(conn, company_id))?)
    }

    /// Deletes an upload and everything derived from it.
    ///
    /// A primary upload takes its records with it; a verification upload
    /// un-verifies the records it attached. Active jobs merging or paired
    /// with the upload are cancelled. Returns `false` if there was no such
    /// upload.
    pub fn delete_upload(&self, company_id: &str, upload_id: &str) -> Result<bool> {
        let Some(upload) = self.get_upload(company_id, upload_id)? else {
            return Ok(false);
        };

        let cancelled = self.db.with_tx(|tx| {
            let mut cancelled = Vec::new();
            for job in job_repo::list_active_for_upload(tx, upload_id)? {
                if job_repo::transition(tx, &job.id, JobStatus::Cancelled, None)? {
                    upload_repo::set_merge_status(tx, &job.upload_id, MergeStatus::Cancelled)?;
                    cancelled.push(job.id);
                }
            }

            if upload.file_role == FileRole::Verification {
                let detached = record_repo::detach_verification(tx, upload_id)?;
                info!("Detached {} verifications of upload {}", detached, upload_id);
            }
            upload_repo::clear_pairings_to(tx, upload_id)?;
            upload_repo::delete(tx, upload_id)?;
            Ok((cancelled, true))
        })?;

        for job_id in &cancelled {
            self.cancels.request(job_id);
            if let Some(job) = self.db.with_conn(|conn| job_repo::find_by_id(conn, job_id))? {
                self.progress.report(JobPhase::Finished, &job);
            }
        }
        self.discard_blob(&upload.blob_ref);

        info!(
            "Deleted {} upload {} ({} active jobs cancelled)",
            upload.file_role,
            upload_id,
            cancelled.len()
        );
        Ok(true)
    }

    /// Top-level summary of the company's records under `filters`.
    pub fn aggregate(&self, company_id: &str, filters: &Filters) -> Result<Summary> {
        Ok(self.aggregator.summary(company_id, filters)?)
    }

    /// Records under `filters`, in hierarchy order.
    pub fn list_records(
        &self,
        company_id: &str,
        filters: &Filters,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<VerificationRecord>> {
        let owned = Scope::filtered(filters.clone()).conditions();
        let conditions = borrow_conditions(&owned);
        Ok(self.db.with_conn(|conn| {
            record_repo::list(conn, company_id, &conditions, limit, offset)
        })?)
    }

    pub fn find_record(
        &self,
        company_id: &str,
        key: &CompositeKey,
    ) -> Result<Option<VerificationRecord>> {
        Ok(self
            .db
            .with_conn(|conn| record_repo::find(conn, company_id, key))?)
    }

    /// Saved settings, or the configured defaults.
    pub fn get_settings(&self, company_id: &str) -> Result<CalculationSettings> {
        Ok(self.aggregator.settings(company_id)?)
    }

    pub fn save_settings(
        &self,
        company_id: &str,
        settings: CalculationSettings,
    ) -> Result<CalculationSettings> {
        settings.validate()?;
        self.db
            .with_conn(|conn| settings_repo::save(conn, company_id, &settings))?;
        info!(
            "Saved settings for {}: {} min/field, {} h/day",
            company_id, settings.minutes_per_field, settings.hours_per_day
        );
        Ok(settings)
    }

    /// A fresh per-session cache and the tree loaded through it.
    pub fn hierarchy_session(
        &self,
        company_id: &str,
        filters: Filters,
    ) -> Result<(HierarchyCache, HierarchyTree)> {
        let cache = HierarchyCache::new(
            company_id,
            Arc::new(self.aggregator.clone()),
            &self.config.hierarchy,
        );
        let tree = HierarchyTree::load(&cache, filters)?;
        Ok((cache, tree))
    }

    /// Stops the workers once their current jobs finish.
    pub fn shutdown(self) {
        info!("Shutting down");
        self.scheduler.shutdown();
    }
}
