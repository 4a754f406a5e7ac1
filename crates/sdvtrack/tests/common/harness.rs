//! Test harness for isolated test execution.
//!
//! Every harness owns its own database and blob store, so tests can run in
//! parallel.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use sdvtrack::config::Config;
use sdvtrack::{
    Database, FileRole, Filters, IngestionRequest, JobSnapshot, MemoryBlobStore, Result,
    SdvService, Summary,
};

pub const COMPANY: &str = "acme";

const WAIT: Duration = Duration::from_secs(20);

pub struct TestHarness {
    pub service: SdvService,
    /// In-memory harnesses expose their store for inspection.
    pub store: Option<MemoryBlobStore>,
    temp_dir: Option<TempDir>,
}

impl TestHarness {
    /// In-memory database and blob store.
    pub fn new(config: Config) -> Self {
        let store = MemoryBlobStore::new();
        let service = SdvService::with_parts(
            config,
            Database::open_in_memory().expect("Failed to open in-memory database"),
            Arc::new(store.clone()),
        )
        .expect("Failed to build service");
        Self {
            service,
            store: Some(store),
            temp_dir: None,
        }
    }

    /// SQLite file and blob directory under a temp directory.
    pub fn on_disk(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let service = Self::open_in(temp_dir.path(), config);
        Self {
            service,
            store: None,
            temp_dir: Some(temp_dir),
        }
    }

    /// Shuts the service down and opens a new one over the same files.
    pub fn reopen(self, config: Config) -> Self {
        let temp_dir = self.temp_dir.expect("reopen needs an on-disk harness");
        self.service.shutdown();
        let service = Self::open_in(temp_dir.path(), config);
        Self {
            service,
            store: None,
            temp_dir: Some(temp_dir),
        }
    }

    fn open_in(base: &Path, config: Config) -> SdvService {
        let config = Config {
            database_path: Some(base.join("sdv.db").to_string_lossy().into_owned()),
            storage_directory: Some(base.join("blobs").to_string_lossy().into_owned()),
            ..config
        };
        SdvService::open(config).expect("Failed to open service")
    }

    pub fn temp_path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(|d| d.path())
    }

    pub fn submit(&self, role: FileRole, csv: &str, paired: Option<&str>) -> Result<String> {
        self.service.submit_ingestion_job(IngestionRequest {
            company_id: COMPANY,
            file_name: match role {
                FileRole::Primary => "primary.csv",
                FileRole::Verification => "verification.csv",
            },
            file_role: role,
            content: csv.as_bytes(),
            paired_upload_id: paired,
        })
    }

    pub fn wait(&self, job_id: &str) -> JobSnapshot {
        self.service
            .await_completion(job_id, WAIT)
            .expect("Job did not finish")
    }

    /// Submits a primary file, waits for it and returns the final snapshot.
    pub fn run_primary(&self, csv: &str) -> JobSnapshot {
        let job_id = self
            .submit(FileRole::Primary, csv, None)
            .expect("Primary submission rejected");
        self.wait(&job_id)
    }

    pub fn run_verification(&self, csv: &str, primary_upload_id: &str) -> JobSnapshot {
        let job_id = self
            .submit(FileRole::Verification, csv, Some(primary_upload_id))
            .expect("Verification submission rejected");
        self.wait(&job_id)
    }

    pub fn summary(&self, filters: &Filters) -> Summary {
        self.service
            .aggregate(COMPANY, filters)
            .expect("Aggregation failed")
    }

    pub fn blob_count(&self) -> usize {
        self.store.as_ref().map(|s| s.len()).unwrap_or(0)
    }

    pub fn shutdown(self) {
        self.service.shutdown();
    }
}
