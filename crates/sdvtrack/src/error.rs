use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::model::{FileRole, JobStatus};

#[derive(Error, Debug)]
pub enum SdvError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid consolidation pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },
}

/// Submission-level failures. None of these leave partial state behind.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Missing required {role} columns: {}", .missing.join(", "))]
    Validation {
        role: FileRole,
        missing: Vec<String>,
    },

    #[error("File has no header row")]
    EmptyHeader,

    #[error("Failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid pairing: {reason}")]
    InvalidPairing { reason: String },
}

/// A single malformed data row. Skipped and counted; never fails a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("row {row}: blank value in key column '{column}'")]
    BlankKey { row: u64, column: &'static str },

    #[error("row {row}: expected {expected} fields, found {found}")]
    MissingFields { row: u64, expected: usize, found: usize },

    #[error("row {row}: {reason}")]
    Malformed { row: u64, reason: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read blob '{reference}': {source}")]
    Read {
        reference: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write blob '{reference}': {source}")]
    Write {
        reference: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete blob '{reference}': {source}")]
    Delete {
        reference: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob reference: {0}")]
    InvalidReference(String),

    #[error("Range {start}..{end} is outside blob '{reference}' of {len} bytes")]
    RangeOutOfBounds {
        reference: String,
        start: u64,
        end: u64,
        len: u64,
    },

    #[error("Blob store lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job '{job_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Pairing '{pairing}' already has an active job '{job_id}'")]
    ActiveJobExists { pairing: String, job_id: String },

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Timed out after {waited:?} waiting for job '{job_id}'")]
    WaitTimeout { job_id: String, waited: Duration },

    #[error("Failed to build wait runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Invalid calculation settings: {message}")]
    Invalid { message: String },
}

#[derive(Error, Debug, Clone)]
pub enum HierarchyError {
    #[error("Rollup query failed: {0}")]
    Query(#[source] Arc<DatabaseError>),

    #[error("No loaded node at '{0}'")]
    NodeNotFound(String),
}

pub type Result<T> = std::result::Result<T, SdvError>;
