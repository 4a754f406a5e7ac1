//! Upload jobs and their state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::ChunkPlan;

/// Which side of the reconciliation a file feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Primary,
    Verification,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Primary => "primary",
            FileRole::Verification => "verification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(FileRole::Primary),
            "verification" => Some(FileRole::Verification),
            _ => None,
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an upload job.
///
/// `pending → processing → {completed, failed}`, and `pending | processing →
/// cancelled`. The three right-hand states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// The states a job may legally move to `target` from.
    pub fn sources_of(target: JobStatus) -> &'static [JobStatus] {
        match target {
            JobStatus::Pending => &[],
            JobStatus::Processing => &[JobStatus::Pending],
            JobStatus::Completed | JobStatus::Failed => &[JobStatus::Processing],
            JobStatus::Cancelled => &[JobStatus::Pending, JobStatus::Processing],
        }
    }

    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        Self::sources_of(target).contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted ingestion job. Mutated only by the scheduler.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub id: String,
    pub company_id: String,
    /// The upload this job merges.
    pub upload_id: String,
    pub file_role: FileRole,
    pub status: JobStatus,
    pub total_records: u64,
    /// Rows consumed by committed chunks, skipped rows included.
    pub processed_records: u64,
    pub skipped_records: u64,
    pub orphan_records: u64,
    pub conflict_records: u64,
    pub total_chunks: u32,
    /// Number of chunks committed so far; also the index of the next chunk.
    pub current_chunk: u32,
    /// For verification jobs, the primary upload being verified.
    pub paired_upload_id: Option<String>,
    pub error_message: Option<String>,
    /// Reference of the source file in the blob store.
    pub blob_ref: String,
    pub plan: ChunkPlan,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Pairing key of a job.
///
/// Primary jobs replace their company's record set and prune what they did
/// not see, so they are keyed by company. Verification jobs are keyed by the
/// primary upload they pair with.
pub fn pairing_key(company_id: &str, file_role: FileRole, paired_upload_id: &str) -> String {
    match file_role {
        FileRole::Primary => format!("company:{}", company_id),
        FileRole::Verification => format!("upload:{}", paired_upload_id),
    }
}

impl UploadJob {
    /// The key no two pending or processing jobs may share. See
    /// [`pairing_key`].
    pub fn pairing_key(&self) -> String {
        pairing_key(
            &self.company_id,
            self.file_role,
            self.paired_upload_id.as_deref().unwrap_or(&self.upload_id),
        )
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            upload_id: self.upload_id.clone(),
            file_role: self.file_role,
            status: self.status,
            progress: progress_ratio(self.processed_records, self.total_records, self.status),
            processed_records: self.processed_records,
            total_records: self.total_records,
            current_chunk: self.current_chunk,
            total_chunks: self.total_chunks,
            skipped_records: self.skipped_records,
            orphan_records: self.orphan_records,
            conflict_records: self.conflict_records,
            error_message: self.error_message.clone(),
        }
    }
}

/// Externally observable job state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub upload_id: String,
    pub file_role: FileRole,
    pub status: JobStatus,
    /// `processed_records / total_records`, in `0.0..=1.0`.
    pub progress: f64,
    pub processed_records: u64,
    pub total_records: u64,
    pub current_chunk: u32,
    pub total_chunks: u32,
    pub skipped_records: u64,
    pub orphan_records: u64,
    pub conflict_records: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

fn progress_ratio(processed: u64, total: u64, status: JobStatus) -> f64 {
    if total == 0 {
        return if status == JobStatus::Completed { 1.0 } else { 0.0 };
    }
    (processed.min(total) as f64) / (total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("superseded"), None);
    }

    #[test]
    fn test_primary_jobs_share_their_company_pairing() {
        assert_eq!(pairing_key("acme", FileRole::Primary, "up-1"), "company:acme");
        assert_eq!(
            pairing_key("acme", FileRole::Primary, "up-1"),
            pairing_key("acme", FileRole::Primary, "up-2")
        );
        assert_ne!(
            pairing_key("acme", FileRole::Primary, "up-1"),
            pairing_key("globex", FileRole::Primary, "up-1")
        );
        assert_eq!(
            pairing_key("acme", FileRole::Verification, "up-1"),
            "upload:up-1"
        );
    }

    #[test]
    fn test_legal_transitions() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Cancelled.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_progress_ratio() {
        assert_eq!(progress_ratio(0, 0, JobStatus::Processing), 0.0);
        assert_eq!(progress_ratio(0, 0, JobStatus::Completed), 1.0);
        assert_eq!(progress_ratio(50, 200, JobStatus::Processing), 0.25);
        assert_eq!(progress_ratio(250, 200, JobStatus::Processing), 1.0);
    }

    #[test]
    fn test_file_role_strings() {
        assert_eq!(FileRole::parse("primary"), Some(FileRole::Primary));
        assert_eq!(FileRole::parse("verification"), Some(FileRole::Verification));
        assert_eq!(FileRole::parse("other"), None);
        assert_eq!(FileRole::Verification.to_string(), "verification");
    }
}
