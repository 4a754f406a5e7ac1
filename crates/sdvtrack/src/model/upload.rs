use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::FileRole;

/// Merge state of an upload, mirroring its most recent job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Pending,
    Merging,
    Merged,
    Failed,
    Cancelled,
}

impl MergeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStatus::Pending => "pending",
            MergeStatus::Merging => "merging",
            MergeStatus::Merged => "merged",
            MergeStatus::Failed => "failed",
            MergeStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MergeStatus::Pending),
            "merging" => Some(MergeStatus::Merging),
            "merged" => Some(MergeStatus::Merged),
            "failed" => Some(MergeStatus::Failed),
            "cancelled" => Some(MergeStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch header of a submitted file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: String,
    pub company_id: String,
    pub file_role: FileRole,
    pub file_name: String,
    /// Reference of the stored file in the blob store.
    pub blob_ref: String,
    pub row_count: u64,
    pub column_count: u32,
    pub merge_status: MergeStatus,
    /// Primary uploads point at their active verification upload and
    /// verification uploads at the primary they verify.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paired_upload_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
