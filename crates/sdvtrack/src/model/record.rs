use serde::Serialize;

use super::key::CompositeKey;
use super::row::ExtraAttributes;

/// A canonical, merged data point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub key: CompositeKey,
    /// Value after multi-source consolidation.
    pub source_value: String,
    /// Value exactly as the primary file carried it.
    pub raw_value: String,
    pub entered_by: Option<String>,
    pub entered_date: Option<String>,
    pub verified: bool,
    pub verified_by: Option<String>,
    pub verified_date: Option<String>,
    pub verification_status: Option<String>,
    pub extra: ExtraAttributes,
    pub primary_upload_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_upload_id: Option<String>,
}
