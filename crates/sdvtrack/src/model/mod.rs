//! Domain types shared across the ingestion, merge and query layers.

pub mod columns;
pub mod job;
pub mod key;
pub mod record;
pub mod row;
pub mod settings;
pub mod upload;

pub use columns::{normalize_header, required_columns, KEY_COLUMNS};
pub use job::{FileRole, JobSnapshot, JobStatus, UploadJob};
pub use key::{cmp_folded, eq_folded, fold_case, normalize_component, CompositeKey, MatchKey};
pub use record::VerificationRecord;
pub use row::{ChunkRows, ExtraAttributes, PrimaryRow, VerificationRow};
pub use settings::CalculationSettings;
pub use upload::{MergeStatus, Upload};
