pub mod aggregate;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod hierarchy;
pub mod ingest;
pub mod merge;
pub mod model;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod telemetry;

pub use aggregate::{Filters, NodePath, Rollup, Summary};
pub use broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use error::{
    ConfigError, HierarchyError, IngestError, Result, SchedulerError, SdvError, SettingsError,
    StorageError,
};
pub use hierarchy::{HierarchyCache, HierarchyNode, HierarchyTree};
pub use model::{
    CalculationSettings, CompositeKey, FileRole, JobSnapshot, JobStatus, MergeStatus, Upload,
    VerificationRecord,
};
pub use service::{IngestionRequest, SdvService};
pub use storage::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use telemetry::init_logging;
