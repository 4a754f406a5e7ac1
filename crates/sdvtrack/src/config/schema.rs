use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::CalculationSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file. Defaults to `~/.sdvtrack/data/sdvtrack.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Root of the file blob store. Defaults to `~/.sdvtrack/blobs`.
    #[serde(default)]
    pub storage_directory: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub chunk: ChunkConfig,
    #[serde(default)]
    pub hierarchy: HierarchyConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub consolidation: Vec<ConsolidationRule>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            storage_directory: None,
            worker_count: default_worker_count(),
            chunk: ChunkConfig::default(),
            hierarchy: HierarchyConfig::default(),
            defaults: DefaultsConfig::default(),
            consolidation: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }

    pub fn resolved_storage_directory(&self) -> Option<PathBuf> {
        match &self.storage_directory {
            Some(dir) => Some(PathBuf::from(dir)),
            None => dirs::home_dir().map(|h| h.join(".sdvtrack").join("blobs")),
        }
    }
}

/// Bounds of a single ingestion chunk. A chunk closes at whichever limit
/// it reaches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_max_rows() -> usize {
    500
}

fn default_max_bytes() -> u64 {
    1024 * 1024
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            max_bytes: default_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyConfig {
    /// How many children of an expanded node get their own children
    /// warmed in the background. `0` disables prefetch.
    #[serde(default = "default_prefetch_children")]
    pub prefetch_children: usize,
    /// Maximum number of cached child lists per session. Unbounded if unset.
    #[serde(default)]
    pub cache_capacity: Option<u64>,
}

fn default_prefetch_children() -> usize {
    3
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            prefetch_children: default_prefetch_children(),
            cache_capacity: None,
        }
    }
}

/// Estimate inputs used for companies without saved settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_minutes_per_field")]
    pub minutes_per_field: f64,
    #[serde(default = "default_hours_per_day")]
    pub hours_per_day: f64,
}

fn default_minutes_per_field() -> f64 {
    5.0
}

fn default_hours_per_day() -> f64 {
    8.0
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            minutes_per_field: default_minutes_per_field(),
            hours_per_day: default_hours_per_day(),
        }
    }
}

impl DefaultsConfig {
    pub fn settings(&self) -> CalculationSettings {
        CalculationSettings {
            minutes_per_field: self.minutes_per_field,
            hours_per_day: self.hours_per_day,
        }
    }
}

/// A group of fields that record one logical value under several keys.
///
/// `field_pattern` must contain a capture group; its first group is the
/// numeric group index used to order candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationRule {
    pub name: String,
    pub field_pattern: String,
    /// Restricts candidates to a single form when set.
    #[serde(default)]
    pub form: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Default `EnvFilter` directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}
