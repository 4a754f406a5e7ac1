use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub(crate) fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.chunk.max_rows == 0 || config.chunk.max_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "chunk.max_rows and chunk.max_bytes must be greater than zero".to_string(),
        });
    }

    config
        .defaults
        .settings()
        .validate()
        .map_err(|e| ConfigError::Validation {
            message: format!("defaults: {}", e),
        })?;

    let mut names = HashSet::new();
    for rule in &config.consolidation {
        if !names.insert(rule.name.as_str()) {
            return Err(ConfigError::InvalidPattern {
                name: rule.name.clone(),
                reason: "Duplicate consolidation rule name".to_string(),
            });
        }

        let regex = regex::Regex::new(&rule.field_pattern).map_err(|e| {
            ConfigError::InvalidPattern {
                name: rule.name.clone(),
                reason: e.to_string(),
            }
        })?;

        // Group 0 is the whole match.
        if regex.captures_len() < 2 {
            return Err(ConfigError::InvalidPattern {
                name: rule.name.clone(),
                reason: "Pattern must contain a capture group for the group index".to_string(),
            });
        }
    }

    Ok(())
}
