use std::path::Path;

use crate::config::schema::{DispatchMode, ImportConfig};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/import-config-v1.json");

/// Environment variable that overrides `dispatch.mode`.
pub const DISPATCH_MODE_ENV: &str = "GALLERIA_DISPATCH_MODE";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ImportConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config = load_config_from_str(&content)?;
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config_from_str(content: &str) -> Result<ImportConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: ImportConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Applies environment overrides on top of a parsed config.
pub fn apply_env_overrides(config: &mut ImportConfig) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(DISPATCH_MODE_ENV) {
        let mode: DispatchMode = value
            .parse()
            .map_err(|message: String| ConfigError::Validation { message })?;
        if mode != config.dispatch.mode {
            log::info!(
                "{} overrides dispatch mode {:?} -> {:?}",
                DISPATCH_MODE_ENV,
                config.dispatch.mode,
                mode
            );
        }
        config.dispatch.mode = mode;
    }
    Ok(())
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &ImportConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.source.submission_states.is_empty() {
        return Err(ConfigError::Validation {
            message: "source.submissionStates must not be empty".to_string(),
        });
    }

    let conversion = &config.conversion;
    if conversion.max_long_edge == 0 || conversion.thumbnail_size == 0 {
        return Err(ConfigError::Validation {
            message: "conversion dimensions must be positive".to_string(),
        });
    }
    if conversion.thumbnail_size > conversion.max_long_edge {
        return Err(ConfigError::Validation {
            message: format!(
                "conversion.thumbnailSize ({}) exceeds maxLongEdge ({})",
                conversion.thumbnail_size, conversion.max_long_edge
            ),
        });
    }

    if config.storage.staging_prefix == config.storage.artwork_prefix {
        return Err(ConfigError::Validation {
            message: "storage.stagingPrefix and storage.artworkPrefix must differ".to_string(),
        });
    }

    if config.dispatch.max_attempts == 0 || config.dispatch.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "dispatch.maxAttempts and dispatch.workerCount must be positive".to_string(),
        });
    }

    Ok(())
}
