// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Every check runs; all violations are reported together.

use crate::{ConfigError, ConfigResult, NeurokernelConfig};

/// Accepted values for `logging.level`
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validation errors that can occur during config validation
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    OutOfRange { field: String, reason: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange { field, reason } => {
                write!(f, "{} is out of range: {}", field, reason)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every violation
pub fn validate_config(config: &NeurokernelConfig) -> ConfigResult<()> {
    let errors = collect_errors(config);
    if errors.is_empty() {
        return Ok(());
    }

    let error_messages = errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n");
    Err(ConfigError::ValidationError(format!(
        "Configuration validation failed:\n{}",
        error_messages
    )))
}

/// All violations, in section order
pub fn collect_errors(config: &NeurokernelConfig) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();
    validate_cluster(config, &mut errors);
    validate_logging(config, &mut errors);
    errors
}

fn validate_cluster(config: &NeurokernelConfig, errors: &mut Vec<ConfigValidationError>) {
    let cluster = &config.cluster;
    if cluster.num_processes == 0 {
        errors.push(ConfigValidationError::OutOfRange {
            field: "cluster.num_processes".to_string(),
            reason: "at least one process is required".to_string(),
        });
    } else if cluster.rank >= cluster.num_processes {
        errors.push(ConfigValidationError::OutOfRange {
            field: "cluster.rank".to_string(),
            reason: format!(
                "rank {} does not exist in a {}-process cluster",
                cluster.rank, cluster.num_processes
            ),
        });
    }
}

fn validate_logging(config: &NeurokernelConfig, errors: &mut Vec<ConfigValidationError>) {
    let logging = &config.logging;
    if !LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.level".to_string(),
            reason: format!("'{}' is not one of {}", logging.level, LOG_LEVELS.join(", ")),
        });
    }
    if logging.retention_runs == 0 {
        errors.push(ConfigValidationError::OutOfRange {
            field: "logging.retention_runs".to_string(),
            reason: "must keep at least the current run".to_string(),
        });
    }
}
