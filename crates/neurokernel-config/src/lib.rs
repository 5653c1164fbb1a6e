// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Neurokernel Configuration
//!
//! Type-safe configuration for the connectivity kernel:
//! - TOML file parsing (`neurokernel.toml`)
//! - Environment variable overrides (`NEUROKERNEL_*`)
//! - CLI argument overrides (dotted keys)
//! - Validation that reports every violation at once
//!
//! ## Usage
//!
//! ```rust,no_run
//! use neurokernel_config::load_config;
//!
//! let config = load_config(None, None).expect("Failed to load config");
//! println!("Threads: {}", config.kernel.num_threads);
//! println!("Rank: {}/{}", config.cluster.rank, config.cluster.num_processes);
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{
    apply_cli_overrides, apply_environment_overrides, find_config_file, load_config,
    CONFIG_FILE_NAME, CONFIG_PATH_ENV,
};
pub use types::*;
pub use validation::{collect_errors, validate_config, ConfigValidationError, LOG_LEVELS};

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found. Searched: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax: {0}")]
    ParseError(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
