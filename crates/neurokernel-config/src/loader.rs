// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! Three tiers, later ones winning:
//! 1. TOML file (base values)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{validate_config, ConfigError, ConfigResult, NeurokernelConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "neurokernel.toml";

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "NEUROKERNEL_CONFIG_PATH";

/// Find the configuration file
///
/// Search order:
/// 1. `NEUROKERNEL_CONFIG_PATH` environment variable
/// 2. Current working directory: `./neurokernel.toml`
/// 3. Up to five parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by {} not found: {}",
            CONFIG_PATH_ENV,
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        search_paths.extend(cwd.ancestors().skip(1).take(5).map(|dir| dir.join(CONFIG_FILE_NAME)));
    }

    if let Some(path) = search_paths.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet {} to specify a custom location.",
        CONFIG_FILE_NAME, search_list, CONFIG_PATH_ENV
    )))
}

/// Load, override and validate the configuration
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, the file is searched for.
/// * `cli_args` - Optional CLI overrides keyed by dotted field name (`kernel.num_threads`)
///
/// # Errors
///
/// Returns error if the file is missing, contains invalid TOML, a CLI override
/// is malformed, or the result fails validation
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<NeurokernelConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: NeurokernelConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli)?;
    }

    validate_config(&config)?;
    Ok(config)
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `NEUROKERNEL_NUM_THREADS` -> `kernel.num_threads`
/// - `NEUROKERNEL_NUM_PROCESSES` -> `cluster.num_processes`
/// - `NEUROKERNEL_RANK` -> `cluster.rank`
/// - `NEUROKERNEL_MIN_DELETED_ELEMENTS` -> `source_table.min_deleted_elements`
/// - `NEUROKERNEL_LOG_LEVEL` -> `logging.level`
///
/// Values that do not parse are ignored.
pub fn apply_environment_overrides(config: &mut NeurokernelConfig) {
    if let Some(value) = env_parsed("NEUROKERNEL_NUM_THREADS") {
        config.kernel.num_threads = value;
    }
    if let Some(value) = env_parsed("NEUROKERNEL_NUM_PROCESSES") {
        config.cluster.num_processes = value;
    }
    if let Some(value) = env_parsed("NEUROKERNEL_RANK") {
        config.cluster.rank = value;
    }
    if let Some(value) = env_parsed("NEUROKERNEL_MIN_DELETED_ELEMENTS") {
        config.source_table.min_deleted_elements = value;
    }
    if let Ok(value) = env::var("NEUROKERNEL_LOG_LEVEL") {
        config.logging.level = value;
    }
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}

/// Apply CLI argument overrides to configuration
///
/// Keys are dotted field names, e.g. `{"cluster.rank": "1"}`.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` for an unknown key or a value that
/// does not parse
pub fn apply_cli_overrides(
    config: &mut NeurokernelConfig,
    cli_args: &HashMap<String, String>,
) -> ConfigResult<()> {
    for (key, value) in cli_args {
        match key.as_str() {
            "kernel.num_threads" => config.kernel.num_threads = parse_cli(key, value)?,
            "cluster.num_processes" => config.cluster.num_processes = parse_cli(key, value)?,
            "cluster.rank" => config.cluster.rank = parse_cli(key, value)?,
            "source_table.min_deleted_elements" => {
                config.source_table.min_deleted_elements = parse_cli(key, value)?
            }
            "source_table.initial_capacity_hint" => {
                config.source_table.initial_capacity_hint = parse_cli(key, value)?
            }
            "logging.level" => config.logging.level = value.clone(),
            "logging.file_logging" => {
                config.logging.file_logging = value.to_lowercase() == "true" || value == "1"
            }
            "logging.log_dir" => config.logging.log_dir = PathBuf::from(value),
            "logging.retention_days" => config.logging.retention_days = parse_cli(key, value)?,
            "logging.retention_runs" => config.logging.retention_runs = parse_cli(key, value)?,
            _ => {
                return Err(ConfigError::InvalidValue(format!(
                    "unknown configuration key '{}'",
                    key
                )))
            }
        }
    }
    Ok(())
}

fn parse_cli<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{} = '{}' does not parse", key, value)))
}
