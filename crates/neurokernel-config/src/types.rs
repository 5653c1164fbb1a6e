// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! Each struct maps to one section of `neurokernel.toml`. Every section is
//! `#[serde(default)]`, so a partial file is accepted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NeurokernelConfig {
    pub kernel: KernelConfig,
    pub cluster: ClusterConfig,
    pub source_table: SourceTableConfig,
    pub logging: LoggingConfig,
}

/// Worker pool settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Worker threads per process; 0 = auto-detect
    pub num_threads: usize,
}

/// Position of this process in the cluster
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub num_processes: usize,
    pub rank: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_processes: 1,
            rank: 0,
        }
    }
}

/// Source table tuning
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceTableConfig {
    /// Truncations removing more than this many records also give the freed
    /// capacity back to the allocator
    pub min_deleted_elements: usize,
    /// Records reserved per synapse type when a thread partition is created
    pub initial_capacity_hint: usize,
}

impl Default for SourceTableConfig {
    fn default() -> Self {
        Self {
            min_deleted_elements: 1_000_000,
            initial_capacity_hint: 0,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
    pub file_logging: bool,
    pub log_dir: PathBuf,
    pub retention_days: u64,
    /// Run folders to keep, newest first
    pub retention_runs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: false,
            log_dir: PathBuf::from("./logs"),
            retention_days: 7,
            retention_runs: 10,
        }
    }
}
