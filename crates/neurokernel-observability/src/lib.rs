// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # neurokernel-observability
//!
//! Logging setup shared by the neurokernel crates and tools, with per-crate
//! debug flag support.
//!
//! ## Features
//! - `file-logging`: JSON run logs in timestamped folders with retention

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Crate names accepted by `--debug-<crate>` and `NEUROKERNEL_DEBUG=all`
pub const KNOWN_CRATES: &[&str] = &[
    "neurokernel",
    "neurokernel-connectivity",
    "neurokernel-config",
    "neurokernel-observability",
];
